mod sequence;

pub use sequence::compile;
