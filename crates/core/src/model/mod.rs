pub mod span;
pub mod trace;

pub use span::Span;
pub use trace::Trace;

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";
pub const STATUS_PENDING: &str = "pending";

pub const KIND_CORE: &str = "core";
pub const KIND_TOOL: &str = "tool";
