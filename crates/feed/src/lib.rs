pub mod feed;

pub use feed::{FeedEvent, FeedHandle, FeedOptions, FeedSnapshot, TraceFeed};
