use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::span::Span;

/// One complete recorded gateway request: a rooted tree of spans plus
/// aggregate metadata. The `id` is the sole merge/dedup key across the
/// history fetch and the push stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub id: String,
    /// RFC3339 on the wire.
    pub timestamp: DateTime<Utc>,
    /// Milliseconds, for display.
    pub total_duration: i64,
    pub status: String,
    /// Originator label (`user`, `webhook`, `system`, ...). May be empty.
    #[serde(default)]
    pub trigger: String,
    pub root_span: Span,
}

impl Trace {
    pub fn is_error(&self) -> bool {
        self.status == crate::model::STATUS_ERROR
    }
}
