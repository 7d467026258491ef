use serde::{Deserialize, Serialize};

use crate::model::STATUS_ERROR;

/// One unit of execution within a trace. Spans form a strict tree: every span
/// is owned by exactly one parent, so the structure carries no cycles.
///
/// Field names follow the gateway's wire format (camelCase, Unix-milli times).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub id: String,
    pub name: String,
    /// Attribution tag: `core`, `tool`, or another backend-defined kind.
    /// Spans without an explicit `service_name` are attributed to the gateway
    /// core regardless of kind.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    /// Unix milliseconds.
    pub start_time: i64,
    /// Unix milliseconds.
    pub end_time: i64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Ordered child calls. The stored order is the rendering order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Span>,
}

impl Span {
    /// Duration in milliseconds, clamped to 0 when either bound is missing
    /// (non-positive) or the ordering is inverted.
    pub fn duration_ms(&self) -> i64 {
        if self.start_time <= 0 || self.end_time <= 0 {
            return 0;
        }
        (self.end_time - self.start_time).max(0)
    }

    pub fn is_error(&self) -> bool {
        self.status == STATUS_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start: i64, end: i64) -> Span {
        Span {
            id: "s1".into(),
            name: "fetch".into(),
            kind: "tool".into(),
            service_name: None,
            start_time: start,
            end_time: end,
            status: "success".into(),
            input: None,
            output: None,
            error_message: None,
            children: Vec::new(),
        }
    }

    #[test]
    fn duration_clamps_inverted_and_missing_bounds() {
        assert_eq!(span(1_000, 1_250).duration_ms(), 250);
        assert_eq!(span(1_250, 1_000).duration_ms(), 0);
        assert_eq!(span(0, 1_000).duration_ms(), 0);
        assert_eq!(span(1_000, 0).duration_ms(), 0);
        assert_eq!(span(-5, 10).duration_ms(), 0);
    }

    #[test]
    fn deserializes_wire_format() {
        let raw = r#"{
            "id": "abc-0",
            "name": "get_weather",
            "type": "tool",
            "serviceName": "Weather API",
            "startTime": 1700000000000,
            "endTime": 1700000000120,
            "status": "error",
            "errorMessage": "upstream timeout",
            "children": []
        }"#;
        let span: Span = serde_json::from_str(raw).unwrap();
        assert_eq!(span.kind, "tool");
        assert_eq!(span.service_name.as_deref(), Some("Weather API"));
        assert_eq!(span.duration_ms(), 120);
        assert!(span.is_error());
        assert_eq!(span.error_message.as_deref(), Some("upstream timeout"));
    }

    #[test]
    fn children_default_to_empty() {
        let raw = r#"{
            "id": "abc-0",
            "name": "route",
            "type": "core",
            "startTime": 1,
            "endTime": 2,
            "status": "success"
        }"#;
        let span: Span = serde_json::from_str(raw).unwrap();
        assert!(span.children.is_empty());
        assert!(span.service_name.is_none());
    }
}
