use std::fmt::Write;

use gatescope_core::model::span::Span;
use gatescope_core::model::trace::Trace;

const CORE_ID: &str = "Core";
const CORE_LABEL: &str = "Gateway";
const DEFAULT_INITIATOR: &str = "User";
const FALLBACK_SERVICE_ID: &str = "Service";

/// Compiles one trace into Mermaid `sequenceDiagram` source.
///
/// Pure and deterministic: the same trace always yields the same text, so
/// callers can snapshot the output. Structurally valid traces never fail to
/// compile; missing timestamps, an empty trigger, and caller == callee are
/// all absorbed by documented fallbacks.
pub fn compile(trace: &Trace) -> String {
    let initiator = initiator_id(&trace.trigger);

    let mut out = String::from("sequenceDiagram\n");
    emit_participant(&mut out, &initiator, &initiator);
    emit_participant(&mut out, CORE_ID, CORE_LABEL);

    let mut services: Vec<(String, String)> = Vec::new();
    collect_services(&trace.root_span, &mut services);
    for (id, label) in &services {
        emit_participant(&mut out, id, label);
    }

    emit_span(&mut out, &trace.root_span, &initiator);
    out
}

/// The initiator participant is the capitalized trigger, `User` when absent.
fn initiator_id(trigger: &str) -> String {
    let trimmed = trigger.trim();
    if trimmed.is_empty() {
        return DEFAULT_INITIATOR.to_string();
    }
    sanitize_id(&capitalize(trimmed))
}

fn emit_participant(out: &mut String, id: &str, label: &str) {
    if id == label || label.is_empty() {
        let _ = writeln!(out, "    participant {id}");
    } else {
        let _ = writeln!(out, "    participant {id} as {label}");
    }
}

/// Depth-first pre-order walk registering each `serviceName` once, in
/// first-encountered order.
fn collect_services(span: &Span, seen: &mut Vec<(String, String)>) {
    if let Some(name) = &span.service_name {
        let id = sanitize_id(name);
        if !seen.iter().any(|(existing, _)| *existing == id) {
            seen.push((id, name.clone()));
        }
    }
    for child in &span.children {
        collect_services(child, seen);
    }
}

/// Emits the call arrow for `span`, recurses into its children in stored
/// order, then emits the return arrow back to `caller`. Self-calls skip the
/// return arrow; the self-message notation already implies the round trip.
fn emit_span(out: &mut String, span: &Span, caller: &str) {
    let callee = span_participant(span);
    let label = span.name.replace(':', " ");

    let _ = writeln!(out, "    {caller}->>{callee}: {label}");

    for child in &span.children {
        emit_span(out, child, &callee);
    }

    if callee != caller {
        let _ = writeln!(out, "    {callee}-->>{caller}: {}", return_label(span));
    }
}

/// A span with a `serviceName` belongs to that service; everything else is
/// attributed to the gateway core, whatever its kind tag says.
fn span_participant(span: &Span) -> String {
    match &span.service_name {
        Some(name) => sanitize_id(name),
        None => CORE_ID.to_string(),
    }
}

fn return_label(span: &Span) -> String {
    let duration = span.duration_ms();
    if duration > 0 {
        if span.is_error() {
            format!("{duration}ms (Error)")
        } else {
            format!("{duration}ms")
        }
    } else if span.is_error() {
        "Error".to_string()
    } else {
        "return".to_string()
    }
}

/// Mermaid identifiers: every character outside `[A-Za-z0-9]` becomes `_`.
fn sanitize_id(raw: &str) -> String {
    let id: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if id.is_empty() {
        FALLBACK_SERVICE_ID.to_string()
    } else {
        id
    }
}

fn capitalize(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
