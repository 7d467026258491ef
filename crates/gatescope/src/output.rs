use chrono::SecondsFormat;
use gatescope_core::model::{self, Trace};
use owo_colors::OwoColorize;

pub fn print_trace_line(trace: &Trace) {
    let status = match trace.status.as_str() {
        model::STATUS_SUCCESS => trace.status.green().to_string(),
        model::STATUS_ERROR => trace.status.red().to_string(),
        model::STATUS_PENDING => trace.status.yellow().to_string(),
        _ => trace.status.clone(),
    };

    let trigger = if trace.trigger.is_empty() {
        "-"
    } else {
        trace.trigger.as_str()
    };

    print!(
        "{} {} {} trigger={} duration={}ms root=\"{}\"",
        trace.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        trace.id.cyan(),
        status,
        trigger,
        trace.total_duration,
        trace.root_span.name
    );
    if let Some(message) = &trace.root_span.error_message {
        print!(" error=\"{message}\"");
    }
    println!();
}

pub fn print_traces_human(traces: &[Trace]) {
    for trace in traces {
        print_trace_line(trace);
    }
    println!("-- {} traces --", traces.len());
}
