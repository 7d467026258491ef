mod output;
mod telemetry;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use gatescope_core::config::Config;
use gatescope_core::model::Trace;
use gatescope_feed::{FeedEvent, FeedOptions, TraceFeed};
use tokio::sync::broadcast;

use crate::output::{print_trace_line, print_traces_human};
use crate::telemetry::init_cli_tracing;

#[derive(Parser, Debug)]
#[command(name = "gatescope")]
#[command(about = "Gateway trace inspection utility")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Follow the live trace stream")]
    Watch {
        #[arg(long)]
        history_url: Option<String>,
        #[arg(long)]
        stream_url: Option<String>,
        #[arg(long, help = "Start with live messages discarded")]
        paused: bool,
        #[arg(long, help = "Skip the initial history fetch")]
        no_history: bool,
    },
    #[command(about = "Fetch the historical trace collection")]
    History {
        #[arg(long)]
        history_url: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    #[command(about = "Compile a trace into Mermaid sequence-diagram source")]
    Diagram {
        #[arg(help = "Trace JSON file; reads stdin when omitted")]
        input: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_cli_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            history_url,
            stream_url,
            paused,
            no_history,
        } => run_watch(history_url, stream_url, paused, no_history, cli.json).await,
        Commands::History { history_url, limit } => run_history(history_url, limit, cli.json).await,
        Commands::Diagram { input } => run_diagram(input),
    }
}

async fn run_watch(
    history_url: Option<String>,
    stream_url: Option<String>,
    paused: bool,
    no_history: bool,
    json: bool,
) -> anyhow::Result<()> {
    let cfg = Config::load().context("load configuration")?;
    let mut opts = FeedOptions::from_config(&cfg);
    if let Some(url) = history_url {
        opts.history_url = url;
    }
    if let Some(url) = stream_url {
        opts.stream_url = url;
    }
    if paused {
        opts.initial_paused = true;
    }
    if no_history {
        opts.fetch_history = false;
    }

    // The receiver handed out by spawn predates the actor, so even an
    // instantly-resolving history fetch is printed.
    let (feed, mut events) = TraceFeed::spawn(opts)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(FeedEvent::Connected) => {
                    tracing::info!("stream connected");
                }
                Ok(FeedEvent::Disconnected) => {
                    tracing::warn!("stream closed, reconnecting");
                }
                Ok(FeedEvent::HistoryLoaded(count)) => {
                    tracing::info!(count, "history loaded");
                    let traces = feed.traces();
                    if json {
                        for trace in &traces {
                            println!("{}", serde_json::to_string(trace)?);
                        }
                    } else {
                        print_traces_human(&traces);
                    }
                }
                Ok(FeedEvent::Merged(trace)) => {
                    if json {
                        println!("{}", serde_json::to_string(&trace)?);
                    } else {
                        print_trace_line(&trace);
                    }
                }
                Ok(FeedEvent::Cleared) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    feed.shutdown();
    Ok(())
}

async fn run_history(
    history_url: Option<String>,
    limit: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let cfg = Config::load().context("load configuration")?;
    let url = history_url.unwrap_or(cfg.history_url);

    let client = reqwest::Client::builder()
        .timeout(cfg.request_timeout)
        .build()
        .context("build http client")?;

    let mut request = client.get(&url);
    if let Some(limit) = limit {
        request = request.query(&[("limit", limit.to_string())]);
    }

    let response = request.send().await.context("request trace history")?;
    if !response.status().is_success() {
        anyhow::bail!("history request failed with status {}", response.status());
    }
    let traces: Vec<Trace> = response.json().await.context("decode trace history")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&traces)?);
    } else {
        print_traces_human(&traces);
    }
    Ok(())
}

fn run_diagram(input: Option<PathBuf>) -> anyhow::Result<()> {
    let raw = match input {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display()))?,
        None => std::io::read_to_string(std::io::stdin()).context("read trace from stdin")?,
    };
    let trace: Trace = serde_json::from_str(&raw).context("decode trace JSON")?;
    print!("{}", gatescope_diagram::compile(&trace));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_flags_parse() {
        let cli = Cli::try_parse_from([
            "gatescope",
            "watch",
            "--paused",
            "--no-history",
            "--stream-url",
            "ws://localhost:9000/api/traces/ws",
        ])
        .unwrap();
        match cli.command {
            Commands::Watch {
                stream_url,
                paused,
                no_history,
                ..
            } => {
                assert!(paused);
                assert!(no_history);
                assert_eq!(
                    stream_url.as_deref(),
                    Some("ws://localhost:9000/api/traces/ws")
                );
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn json_flag_is_global() {
        let cli = Cli::try_parse_from(["gatescope", "history", "--limit", "5", "--json"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::History { limit, .. } => assert_eq!(limit, Some(5)),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn diagram_input_is_optional() {
        let cli = Cli::try_parse_from(["gatescope", "diagram"]).unwrap();
        match cli.command {
            Commands::Diagram { input } => assert!(input.is_none()),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
