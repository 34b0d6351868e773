//! `switchboard replay`: drive the engine from a JSONL event stream.
//!
//! One event per line, tagged by `event`:
//!
//! ```text
//! {"event":"register","agent_id":"1"}
//! {"event":"agent_online","agent_id":"1"}
//! {"event":"notification","customer_id":"42","content":"hi","received_at":"2026-05-04T09:00:00Z"}
//! {"event":"agent_offline","agent_id":"1"}
//! {"event":"redispatch","fingerprint":"42:..."}
//! {"event":"drain"}
//! ```
//!
//! Each line produces one JSON result on stdout. Failures are reported in
//! place and do not stop the replay.

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::{Context, Result},
    clap::Args,
    serde::Deserialize,
    serde_json::{Value, json},
    switchboard_common::{InboundNotification, Notification},
    switchboard_config::SwitchboardConfig,
    switchboard_metrics::MetricsHandle,
    switchboard_routing::{AssignmentCoordinator, Error, LogSink},
    switchboard_store::{MemoryStore, TimeoutStore},
    tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    tracing::{info, warn},
};

#[derive(Args)]
pub struct ReplayArgs {
    /// JSONL file to read, or `-` for stdin.
    #[arg(default_value = "-")]
    input: PathBuf,

    /// Print the final state (messages, agents, sessions) after the stream.
    #[arg(long)]
    snapshot: bool,

    /// Print collected metrics in Prometheus text format to stderr at the end.
    #[arg(long)]
    metrics: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Event {
    Register { agent_id: String },
    AgentOnline { agent_id: String },
    AgentOffline { agent_id: String },
    Notification(InboundNotification),
    /// Retry one pending message.
    Redispatch { fingerprint: String },
    /// Retry every pending message, oldest first.
    Drain,
}

pub async fn handle_replay(
    config: &SwitchboardConfig,
    args: &ReplayArgs,
    metrics: &MetricsHandle,
) -> Result<()> {
    let store = TimeoutStore::new(
        MemoryStore::new(),
        config.store.op_timeout(),
        config.store.lease_timeout(),
    );
    let coordinator = AssignmentCoordinator::from_config(
        Arc::new(store),
        &config.store.namespace,
        &config.dispatch,
        Arc::new(LogSink),
    )?;

    for seed in &config.agents {
        coordinator.registry().register(&seed.id).await?;
        if seed.online {
            coordinator.registry().set_online(&seed.id).await?;
        }
    }
    info!(agents = config.agents.len(), "seed agents registered");

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = if args.input.as_os_str() == "-" {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        let file = tokio::fs::File::open(&args.input)
            .await
            .with_context(|| format!("opening {}", args.input.display()))?;
        Box::new(BufReader::new(file))
    };

    let mut lines = reader.lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let result = match serde_json::from_str::<Event>(&line) {
            Ok(event) => apply(&coordinator, event).await,
            Err(e) => {
                warn!(line = line_no, error = %e, "unreadable event");
                json!({ "error": format!("unreadable event: {e}") })
            },
        };
        println!("{}", json!({ "line": line_no, "result": result }));
    }

    if args.snapshot {
        println!(
            "{}",
            json!({ "snapshot": serde_json::to_value(coordinator.snapshot().await?)? })
        );
    }
    if args.metrics {
        eprint!("{}", metrics.render());
    }
    Ok(())
}

async fn apply(coordinator: &AssignmentCoordinator, event: Event) -> Value {
    let registry = coordinator.registry();
    let result = match event {
        Event::Register { agent_id } => registry
            .register(&agent_id)
            .await
            .map(|agent| json!({ "agent": agent })),
        Event::AgentOnline { agent_id } => registry
            .set_online(&agent_id)
            .await
            .map(|agent| json!({ "agent": agent })),
        Event::AgentOffline { agent_id } => registry
            .set_offline(&agent_id)
            .await
            .map(|agent| json!({ "agent": agent })),
        Event::Notification(raw) => match Notification::try_from(raw) {
            Ok(notification) => coordinator
                .route(notification)
                .await
                .map(|outcome| json!(outcome)),
            Err(e) => Err(Error::InvalidInput(e)),
        },
        Event::Redispatch { fingerprint } => coordinator
            .redispatch(&fingerprint)
            .await
            .map(|outcome| json!(outcome)),
        Event::Drain => drain(coordinator).await,
    };
    result.unwrap_or_else(|e| error_value(&e))
}

async fn drain(coordinator: &AssignmentCoordinator) -> Result<Value, Error> {
    let mut outcomes = Vec::new();
    for message in coordinator.pending().await? {
        let outcome = match coordinator.redispatch(&message.fingerprint).await {
            Ok(outcome) => json!(outcome),
            Err(Error::NoAgentAvailable) => {
                outcomes.push(error_value(&Error::NoAgentAvailable));
                break;
            },
            Err(e) => error_value(&e),
        };
        outcomes.push(outcome);
    }
    Ok(json!({ "drained": outcomes }))
}

fn error_value(e: &Error) -> Value {
    json!({ "error": e.to_string(), "retryable": e.is_retryable() })
}
