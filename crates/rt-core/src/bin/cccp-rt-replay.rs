//! Replay recorded dispatch traffic through the real-time engine
//!
//! Reads one JSON event per line, feeds it to a client running on virtual
//! time and prints every request sent to dispatch and every delivery as a
//! JSON line on stdout.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use cccp_infra_common::logging::{log_welcome, setup_logging};
use cccp_rt_core::dispatch::{FieldValue, ListItem};
use cccp_rt_core::recording::{RecordingSink, RecordingTransport};
use cccp_rt_core::{DispatchClient, ListResponse, ObjectResponse, RtConfig};
use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "cccp-rt-replay")]
#[command(about = "Replay dispatch rows and print the resulting deliveries")]
struct Args {
    /// Events file, one JSON object per line; stdin when omitted
    input: Option<PathBuf>,

    /// Engine configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, overrides the configuration
    #[arg(short, long)]
    log_level: Option<String>,

    /// Advance the clock this much after the last event, in milliseconds
    #[arg(long, default_value = "60000")]
    drain_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Event {
    StartViews,
    WithdrawalView {
        states: Vec<String>,
    },
    List {
        idx: u32,
        items: Vec<ListItem>,
    },
    /// Values by field index, or by field name
    Object {
        idx: u32,
        object_id: String,
        #[serde(default)]
        values: Vec<FieldValue>,
        #[serde(default)]
        fields: Map<String, Value>,
    },
    Subscribe {
        target: String,
        kind: String,
        indicators: Vec<String>,
        #[serde(default)]
        profile: Option<String>,
    },
    SubscribeProfile {
        target: String,
        indicators: Vec<String>,
    },
    SubscribeCommunication {
        target: String,
        indicators: Vec<String>,
        profiles: Vec<String>,
        queues: Vec<String>,
    },
    SubscribeRecord,
    SubscribeAutorecord,
    SubscribeHistory,
    Unsubscribe {
        id: String,
        #[serde(default)]
        indicators: Vec<String>,
    },
    Advance {
        ms: u64,
    },
    Reset,
}

type Client = DispatchClient<RecordingTransport, RecordingSink>;

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = RtConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    setup_logging(&config.logging).context("setting up logging")?;
    log_welcome("cccp-rt-replay", env!("CARGO_PKG_VERSION"));

    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let transport = RecordingTransport::new();
    let sink = RecordingSink::new();
    let mut client = DispatchClient::new(config, transport.clone(), sink.clone(), Instant::now())?;
    let mut out = io::stdout().lock();

    let mut count = 0usize;
    for (number, line) in reader.lines().enumerate() {
        let line = line.context("reading events")?;
        if line.trim().is_empty() {
            continue;
        }
        let event: Event = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!("Line {} skipped: {}", number + 1, e);
                continue;
            }
        };
        if let Some(response) = apply(&mut client, event) {
            writeln!(out, "{}", json!({ "response": response }))?;
        }
        count += 1;
        flush(&transport, &sink, &mut out)?;
    }

    client.advance(Duration::from_millis(args.drain_ms));
    flush(&transport, &sink, &mut out)?;
    info!("{} events replayed", count);
    Ok(())
}

fn apply(client: &mut Client, event: Event) -> Option<Value> {
    let outcome = match event {
        Event::StartViews => {
            client.start_views();
            return None;
        }
        Event::WithdrawalView { states } => {
            client.set_withdrawal_view(&states);
            return None;
        }
        Event::List { idx, items } => {
            client.on_list_response(idx, &ListResponse { items });
            return None;
        }
        Event::Object {
            idx,
            object_id,
            mut values,
            fields,
        } => {
            if let Some(view) = client.view(idx) {
                for (name, value) in fields {
                    match view.field_index(&name) {
                        Some(field_index) => values.push(FieldValue {
                            field_index,
                            value: Some(value),
                        }),
                        None => warn!("Field {} is not in view {}", name, idx),
                    }
                }
            }
            client
                .on_object_response(idx, &object_id, &ObjectResponse { values })
                .map(|_| Value::Null)
        }
        Event::Subscribe {
            target,
            kind,
            indicators,
            profile,
        } => client.subscribe(&target, &kind, &indicators, profile.as_deref()),
        Event::SubscribeProfile { target, indicators } => client.subscribe_profile(&target, &indicators),
        Event::SubscribeCommunication {
            target,
            indicators,
            profiles,
            queues,
        } => Ok(client.subscribe_communication(&target, &indicators, &profiles, &queues)),
        Event::SubscribeRecord => Ok(json!(client.subscribe_record_values())),
        Event::SubscribeAutorecord => Ok(json!(client.subscribe_autorecord_values())),
        Event::SubscribeHistory => Ok(json!(client.subscribe_history_values())),
        Event::Unsubscribe { id, indicators } => client
            .unsubscribe(&id, &indicators)
            .map(|update| update.unwrap_or(Value::Null)),
        Event::Advance { ms } => {
            client.advance(Duration::from_millis(ms));
            return None;
        }
        Event::Reset => {
            client.reset(cccp_rt_core::localtime::local_now());
            return None;
        }
    };

    match outcome {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(e) => Some(json!({ "error": e.to_string() })),
    }
}

fn flush(transport: &RecordingTransport, sink: &RecordingSink, out: &mut impl Write) -> Result<()> {
    for request in transport.take() {
        writeln!(out, "{}", serde_json::to_string(&request)?)?;
    }
    for delivery in sink.take() {
        writeln!(out, "{}", serde_json::to_string(&delivery)?)?;
    }
    Ok(())
}
