//! Record, autorecord and history subscriptions.
//!
//! These are singletons observing private indicators of every session
//! (and, for records, the communication listener). They do not debounce.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::debug;

use crate::observer::NoticePayload;
use crate::value::truthy;

/// What a singleton subscription delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Last record of a session or a communication
    Record,
    /// Login and session of every session, to drive automatic recording
    AutoRecord,
    /// Outgoing call and transfer activity
    History,
}

impl RecordKind {
    /// Source of the subscription id
    pub fn key_source(self) -> &'static str {
        match self {
            RecordKind::Record => "recordvalues",
            RecordKind::AutoRecord => "autorecordvalues",
            RecordKind::History => "historyvalues",
        }
    }
}

/// Records carried by a notice, deduplicated by uri.
///
/// `queues` maps technical queue names to display names; records naming a
/// queue get its display name as `queue_display_name`.
pub fn record_rows(payload: &NoticePayload, queues: &Map<String, Value>) -> Vec<Value> {
    match payload {
        NoticePayload::Indicator(value) => match value.get("record_indicator") {
            Some(Value::Object(record)) => {
                let mut record = record.clone();
                identify_queue(&mut record, queues);
                vec![Value::Object(record)]
            }
            _ => {
                debug!("Session record without record_indicator: {}", value);
                Vec::new()
            }
        },
        NoticePayload::Communications(rows) => {
            let mut accepted: IndexMap<String, Value> = IndexMap::new();
            for row in rows {
                let Some(Value::Object(record)) = row.data.get("record_indicator") else {
                    continue;
                };
                let Some(uri) = record.get("uri").and_then(Value::as_str) else {
                    debug!("Communication record without uri: {:?}", record);
                    continue;
                };
                if accepted.contains_key(uri) {
                    continue;
                }
                let mut record = record.clone();
                identify_queue(&mut record, queues);
                record
                    .entry("communication_type")
                    .or_insert_with(|| Value::String("inbound".to_string()));
                accepted.insert(uri.to_string(), Value::Object(record));
            }
            accepted.into_values().collect()
        }
        NoticePayload::ProfileRows(_) => Vec::new(),
    }
}

fn identify_queue(record: &mut Map<String, Value>, queues: &Map<String, Value>) {
    let Some(queue) = record.get("queue").filter(|q| truthy(q)).cloned() else {
        return;
    };
    let display_name = queue
        .as_str()
        .and_then(|name| queues.get(name))
        .cloned()
        .unwrap_or(queue);
    record.insert("queue_display_name".to_string(), display_name);
}
