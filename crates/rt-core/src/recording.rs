//! In-memory transport and sink.
//!
//! Both keep what the engine sends behind a shared lock, so a clone kept by
//! the caller sees everything sent through the copy owned by the client.
//! The replay binary and the tests use them.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::dispatch::format::ObjectFormat;
use crate::dispatch::protocol::DispatchTransport;
use crate::subscriber::{Delivery, DeliverySink};

/// A request issued through the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum TransportRequest {
    QueryList {
        idx: u32,
        db_root: String,
        filter: String,
    },
    QueryObject {
        idx: u32,
        object_id: String,
        format_id: u32,
    },
    StopQuery {
        idx: u32,
    },
    SetObjectFormat {
        format: ObjectFormat,
    },
}

/// Transport that records every request
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    requests: Arc<Mutex<Vec<TransportRequest>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests recorded so far
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }

    /// Requests recorded so far, clearing the record
    pub fn take(&self) -> Vec<TransportRequest> {
        std::mem::take(&mut *self.requests.lock())
    }

    /// The format registered last, if any
    pub fn last_format(&self) -> Option<ObjectFormat> {
        self.requests.lock().iter().rev().find_map(|request| match request {
            TransportRequest::SetObjectFormat { format } => Some(format.clone()),
            _ => None,
        })
    }

    fn push(&self, request: TransportRequest) {
        self.requests.lock().push(request);
    }
}

impl DispatchTransport for RecordingTransport {
    fn query_list(&mut self, idx: u32, db_root: &str, filter: &str) {
        self.push(TransportRequest::QueryList {
            idx,
            db_root: db_root.to_string(),
            filter: filter.to_string(),
        });
    }

    fn query_object(&mut self, idx: u32, object_id: &str, format_id: u32) {
        self.push(TransportRequest::QueryObject {
            idx,
            object_id: object_id.to_string(),
            format_id,
        });
    }

    fn stop_query(&mut self, idx: u32) {
        self.push(TransportRequest::StopQuery { idx });
    }

    fn set_object_format(&mut self, format: &ObjectFormat) {
        self.push(TransportRequest::SetObjectFormat { format: format.clone() });
    }
}

/// Sink that records every delivery
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    /// Deliveries recorded so far, clearing the record
    pub fn take(&self) -> Vec<Delivery> {
        std::mem::take(&mut *self.deliveries.lock())
    }

    pub fn len(&self) -> usize {
        self.deliveries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.lock().is_empty()
    }

    fn push(&self, delivery: Delivery) {
        self.deliveries.lock().push(delivery);
    }
}

impl DeliverySink for RecordingSink {
    fn send(&mut self, kind: &str, target: &str, values: Value) {
        self.push(Delivery::Values {
            kind: kind.to_string(),
            target: target.to_string(),
            values,
        });
    }

    fn send_record_values(&mut self, values: Value) {
        self.push(Delivery::Record { values });
    }

    fn send_autorecord_values(&mut self, values: Value) {
        self.push(Delivery::AutoRecord { values });
    }

    fn send_history_values(&mut self, values: Value) {
        self.push(Delivery::History { values });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_clones_share_the_record() {
        let sink = RecordingSink::new();
        let mut owned = sink.clone();
        Delivery::History { values: json!([]) }.deliver(&mut owned);
        owned.send("session", "alice", json!({"is_logged": {"value": 1}}));

        assert_eq!(sink.len(), 2);
        assert_eq!(
            sink.take()[1],
            Delivery::Values {
                kind: "session".into(),
                target: "alice".into(),
                values: json!({"is_logged": {"value": 1}}),
            }
        );
        assert!(owned.is_empty());
    }

    #[test]
    fn test_transport_requests_serialize_tagged() {
        let mut transport = RecordingTransport::new();
        transport.stop_query(4);
        assert_eq!(
            serde_json::to_value(&transport.requests()[0]).unwrap(),
            json!({"request": "stop_query", "idx": 4})
        );
        assert_eq!(transport.last_format(), None);
    }
}
