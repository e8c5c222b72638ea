//! Call-level state shared by the tasks of one communication.

use serde_json::{json, Map, Value};

use super::{route, Effects};
use crate::indicators::call::{
    self as catalogue, CALL_PROFILE, CHANNEL, CHANNEL_NAME, CURRENT_QUEUE_NAME, PREVIOUS_PROFILE_NAME,
    PREVIOUS_QUEUE_NAME,
};
use crate::indicators::IndicatorSet;
use crate::observer::CommunicationRow;
use crate::scheduler::TimerEvent;
use crate::value::{merge_payload, wrapped};

#[derive(Debug, Clone)]
pub struct Communication {
    id: String,
    communication_type: String,
    indicators: IndicatorSet,
    /// Keys of the bound tasks, first bound first
    tasks: Vec<String>,
    values: Map<String, Value>,
    flush_pending: bool,
    /// Origin latched from the first task that reported one
    initial_queue_name: Value,
    initial_agent_name: Value,
    observed: bool,
}

impl Communication {
    pub fn new(id: impl Into<String>, communication_type: impl Into<String>) -> Self {
        let id = id.into();
        let communication_type = communication_type.into();
        let mut values = base_values(&id, &communication_type);
        values.insert("new".to_string(), json!(true));
        Self {
            id,
            communication_type,
            indicators: catalogue::communication(),
            tasks: Vec::new(),
            values,
            flush_pending: false,
            initial_queue_name: Value::Null,
            initial_agent_name: Value::Null,
            observed: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn communication_type(&self) -> &str {
        &self.communication_type
    }

    pub fn indicators(&self) -> &IndicatorSet {
        &self.indicators
    }

    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }

    pub fn has_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    pub(crate) fn push_task(&mut self, key: &str) -> bool {
        if self.tasks.iter().any(|t| t == key) {
            return false;
        }
        self.tasks.push(key.to_string());
        true
    }

    pub(crate) fn remove_task(&mut self, key: &str) -> bool {
        match self.tasks.iter().position(|t| t == key) {
            Some(pos) => {
                self.tasks.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn initial_queue_name(&self) -> &Value {
        &self.initial_queue_name
    }

    pub fn initial_agent_name(&self) -> &Value {
        &self.initial_agent_name
    }

    pub(crate) fn latch_origin(&mut self, queue: Value, agent: Value) {
        if !crate::value::truthy(&self.initial_queue_name) && crate::value::truthy(&queue) {
            self.initial_queue_name = queue;
        }
        if !crate::value::truthy(&self.initial_agent_name) && crate::value::truthy(&agent) {
            self.initial_agent_name = agent;
        }
    }

    pub fn is_observed(&self) -> bool {
        self.observed
    }

    pub(crate) fn set_observed(&mut self, observed: bool) {
        self.observed = observed;
    }

    /// Apply a row. Once tasks are bound, the changed payloads are returned
    /// for the caller to push down to them instead of being buffered.
    pub fn apply_data(&mut self, data: &Map<String, Value>, fx: &mut Effects<'_>) -> Vec<Value> {
        self.indicators.apply_data(data, &fx.ctx);
        self.absorb(fx)
    }

    /// Buffered changes since the last flush
    pub fn get(&self) -> CommunicationRow {
        self.row(self.values.clone())
    }

    /// Snapshot of the advanced indicators, optionally filtered
    pub fn get_values(&self, filter: &[&str]) -> CommunicationRow {
        let mut data = base_values(&self.id, &self.communication_type);
        for (_, indicator) in self.indicators.iter() {
            if indicator.is_advanced() && (filter.is_empty() || filter.contains(&indicator.name())) {
                merge_payload(&mut data, indicator.name(), &indicator.get());
            }
        }
        self.row(data)
    }

    /// Take the buffered changes as a row and clear the buffer
    pub fn flush(&mut self) -> CommunicationRow {
        self.flush_pending = false;
        let values = std::mem::replace(&mut self.values, base_values(&self.id, &self.communication_type));
        self.row(values)
    }

    fn row(&self, data: Map<String, Value>) -> CommunicationRow {
        CommunicationRow {
            data,
            current_queue_name: self.indicators.value_of(CURRENT_QUEUE_NAME),
            current_profile_name: self.indicators.value_of(CALL_PROFILE),
            previous_queue_name: self.indicators.value_of(PREVIOUS_QUEUE_NAME),
            previous_profile_name: self.indicators.value_of(PREVIOUS_PROFILE_NAME),
            is_waiting: json!(true),
        }
    }

    fn absorb(&mut self, fx: &mut Effects<'_>) -> Vec<Value> {
        let changes = route(&mut self.indicators, fx.notices);
        if !self.tasks.is_empty() {
            return changes.into_iter().map(|change| change.payload).collect();
        }
        if changes.is_empty() {
            return Vec::new();
        }
        for change in &changes {
            let name = self.indicators.indicator(change.slot).name().to_string();
            merge_payload(&mut self.values, &name, &change.payload);
        }
        if !self.flush_pending {
            self.flush_pending = true;
            let delay = fx.timers.timings().communication_flush();
            fx.timers.schedule(
                delay,
                TimerEvent::CommunicationFlush {
                    communication_id: self.id.clone(),
                },
            );
        }
        Vec::new()
    }
}

fn base_values(id: &str, communication_type: &str) -> Map<String, Value> {
    let mut values = Map::new();
    values.insert("communication_id".to_string(), json!(id));
    values.insert("communication_task_id".to_string(), wrapped(Value::Null));
    values.insert(CHANNEL.to_string(), wrapped(json!(CHANNEL_NAME)));
    values.insert("communication_type".to_string(), wrapped(json!(communication_type)));
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timings;
    use crate::indicators::ComputeCtx;
    use crate::scheduler::Timers;
    use pretty_assertions::assert_eq;
    use tokio::time::Instant;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_unbound_communication_buffers_changes() {
        let mut timers = Timers::new(Instant::now(), Timings::default());
        let mut notices = Vec::new();
        let mut fx = Effects {
            ctx: ComputeCtx::default(),
            timers: &mut timers,
            notices: &mut notices,
        };
        let mut communication = Communication::new("c1", "inbound");
        let forwarded = communication.apply_data(
            &map(json!({"attributes.local_number.value": "sip:3900@pbx", "queue_type": "queue"})),
            &mut fx,
        );
        assert!(forwarded.is_empty());
        assert_eq!(fx.timers.scheduler().pending(), 1);

        let row = communication.flush();
        assert_eq!(row.data["new"], json!(true));
        assert_eq!(row.data["to"], json!({"value": "3900"}));
        assert_eq!(row.is_waiting, json!(true));
        assert!(!communication.flush().data.contains_key("new"));
    }

    #[test]
    fn test_bound_communication_forwards_payloads() {
        let mut timers = Timers::new(Instant::now(), Timings::default());
        let mut notices = Vec::new();
        let mut fx = Effects {
            ctx: ComputeCtx::default(),
            timers: &mut timers,
            notices: &mut notices,
        };
        let mut communication = Communication::new("c1", "inbound");
        communication.push_task("t1");
        let forwarded = communication.apply_data(
            &map(json!({"attributes.remote_number.value": "sip:0102@pbx"})),
            &mut fx,
        );
        assert_eq!(forwarded, vec![json!({"from": {"value": "0102"}})]);
        assert_eq!(fx.timers.scheduler().pending(), 0);
    }

    #[test]
    fn test_origin_is_latched_once() {
        let mut communication = Communication::new("c1", "inbound");
        communication.latch_origin(Value::Null, json!("alice"));
        communication.latch_origin(json!("Sales"), json!("bob"));
        assert_eq!(communication.initial_queue_name(), &json!("Sales"));
        assert_eq!(communication.initial_agent_name(), &json!("alice"));
    }

    #[test]
    fn test_get_values_filters_advanced_indicators() {
        let communication = Communication::new("c1", "outbound");
        let row = communication.get_values(&["to"]);
        assert_eq!(
            Value::Object(row.data),
            json!({
                "communication_id": "c1",
                "communication_task_id": {"value": null},
                "channel": {"value": "iv-vocal"},
                "communication_type": {"value": "outbound"},
                "to": {"value": 0},
            })
        );
    }
}
