//! One handling leg of a communication.

use serde_json::{json, Map, Value};
use tracing::warn;

use super::{route, Effects};
use crate::indicators::call::{
    self as catalogue, CALL_PROFILE, CHANNEL, CHANNEL_NAME, COMMUNICATION_TASK_ID, CURRENT_QUEUE_NAME, IS_WAITING,
    PREVIOUS_PROFILE_NAME, PREVIOUS_QUEUE_NAME, TASK_END_DATE,
};
use crate::indicators::IndicatorSet;
use crate::observer::CommunicationRow;
use crate::scheduler::TimerEvent;
use crate::value::{merge_payload, unwrap_value, wrapped};

/// Keys every task row carries besides its indicators
const BASE_KEYS: [&str; 4] = ["communication_task_id", "communication_id", CHANNEL, "communication_type"];

#[derive(Debug, Clone)]
pub struct Task {
    /// Key of the task in the communication listener
    key: String,
    /// Parent communication
    call_id: String,
    communication_type: String,
    indicators: IndicatorSet,
    values: Map<String, Value>,
    flush_pending: bool,
    /// Whether the communication listener hears about this task
    observed: bool,
}

impl Task {
    /// Build a task from its own row, then from the values inherited from
    /// its communication
    pub fn new(
        key: impl Into<String>,
        call_id: impl Into<String>,
        data: &Map<String, Value>,
        communication_data: &Map<String, Value>,
        communication_type: impl Into<String>,
        fx: &mut Effects<'_>,
    ) -> Self {
        let call_id = call_id.into();
        let communication_type = communication_type.into();
        let mut values = Map::new();
        values.insert("communication_id".to_string(), json!(call_id));
        values.insert(CHANNEL.to_string(), wrapped(json!(CHANNEL_NAME)));
        values.insert("communication_type".to_string(), wrapped(json!(communication_type)));
        if communication_data.get("new").is_some_and(crate::value::truthy) {
            values.insert("new".to_string(), json!(true));
        }

        let mut task = Self {
            key: key.into(),
            call_id,
            communication_type,
            indicators: catalogue::task(),
            values,
            flush_pending: false,
            observed: false,
        };
        task.apply_data(data, fx);
        task.apply_data(communication_data, fx);
        if !task.values.contains_key("communication_task_id") {
            let task_id = task.task_id();
            task.values.insert("communication_task_id".to_string(), wrapped(task_id));
        }
        task
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn indicators(&self) -> &IndicatorSet {
        &self.indicators
    }

    pub fn task_id(&self) -> Value {
        self.indicators.value_of(COMMUNICATION_TASK_ID)
    }

    pub fn current_profile(&self) -> Value {
        self.indicators.value_of(CALL_PROFILE)
    }

    pub fn current_queue(&self) -> Value {
        self.indicators.value_of(CURRENT_QUEUE_NAME)
    }

    pub fn end_date(&self) -> Value {
        self.indicators.value_of(TASK_END_DATE)
    }

    pub fn is_observed(&self) -> bool {
        self.observed
    }

    pub(crate) fn set_observed(&mut self, observed: bool) {
        self.observed = observed;
    }

    pub fn apply_data(&mut self, data: &Map<String, Value>, fx: &mut Effects<'_>) {
        self.indicators.apply_data(data, &fx.ctx);
        self.absorb(fx);
    }

    /// Set one indicator, returning whether it exists
    pub fn set(&mut self, name: &str, value: Value, fx: &mut Effects<'_>) -> bool {
        let known = self.indicators.set_by_name(name, value, &fx.ctx);
        self.absorb(fx);
        known
    }

    /// Set a sticky indicator to a value latched by the communication
    pub fn set_initialized(&mut self, name: &str, value: Value, fx: &mut Effects<'_>) {
        if let Some(slot) = self.indicators.slot(name) {
            self.indicators.set_initialized(slot, true);
            self.indicators.set(slot, value, &fx.ctx);
            self.absorb(fx);
        }
    }

    /// Copy indicators from a snapshot of another task of the same communication
    pub fn force_update(&mut self, mut values: Map<String, Value>, fx: &mut Effects<'_>) {
        for key in BASE_KEYS {
            values.remove(key);
        }
        for (name, value) in values {
            let value = unwrap_value(&value).cloned().unwrap_or(Value::Null);
            if !self.indicators.set_by_name(&name, value, &fx.ctx) {
                warn!("Task {} has no indicator {}", self.key, name);
            }
        }
        self.absorb(fx);
    }

    /// In scope when its profile is listened to, or, without a profile, its queue
    pub fn check_scope(&self, queue_scope: &[String], profile_scope: &[String]) -> bool {
        let profile = self.current_profile();
        if crate::value::truthy(&profile) {
            contains(profile_scope, &profile)
        } else {
            contains(queue_scope, &self.current_queue())
        }
    }

    pub fn check_end_scope(&self, queue_scope: &[String], profile_scope: &[String]) -> (bool, Value) {
        if self.check_scope(queue_scope, profile_scope) {
            (true, self.end_date())
        } else {
            (false, Value::Null)
        }
    }

    /// Buffered changes since the last flush
    pub fn get(&self) -> CommunicationRow {
        self.row(self.values.clone())
    }

    /// Snapshot of the advanced indicators, optionally filtered
    pub fn get_values(&self, filter: &[&str]) -> CommunicationRow {
        let mut data = self.base_values();
        for (_, indicator) in self.indicators.iter() {
            if !indicator.is_advanced() {
                continue;
            }
            if filter.is_empty() || filter.contains(&indicator.name()) {
                merge_payload(&mut data, indicator.name(), &indicator.get());
            }
        }
        self.row(data)
    }

    /// Take the buffered changes as a row and clear the buffer
    pub fn flush(&mut self) -> CommunicationRow {
        self.flush_pending = false;
        if !self.values.contains_key("communication_task_id") {
            self.values
                .insert("communication_task_id".to_string(), wrapped(self.task_id()));
        }
        let base = self.base_values();
        let values = std::mem::replace(&mut self.values, base);
        self.row(values)
    }

    fn base_values(&self) -> Map<String, Value> {
        let mut values = Map::new();
        values.insert("communication_id".to_string(), json!(self.call_id));
        values.insert("communication_task_id".to_string(), wrapped(self.task_id()));
        values.insert(CHANNEL.to_string(), wrapped(json!(CHANNEL_NAME)));
        values.insert("communication_type".to_string(), wrapped(json!(self.communication_type)));
        values
    }

    fn row(&self, data: Map<String, Value>) -> CommunicationRow {
        CommunicationRow {
            data,
            current_queue_name: self.current_queue(),
            current_profile_name: self.current_profile(),
            previous_queue_name: self.indicators.value_of(PREVIOUS_QUEUE_NAME),
            previous_profile_name: self.indicators.value_of(PREVIOUS_PROFILE_NAME),
            is_waiting: self.indicators.value_of(IS_WAITING),
        }
    }

    fn absorb(&mut self, fx: &mut Effects<'_>) {
        let changes = route(&mut self.indicators, fx.notices);
        if changes.is_empty() {
            return;
        }
        for change in &changes {
            let name = self.indicators.indicator(change.slot).name().to_string();
            merge_payload(&mut self.values, &name, &change.payload);
        }
        if !self.flush_pending {
            self.flush_pending = true;
            let delay = fx.timers.timings().task_flush();
            fx.timers.schedule(
                delay,
                TimerEvent::TaskFlush {
                    task_id: self.key.clone(),
                },
            );
        }
    }
}

fn contains(scope: &[String], value: &Value) -> bool {
    match value {
        Value::String(s) => scope.iter().any(|entry| entry == s),
        _ => false,
    }
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

    fn scope(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_new_task_inherits_communication_values() {
        let mut timers = Timers::new(Instant::now(), Timings::default());
        let mut notices = Vec::new();
        let mut fx = Effects {
            ctx: ComputeCtx::default(),
            timers: &mut timers,
            notices: &mut notices,
        };
        let task = Task::new(
            "t1",
            "c1",
            &map(json!({"task_id": "t1", "queue_type": "queue", "queue_display_name": "Sales"})),
            &map(json!({"to": {"value": "3900"}, "from": {"value": "0102"}, "new": true})),
            "inbound",
            &mut fx,
        );

        assert_eq!(task.task_id(), json!("t1"));
        assert_eq!(task.indicators().value_of("to"), json!("3900"));
        assert_eq!(task.current_queue(), json!("Sales"));
        assert_eq!(fx.timers.scheduler().pending(), 1);

        let row = task.get();
        assert_eq!(row.data["new"], json!(true));
        assert_eq!(row.data["communication_task_id"], json!({"value": "t1"}));
        assert_eq!(row.is_waiting, json!(true));
    }

    #[test]
    fn test_scope_prefers_profile_over_queue() {
        let mut timers = Timers::new(Instant::now(), Timings::default());
        let mut notices = Vec::new();
        let mut fx = Effects {
            ctx: ComputeCtx::default(),
            timers: &mut timers,
            notices: &mut notices,
        };
        let mut task = Task::new(
            "t1",
            "c1",
            &map(json!({"task_id": "t1", "queue_type": "queue", "queue_display_name": "Sales"})),
            &Map::new(),
            "inbound",
            &mut fx,
        );
        assert!(task.check_scope(&scope(&["Sales"]), &[]));

        task.apply_data(&map(json!({"manager_session.profile_name": "Level1"})), &mut fx);
        assert!(!task.check_scope(&scope(&["Sales"]), &[]));
        assert!(task.check_scope(&[], &scope(&["Level1"])));

        task.apply_data(&map(json!({"end_date": "2017/03/29 15:30:00"})), &mut fx);
        assert_eq!(
            task.check_end_scope(&[], &scope(&["Level1"])),
            (true, json!("2017/03/29 15:30:00"))
        );
        assert_eq!(task.check_end_scope(&[], &[]), (false, Value::Null));
    }

    #[test]
    fn test_flush_resets_buffer_to_base_values() {
        let mut timers = Timers::new(Instant::now(), Timings::default());
        let mut notices = Vec::new();
        let mut fx = Effects {
            ctx: ComputeCtx::default(),
            timers: &mut timers,
            notices: &mut notices,
        };
        let mut task = Task::new(
            "t1",
            "c1",
            &map(json!({"task_id": "t1"})),
            &Map::new(),
            "outbound",
            &mut fx,
        );
        let first = task.flush();
        assert!(first.data.contains_key("communication_task_id"));

        let second = task.flush();
        assert_eq!(
            Value::Object(second.data),
            json!({
                "communication_id": "c1",
                "communication_task_id": {"value": "t1"},
                "channel": {"value": "iv-vocal"},
                "communication_type": {"value": "outbound"},
            })
        );
    }

    #[test]
    fn test_force_update_skips_base_keys() {
        let mut timers = Timers::new(Instant::now(), Timings::default());
        let mut notices = Vec::new();
        let mut fx = Effects {
            ctx: ComputeCtx::default(),
            timers: &mut timers,
            notices: &mut notices,
        };
        let mut task = Task::new("t2", "c1", &map(json!({"task_id": "t2"})), &Map::new(), "inbound", &mut fx);
        task.force_update(
            map(json!({
                "communication_id": "c1",
                "communication_task_id": {"value": "t1"},
                "channel": {"value": "iv-vocal"},
                "communication_type": {"value": "inbound"},
                "current_agent_name": {"value": "alice"},
            })),
            &mut fx,
        );
        assert_eq!(task.task_id(), json!("t2"));
        assert_eq!(task.indicators().value_of("current_agent_name"), json!("alice"));
    }
}
