//! Subscriptions to the communications handled by a set of queues and profiles.
//!
//! Each subscription keeps its own list of the communications it reported,
//! so two subscriptions with different scopes follow the same
//! communication independently. A row is classified against that list and
//! the current scope of its communication:
//!
//! - an ended task in scope is reported one last time, then cleaned up;
//! - a tracked communication whose row lost every queue and profile while
//!   still waiting is reported and forgotten;
//! - a waiting task in scope is reported and tracked;
//! - a managed task in scope is reported, with a full snapshot the first time;
//! - a tracked task leaving the scope is reported as "unmanageable".

use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::error::{Result, RtError};
use crate::listeners::CommunicationListener;
use crate::observer::{CommunicationRow, SubscriptionId};
use crate::value::{truthy, unwrap_value, value_key, wrapped};

/// Subscription type of communication subscriptions
pub const COMMUNICATION: &str = "communication";

/// End date reported for a task that left the scope before ending
const UNMANAGEABLE: &str = "unmanageable";

/// A task to drop once the scope cleanup delay is over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cleanup {
    pub communication_id: String,
    pub task_id: String,
}

#[derive(Debug, Clone)]
pub struct CommunicationSubscription {
    id: SubscriptionId,
    target: String,
    profiles: Vec<String>,
    queues: Vec<String>,
    indicators: Vec<String>,
    buffer: Vec<Value>,
    flush_pending: bool,
    communications: Vec<String>,
}

impl CommunicationSubscription {
    pub fn new(
        id: impl Into<SubscriptionId>,
        target: impl Into<String>,
        indicators: Vec<String>,
        profiles: Vec<String>,
        queues: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            target: target.into(),
            profiles: dedup(profiles),
            queues: dedup(queues),
            indicators: dedup(indicators),
            buffer: Vec::new(),
            flush_pending: false,
            communications: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn listenable_profiles(&self) -> &[String] {
        &self.profiles
    }

    pub fn listenable_queues(&self) -> &[String] {
        &self.queues
    }

    pub fn listenable_indicators(&self) -> &[String] {
        &self.indicators
    }

    /// Communications currently reported by this subscription
    pub fn communications(&self) -> &[String] {
        &self.communications
    }

    /// Classify a batch of listener rows into the buffer.
    ///
    /// A row that cannot be interpreted is logged and skipped. Returns the
    /// tasks to clean up later.
    pub fn update(&mut self, rows: &[CommunicationRow], listener: &CommunicationListener) -> Vec<Cleanup> {
        let mut cleanups = Vec::new();
        for row in rows {
            if let Err(e) = self.extract_row(row, listener, &mut cleanups) {
                error!("Failsafe caught an unhandled error in {}: {}", self.id, e);
            }
        }
        cleanups
    }

    /// Whether a flush must be scheduled; true once per debounce window
    pub fn needs_flush(&mut self) -> bool {
        if self.flush_pending {
            return false;
        }
        self.flush_pending = true;
        true
    }

    fn extract_row(
        &mut self,
        row: &CommunicationRow,
        listener: &CommunicationListener,
        cleanups: &mut Vec<Cleanup>,
    ) -> Result<()> {
        let communication_id = row
            .data
            .get("communication_id")
            .map(value_key)
            .ok_or_else(|| RtError::malformed("communication row without communication_id"))?;
        let task_id = value_key(&row.task_id());

        if !listener.has_communication(&communication_id) {
            warn!(
                "Received indicators update for unknown Communication '{}': {}",
                communication_id,
                serde_json::Value::Object(row.data.clone())
            );
            return Ok(());
        }

        let mut current_scope = listener.check_scope(&communication_id, &self.queues, &self.profiles);
        let previous_scope = self.is_tracked(&communication_id);
        let ended = row
            .data
            .get("task_end_date")
            .and_then(unwrap_value)
            .is_some_and(truthy);

        if ended {
            let (in_scope, task_end) = listener.check_end_scope(&communication_id, &self.queues, &self.profiles);
            current_scope = in_scope;
            if current_scope && truthy(&task_end) {
                self.forget(&communication_id);
                cleanups.push(Cleanup {
                    communication_id: communication_id.clone(),
                    task_id: task_id.clone(),
                });
                self.buffer.push(Value::Object(row.data.clone()));
            }

            let unrouted = [
                &row.current_queue_name,
                &row.current_profile_name,
                &row.previous_queue_name,
                &row.previous_profile_name,
            ]
            .iter()
            .all(|value| !truthy(value));
            if unrouted && truthy(&row.is_waiting) && !current_scope && previous_scope {
                self.forget(&communication_id);
                self.buffer.push(Value::Object(row.data.clone()));
            }
            return Ok(());
        }

        if truthy(&row.is_waiting) {
            if current_scope {
                self.buffer.push(Value::Object(row.data.clone()));
                self.track(&communication_id);
            }
            return Ok(());
        }

        if current_scope {
            let data = if previous_scope {
                row.data.clone()
            } else {
                self.track(&communication_id);
                match listener.get_task_values(&task_id) {
                    Ok(snapshot) => snapshot.data,
                    Err(e) => {
                        error!("get_task_values failed: {}", e);
                        return Ok(());
                    }
                }
            };
            self.buffer.push(Value::Object(data));
        } else if previous_scope {
            let mut data: Map<String, Value> = row.data.clone();
            data.insert("task_end_date".to_string(), wrapped(Value::String(UNMANAGEABLE.to_string())));
            self.forget(&communication_id);
            cleanups.push(Cleanup {
                communication_id,
                task_id,
            });
            self.buffer.push(Value::Object(data));
        }
        Ok(())
    }

    /// Rows of a snapshot in scope, tracking their communications
    pub fn get_data_from_values(&mut self, rows: Vec<CommunicationRow>) -> Vec<Value> {
        let mut data = Vec::new();
        for row in rows {
            let by_queue = listed(&self.queues, &row.current_queue_name) && !truthy(&row.current_profile_name);
            if by_queue || listed(&self.profiles, &row.current_profile_name) {
                self.track(&row.communication_id());
                data.push(Value::Object(row.data));
            }
        }
        data
    }

    /// Take the buffered rows; None when nothing was gathered
    pub fn flush(&mut self) -> Option<Value> {
        self.flush_pending = false;
        if self.buffer.is_empty() {
            return None;
        }
        Some(Value::Array(std::mem::take(&mut self.buffer)))
    }

    pub fn add_listenable_profiles(&mut self, profiles: &[String]) {
        extend_unique(&mut self.profiles, profiles);
    }

    pub fn add_listenable_queues(&mut self, queues: &[String]) {
        extend_unique(&mut self.queues, queues);
    }

    pub fn add_listenable_indicators(&mut self, indicators: &[String]) {
        extend_unique(&mut self.indicators, indicators);
    }

    pub fn del_listenable_indicators(&mut self, indicators: &[String]) -> Result<()> {
        let mut remaining = self.indicators.clone();
        for name in indicators {
            let pos = remaining
                .iter()
                .position(|i| i == name)
                .ok_or_else(|| RtError::lookup(format!("Indicator {} not subscribed.", name)))?;
            remaining.remove(pos);
        }
        self.indicators = remaining;
        Ok(())
    }

    fn is_tracked(&self, communication_id: &str) -> bool {
        self.communications.iter().any(|c| c == communication_id)
    }

    fn track(&mut self, communication_id: &str) {
        if !self.is_tracked(communication_id) {
            self.communications.push(communication_id.to_string());
        }
    }

    fn forget(&mut self, communication_id: &str) {
        self.communications.retain(|c| c != communication_id);
    }
}

fn listed(scope: &[String], value: &Value) -> bool {
    value.as_str().is_some_and(|name| scope.iter().any(|s| s == name))
}

fn extend_unique(list: &mut Vec<String>, names: &[String]) {
    for name in names {
        if !list.contains(name) {
            list.push(name.clone());
        }
    }
}

fn dedup(names: Vec<String>) -> Vec<String> {
    let mut unique = Vec::with_capacity(names.len());
    extend_unique(&mut unique, &names);
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timings;
    use crate::entities::Effects;
    use crate::indicators::ComputeCtx;
    use crate::scheduler::Timers;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::time::Instant;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn row(data: Value, queue: Value, profile: Value, waiting: bool) -> CommunicationRow {
        CommunicationRow {
            data: map(data),
            current_queue_name: queue,
            current_profile_name: profile,
            previous_queue_name: Value::Null,
            previous_profile_name: Value::Null,
            is_waiting: json!(waiting),
        }
    }

    /// Listener with one communication "c1" whose task "t1" waits in "Sales"
    fn listener_with_task(timers: &mut Timers) -> CommunicationListener {
        let mut notices = Vec::new();
        let mut fx = Effects {
            ctx: ComputeCtx::default(),
            timers,
            notices: &mut notices,
        };
        let mut listener = CommunicationListener::new();
        listener.add_communication("c1", "inbound");
        listener
            .apply_task_data(
                &map(json!({
                    "task_id": "t1",
                    "parent_call_session_id": "c1",
                    "queue_type": "queue",
                    "queue_display_name": "Sales",
                })),
                &mut fx,
            )
            .unwrap();
        listener
    }

    fn apply(listener: &mut CommunicationListener, timers: &mut Timers, data: Value) {
        let mut notices = Vec::new();
        let mut fx = Effects {
            ctx: ComputeCtx::default(),
            timers,
            notices: &mut notices,
        };
        listener.apply_task_data(&map(data), &mut fx).unwrap();
    }

    fn task_row(waiting: bool) -> CommunicationRow {
        row(
            json!({"communication_id": "c1", "communication_task_id": {"value": "t1"}}),
            json!("Sales"),
            Value::Null,
            waiting,
        )
    }

    #[test]
    fn test_waiting_task_in_scope_is_tracked() {
        let mut timers = Timers::new(Instant::now(), Timings::default());
        let listener = listener_with_task(&mut timers);
        let mut subscription = CommunicationSubscription::new("id", "sup", vec![], vec![], names(&["Sales"]));

        let cleanups = subscription.update(&[task_row(true)], &listener);
        assert!(cleanups.is_empty());
        assert_eq!(subscription.communications(), ["c1"]);
        assert!(subscription.needs_flush());
        assert!(!subscription.needs_flush());
        assert_eq!(
            subscription.flush(),
            Some(json!([{"communication_id": "c1", "communication_task_id": {"value": "t1"}}]))
        );
        assert_eq!(subscription.flush(), None);
    }

    #[test]
    fn test_first_managed_row_is_a_full_snapshot() {
        let mut timers = Timers::new(Instant::now(), Timings::default());
        let listener = listener_with_task(&mut timers);
        let mut subscription = CommunicationSubscription::new("id", "sup", vec![], vec![], names(&["Sales"]));

        subscription.update(&[task_row(false), task_row(false)], &listener);
        let Some(Value::Array(rows)) = subscription.flush() else {
            panic!("rows expected");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], Value::Object(listener.get_task_values("t1").unwrap().data));
        assert_eq!(rows[1], Value::Object(task_row(false).data));
    }

    #[test]
    fn test_leaving_scope_reports_unmanageable() {
        let mut timers = Timers::new(Instant::now(), Timings::default());
        let mut listener = listener_with_task(&mut timers);
        let mut subscription = CommunicationSubscription::new("id", "sup", vec![], vec![], names(&["Sales"]));
        subscription.update(&[task_row(true)], &listener);
        subscription.flush();

        apply(
            &mut listener,
            &mut timers,
            json!({"task_id": "t1", "parent_call_session_id": "c1", "manager_session.profile_name": "Level1"}),
        );
        let cleanups = subscription.update(&[task_row(false)], &listener);
        assert_eq!(
            cleanups,
            vec![Cleanup {
                communication_id: "c1".into(),
                task_id: "t1".into()
            }]
        );
        assert!(subscription.communications().is_empty());
        let Some(Value::Array(rows)) = subscription.flush() else {
            panic!("rows expected");
        };
        assert_eq!(rows[0]["task_end_date"], json!({"value": "unmanageable"}));

        // A profile scope keeps following it
        let mut by_profile = CommunicationSubscription::new("id2", "sup", vec![], names(&["Level1"]), vec![]);
        by_profile.update(&[task_row(false)], &listener);
        assert_eq!(by_profile.communications(), ["c1"]);
    }

    #[test]
    fn test_ended_task_is_reported_then_cleaned() {
        let mut timers = Timers::new(Instant::now(), Timings::default());
        let mut listener = listener_with_task(&mut timers);
        let mut subscription = CommunicationSubscription::new("id", "sup", vec![], vec![], names(&["Sales"]));
        subscription.update(&[task_row(true)], &listener);
        subscription.flush();

        apply(
            &mut listener,
            &mut timers,
            json!({"task_id": "t1", "parent_call_session_id": "c1", "end_date": "2017/03/29 15:30:00"}),
        );
        let ended = row(
            json!({
                "communication_id": "c1",
                "communication_task_id": {"value": "t1"},
                "task_end_date": {"value": "2017/03/29 15:30:00"},
            }),
            json!("Sales"),
            Value::Null,
            false,
        );
        let cleanups = subscription.update(&[ended], &listener);
        assert_eq!(cleanups.len(), 1);
        assert!(subscription.communications().is_empty());
        assert!(subscription.flush().is_some());
    }

    #[test]
    fn test_bad_rows_are_skipped() {
        let mut timers = Timers::new(Instant::now(), Timings::default());
        let listener = listener_with_task(&mut timers);
        let mut subscription = CommunicationSubscription::new("id", "sup", vec![], vec![], names(&["Sales"]));

        let unknown = row(
            json!({"communication_id": "c9", "communication_task_id": {"value": "t9"}}),
            json!("Sales"),
            Value::Null,
            true,
        );
        let malformed = row(json!({"communication_task_id": {"value": "t1"}}), json!("Sales"), Value::Null, true);
        subscription.update(&[unknown, malformed, task_row(true)], &listener);
        assert_eq!(subscription.communications(), ["c1"]);
    }

    #[test]
    fn test_snapshot_scope() {
        let mut subscription =
            CommunicationSubscription::new("id", "sup", vec![], names(&["Level1"]), names(&["Sales", "Sales"]));
        assert_eq!(subscription.listenable_queues(), ["Sales"]);

        let rows = vec![
            row(json!({"communication_id": "c1"}), json!("Sales"), Value::Null, true),
            row(json!({"communication_id": "c2"}), json!("Sales"), json!("Level2"), false),
            row(json!({"communication_id": "c3"}), json!("Support"), json!("Level1"), false),
        ];
        let data = subscription.get_data_from_values(rows);
        assert_eq!(data, vec![json!({"communication_id": "c1"}), json!({"communication_id": "c3"})]);
        assert_eq!(subscription.communications(), ["c1", "c3"]);
    }
}
