//! Communications, their tasks, and the rows they report.
//!
//! A communication row arrives first (from the session or queue views) and
//! is reported on its own until a task row names it as parent. From then on
//! the communication is silent: its tasks carry the reporting, and the
//! communication only pushes its numbers and record flags down to them.
//!
//! Rows are gathered for a short window and pushed as one
//! [`NoticePayload::Communications`] batch to every attached subscription.

use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use tracing::{debug, error};

use crate::entities::{Communication, Effects, Task};
use crate::error::{Result, RtError};
use crate::indicators::call::{
    CURRENT_AGENT_NAME, FORWARDED, FROM, INITIAL_AGENT_NAME, INITIAL_QUEUE_NAME, PREVIOUS_PROFILE_NAME,
    PREVIOUS_QUEUE_NAME, TO,
};
use crate::observer::{CommunicationRow, Notice, NoticePayload, ObserverList, SubscriptionId};
use crate::scheduler::TimerEvent;
use crate::value::{loose_eq, truthy, value_key};

/// Values a new task inherits from its communication
const INHERITED: [&str; 5] = [TO, FROM, "communication_create_date", PREVIOUS_QUEUE_NAME, PREVIOUS_PROFILE_NAME];

/// Values a later task copies from the first task of its communication
const STICKY: [&str; 3] = [INITIAL_AGENT_NAME, INITIAL_QUEUE_NAME, CURRENT_AGENT_NAME];

#[derive(Debug, Default)]
pub struct CommunicationListener {
    communications: IndexMap<String, Communication>,
    tasks: IndexMap<String, Task>,
    values: Vec<CommunicationRow>,
    flush_pending: bool,
    observers: ObserverList<SubscriptionId>,
}

impl CommunicationListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observers(&self) -> &ObserverList<SubscriptionId> {
        &self.observers
    }

    pub fn observers_mut(&mut self) -> &mut ObserverList<SubscriptionId> {
        &mut self.observers
    }

    pub fn has_communication(&self, communication_id: &str) -> bool {
        self.communications.contains_key(communication_id)
    }

    /// Track a new communication; a known id is left untouched
    pub fn add_communication(&mut self, communication_id: &str, communication_type: &str) {
        if !self.communications.contains_key(communication_id) {
            debug!("Tracking {} communication {}", communication_type, communication_id);
            self.communications.insert(
                communication_id.to_string(),
                Communication::new(communication_id, communication_type),
            );
        }
    }

    pub fn communication(&self, communication_id: &str) -> Option<&Communication> {
        self.communications.get(communication_id)
    }

    pub fn communications(&self) -> impl Iterator<Item = &Communication> {
        self.communications.values()
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Apply a row to a tracked communication and push the forwarded
    /// indicators down to its tasks. Returns false for unknown ids.
    pub fn apply_communication_data(
        &mut self,
        communication_id: &str,
        data: &Map<String, Value>,
        fx: &mut Effects<'_>,
    ) -> bool {
        let Some(communication) = self.communications.get_mut(communication_id) else {
            return false;
        };
        let forwarded = communication.apply_data(data, fx);
        if forwarded.is_empty() {
            return true;
        }

        let keys = communication.tasks().to_vec();
        for payload in &forwarded {
            for name in FORWARDED {
                let Some(value) = payload.get(name) else {
                    continue;
                };
                for key in &keys {
                    if let Some(task) = self.tasks.get_mut(key) {
                        task.set(name, value.clone(), fx);
                    }
                }
            }
        }
        true
    }

    /// Apply a task row. A task seen for the first time is created under its
    /// parent communication, which stops reporting on its own.
    pub fn apply_task_data(&mut self, data: &Map<String, Value>, fx: &mut Effects<'_>) -> Result<()> {
        let task_key = required_key(data, "task_id")?;
        let communication_id = required_key(data, "parent_call_session_id")?;

        if let Some(task) = self.tasks.get_mut(&task_key) {
            task.apply_data(data, fx);
            return Ok(());
        }

        let Some(communication) = self.communications.get_mut(&communication_id) else {
            debug!(
                "Task {} references unknown communication {}",
                task_key, communication_id
            );
            return Ok(());
        };
        communication.set_observed(false);
        let mut inherited = communication.get_values(&INHERITED).data;
        inherited.remove("communication_task_id");
        let communication_type = communication.communication_type().to_string();

        let task = Task::new(
            task_key.clone(),
            communication_id.clone(),
            data,
            &inherited,
            communication_type,
            fx,
        );
        self.tasks.insert(task_key.clone(), task);
        self.bind_task(&communication_id, &task_key, fx);
        if let Some(task) = self.tasks.get_mut(&task_key) {
            task.set_observed(true);
        }
        Ok(())
    }

    /// Bind a task to its communication and apply the communication origin
    fn bind_task(&mut self, communication_id: &str, task_key: &str, fx: &mut Effects<'_>) {
        let Some(communication) = self.communications.get_mut(communication_id) else {
            return;
        };
        if communication.push_task(task_key) && communication.tasks().len() > 1 {
            let sticky = self
                .tasks
                .get(&communication.tasks()[0])
                .map(|first| first.get_values(&STICKY).data);
            if let (Some(values), Some(task)) = (sticky, self.tasks.get_mut(task_key)) {
                task.force_update(values, fx);
            }
        }

        let Some(task) = self.tasks.get_mut(task_key) else {
            return;
        };
        communication.latch_origin(
            task.indicators().value_of(INITIAL_QUEUE_NAME),
            task.indicators().value_of(INITIAL_AGENT_NAME),
        );
        let queue = communication.initial_queue_name().clone();
        if truthy(&queue) {
            task.set_initialized(INITIAL_QUEUE_NAME, queue, fx);
        }
        let agent = communication.initial_agent_name().clone();
        if truthy(&agent) {
            task.set_initialized(INITIAL_AGENT_NAME, agent, fx);
        }
    }

    /// Detach a task from its communication and forget it
    fn unbind_task(&mut self, communication_id: &str, task_key: &str) {
        if let Some(communication) = self.communications.get_mut(communication_id) {
            if communication.remove_task(task_key) {
                self.tasks.shift_remove(task_key);
            }
        }
    }

    /// Settle which of two coexisting tasks of a communication reports.
    ///
    /// Two tasks with the same profile are one reporting unit: the first one
    /// hands over to the second, and the second stays silent while the first
    /// is still bound.
    fn validate_task(&mut self, communication_id: &str, task_key: &str, row: CommunicationRow) -> Option<CommunicationRow> {
        let (first, second) = match self.communications.get(communication_id) {
            Some(c) if c.tasks().len() > 1 => (c.tasks()[0].clone(), c.tasks()[1].clone()),
            _ => return Some(row),
        };
        let Some(task) = self.tasks.get(task_key) else {
            return Some(row);
        };
        let profile = task.current_profile();
        let ended = truthy(&task.end_date());

        if first == task_key {
            let Some(next) = self.tasks.get(&second) else {
                return Some(row);
            };
            if loose_eq(&profile, &next.current_profile()) {
                let values = next.get_values(&[]);
                self.unbind_task(communication_id, task_key);
                return Some(values);
            }
            return Some(row);
        }

        let first_profile = self
            .tasks
            .get(&first)
            .map(Task::current_profile)
            .unwrap_or(Value::Null);
        if loose_eq(&profile, &first_profile) {
            if ended {
                self.unbind_task(communication_id, task_key);
            }
            return None;
        }
        if !truthy(&profile) && ended {
            self.unbind_task(communication_id, task_key);
        }
        Some(row)
    }

    /// Deliver the buffered changes of a communication
    pub fn flush_communication(&mut self, communication_id: &str, fx: &mut Effects<'_>) {
        let Some(communication) = self.communications.get_mut(communication_id) else {
            return;
        };
        let row = communication.flush();
        if communication.is_observed() {
            self.push(row, fx);
        }
    }

    /// Deliver the buffered changes of a task, once validated against its siblings
    pub fn flush_task(&mut self, task_key: &str, fx: &mut Effects<'_>) {
        let Some(task) = self.tasks.get_mut(task_key) else {
            return;
        };
        let row = task.flush();
        if !task.is_observed() {
            return;
        }

        let communication_id = row.communication_id();
        if !self.communications.contains_key(&communication_id) {
            error!(
                "Can't find communication, can't apply update: {}",
                serde_json::Value::Object(row.data.clone())
            );
            return;
        }
        if let Some(row) = self.validate_task(&communication_id, task_key, row) {
            self.push(row, fx);
        }
    }

    fn push(&mut self, row: CommunicationRow, fx: &mut Effects<'_>) {
        self.values.push(row);
        if !self.flush_pending {
            self.flush_pending = true;
            let delay = fx.timers.timings().listener_flush();
            fx.timers.schedule(delay, TimerEvent::ListenerFlush);
        }
    }

    /// Send the gathered rows to the attached subscriptions
    pub fn flush(&mut self, notices: &mut Vec<Notice>) {
        self.flush_pending = false;
        let rows = std::mem::take(&mut self.values);
        for observer in self.observers.iter() {
            notices.push(Notice::new(
                observer.clone(),
                NoticePayload::Communications(rows.clone()),
            ));
        }
    }

    /// Full snapshot of one task
    pub fn get_task_values(&self, task_id: &str) -> Result<CommunicationRow> {
        self.tasks
            .get(task_id)
            .map(|task| task.get_values(&[]))
            .ok_or_else(|| RtError::unknown_task(task_id))
    }

    /// Snapshots of every task carrying at least one filtered indicator
    pub fn get_values(&self, filter: &[&str]) -> Vec<CommunicationRow> {
        self.tasks
            .values()
            .map(|task| task.get_values(filter))
            .filter(|row| row.data.len() > 2)
            .collect()
    }

    /// Running tasks held by one of the queues or profiles
    pub fn get_communication_list(&self, profiles: &[String], queues: &[String]) -> Vec<Value> {
        self.tasks
            .values()
            .filter(|task| {
                listed(queues, &task.current_queue()) || listed(profiles, &task.current_profile())
            })
            .filter(|task| !truthy(&task.indicators().value_of("end_date")))
            .map(|task| {
                json!({
                    "communication_id": task.call_id(),
                    "channel": "iv-vocal",
                })
            })
            .collect()
    }

    /// Drop one task of a communication, and the communication once it has no task left
    pub fn clean_communication(&mut self, communication_id: &str, task_id: &str) -> bool {
        let Some(communication) = self.communications.get(communication_id) else {
            return false;
        };
        let key = communication.tasks().iter().find(|key| {
            self.tasks
                .get(key.as_str())
                .is_some_and(|task| value_key(&task.task_id()) == task_id)
        });
        let Some(key) = key.cloned() else {
            return false;
        };
        self.unbind_task(communication_id, &key);
        if self
            .communications
            .get(communication_id)
            .is_some_and(|c| !c.has_tasks())
        {
            self.communications.shift_remove(communication_id);
        }
        true
    }

    /// Forget a communication and every task bound to it
    pub fn del_communication(&mut self, communication_id: &str) {
        if let Some(communication) = self.communications.shift_remove(communication_id) {
            for key in communication.tasks() {
                self.tasks.shift_remove(key);
            }
            debug!("Communication {} removed", communication_id);
        }
    }

    pub fn check_scope(&self, communication_id: &str, queues: &[String], profiles: &[String]) -> bool {
        self.bound_tasks(communication_id)
            .any(|task| task.check_scope(queues, profiles))
    }

    /// Whether a task of the communication is in scope, and when the
    /// in-scope tasks ended; null as soon as one of them is still running
    pub fn check_end_scope(&self, communication_id: &str, queues: &[String], profiles: &[String]) -> (bool, Value) {
        let mut in_scope = false;
        let mut end = Value::Null;
        for task in self.bound_tasks(communication_id) {
            let (task_in_scope, task_end) = task.check_end_scope(queues, profiles);
            if task_in_scope {
                in_scope = true;
                if !truthy(&task_end) {
                    return (true, Value::Null);
                }
                end = task_end;
            }
        }
        (in_scope, end)
    }

    fn bound_tasks<'a>(&'a self, communication_id: &str) -> impl Iterator<Item = &'a Task> + 'a {
        self.communications
            .get(communication_id)
            .map(|c| c.tasks())
            .unwrap_or_default()
            .iter()
            .filter_map(|key| self.tasks.get(key))
    }
}

fn required_key(data: &Map<String, Value>, field: &str) -> Result<String> {
    data.get(field)
        .map(value_key)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| RtError::malformed(format!("task row without {}", field)))
}

fn listed(scope: &[String], value: &Value) -> bool {
    value.as_str().is_some_and(|v| scope.iter().any(|s| s == v))
}
