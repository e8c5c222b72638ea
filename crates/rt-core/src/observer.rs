//! Observer bookkeeping.
//!
//! Subjects do not own their observers: they keep the observers' ids and
//! the engine resolves them when a notification is routed.

use serde_json::Value;

/// Identifier of a registered subscription
pub type SubscriptionId = String;

/// Ordered set of observer ids, in attach order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverList<T> {
    observers: Vec<T>,
}

impl<T> Default for ObserverList<T> {
    fn default() -> Self {
        Self {
            observers: Vec::new(),
        }
    }
}

impl<T: PartialEq + Clone> ObserverList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an observer; attaching twice is a no-op
    pub fn attach(&mut self, observer: T) {
        if !self.observers.contains(&observer) {
            self.observers.push(observer);
        }
    }

    /// Detach an observer, returning whether it was attached
    pub fn detach(&mut self, observer: &T) -> bool {
        match self.observers.iter().position(|o| o == observer) {
            Some(pos) => {
                self.observers.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, observer: &T) -> bool {
        self.observers.contains(observer)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.observers.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }
}

/// Content of a notification delivered to a subscription
#[derive(Debug, Clone, PartialEq)]
pub enum NoticePayload {
    /// Snapshot of one indicator (`get()` of the indicator)
    Indicator(Value),
    /// Rows flushed by a profile: one object per session
    ProfileRows(Vec<Value>),
    /// Rows flushed by the communication listener
    Communications(Vec<CommunicationRow>),
}

/// A notification waiting to be routed to a subscription
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub subscription: SubscriptionId,
    pub payload: NoticePayload,
}

impl Notice {
    pub fn new(subscription: impl Into<SubscriptionId>, payload: NoticePayload) -> Self {
        Self {
            subscription: subscription.into(),
            payload,
        }
    }
}

/// Snapshot of a communication or task as seen by the listener
#[derive(Debug, Clone, PartialEq)]
pub struct CommunicationRow {
    pub data: serde_json::Map<String, Value>,
    pub current_queue_name: Value,
    pub current_profile_name: Value,
    pub previous_queue_name: Value,
    pub previous_profile_name: Value,
    pub is_waiting: Value,
}

impl CommunicationRow {
    /// `data.communication_id` as a key
    pub fn communication_id(&self) -> String {
        self.data
            .get("communication_id")
            .map(crate::value::value_key)
            .unwrap_or_default()
    }

    /// `data.communication_task_id.value`
    pub fn task_id(&self) -> Value {
        self.data
            .get("communication_task_id")
            .and_then(crate::value::unwrap_value)
            .cloned()
            .unwrap_or(Value::Null)
    }
}
