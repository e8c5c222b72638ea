//! External interest registration and delivery.
//!
//! The [`Subscriber`] owns the [`IndicatorLut`] and every subscription.
//! Entities never call subscriptions directly: they leave [`Notice`]s in
//! the registry outbox, and [`Subscriber::route_notices`] hands them to
//! the subscription they name. What a subscription decides to send is
//! queued as a [`Delivery`] until the caller drains it into a
//! [`DeliverySink`].

pub mod communication;
pub mod key;
pub mod record;
pub mod subscription;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error};

use crate::error::{Result, RtError};
use crate::lookup::{IndicatorLut, Subject};
use crate::observer::{Notice, NoticePayload, SubscriptionId};
use crate::scheduler::TimerEvent;

pub use communication::{Cleanup, CommunicationSubscription, COMMUNICATION};
pub use key::compute_key;
pub use record::{record_rows, RecordKind};
pub use subscription::{IndicatorSubscription, PROFILE};

/// Something the engine wants to hand to its consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "delivery", rename_all = "snake_case")]
pub enum Delivery {
    /// Values of a session, queue, profile or communication subscription
    Values {
        #[serde(rename = "type")]
        kind: String,
        target: String,
        values: Value,
    },
    Record {
        values: Value,
    },
    AutoRecord {
        values: Value,
    },
    History {
        values: Value,
    },
}

impl Delivery {
    /// Hand this delivery to the matching sink method
    pub fn deliver(self, sink: &mut dyn DeliverySink) {
        match self {
            Delivery::Values { kind, target, values } => sink.send(&kind, &target, values),
            Delivery::Record { values } => sink.send_record_values(values),
            Delivery::AutoRecord { values } => sink.send_autorecord_values(values),
            Delivery::History { values } => sink.send_history_values(values),
        }
    }
}

/// Consumer of the engine output, e.g. a websocket pusher
pub trait DeliverySink {
    /// Values of a subscription of type `kind` on `target`
    fn send(&mut self, kind: &str, target: &str, values: Value);

    fn send_record_values(&mut self, values: Value);

    fn send_autorecord_values(&mut self, values: Value);

    fn send_history_values(&mut self, values: Value);
}

/// A registered subscription
#[derive(Debug, Clone)]
pub enum Subscription {
    Indicators(IndicatorSubscription),
    Communication(CommunicationSubscription),
    Record(RecordKind),
}

impl Subscription {
    pub fn target(&self) -> &str {
        match self {
            Subscription::Indicators(s) => s.target(),
            Subscription::Communication(s) => s.target(),
            Subscription::Record(_) => "",
        }
    }
}

#[derive(Debug)]
pub struct Subscriber {
    lut: IndicatorLut,
    subscriptions: IndexMap<SubscriptionId, Subscription>,
    deliveries: Vec<Delivery>,
}

impl Subscriber {
    pub fn new(lut: IndicatorLut) -> Self {
        Self {
            lut,
            subscriptions: IndexMap::new(),
            deliveries: Vec::new(),
        }
    }

    pub fn lut(&self) -> &IndicatorLut {
        &self.lut
    }

    pub fn lut_mut(&mut self) -> &mut IndicatorLut {
        &mut self.lut
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = (&SubscriptionId, &Subscription)> {
        self.subscriptions.iter()
    }

    pub fn get_subscription(&self, id: &str) -> Result<&Subscription> {
        self.subscriptions.get(id).ok_or_else(|| unknown_subscription(id))
    }

    /// Subscribe to indicators of a session or a queue.
    ///
    /// Returns `{"id": ..., "data": {indicator: value}}`.
    pub fn subscribe(
        &mut self,
        target: &str,
        kind: &str,
        indicators: &[String],
        profile: Option<&str>,
    ) -> Result<Value> {
        let id = compute_key(&format!("{}:{}", target, kind));
        let subjects = self
            .lut
            .get_indicators(target, kind, profile, indicators)
            .map_err(log_subscription_error)?;

        self.cancel(&id);
        let mut subscription = IndicatorSubscription::new(id.clone(), target, kind, profile.map(str::to_string));
        subscription.add_subjects(subjects, &mut self.lut);
        self.subscriptions.insert(id.clone(), Subscription::Indicators(subscription));

        let data = self.get_subscription_values(&id, indicators)?;
        Ok(json!({"id": id, "data": data}))
    }

    /// Subscribe to the session rows of a profile
    pub fn subscribe_profile(&mut self, target: &str, indicators: &[String]) -> Result<Value> {
        let id = compute_key(&format!("{}:session:profile", target));
        self.lut
            .add_profile_indicators(target, indicators)
            .map_err(log_subscription_error)?;

        self.cancel(&id);
        let mut subscription = IndicatorSubscription::new(id.clone(), target, PROFILE, Some(target.to_string()));
        subscription.add_subject(Subject::Profile(target.to_string()), &mut self.lut);
        let mut listenable = vec!["login".to_string()];
        listenable.extend(indicators.iter().cloned());
        subscription.add_listenable_indicators(&listenable);
        self.subscriptions.insert(id.clone(), Subscription::Indicators(subscription));

        let data = self.get_subscription_values(&id, indicators)?;
        Ok(json!({"id": id, "data": data}))
    }

    /// Subscribe to the communications handled by queues or profiles
    pub fn subscribe_communication(
        &mut self,
        target: &str,
        indicators: &[String],
        profiles: &[String],
        queues: &[String],
    ) -> Value {
        let id = compute_key(&format!(
            "{}:{}:{}:communicationsvalues",
            target,
            profiles.len(),
            queues.len()
        ));
        self.cancel(&id);
        let subscription = CommunicationSubscription::new(
            id.clone(),
            target,
            indicators.to_vec(),
            profiles.to_vec(),
            queues.to_vec(),
        );
        self.lut.attach(&Subject::CommunicationListener, &id);
        self.subscriptions
            .insert(id.clone(), Subscription::Communication(subscription));

        let data = self.get_communications_values(&id, indicators);
        json!({"id": id, "data": data})
    }

    pub fn subscribe_record_values(&mut self) -> SubscriptionId {
        self.subscribe_singleton(RecordKind::Record)
    }

    pub fn subscribe_autorecord_values(&mut self) -> SubscriptionId {
        self.subscribe_singleton(RecordKind::AutoRecord)
    }

    pub fn subscribe_history_values(&mut self) -> SubscriptionId {
        self.subscribe_singleton(RecordKind::History)
    }

    fn subscribe_singleton(&mut self, kind: RecordKind) -> SubscriptionId {
        let id = compute_key(kind.key_source());
        self.subscriptions.insert(id.clone(), Subscription::Record(kind));
        match kind {
            RecordKind::Record => self.lut.set_record_indicators(&id),
            RecordKind::AutoRecord => self.lut.set_autorecord_session_watchers(&id),
            RecordKind::History => self.lut.set_history_indicators(&id),
        }
        id
    }

    /// Add or remove session indicators of a profile subscription.
    /// Returns the current values of the added indicators.
    pub fn update_profile_indicators(
        &mut self,
        id: &str,
        added: &[String],
        removed: &[String],
    ) -> Result<Option<Value>> {
        let target = match self.subscriptions.get(id) {
            Some(Subscription::Indicators(s)) if s.is_profile() => s.target().to_string(),
            Some(_) => return Err(RtError::subscription(format!("Subscription '{}' is not a profile subscription", id))),
            None => return Err(unknown_subscription(id)),
        };

        if !removed.is_empty() {
            self.lut.del_profile_indicators(&target, removed)?;
            if let Some(Subscription::Indicators(s)) = self.subscriptions.get_mut(id) {
                s.del_listenable_indicators(removed)?;
            }
        }
        if added.is_empty() {
            return Ok(None);
        }
        self.lut.add_profile_indicators(&target, added)?;
        if let Some(Subscription::Indicators(s)) = self.subscriptions.get_mut(id) {
            s.add_listenable_indicators(added);
        }
        let data = self.get_subscription_values(id, added)?;
        Ok(Some(json!({"data": data})))
    }

    /// Widen the scope of a communication subscription and change its
    /// indicators. Returns a new snapshot when indicators were added.
    pub fn update_communication_indicators(
        &mut self,
        id: &str,
        profiles: &[String],
        queues: &[String],
        added: &[String],
        removed: &[String],
    ) -> Result<Option<Value>> {
        let subscription = match self.subscriptions.get_mut(id) {
            Some(Subscription::Communication(s)) => s,
            Some(_) => {
                return Err(RtError::subscription(format!(
                    "Subscription '{}' is not a communication subscription",
                    id
                )))
            }
            None => return Err(unknown_subscription(id)),
        };
        subscription.add_listenable_profiles(profiles);
        subscription.add_listenable_queues(queues);
        if !removed.is_empty() {
            subscription.del_listenable_indicators(removed)?;
        }
        if added.is_empty() {
            return Ok(None);
        }
        subscription.add_listenable_indicators(added);
        let indicators = subscription.listenable_indicators().to_vec();
        let data = self.get_communications_values(id, &indicators);
        Ok(Some(json!({"data": data})))
    }

    /// Add and remove indicators of a session or queue subscription
    pub fn update_subscription(&mut self, id: &str, added: &[String], removed: &[String]) -> Result<Option<Value>> {
        let (target, kind, profile) = match self.subscriptions.get(id) {
            Some(Subscription::Indicators(s)) => (
                s.target().to_string(),
                s.kind().to_string(),
                s.profile().map(str::to_string),
            ),
            Some(_) => {
                return Err(RtError::subscription(format!(
                    "Subscription '{}' does not hold indicators",
                    id
                )))
            }
            None => return Err(unknown_subscription(id)),
        };

        let added_subjects = self
            .lut
            .get_indicators(&target, &kind, profile.as_deref(), added)
            .map_err(log_subscription_error)?;
        let removed_subjects = self
            .lut
            .get_indicators(&target, &kind, profile.as_deref(), removed)
            .map_err(log_subscription_error)?;

        if let Some(Subscription::Indicators(s)) = self.subscriptions.get_mut(id) {
            s.add_subjects(added_subjects, &mut self.lut);
            s.del_subjects(&removed_subjects, &mut self.lut);
        }
        if added.is_empty() {
            return Ok(None);
        }
        self.get_subscription_values(id, added).map(Some)
    }

    /// Current values of some indicators of a subscription: an object for
    /// sessions and queues, one row per session for profiles
    pub fn get_subscription_values(&mut self, id: &str, indicators: &[String]) -> Result<Value> {
        let (target, kind, profile) = match self.subscriptions.get(id) {
            Some(Subscription::Indicators(s)) => (
                s.target().to_string(),
                s.kind().to_string(),
                s.profile().map(str::to_string),
            ),
            Some(_) => return Ok(Value::Null),
            None => return Err(unknown_subscription(id)),
        };

        if kind == PROFILE {
            let rows = self.lut.add_profile(&target).get_values(indicators, false);
            return Ok(Value::Array(rows));
        }

        let mut data = Map::new();
        for name in indicators {
            let subjects = self
                .lut
                .get_indicators(&target, &kind, profile.as_deref(), std::slice::from_ref(name))
                .map_err(log_subscription_error)?;
            let value = subjects
                .first()
                .and_then(|subject| self.lut.subject_value(subject))
                .map(|payload| match payload {
                    Value::Object(mut keyed) if keyed.contains_key(name) => {
                        keyed.remove(name).unwrap_or(Value::Null)
                    }
                    other => other,
                })
                .unwrap_or(Value::Null);
            data.insert(name.clone(), value);
        }
        Ok(Value::Object(data))
    }

    /// Rows of the listener snapshot within the scope of a communication subscription
    pub fn get_communications_values(&mut self, id: &str, indicators: &[String]) -> Vec<Value> {
        let filter: Vec<&str> = indicators.iter().map(String::as_str).collect();
        let rows = self.lut.listener().get_values(&filter);
        match self.subscriptions.get_mut(id) {
            Some(Subscription::Communication(s)) => s.get_data_from_values(rows),
            _ => Vec::new(),
        }
    }

    pub fn unsubscribe(&mut self, id: &str) -> Result<()> {
        if self.cancel(id) {
            return Ok(());
        }
        let err = unknown_subscription(id);
        error!("{}", err);
        Err(err)
    }

    pub fn unsubscribe_all(&mut self) {
        let ids: Vec<SubscriptionId> = self.subscriptions.keys().cloned().collect();
        for id in ids {
            self.cancel(&id);
        }
    }

    /// Remove a subscription and detach it from its subjects
    fn cancel(&mut self, id: &str) -> bool {
        let Some(subscription) = self.subscriptions.shift_remove(id) else {
            return false;
        };
        match subscription {
            Subscription::Indicators(mut s) => s.cancel(&mut self.lut),
            Subscription::Communication(_) => {
                self.lut.detach(&Subject::CommunicationListener, id);
            }
            Subscription::Record(_) => self.lut.release_singleton(id),
        }
        debug!("Subscription {} cancelled", id);
        true
    }

    /// Reset every indicator of the registry
    pub fn reset(&mut self) {
        self.lut.reset();
    }

    /// Hand every pending notice of the registry to its subscription,
    /// until no more notices are produced
    pub fn route_notices(&mut self) {
        loop {
            let notices = self.lut.take_notices();
            if notices.is_empty() {
                return;
            }
            for notice in notices {
                self.route(notice);
            }
        }
    }

    fn route(&mut self, notice: Notice) {
        let Notice { subscription: id, payload } = notice;
        let Some(subscription) = self.subscriptions.get_mut(&id) else {
            debug!("Dropping notice for unknown subscription {}", id);
            return;
        };

        match (subscription, payload) {
            (Subscription::Indicators(s), NoticePayload::ProfileRows(rows)) if s.is_profile() => {
                let rows = s.filter_rows(&rows);
                if !rows.is_empty() {
                    self.prepare_to_send(&id, PROFILE, Value::Array(rows));
                }
            }
            (Subscription::Indicators(s), NoticePayload::Indicator(payload)) if !s.is_profile() => {
                if s.update(&payload) {
                    let delay = self.lut.timers().timings().subscription_flush();
                    self.lut
                        .timers_mut()
                        .schedule(delay, TimerEvent::SubscriptionFlush { id });
                }
            }
            (Subscription::Communication(s), NoticePayload::Communications(rows)) => {
                let cleanups = s.update(&rows, self.lut.listener());
                let flush = s.needs_flush();
                let timings = *self.lut.timers().timings();
                for Cleanup {
                    communication_id,
                    task_id,
                } in cleanups
                {
                    self.lut.timers_mut().schedule(
                        timings.scope_cleanup(),
                        TimerEvent::CleanCommunication {
                            communication_id,
                            task_id,
                        },
                    );
                }
                if flush {
                    self.lut.timers_mut().schedule(
                        timings.communication_subscription_flush(),
                        TimerEvent::SubscriptionFlush { id },
                    );
                }
            }
            (Subscription::Record(RecordKind::Record), payload) => {
                let queues = self.lut.get_queues_table();
                for values in record_rows(&payload, &queues) {
                    self.deliveries.push(Delivery::Record { values });
                }
            }
            (Subscription::Record(RecordKind::AutoRecord), NoticePayload::Indicator(values)) => {
                self.deliveries.push(Delivery::AutoRecord { values });
            }
            (Subscription::Record(RecordKind::History), NoticePayload::Indicator(values)) => {
                self.deliveries.push(Delivery::History { values });
            }
            (_, payload) => debug!("Subscription {} ignores {:?}", id, payload),
        }
    }

    /// Send what a subscription buffered during its debounce window
    pub fn flush_subscription(&mut self, id: &str) {
        let (kind, values) = match self.subscriptions.get_mut(id) {
            Some(Subscription::Indicators(s)) => (s.kind().to_string(), s.flush()),
            Some(Subscription::Communication(s)) => (COMMUNICATION.to_string(), s.flush()),
            _ => return,
        };
        if let Some(values) = values {
            self.prepare_to_send(id, &kind, values);
        }
    }

    fn prepare_to_send(&mut self, id: &str, kind: &str, values: Value) {
        let Some(subscription) = self.subscriptions.get(id) else {
            error!(
                "Sending data failed, subscription_id({}) is unknown: type={} data={}",
                id, kind, values
            );
            return;
        };
        let target = subscription.target().to_string();
        self.deliveries.push(Delivery::Values {
            kind: kind.to_string(),
            target,
            values,
        });
    }

    pub fn take_deliveries(&mut self) -> Vec<Delivery> {
        std::mem::take(&mut self.deliveries)
    }
}

fn unknown_subscription(id: &str) -> RtError {
    RtError::subscription(format!("Unknown subscription id '{}'", id))
}

fn log_subscription_error(err: RtError) -> RtError {
    error!("{}", err);
    err.into_subscription()
}
