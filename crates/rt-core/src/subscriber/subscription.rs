//! Subscriptions to session, queue and profile indicators

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{Result, RtError};
use crate::lookup::{IndicatorLut, Subject};
use crate::observer::SubscriptionId;

/// Subscription type of profile subscriptions
pub const PROFILE: &str = "profile";

/// Interest of one consumer in a list of indicators of one target.
///
/// Session and queue subscriptions gather indicator payloads and send them
/// once the debounce delay is over. Profile subscriptions forward the rows
/// of their profile right away, reduced to the listened indicators.
#[derive(Debug, Clone)]
pub struct IndicatorSubscription {
    id: SubscriptionId,
    target: String,
    kind: String,
    profile: Option<String>,
    subjects: Vec<Subject>,
    buffer: Map<String, Value>,
    flush_pending: bool,
    listenable: Vec<String>,
}

impl IndicatorSubscription {
    pub fn new(
        id: impl Into<SubscriptionId>,
        target: impl Into<String>,
        kind: impl Into<String>,
        profile: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            target: target.into(),
            kind: kind.into(),
            profile,
            subjects: Vec::new(),
            buffer: Map::new(),
            flush_pending: false,
            listenable: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// "session", "service" or "profile"
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    pub fn is_profile(&self) -> bool {
        self.kind == PROFILE
    }

    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    pub fn listenable_indicators(&self) -> &[String] {
        &self.listenable
    }

    pub fn add_subject(&mut self, subject: Subject, lut: &mut IndicatorLut) {
        if self.subjects.contains(&subject) {
            return;
        }
        lut.attach(&subject, &self.id);
        self.subjects.push(subject);
    }

    pub fn add_subjects(&mut self, subjects: Vec<Subject>, lut: &mut IndicatorLut) {
        for subject in subjects {
            self.add_subject(subject, lut);
        }
    }

    pub fn del_subjects(&mut self, subjects: &[Subject], lut: &mut IndicatorLut) {
        for subject in subjects {
            if let Some(pos) = self.subjects.iter().position(|s| s == subject) {
                self.subjects.remove(pos);
                lut.detach(subject, &self.id);
            }
        }
    }

    /// Detach from every subject
    pub fn cancel(&mut self, lut: &mut IndicatorLut) {
        for subject in self.subjects.drain(..) {
            if !lut.detach(&subject, &self.id) {
                warn!("Canceling subject {:?} from subscription {} failed", subject, self.id);
            }
        }
    }

    /// Merge an indicator payload into the buffer. Returns true when the
    /// buffer was empty of pending work and a flush must be scheduled.
    pub fn update(&mut self, payload: &Value) -> bool {
        let Value::Object(values) = payload else {
            debug!("Subscription {} ignores unkeyed payload {}", self.id, payload);
            return false;
        };
        for (name, value) in values {
            self.buffer.insert(name.clone(), value.clone());
        }
        if self.flush_pending {
            return false;
        }
        self.flush_pending = true;
        true
    }

    /// Reduce profile rows to the listened indicators, keeping the rows that
    /// carry more than their login
    pub fn filter_rows(&self, rows: &[Value]) -> Vec<Value> {
        rows.iter()
            .filter_map(Value::as_object)
            .map(|row| {
                row.iter()
                    .filter(|(name, _)| self.listenable.iter().any(|l| l == *name))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect::<Map<String, Value>>()
            })
            .filter(|row| row.len() > 1)
            .map(Value::Object)
            .collect()
    }

    /// Take the buffered values; None when nothing changed
    pub fn flush(&mut self) -> Option<Value> {
        self.flush_pending = false;
        if self.buffer.is_empty() {
            return None;
        }
        Some(Value::Object(std::mem::take(&mut self.buffer)))
    }

    pub fn add_listenable_indicators(&mut self, names: &[String]) {
        for name in names {
            if !self.listenable.contains(name) {
                self.listenable.push(name.clone());
            }
        }
    }

    /// Stop listening to `names`; nothing changes if one of them is not listened to
    pub fn del_listenable_indicators(&mut self, names: &[String]) -> Result<()> {
        let mut listenable = self.listenable.clone();
        for name in names {
            match listenable.iter().position(|l| l == name) {
                Some(pos) => {
                    listenable.remove(pos);
                }
                None => return Err(RtError::lookup(format!("Indicator {} not subscribed.", name))),
            }
        }
        self.listenable = listenable;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_updates_are_merged_until_flush() {
        let mut subscription = IndicatorSubscription::new("id", "alice", "session", Some("Level1".into()));
        assert!(subscription.update(&json!({"user_vocal_state": {"value": "busy"}})));
        assert!(!subscription.update(&json!({"user_vocal_mode": {"value": "inbound"}})));
        assert!(!subscription.update(&json!({"user_vocal_state": {"value": "available"}})));

        assert_eq!(
            subscription.flush(),
            Some(json!({
                "user_vocal_state": {"value": "available"},
                "user_vocal_mode": {"value": "inbound"},
            }))
        );
        assert_eq!(subscription.flush(), None);
        assert!(subscription.update(&json!({"user_vocal_state": {"value": "busy"}})));
    }

    #[test]
    fn test_profile_rows_are_filtered() {
        let mut subscription = IndicatorSubscription::new("id", "Level1", PROFILE, Some("Level1".into()));
        subscription.add_listenable_indicators(&names(&["login", "user_vocal_state", "login"]));
        assert_eq!(subscription.listenable_indicators(), ["login", "user_vocal_state"]);

        let rows = vec![
            json!({"login": "alice", "user_vocal_state": {"value": "busy"}, "is_logged": {"value": 1}}),
            json!({"login": "bob", "is_logged": {"value": 1}}),
        ];
        assert_eq!(
            subscription.filter_rows(&rows),
            vec![json!({"login": "alice", "user_vocal_state": {"value": "busy"}})]
        );
    }

    #[test]
    fn test_del_listenable_is_all_or_nothing() {
        let mut subscription = IndicatorSubscription::new("id", "Level1", PROFILE, Some("Level1".into()));
        subscription.add_listenable_indicators(&names(&["login", "user_vocal_state"]));
        let err = subscription
            .del_listenable_indicators(&names(&["user_vocal_state", "user_vocal_mode"]))
            .unwrap_err();
        assert_eq!(err, RtError::lookup("Indicator user_vocal_mode not subscribed."));
        assert_eq!(subscription.listenable_indicators().len(), 2);

        subscription
            .del_listenable_indicators(&names(&["user_vocal_state"]))
            .unwrap();
        assert_eq!(subscription.listenable_indicators(), ["login"]);
    }
}
