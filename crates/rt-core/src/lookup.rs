//! Registry of every entity the engine tracks.
//!
//! [`IndicatorLut`] owns profiles (and their sessions), services, the
//! communication listener and the daily listener, together with the timers
//! and the outbox of notices produced while applying rows. Subscriptions
//! never hold references into it: they name what they observe with a
//! [`Subject`] and the registry resolves it on demand.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::entities::{Effects, Profile, Service, Session};
use crate::error::{Result, RtError};
use crate::indicators::session::{is_named_withdrawal, AUTORECORD_WATCHER, RECORD_INDICATOR, USER_ACTIVITY};
use crate::indicators::ComputeCtx;
use crate::listeners::{CommunicationListener, DailyListener};
use crate::observer::{Notice, NoticePayload, SubscriptionId};
use crate::scheduler::Timers;
use crate::value::{unwrap_value, wrapped};

/// Profile holding the supervisor's shared session
pub const SUPERVISOR_PROFILE: &str = "Superviseur_default";

const CONSISTENT_LOGIN: &str = "consistent";

/// Something a subscription can observe
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    /// One indicator of a queue
    ServiceIndicator { service: String, indicator: String },
    /// One indicator of one session instance
    SessionIndicator {
        profile: String,
        login: String,
        serial: u64,
        indicator: String,
    },
    /// The rows flushed by a profile
    Profile(String),
    /// The rows flushed by the communication listener
    CommunicationListener,
}

/// Build the mutation context from the registry's own fields
macro_rules! effects {
    ($lut:ident) => {
        Effects {
            ctx: ComputeCtx::with_daily(&$lut.daily),
            timers: &mut $lut.timers,
            notices: &mut $lut.outbox,
        }
    };
}

#[derive(Debug)]
pub struct IndicatorLut {
    profiles: IndexMap<String, Profile>,
    services: IndexMap<String, Service>,
    listener: CommunicationListener,
    daily: DailyListener,
    timers: Timers,
    outbox: Vec<Notice>,
    next_serial: u64,
    record_subscription: Option<SubscriptionId>,
    autorecord_subscription: Option<SubscriptionId>,
    history_subscription: Option<SubscriptionId>,
}

impl IndicatorLut {
    pub fn new(timers: Timers) -> Self {
        Self {
            profiles: IndexMap::new(),
            services: IndexMap::new(),
            listener: CommunicationListener::new(),
            daily: DailyListener::new(),
            timers,
            outbox: Vec::new(),
            next_serial: 0,
            record_subscription: None,
            autorecord_subscription: None,
            history_subscription: None,
        }
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut Timers {
        &mut self.timers
    }

    /// Drain the notices waiting to be routed
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.outbox)
    }

    pub fn has_notices(&self) -> bool {
        !self.outbox.is_empty()
    }

    pub fn daily(&self) -> &DailyListener {
        &self.daily
    }

    pub fn listener(&self) -> &CommunicationListener {
        &self.listener
    }

    pub fn has_profile(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    /// Profile `name`, created when missing
    pub fn add_profile(&mut self, name: &str) -> &mut Profile {
        self.profiles
            .entry(name.to_string())
            .or_insert_with(|| Profile::new(name))
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Service `name`, created when missing
    pub fn add_service(&mut self, name: &str) -> &mut Service {
        self.services
            .entry(name.to_string())
            .or_insert_with(|| Service::new(name))
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    /// Session of `login` in `profile`, creating both when missing.
    /// Returns the serial of the session instance.
    pub fn get_session(&mut self, profile: &str, login: &str) -> u64 {
        if let Some(session) = self.profiles.get(profile).and_then(|p| p.session(login)) {
            return session.serial();
        }

        self.next_serial += 1;
        let serial = self.next_serial;
        let record = self.record_subscription.clone();
        let autorecord = self.autorecord_subscription.clone();
        let history = self.history_subscription.clone();

        let profile = self.add_profile(profile);
        match profile.add_session(login, serial) {
            Ok(session) => {
                debug!("Session {} created in {}", login, session.profile());
                let singletons = [
                    (RECORD_INDICATOR, record),
                    (AUTORECORD_WATCHER, autorecord),
                    (USER_ACTIVITY, history),
                ];
                for (name, subscription) in singletons {
                    if let Some(id) = subscription {
                        attach_session_indicator(session, name, id);
                    }
                }
            }
            Err(e) => debug!("{}", e),
        }
        serial
    }

    /// Availability of a logged user, from its vocal state
    pub fn get_availability_from_login(&self, login: &str) -> Result<&'static str> {
        for profile in self.profiles.values() {
            let Some(session) = profile.session(login) else {
                continue;
            };
            if !session.is_logged() {
                return Err(RtError::availability("error.user_not_found"));
            }
            let state = session.indicators().value_of("user_vocal_state");
            let available = matches!(state.as_str(), Some("available") | Some("supervision"));
            return Ok(if available { "available" } else { "unavailable" });
        }
        Err(RtError::availability("error.user_not_found"))
    }

    /// Technical queue name to display name
    pub fn get_queues_table(&self) -> Map<String, Value> {
        self.services
            .values()
            .map(|service| service.table_name())
            .collect()
    }

    /// One `{indicator: {"value": v}}` row per session of every profile not ignored
    pub fn get_values_from_profiles(&self, indicators: &[String], ignored: &[String]) -> Vec<Value> {
        let mut rows = Vec::new();
        for profile in self.profiles.values() {
            if ignored.iter().any(|name| name == profile.name()) {
                continue;
            }
            for row in profile.get_values(indicators, true) {
                let Value::Object(row) = row else {
                    continue;
                };
                let filtered: Map<String, Value> = row
                    .into_iter()
                    .map(|(name, value)| {
                        let inner = unwrap_value(&value).cloned().unwrap_or(value);
                        (name, wrapped(inner))
                    })
                    .collect();
                rows.push(Value::Object(filtered));
            }
        }
        rows
    }

    /// Session id of the supervisor's shared session; null without that profile
    pub fn get_consistent_session_id(&mut self) -> Value {
        if !self.has_profile(SUPERVISOR_PROFILE) {
            return Value::Null;
        }
        self.get_session(SUPERVISOR_PROFILE, CONSISTENT_LOGIN);
        self.profiles
            .get(SUPERVISOR_PROFILE)
            .and_then(|p| p.session(CONSISTENT_LOGIN))
            .map(|session| session.get_values(&[], &["vocal_session_id".to_string()], true))
            .and_then(|values| values.get("vocal_session_id").and_then(unwrap_value).cloned())
            .unwrap_or(Value::Null)
    }

    /// Attach the record subscription to every session and to the communication listener
    pub fn set_record_indicators(&mut self, id: &str) {
        let id = self.record_subscription.get_or_insert_with(|| id.to_string()).clone();
        for session in self.profiles.values_mut().flat_map(|p| p.sessions_mut()) {
            attach_session_indicator(session, RECORD_INDICATOR, id.clone());
        }
        self.listener.observers_mut().attach(id);
    }

    pub fn set_history_indicators(&mut self, id: &str) {
        let id = self.history_subscription.get_or_insert_with(|| id.to_string()).clone();
        for session in self.profiles.values_mut().flat_map(|p| p.sessions_mut()) {
            attach_session_indicator(session, USER_ACTIVITY, id.clone());
        }
    }

    /// Attach the autorecord subscription to every session and replay the
    /// current watcher values
    pub fn set_autorecord_session_watchers(&mut self, id: &str) {
        let id = self.autorecord_subscription.get_or_insert_with(|| id.to_string()).clone();
        for session in self.profiles.values_mut().flat_map(|p| p.sessions_mut()) {
            attach_session_indicator(session, AUTORECORD_WATCHER, id.clone());
            if let Some(watcher) = session.indicators().by_name(AUTORECORD_WATCHER) {
                self.outbox.push(Notice::new(id.clone(), NoticePayload::Indicator(watcher.get())));
            }
        }
    }

    /// Detach a record, autorecord or history subscription from every
    /// session and from the listener
    pub fn release_singleton(&mut self, id: &str) {
        let id = id.to_string();
        for stored in [
            &mut self.record_subscription,
            &mut self.autorecord_subscription,
            &mut self.history_subscription,
        ] {
            if stored.as_ref() == Some(&id) {
                *stored = None;
            }
        }
        for session in self.profiles.values_mut().flat_map(|p| p.sessions_mut()) {
            for name in [RECORD_INDICATOR, AUTORECORD_WATCHER, USER_ACTIVITY] {
                if let Some(slot) = session.indicators().slot(name) {
                    session.indicators_mut().observers_mut(slot).detach(&id);
                }
            }
        }
        self.listener.observers_mut().detach(&id);
    }

    /// Resolve indicator names of a target into subjects
    pub fn get_indicators(
        &mut self,
        target: &str,
        kind: &str,
        profile: Option<&str>,
        indicators: &[String],
    ) -> Result<Vec<Subject>> {
        match kind {
            "service" => {
                let service = self.add_service(target);
                indicators
                    .iter()
                    .map(|name| {
                        if service.indicators().has(name) {
                            Ok(Subject::ServiceIndicator {
                                service: target.to_string(),
                                indicator: name.clone(),
                            })
                        } else {
                            Err(RtError::lookup(format!("Unknown indicator name '{}'", name)))
                        }
                    })
                    .collect()
            }
            "session" => {
                let Some(profile) = profile.filter(|p| !p.is_empty()) else {
                    return Err(RtError::lookup(
                        "Profile_name is missing, impossible to subscribe to a session's indicator.",
                    ));
                };
                let serial = self.get_session(profile, target);
                let Some(session) = self.session_mut(profile, target) else {
                    return Err(RtError::lookup(format!("Session {} not found in {}", target, profile)));
                };
                let mut subjects = Vec::with_capacity(indicators.len());
                for name in indicators {
                    let indicator = if session.indicators().has(name) {
                        name.clone()
                    } else if is_named_withdrawal(name) {
                        session.withdrawal_indicator(name)?
                    } else {
                        return Err(RtError::lookup(format!("Unknown indicator name '{}'", name)));
                    };
                    subjects.push(Subject::SessionIndicator {
                        profile: profile.to_string(),
                        login: target.to_string(),
                        serial,
                        indicator,
                    });
                }
                Ok(subjects)
            }
            other => Err(RtError::lookup(format!("Invalid type [{}] provided.", other))),
        }
    }

    /// Make the profile listen to more session indicators; known names are skipped
    pub fn add_profile_indicators(&mut self, target: &str, indicators: &[String]) -> Result<()> {
        let profile = self.add_profile(target);
        for name in indicators {
            if !profile.has_indicator(name) {
                profile.add_indicator(name)?;
            }
        }
        Ok(())
    }

    /// Stop listening to session indicators; unknown names are skipped
    pub fn del_profile_indicators(&mut self, target: &str, indicators: &[String]) -> Result<()> {
        let profile = self.add_profile(target);
        for name in indicators {
            if profile.has_indicator(name) {
                profile.del_indicator(name)?;
            }
        }
        Ok(())
    }

    pub fn attach(&mut self, subject: &Subject, id: &str) -> bool {
        match subject {
            Subject::Profile(name) => {
                self.add_profile(name).observers_mut().attach(id.to_string());
                true
            }
            Subject::CommunicationListener => {
                self.listener.observers_mut().attach(id.to_string());
                true
            }
            _ => match self.subject_slot(subject) {
                Some((set, slot)) => {
                    set.observers_mut(slot).attach(id.to_string());
                    true
                }
                None => false,
            },
        }
    }

    /// Detach a subscription; false when the subject is gone
    pub fn detach(&mut self, subject: &Subject, id: &str) -> bool {
        let id = id.to_string();
        match subject {
            Subject::Profile(name) => self
                .profiles
                .get_mut(name)
                .is_some_and(|p| p.observers_mut().detach(&id)),
            Subject::CommunicationListener => self.listener.observers_mut().detach(&id),
            _ => self
                .subject_slot(subject)
                .is_some_and(|(set, slot)| set.observers_mut(slot).detach(&id)),
        }
    }

    /// Current `get()` of an indicator subject
    pub fn subject_value(&mut self, subject: &Subject) -> Option<Value> {
        self.subject_slot(subject).map(|(set, slot)| set.get(slot))
    }

    fn subject_slot(&mut self, subject: &Subject) -> Option<(&mut crate::indicators::IndicatorSet, usize)> {
        let set = match subject {
            Subject::ServiceIndicator { service, .. } => self.services.get_mut(service)?.indicators_mut(),
            Subject::SessionIndicator {
                profile, login, serial, ..
            } => {
                let session = self.profiles.get_mut(profile)?.session_mut(login)?;
                if session.serial() != *serial {
                    return None;
                }
                session.indicators_mut()
            }
            _ => return None,
        };
        let name = match subject {
            Subject::ServiceIndicator { indicator, .. } | Subject::SessionIndicator { indicator, .. } => indicator,
            _ => return None,
        };
        let slot = set.slot(name)?;
        Some((set, slot))
    }

    fn session_mut(&mut self, profile: &str, login: &str) -> Option<&mut Session> {
        self.profiles.get_mut(profile)?.session_mut(login)
    }

    /// Apply a user row to its session
    pub fn apply_session_data(&mut self, profile: &str, login: &str, data: &Map<String, Value>) {
        self.get_session(profile, login);
        let mut fx = effects!(self);
        if let Some(session) = self.profiles.get_mut(profile).and_then(|p| p.session_mut(login)) {
            session.apply_data(data, &mut fx);
        }
    }

    /// Apply the named withdrawal durations of a user row
    pub fn apply_withdrawal_data(&mut self, profile: &str, login: &str, data: &Map<String, Value>) {
        self.get_session(profile, login);
        let mut fx = effects!(self);
        if let Some(session) = self.profiles.get_mut(profile).and_then(|p| p.session_mut(login)) {
            session.apply_data_for_withdrawal_states(data, &mut fx);
        }
    }

    /// Apply a queue row, creating the queue when missing
    pub fn apply_service_data(&mut self, name: &str, data: &Map<String, Value>) {
        self.add_service(name);
        let mut fx = effects!(self);
        if let Some(service) = self.services.get_mut(name) {
            service.apply_data(data, &mut fx);
        }
    }

    /// Apply a row to a communication, tracking it first when unknown
    pub fn apply_communication_data(&mut self, id: &str, communication_type: &str, data: &Map<String, Value>) {
        self.listener.add_communication(id, communication_type);
        let mut fx = effects!(self);
        self.listener.apply_communication_data(id, data, &mut fx);
    }

    pub fn apply_task_data(&mut self, data: &Map<String, Value>) -> Result<()> {
        let mut fx = effects!(self);
        self.listener.apply_task_data(data, &mut fx)
    }

    pub fn apply_daily_data(&mut self, profile: &str, login: &str, session_id: &str, data: &Map<String, Value>) {
        self.daily.apply_data(profile, login, session_id, data);
    }

    pub fn del_communication(&mut self, id: &str) {
        self.listener.del_communication(id);
    }

    pub fn clean_communication(&mut self, communication_id: &str, task_id: &str) -> bool {
        self.listener.clean_communication(communication_id, task_id)
    }

    /// Push the buffered changes of a session to its profile; stale
    /// instances are ignored
    pub fn flush_session(&mut self, profile: &str, login: &str, serial: u64) {
        let mut fx = effects!(self);
        let Some(profile) = self.profiles.get_mut(profile) else {
            return;
        };
        let data = match profile.session_mut(login) {
            Some(session) if session.serial() == serial => session.flush(),
            _ => return,
        };
        profile.update(data, &mut fx);
    }

    /// Send the rows gathered by a profile to its subscriptions
    pub fn flush_profile(&mut self, name: &str) {
        let Some(profile) = self.profiles.get_mut(name) else {
            return;
        };
        let rows = profile.flush();
        for observer in profile.observers().iter() {
            self.outbox.push(Notice::new(
                observer.clone(),
                NoticePayload::ProfileRows(rows.clone()),
            ));
        }
    }

    pub fn flush_communication(&mut self, id: &str) {
        let mut fx = effects!(self);
        self.listener.flush_communication(id, &mut fx);
    }

    pub fn flush_task(&mut self, key: &str) {
        let mut fx = effects!(self);
        self.listener.flush_task(key, &mut fx);
    }

    pub fn flush_listener(&mut self) {
        self.listener.flush(&mut self.outbox);
    }

    /// Reset the indicators of every service and session
    pub fn reset(&mut self) {
        info!(
            "CCCP - Resetting values for {} services and {} profiles.",
            self.services.len(),
            self.profiles.len()
        );
        let mut fx = effects!(self);
        for service in self.services.values_mut() {
            service.reset(&mut fx);
        }
        for profile in self.profiles.values_mut() {
            profile.reset(&mut fx);
        }
    }

    /// Forget the day's terminated outbound sessions
    pub fn reset_daily(&mut self) {
        self.daily.reset();
    }
}

fn attach_session_indicator(session: &mut Session, name: &str, id: SubscriptionId) {
    if let Some(slot) = session.indicators().slot(name) {
        session.indicators_mut().observers_mut(slot).attach(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timings;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::time::Instant;

    fn lut() -> IndicatorLut {
        IndicatorLut::new(Timers::new(Instant::now(), Timings::default()))
    }

    fn row(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_availability() {
        let mut lut = lut();
        assert_eq!(
            lut.get_availability_from_login("alice").unwrap_err(),
            RtError::availability("error.user_not_found")
        );

        lut.apply_session_data("Level1", "alice", &row(json!({"sessions.last.session.logged": 1})));
        assert_eq!(lut.get_availability_from_login("alice").unwrap(), "unavailable");

        lut.apply_session_data("Level2", "bob", &row(json!({"sessions.last.session.logged": 0})));
        assert!(lut.get_availability_from_login("bob").is_err());
    }

    #[test]
    fn test_get_indicators_errors() {
        let mut lut = lut();
        let err = lut
            .get_indicators("alice", "session", None, &names(&["user_vocal_state"]))
            .unwrap_err();
        assert_eq!(
            err,
            RtError::lookup("Profile_name is missing, impossible to subscribe to a session's indicator.")
        );
        let err = lut.get_indicators("alice", "queue", None, &[]).unwrap_err();
        assert_eq!(err, RtError::lookup("Invalid type [queue] provided."));
        let err = lut
            .get_indicators("sales", "service", None, &names(&["nope"]))
            .unwrap_err();
        assert_eq!(err, RtError::lookup("Unknown indicator name 'nope'"));
        assert!(lut.has_service("sales"));
    }

    #[test]
    fn test_session_subjects_follow_the_instance() {
        let mut lut = lut();
        let subjects = lut
            .get_indicators(
                "alice",
                "session",
                Some("Level1"),
                &names(&["user_vocal_state", "user_vocal_total_named_lunch_withdrawal_duration"]),
            )
            .unwrap();
        assert_eq!(subjects.len(), 2);
        assert!(lut.attach(&subjects[0], "sub"));
        assert!(lut.subject_value(&subjects[1]).is_some());

        // A later session with the same login is another instance
        lut.apply_session_data("Level1", "alice", &row(json!({"sessions.last.session.logged": 1})));
        lut.flush_session("Level1", "alice", 1);
        lut.apply_session_data("Level1", "alice", &row(json!({"sessions.last.session.logged": 0})));
        lut.flush_session("Level1", "alice", 1);
        assert!(lut.profile("Level1").unwrap().session("alice").is_none());
        assert_eq!(lut.get_session("Level1", "alice"), 2);
        assert!(!lut.detach(&subjects[0], "sub"));
    }

    #[test]
    fn test_values_from_profiles_are_wrapped() {
        let mut lut = lut();
        lut.apply_session_data("Level1", "alice", &row(json!({"sessions.last.session.session_id": "s1"})));
        lut.apply_session_data("Ignored", "bob", &row(json!({})));
        let rows = lut.get_values_from_profiles(&names(&["vocal_session_id"]), &names(&["Ignored"]));
        assert_eq!(rows, vec![json!({"vocal_session_id": {"value": "s1"}})]);
    }

    #[test]
    fn test_consistent_session_id() {
        let mut lut = lut();
        assert_eq!(lut.get_consistent_session_id(), Value::Null);
        lut.apply_session_data(
            SUPERVISOR_PROFILE,
            "consistent",
            &row(json!({"sessions.last.session.session_id": "s42"})),
        );
        assert_eq!(lut.get_consistent_session_id(), json!("s42"));
    }

    #[test]
    fn test_autorecord_replays_current_watchers() {
        let mut lut = lut();
        lut.get_session("Level1", "alice");
        lut.set_autorecord_session_watchers("auto");
        assert_eq!(
            lut.take_notices(),
            vec![Notice::new(
                "auto",
                NoticePayload::Indicator(json!({"login": null, "session_id": null, "logged": false}))
            )]
        );

        // Sessions created later are attached too
        lut.apply_session_data(
            "Level1",
            "bob",
            &row(json!({"login": "bob", "sessions.last.session.session_id": "s2", "sessions.last.session.logged": 1})),
        );
        assert!(lut
            .take_notices()
            .iter()
            .any(|notice| notice.subscription == "auto"));
    }

    #[test]
    fn test_queues_table() {
        let mut lut = lut();
        lut.apply_service_data("sales", &row(json!({"name": "sales", "display_name": "Sales"})));
        assert_eq!(Value::Object(lut.get_queues_table()), json!({"sales": "Sales"}));
    }
}
