//! A named group of sessions.

use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::{Effects, Session};
use crate::error::{Result, RtError};
use crate::indicators::session::{is_subscribable, IS_LOGGED};
use crate::observer::{ObserverList, SubscriptionId};
use crate::scheduler::TimerEvent;
use crate::value::{truthy, unwrap_value, value_key};

/// Sessions of one profile, plus the session indicators its
/// subscriptions listen to
#[derive(Debug, Clone)]
pub struct Profile {
    name: String,
    sessions: IndexMap<String, Session>,
    indicators: Vec<String>,
    values: Vec<Value>,
    flush_pending: bool,
    observers: ObserverList<SubscriptionId>,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sessions: IndexMap::new(),
            indicators: Vec::new(),
            values: Vec::new(),
            flush_pending: false,
            observers: ObserverList::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Session indicators listened to by the profile subscriptions
    pub fn indicators(&self) -> &[String] {
        &self.indicators
    }

    pub fn has_indicator(&self, name: &str) -> bool {
        self.indicators.iter().any(|i| i == name)
    }

    pub fn add_indicator(&mut self, name: &str) -> Result<()> {
        if self.has_indicator(name) {
            return Err(RtError::lookup(format!("Indicator {} already subscribed.", name)));
        }
        if !is_subscribable(name) {
            return Err(RtError::lookup(format!("Indicator {} not subscribable.", name)));
        }
        self.indicators.push(name.to_string());
        Ok(())
    }

    pub fn del_indicator(&mut self, name: &str) -> Result<()> {
        match self.indicators.iter().position(|i| i == name) {
            Some(pos) => {
                self.indicators.remove(pos);
                Ok(())
            }
            None => Err(RtError::lookup(format!("Indicator {} not subscribed", name))),
        }
    }

    pub fn observers(&self) -> &ObserverList<SubscriptionId> {
        &self.observers
    }

    pub fn observers_mut(&mut self) -> &mut ObserverList<SubscriptionId> {
        &mut self.observers
    }

    pub fn has_session(&self, login: &str) -> bool {
        self.sessions.contains_key(login)
    }

    pub fn session(&self, login: &str) -> Option<&Session> {
        self.sessions.get(login)
    }

    pub fn session_mut(&mut self, login: &str) -> Option<&mut Session> {
        self.sessions.get_mut(login)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub(crate) fn sessions_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    pub fn add_session(&mut self, login: &str, serial: u64) -> Result<&mut Session> {
        if self.sessions.contains_key(login) {
            return Err(RtError::lookup(format!(
                "Session {} already exists in {}",
                login, self.name
            )));
        }
        let session = Session::new(login, self.name.clone(), serial);
        Ok(self.sessions.entry(login.to_string()).or_insert(session))
    }

    pub fn del_session(&mut self, login: &str) -> Result<Session> {
        self.sessions
            .shift_remove(login)
            .ok_or_else(|| RtError::lookup(format!("Session {} not found in {}", login, self.name)))
    }

    /// Receive the flushed changes of one session.
    ///
    /// A session reported as no longer logged leaves the profile.
    pub fn update(&mut self, data: Map<String, Value>, fx: &mut Effects<'_>) {
        if let Some(is_logged) = data.get(IS_LOGGED) {
            let logged = unwrap_value(is_logged).map(truthy).unwrap_or(false);
            if !logged {
                let login = data.get("login").map(value_key).unwrap_or_default();
                match self.del_session(&login) {
                    Ok(_) => info!("[{}] Session {} logged out", self.name, login),
                    Err(e) => warn!("[{}] Ignoring logout: {}", self.name, e),
                }
            }
        }

        self.values.push(Value::Object(data));
        if !self.flush_pending {
            self.flush_pending = true;
            let delay = fx.timers.timings().profile_flush();
            fx.timers.schedule(
                delay,
                TimerEvent::ProfileFlush {
                    profile: self.name.clone(),
                },
            );
        }
    }

    /// Take the rows buffered since the last flush
    pub fn flush(&mut self) -> Vec<Value> {
        self.flush_pending = false;
        std::mem::take(&mut self.values)
    }

    /// One snapshot per session
    pub fn get_values(&self, filter: &[String], is_api: bool) -> Vec<Value> {
        self.sessions
            .values()
            .map(|session| Value::Object(session.get_values(&self.indicators, filter, is_api)))
            .collect()
    }

    /// Logged users as `{login, display_name}`
    pub fn get_session_list(&self) -> Vec<Value> {
        self.sessions
            .values()
            .filter(|session| session.is_logged())
            .map(|session| {
                json!({
                    "login": session.login(),
                    "display_name": session.display_name(),
                })
            })
            .collect()
    }

    pub fn reset(&mut self, fx: &mut Effects<'_>) {
        let count = self.sessions.len();
        for session in self.sessions.values_mut() {
            session.reset(fx);
        }
        info!("CCCP - [{}] Resetting values for {} sessions.", self.name, count);
    }
}
