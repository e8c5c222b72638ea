//! Values of the day's terminated outbound sessions.
//!
//! The daily outbound view reports, per session, the leg counters and
//! durations of every outbound session closed since midnight. The daily
//! indicators of a live session fold those values into its own counters.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Fields kept per session
pub const DAILY_FIELDS: [&str; 6] = [
    "total_leg_count.value",
    "contacted_leg_count.value",
    "failed_leg_count.value",
    "canceled_leg_count.value",
    "outbound_contact_duration.value",
    "outbound_max_contact_duration.value",
];

type SessionValues = IndexMap<String, Value>;

/// profile -> login -> field -> session id -> value
#[derive(Debug, Default, Clone)]
pub struct DailyListener {
    data: HashMap<String, HashMap<String, HashMap<String, SessionValues>>>,
}

impl DailyListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.data.clear();
    }

    /// Record the allowed fields of one daily session row
    pub fn apply_data(&mut self, profile: &str, login: &str, session_id: &str, data: &Map<String, Value>) {
        for (field, value) in data {
            if !DAILY_FIELDS.contains(&field.as_str()) {
                continue;
            }
            self.data
                .entry(profile.to_string())
                .or_default()
                .entry(login.to_string())
                .or_default()
                .entry(field.clone())
                .or_default()
                .insert(session_id.to_string(), value.clone());
        }
    }

    /// Per-session values of `field` for a user; empty for unknown users or fields
    pub fn indicator_values(&self, profile: &str, login: &str, field: &str) -> Vec<&Value> {
        if !DAILY_FIELDS.contains(&field) {
            return Vec::new();
        }
        self.data
            .get(profile)
            .and_then(|logins| logins.get(login))
            .and_then(|fields| fields.get(field))
            .map(|sessions| sessions.values().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
