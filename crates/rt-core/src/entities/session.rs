//! A logged user and its indicators.

use serde_json::{json, Map, Value};
use tracing::debug;

use super::{route, Effects};
use crate::error::{Result, RtError};
use crate::indicators::session::{
    self as catalogue, pause_from_field, pause_from_indicator, withdrawal_specs, DISPLAY_NAME, IS_LOGGED,
};
use crate::indicators::IndicatorSet;
use crate::scheduler::TimerEvent;
use crate::value::{merge_payload, truthy};

/// Live state of one user inside a profile
#[derive(Debug, Clone)]
pub struct Session {
    login: String,
    profile: String,
    /// Distinguishes this session from a later one with the same login
    serial: u64,
    indicators: IndicatorSet,
    values: Map<String, Value>,
    flush_pending: bool,
}

impl Session {
    pub fn new(login: impl Into<String>, profile: impl Into<String>, serial: u64) -> Self {
        let login = login.into();
        Self {
            values: login_only(&login),
            login,
            profile: profile.into(),
            serial,
            indicators: catalogue::build(),
            flush_pending: false,
        }
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn indicators(&self) -> &IndicatorSet {
        &self.indicators
    }

    pub(crate) fn indicators_mut(&mut self) -> &mut IndicatorSet {
        &mut self.indicators
    }

    pub fn display_name(&self) -> Value {
        self.indicators.value_of(DISPLAY_NAME)
    }

    pub fn is_logged(&self) -> bool {
        truthy(&self.indicators.value_of(IS_LOGGED))
    }

    /// Buffered changes since the last flush, keyed by indicator
    pub fn get(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn apply_data(&mut self, data: &Map<String, Value>, fx: &mut Effects<'_>) {
        self.indicators.apply_data(data, &fx.ctx);
        self.absorb(fx);
    }

    /// Apply the `user.state_pause_*` fields, creating the named withdrawal
    /// indicators seen for the first time
    pub fn apply_data_for_withdrawal_states(&mut self, data: &Map<String, Value>, fx: &mut Effects<'_>) {
        for (field, value) in data {
            let Some(pause) = pause_from_field(field) else {
                continue;
            };
            if !self.indicators.has(field) {
                debug!("Session {} gains withdrawal state {}", self.login, pause);
                for spec in withdrawal_specs(pause) {
                    self.indicators.add(spec);
                }
            }
            self.indicators.set_by_name(field, value.clone(), &fx.ctx);
        }
        self.absorb(fx);
    }

    /// Name of the named withdrawal indicator, created when missing
    pub fn withdrawal_indicator(&mut self, name: &str) -> Result<String> {
        let pause = pause_from_indicator(name)
            .ok_or_else(|| RtError::lookup(format!("Unknown indicator name '{}'", name)))?;
        if !self.indicators.has(name) {
            for spec in withdrawal_specs(pause) {
                self.indicators.add(spec);
            }
        }
        Ok(name.to_string())
    }

    /// Snapshot of the listenable indicators, optionally filtered.
    ///
    /// API snapshots drop the login and read every indicator.
    pub fn get_values(&self, listenable: &[String], filter: &[String], is_api: bool) -> Map<String, Value> {
        let mut values = if is_api { Map::new() } else { login_only(&self.login) };
        for (_, indicator) in self.indicators.iter() {
            let name = indicator.name();
            if !is_api && !listenable.iter().any(|l| l == name) {
                continue;
            }
            if filter.is_empty() || filter.iter().any(|f| f == name) {
                merge_payload(&mut values, name, &indicator.get());
            }
        }
        values
    }

    pub fn reset(&mut self, fx: &mut Effects<'_>) {
        self.indicators.reset_all(&fx.ctx);
        self.absorb(fx);
    }

    /// Take the buffered changes and clear the buffer
    pub fn flush(&mut self) -> Map<String, Value> {
        self.flush_pending = false;
        std::mem::replace(&mut self.values, login_only(&self.login))
    }

    pub(crate) fn absorb(&mut self, fx: &mut Effects<'_>) {
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
            let delay = fx.timers.timings().session_flush();
            fx.timers.schedule(
                delay,
                TimerEvent::SessionFlush {
                    profile: self.profile.clone(),
                    login: self.login.clone(),
                    serial: self.serial,
                },
            );
        }
    }
}

fn login_only(login: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("login".to_string(), json!(login));
    map
}
