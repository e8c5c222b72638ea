//! Daily reset of the counters.
//!
//! The first reset runs at the configured local time, then every
//! `reset_interval_secs`. A reset clears every indicator, forgets the day's
//! outbound sessions and restarts the running views, so dispatch sends the
//! current rows again.

use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::info;

use super::client::DispatchClient;
use super::protocol::DispatchTransport;
use super::schema::ViewKind;
use crate::error::Result;
use crate::localtime::{local_now, seconds_until};
use crate::scheduler::TimerEvent;
use crate::subscriber::DeliverySink;

impl<T: DispatchTransport, S: DeliverySink> DispatchClient<T, S> {
    pub(super) fn setup_reset(&mut self, reset_time: &str, now: NaiveDateTime) -> Result<()> {
        let seconds_left = seconds_until(reset_time, now)?;
        info!(
            "Programming initial counters reset in {} seconds ({}).",
            seconds_left, reset_time
        );
        self.schedule(Duration::from_secs(seconds_left), TimerEvent::StartResetLoop);
        Ok(())
    }

    pub(super) fn start_reset_loop(&mut self) {
        let interval = self.config.reset_interval();
        info!(
            "Setting up counters reset every {} seconds ({} hours).",
            interval.as_secs(),
            interval.as_secs() / 3600
        );
        self.reset_tick();
    }

    pub(super) fn reset_tick(&mut self) {
        self.reset(local_now());
        let interval = self.config.reset_interval();
        self.schedule(interval, TimerEvent::ResetTick);
    }

    /// Reset the counters now; the daily outbound view restarts from `now`
    pub fn reset(&mut self, now: NaiveDateTime) {
        self.subscriber.reset();
        self.lut_mut().reset_daily();
        self.pump();

        let kinds: &[ViewKind] = if self.config.callflow {
            &ViewKind::CALLFLOW
        } else {
            &ViewKind::ALL
        };
        for &kind in kinds.iter().chain([ViewKind::Withdrawal].iter()) {
            let Some(idx) = self.active_view(kind) else {
                continue;
            };
            self.stop_view(idx);
            let filter = kind.filter(now, false);
            self.start_view(kind, &filter);
        }
    }
}
