//! Deferred callbacks on a virtual clock.
//!
//! Every debounce and delayed cleanup of the engine is a [`TimerEvent`]
//! queued here. Events are ordered by (deadline, sequence) so two events
//! with the same deadline fire in scheduling order. Nothing is ever
//! cancelled: handlers re-check that their target still exists.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::Timings;
use crate::observer::SubscriptionId;

/// Deferred work understood by the dispatch client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    /// Flush the buffered changes of one session to its profile
    SessionFlush {
        profile: String,
        login: String,
        serial: u64,
    },
    /// Flush the rows buffered by a profile to its subscriptions
    ProfileFlush { profile: String },
    /// Flush a communication buffer to the listener
    CommunicationFlush { communication_id: String },
    /// Flush a task buffer to the listener
    TaskFlush { task_id: String },
    /// Flush the listener rows to communication and record subscriptions
    ListenerFlush,
    /// Send the buffered values of a subscription
    SubscriptionFlush { id: SubscriptionId },
    /// Drop a task (and possibly its communication) that left a subscription scope
    CleanCommunication {
        communication_id: String,
        task_id: String,
    },
    /// Drop terminated communications in one batch
    DelayedClean,
    /// Issue the list query of a freshly started view
    QueryList {
        idx: u32,
        db_root: String,
        filter: String,
    },
    /// First daily reset; starts the periodic loop
    StartResetLoop,
    /// Periodic daily reset
    ResetTick,
}

/// Virtual clock plus an ordered queue of pending events
#[derive(Debug)]
pub struct Scheduler {
    now: Instant,
    seq: u64,
    queue: BTreeMap<(Instant, u64), TimerEvent>,
}

impl Scheduler {
    pub fn new(now: Instant) -> Self {
        Self {
            now,
            seq: 0,
            queue: BTreeMap::new(),
        }
    }

    /// Current virtual time
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Queue `event` to fire `delay` after the current virtual time
    pub fn schedule(&mut self, delay: Duration, event: TimerEvent) {
        let deadline = self.now + delay;
        self.seq += 1;
        tracing::trace!("Scheduling {:?} in {:?}", event, delay);
        self.queue.insert((deadline, self.seq), event);
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Pop the next event due at or before `until`, moving the clock to its deadline
    pub fn pop_due(&mut self, until: Instant) -> Option<TimerEvent> {
        let key = *self.queue.keys().next()?;
        if key.0 > until {
            return None;
        }
        let event = self.queue.remove(&key)?;
        if key.0 > self.now {
            self.now = key.0;
        }
        Some(event)
    }

    /// Move the clock forward to `t` (never backwards)
    pub fn settle(&mut self, t: Instant) {
        if t > self.now {
            self.now = t;
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Pending events in firing order
    pub fn iter(&self) -> impl Iterator<Item = &TimerEvent> {
        self.queue.values()
    }
}

/// The scheduler together with the configured delays
#[derive(Debug)]
pub struct Timers {
    scheduler: Scheduler,
    timings: Timings,
}

impl Timers {
    pub fn new(now: Instant, timings: Timings) -> Self {
        Self {
            scheduler: Scheduler::new(now),
            timings,
        }
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn now(&self) -> Instant {
        self.scheduler.now()
    }

    pub fn schedule(&mut self, delay: Duration, event: TimerEvent) {
        self.scheduler.schedule(delay, event);
    }
}
