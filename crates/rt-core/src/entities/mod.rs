//! Entities owning indicator sets.
//!
//! A session, a queue, a communication and a task each own one
//! [`IndicatorSet`](crate::indicators::IndicatorSet). After every mutation
//! the entity drains the recorded notifications: payloads of the
//! indicators it observes go to its own debounce buffer, payloads of
//! indicators watched by subscriptions become [`Notice`]s.

pub mod communication;
pub mod profile;
pub mod service;
pub mod session;
pub mod task;

pub use communication::Communication;
pub use profile::Profile;
pub use service::Service;
pub use session::Session;
pub use task::Task;

use crate::indicators::{ComputeCtx, IndicatorSet, Notified};
use crate::observer::{Notice, NoticePayload};
use crate::scheduler::Timers;

/// Everything a mutation may touch besides the entity itself
pub struct Effects<'a> {
    /// State read by daily rules
    pub ctx: ComputeCtx<'a>,
    /// Where debounced flushes are scheduled
    pub timers: &'a mut Timers,
    /// Notifications waiting to be routed to subscriptions
    pub notices: &'a mut Vec<Notice>,
}

/// Drain `set` and split its notifications.
///
/// Subscription notices are pushed to `notices`; the notifications of
/// attached indicators are returned for the owning entity.
pub(crate) fn route(set: &mut IndicatorSet, notices: &mut Vec<Notice>) -> Vec<Notified> {
    let mut entity = Vec::new();
    for notified in set.take_notified() {
        let indicator = set.indicator(notified.slot);
        for observer in indicator.observers().iter() {
            notices.push(Notice::new(
                observer.clone(),
                NoticePayload::Indicator(notified.payload.clone()),
            ));
        }
        if indicator.is_attached() {
            entity.push(notified);
        }
    }
    entity
}
