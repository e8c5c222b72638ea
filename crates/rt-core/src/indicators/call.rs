//! Indicators of communications and tasks.

use super::{GetShape, IndicatorSet, IndicatorSpec, ResetPolicy, Rule, SetPolicy};

pub const CURRENT_QUEUE_NAME: &str = "current_queue_name";
pub const CALL_PROFILE: &str = "call_profile";
pub const PREVIOUS_QUEUE_NAME: &str = "previous_queue_name";
pub const PREVIOUS_PROFILE_NAME: &str = "previous_profile_name";
pub const IS_WAITING: &str = "is_waiting";
pub const TASK_END_DATE: &str = "task_end_date";
pub const COMMUNICATION_TASK_ID: &str = "communication_task_id";
pub const INITIAL_QUEUE_NAME: &str = "initial_queue_name";
pub const INITIAL_AGENT_NAME: &str = "initial_agent_name";
pub const CURRENT_AGENT_NAME: &str = "current_agent_name";
pub const RECORD_INDICATOR: &str = "record_indicator";
pub const RECORD_ENABLED: &str = "record_enabled";
pub const TO: &str = "to";
pub const FROM: &str = "from";
pub const CHANNEL: &str = "channel";
pub const CHANNEL_NAME: &str = "iv-vocal";

/// Indicators a communication pushes down to its bound tasks
pub const FORWARDED: [&str; 4] = [TO, FROM, RECORD_INDICATOR, RECORD_ENABLED];

const LOGIN: &str = "manager_session.user.login";
const PROFILE_NAME: &str = "manager_session.profile_name";
const LAST_RECORD: &str = "sessions.last.session.last_record.value";
const RECORD_ACTIVE: &str = "sessions.last.session.record_active.value";

fn queue_tracking() -> [IndicatorSpec; 4] {
    use IndicatorSpec as S;
    [
        S::advanced(
            CURRENT_QUEUE_NAME,
            Rule::CurrentQueue,
            &["queue_type", "queue_display_name", LOGIN, "previous_queue"],
        )
        .watch_first(3),
        S::advanced(CALL_PROFILE, Rule::CallProfile, &[PROFILE_NAME, "previous_profile"]).watch_first(1),
        S::advanced(PREVIOUS_QUEUE_NAME, Rule::Mirror, &["previous_queue"])
            .shape(GetShape::Named)
            .reset(ResetPolicy::ToNull),
        S::advanced(PREVIOUS_PROFILE_NAME, Rule::Mirror, &["previous_profile"])
            .shape(GetShape::Named)
            .reset(ResetPolicy::ToNull),
    ]
}

fn call_record() -> IndicatorSpec {
    IndicatorSpec::advanced(RECORD_INDICATOR, Rule::RecordJson { wrap: false }, &[LAST_RECORD])
        .shape(GetShape::Named)
        .reset(ResetPolicy::ToNull)
        .silent_reset()
}

/// Full indicator set of a new communication
pub fn communication() -> IndicatorSet {
    use IndicatorSpec as S;
    let mut set = IndicatorSet::new();
    for name in [
        PROFILE_NAME,
        "queue_type",
        "queue_display_name",
        LOGIN,
        "attributes.local_number.value",
        "attributes.remote_number.value",
        "create_date",
        "terminate_date",
        "end_date",
    ] {
        set.add(S::basic(name));
    }
    set.add(S::basic("previous_queue").reset(ResetPolicy::ToNull));
    set.add(S::basic("previous_profile").reset(ResetPolicy::ToNull));
    set.add(S::basic(LAST_RECORD).reset(ResetPolicy::ToNull));
    set.add(S::basic(RECORD_ACTIVE).shape(GetShape::RecordFlags));

    let [current_queue, call_profile, previous_queue, previous_profile] = queue_tracking();
    set.add(current_queue);
    set.add(call_profile);
    set.add(S::advanced(TO, Rule::Mirror, &["attributes.local_number.value"]).shape(GetShape::NumberPart));
    set.add(S::advanced(FROM, Rule::Mirror, &["attributes.remote_number.value"]).shape(GetShape::NumberPart));
    set.add(S::advanced("communication_create_date", Rule::CreateDate, &["create_date"]));
    set.add(S::advanced(TASK_END_DATE, Rule::EndDate, &["end_date", "terminate_date"]));
    set.add(previous_queue);
    set.add(previous_profile);
    set.add(S::advanced(RECORD_ENABLED, Rule::Mirror, &[RECORD_ACTIVE]).reset(ResetPolicy::ToNull));
    set.add(call_record());
    set
}

/// Full indicator set of a new task
pub fn task() -> IndicatorSet {
    use IndicatorSpec as S;
    let mut set = IndicatorSet::new();
    for name in [
        "start_date",
        "end_date",
        "management_date",
        "post_management_date",
        "stop_waiting_date",
        LOGIN,
        PROFILE_NAME,
        "queue_type",
        "queue_display_name",
        "task_id",
        "terminate_date",
    ] {
        set.add(S::basic(name));
    }
    set.add(S::basic("previous_queue").reset(ResetPolicy::ToNull));
    set.add(S::basic("previous_profile").reset(ResetPolicy::ToNull));
    set.add(S::basic(LAST_RECORD).reset(ResetPolicy::ToNull));
    set.add(S::basic(RECORD_ACTIVE).shape(GetShape::RecordFlags));

    let [current_queue, call_profile, previous_queue, previous_profile] = queue_tracking();
    set.add(S::advanced("waiting_duration", Rule::WaitingSeconds, &["start_date", "stop_waiting_date"]).reset(ResetPolicy::ToNull));
    set.add(S::advanced("managing_duration", Rule::DateOrRaw, &["management_date"]).reset(ResetPolicy::ToNull));
    set.add(S::advanced("total_duration", Rule::DateOrRaw, &["start_date"]).reset(ResetPolicy::ToNull));
    set.add(
        S::advanced(CHANNEL, Rule::Idle, &[])
            .policy(SetPolicy::Constant)
            .reset(ResetPolicy::To(CHANNEL_NAME.into())),
    );
    set.add(S::advanced("task_start_date", Rule::FirstStartDate, &["start_date"]));
    set.add(S::advanced(TASK_END_DATE, Rule::EndDate, &["end_date", "terminate_date"]));
    set.add(call_profile);
    set.add(S::advanced(INITIAL_AGENT_NAME, Rule::InitialAgent, &[LOGIN]).reset(ResetPolicy::ToNull));
    set.add(S::advanced(CURRENT_AGENT_NAME, Rule::Mirror, &[LOGIN]));
    // The display name arrives last; watching the other fields would latch a partial value.
    set.add(
        S::advanced(INITIAL_QUEUE_NAME, Rule::InitialQueue, &["queue_display_name", "queue_type", LOGIN])
            .watch_first(1)
            .reset(ResetPolicy::ToNull),
    );
    set.add(current_queue);
    set.add(S::advanced(TO, Rule::Idle, &[]).policy(SetPolicy::Unwrap));
    set.add(S::advanced(FROM, Rule::Idle, &[]).policy(SetPolicy::Unwrap));
    set.add(S::advanced("communication_create_date", Rule::Idle, &[]).policy(SetPolicy::Unwrap));
    set.add(S::advanced(COMMUNICATION_TASK_ID, Rule::Mirror, &["task_id"]));
    set.add(previous_queue);
    set.add(previous_profile);
    set.add(S::advanced(IS_WAITING, Rule::IsWaiting, &["stop_waiting_date"]).initial(true.into()));
    set.add(
        S::advanced(RECORD_ENABLED, Rule::Mirror, &[RECORD_ACTIVE])
            .policy(SetPolicy::UnwrapLenient)
            .reset(ResetPolicy::ToNull),
    );
    set.add(call_record());
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::ComputeCtx;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    #[test]
    fn test_communication_numbers_strip_uri() {
        let ctx = ComputeCtx::default();
        let mut set = communication();
        set.set_by_name("attributes.local_number.value", json!("sip:3900@pbx"), &ctx);
        assert_eq!(set.get(set.slot(TO).unwrap()), json!({"to": {"value": "3900"}}));
    }

    #[test]
    fn test_task_defaults() {
        let set = task();
        assert_eq!(set.value_of(IS_WAITING), json!(true));
        assert_eq!(set.value_of(CHANNEL), json!(CHANNEL_NAME));
        assert_eq!(set.value_of(PREVIOUS_QUEUE_NAME), Value::Null);
    }

    #[test]
    fn test_task_channel_is_constant() {
        let ctx = ComputeCtx::default();
        let mut set = task();
        set.set_by_name(CHANNEL, json!("other"), &ctx);
        set.reset_all(&ctx);
        assert_eq!(set.get(set.slot(CHANNEL).unwrap()), json!({"channel": {"value": "iv-vocal"}}));
    }

    #[test]
    fn test_task_unwraps_forwarded_values() {
        let ctx = ComputeCtx::default();
        let mut set = task();
        set.set_by_name(TO, json!({"value": "3900"}), &ctx);
        set.set_by_name(FROM, json!("0102"), &ctx);
        set.set_by_name(RECORD_ENABLED, json!({"value": {"current": true, "auto": false}}), &ctx);
        assert_eq!(set.value_of(TO), json!("3900"));
        assert_eq!(set.value_of(FROM), json!(0));
        assert_eq!(set.value_of(RECORD_ENABLED), json!({"current": true, "auto": false}));
    }

    #[test]
    fn test_waiting_and_end_dates() {
        let ctx = ComputeCtx::default();
        let mut set = task();
        set.set_by_name("start_date", json!("2017/03/29 15:28:00"), &ctx);
        set.set_by_name("stop_waiting_date", json!("2017/03/29 15:28:42"), &ctx);
        assert_eq!(set.value_of("waiting_duration"), json!(42));
        assert_eq!(set.value_of(IS_WAITING), json!(false));
        assert_eq!(set.value_of("task_start_date"), json!("2017/03/29 15:28:00"));

        set.set_by_name("end_date", json!("2017/03/29 15:30:00"), &ctx);
        assert_eq!(set.value_of(TASK_END_DATE), json!("2017/03/29 15:30:00"));
        set.set_by_name("terminate_date", json!("2017/03/29 15:31:00"), &ctx);
        assert_eq!(set.value_of(TASK_END_DATE), json!("2017-03-29T15:31:00"));
    }

    #[test]
    fn test_call_profile_tracks_previous() {
        let ctx = ComputeCtx::default();
        let mut set = task();
        set.set_by_name(PROFILE_NAME, json!("Level1"), &ctx);
        set.set_by_name(PROFILE_NAME, json!("Level2"), &ctx);
        assert_eq!(set.value_of(CALL_PROFILE), json!("Level2"));
        assert_eq!(
            set.get(set.slot(PREVIOUS_PROFILE_NAME).unwrap()),
            json!({"previous_profile_name": "Level1"})
        );
    }
}
