//! Indicators of a user session.

use serde_json::json;

use super::{GetShape, IndicatorSet, IndicatorSpec, ResetPolicy, Rule, SetPolicy};

pub const IS_LOGGED: &str = "is_logged";
pub const DISPLAY_NAME: &str = "name";
pub const LOGIN: &str = "login";
pub const PROFILE_NAME: &str = "sessions.last.session.profile_name";
pub const SESSION_ID: &str = "sessions.last.session.session_id";
pub const LOGGED: &str = "sessions.last.session.logged";
pub const RECORD_INDICATOR: &str = "record_indicator";
pub const AUTORECORD_WATCHER: &str = "autorecord_session_watcher";
pub const USER_ACTIVITY: &str = "user_activity";

const WITHDRAWAL_BASIC_PREFIX: &str = "user.state_pause_";
const WITHDRAWAL_BASIC_SUFFIX: &str = ".duration('0')";
const WITHDRAWAL_PREFIX: &str = "user_vocal_total_named_";
const WITHDRAWAL_SUFFIX: &str = "_withdrawal_duration";

/// Names a profile subscription may ask for
pub const SUBSCRIBABLE: [&str; 32] = [
    "user_display_name",
    "user_profile_name",
    "user_vocal_state",
    "vocal_session_last_login_date",
    "user_vocal_mode",
    "user_vocal_total_withdrawal_duration",
    "user_vocal_total_outbound_duration",
    "user_total_tasks_count",
    "user_lost_tasks_count",
    "user_transferred_tasks",
    "user_max_duration_ringing_tasks",
    "user_max_duration_contact_tasks",
    "user_max_duration_hold_tasks",
    "user_average_ringing_duration",
    "user_average_contact_duration",
    "user_average_hold_duration",
    "vocal_user_current_task_start_date",
    "vocal_session_id",
    "is_logged",
    "record_enabled",
    "vocal_interface",
    "user_managed_tasks_count",
    "user_vocal_position",
    "vocal_state_start_time",
    "current_spies",
    "user_total_leg_count",
    "user_contacted_leg_count",
    "user_failed_leg_count",
    "user_canceled_leg_count",
    "user_outbound_contact_total_duration",
    "user_outbound_contact_maximum_duration",
    "user_outbound_contact_average_duration",
];

/// Whether `name` is a named withdrawal indicator
pub fn is_named_withdrawal(name: &str) -> bool {
    name.starts_with("user_vocal_total_named") && name.ends_with("withdrawal_duration")
}

/// Whether a profile subscription may ask for `name`
pub fn is_subscribable(name: &str) -> bool {
    SUBSCRIBABLE.contains(&name) || is_named_withdrawal(name)
}

/// Pause name of a `user.state_pause_<pause>.duration('0')` field
pub fn pause_from_field(field: &str) -> Option<&str> {
    field
        .strip_prefix(WITHDRAWAL_BASIC_PREFIX)?
        .strip_suffix(WITHDRAWAL_BASIC_SUFFIX)
}

/// Pause name of a `user_vocal_total_named_<pause>_withdrawal_duration` indicator
pub fn pause_from_indicator(name: &str) -> Option<&str> {
    name.strip_prefix(WITHDRAWAL_PREFIX)?.strip_suffix(WITHDRAWAL_SUFFIX)
}

/// Field and indicator of one named withdrawal state
pub fn withdrawal_specs(pause: &str) -> [IndicatorSpec; 2] {
    let field = format!("{}{}{}", WITHDRAWAL_BASIC_PREFIX, pause, WITHDRAWAL_BASIC_SUFFIX);
    let name = format!("{}{}{}", WITHDRAWAL_PREFIX, pause, WITHDRAWAL_SUFFIX);
    [
        IndicatorSpec::basic(field.clone()),
        IndicatorSpec::advanced(name, Rule::Mirror, &[field.as_str()]),
    ]
}

fn basic() -> Vec<IndicatorSpec> {
    vec![
        IndicatorSpec::basic(DISPLAY_NAME),
        IndicatorSpec::basic("contact_duration.max('0')"),
        IndicatorSpec::basic("task_state_contact.duration('0')"),
        IndicatorSpec::basic("redirected_inbound.count('0')"),
        IndicatorSpec::basic("transferred_inbound.count('0')").policy(SetPolicy::AlwaysNotify),
        IndicatorSpec::basic("hold_duration.max('0')"),
        IndicatorSpec::basic("task_state_held.duration('0')"),
        IndicatorSpec::basic("ringing_duration.max('0')"),
        IndicatorSpec::basic("task_state_ringing.duration('0')"),
        IndicatorSpec::basic("total_inbound.count('0')"),
        IndicatorSpec::basic("managed_inbound.count('0')"),
        IndicatorSpec::basic("lost_inbound.count('0')"),
        IndicatorSpec::basic("state_group_pause.duration('0')"),
        IndicatorSpec::basic(PROFILE_NAME),
        IndicatorSpec::basic("last_state_name")
            .policy(SetPolicy::Mode)
            .reset(ResetPolicy::To(json!("disabled"))),
        IndicatorSpec::basic("sessions.last.session.login_date").reset(ResetPolicy::Keep),
        IndicatorSpec::basic("state_group_outbound.duration('0')"),
        IndicatorSpec::basic("tasks.last.task.management_effective_date"),
        IndicatorSpec::basic("tasks.last.task.end_date"),
        IndicatorSpec::basic("last_task_name"),
        IndicatorSpec::basic(SESSION_ID),
        IndicatorSpec::basic(LOGGED).reset(ResetPolicy::Keep),
        IndicatorSpec::basic("busy_count"),
        IndicatorSpec::basic("sessions.last.session.last_record.value").reset(ResetPolicy::ToNull),
        IndicatorSpec::basic("last_state_display_name"),
        IndicatorSpec::basic("sessions.last.session.record_active.value").shape(GetShape::RecordFlags),
        IndicatorSpec::basic("sessions.last.session.current_mode"),
        IndicatorSpec::basic("sessions.last.session.phone_uri"),
        IndicatorSpec::basic(LOGIN),
        IndicatorSpec::basic("tasks.last.task.start_date"),
        IndicatorSpec::basic("states.last.state.start_date"),
        IndicatorSpec::basic("last_state_date"),
        IndicatorSpec::basic("sessions.last.session.current_spies.value").reset(ResetPolicy::ToNull),
        IndicatorSpec::basic("total_leg_count.value").policy(SetPolicy::IntCoerce),
        IndicatorSpec::basic("contacted_leg_count.value").policy(SetPolicy::IntCoerce),
        IndicatorSpec::basic("failed_leg_count.value").policy(SetPolicy::IntCoerce),
        IndicatorSpec::basic("canceled_leg_count.value").policy(SetPolicy::IntCoerce),
        IndicatorSpec::basic("outbound_contact_duration.value").policy(SetPolicy::EmptyAsZero),
        IndicatorSpec::basic("outbound_max_contact_duration.value").policy(SetPolicy::EmptyAsZero),
        IndicatorSpec::basic("session_id"),
        IndicatorSpec::basic("outbound_state.value"),
        IndicatorSpec::basic("outbound_hold_flag.value").policy(SetPolicy::Flag),
        IndicatorSpec::basic("last_outbound_call_start.value"),
        IndicatorSpec::basic("last_outgoing_activity.value"),
        IndicatorSpec::basic("last_transfer_activity.value"),
    ]
}

fn advanced() -> Vec<IndicatorSpec> {
    use IndicatorSpec as S;
    vec![
        S::advanced("user_total_tasks_count", Rule::Mirror, &["total_inbound.count('0')"]),
        S::advanced("user_managed_tasks_count", Rule::Mirror, &["managed_inbound.count('0')"]),
        S::advanced("user_lost_tasks_count", Rule::Mirror, &["lost_inbound.count('0')"]),
        S::advanced("user_max_duration_ringing_tasks", Rule::Mirror, &["ringing_duration.max('0')"]),
        S::rate(
            "user_average_ringing_duration",
            Rule::Average { denominators: 1, clamp: false },
            &["task_state_ringing.duration('0')", "total_inbound.count('0')"],
        ),
        S::advanced(
            "user_max_duration_contact_tasks",
            Rule::MaxAsFloatString,
            &["contact_duration.max('0')", "outbound_max_contact_duration.value"],
        ),
        // Outbound contact time is already part of the contact duration.
        S::rate(
            "user_average_contact_duration",
            Rule::Average { denominators: 1, clamp: true },
            &[
                "task_state_contact.duration('0')",
                "managed_inbound.count('0')",
                "outbound_contact_duration.value",
            ],
        ),
        S::advanced(
            "user_transferred_tasks",
            Rule::Sum,
            &["redirected_inbound.count('0')", "transferred_inbound.count('0')"],
        )
        .policy(SetPolicy::AlwaysNotify),
        S::advanced("user_max_duration_hold_tasks", Rule::Mirror, &["hold_duration.max('0')"]),
        S::advanced(
            "user_vocal_total_outbound_duration",
            Rule::Mirror,
            &["state_group_outbound.duration('0')"],
        ),
        S::rate(
            "user_average_hold_duration",
            Rule::Average { denominators: 1, clamp: false },
            &["task_state_held.duration('0')", "managed_inbound.count('0')"],
        ),
        S::advanced(
            "user_vocal_total_withdrawal_duration",
            Rule::Mirror,
            &["state_group_pause.duration('0')"],
        ),
        S::advanced("user_profile_name", Rule::Mirror, &[PROFILE_NAME]),
        S::advanced("user_display_name", Rule::Mirror, &[DISPLAY_NAME]),
        S::advanced("user_vocal_mode", Rule::Mirror, &["last_state_name"]),
        S::advanced(
            "vocal_session_last_login_date",
            Rule::IsoDateOrZero,
            &["sessions.last.session.login_date"],
        )
        .reset(ResetPolicy::Keep),
        S::advanced(
            "vocal_user_current_task_managed_start_date",
            Rule::CurrentTaskManagedDate,
            &["tasks.last.task.management_effective_date", "tasks.last.task.end_date"],
        )
        .reset(ResetPolicy::ToNull),
        S::advanced(
            "user_vocal_state",
            Rule::VocalState,
            &[
                "last_state_display_name",
                "last_task_name",
                "busy_count",
                "outbound_state.value",
                "outbound_hold_flag.value",
            ],
        ),
        S::advanced("vocal_session_id", Rule::Mirror, &[SESSION_ID]),
        // Resetting it would drop the session from its profile.
        S::advanced(IS_LOGGED, Rule::Mirror, &[LOGGED])
            .reset(ResetPolicy::Keep)
            .silent_reset(),
        S::advanced("record_enabled", Rule::Mirror, &["sessions.last.session.record_active.value"])
            .reset(ResetPolicy::ToNull),
        S::advanced("vocal_interface", Rule::Interface, &["sessions.last.session.current_mode"]),
        S::advanced("user_vocal_position", Rule::Mirror, &["sessions.last.session.phone_uri"]),
        S::advanced(
            "vocal_user_current_task_start_date",
            Rule::CurrentTaskStartDate,
            &[
                "tasks.last.task.start_date",
                "tasks.last.task.end_date",
                "last_outbound_call_start.value",
            ],
        )
        .reset(ResetPolicy::ToNull),
        S::advanced("vocal_state_start_time", Rule::IsoDateOrZero, &["states.last.state.start_date"])
            .reset(ResetPolicy::Keep),
        S::advanced("user_last_vocal_state_date", Rule::IsoDateOrZero, &["last_state_date"])
            .reset(ResetPolicy::Keep),
        S::advanced("user_login", Rule::Mirror, &[LOGIN]),
        S::advanced("user_raw_vocal_state", Rule::Mirror, &["last_state_display_name"]),
        S::advanced(
            "current_spies",
            Rule::Spies,
            &["sessions.last.session.current_spies.value"],
        )
        .reset(ResetPolicy::ToNull),
    ]
}

fn daily(name: &str, rule: Rule, watched: &str) -> IndicatorSpec {
    IndicatorSpec::advanced(name, rule, &[watched, LOGIN, PROFILE_NAME])
        .watch_first(1)
        .policy(SetPolicy::AlwaysNotify)
}

fn dailies() -> Vec<IndicatorSpec> {
    vec![
        daily("user_total_leg_count", Rule::DailySum, "total_leg_count.value"),
        daily("user_contacted_leg_count", Rule::DailySum, "contacted_leg_count.value"),
        daily("user_failed_leg_count", Rule::DailySum, "failed_leg_count.value"),
        daily("user_canceled_leg_count", Rule::DailySum, "canceled_leg_count.value"),
        daily(
            "user_outbound_contact_total_duration",
            Rule::DailySum,
            "outbound_contact_duration.value",
        ),
        daily(
            "user_outbound_contact_maximum_duration",
            Rule::DailyMax,
            "outbound_max_contact_duration.value",
        ),
        IndicatorSpec::advanced(
            "user_outbound_contact_average_duration",
            Rule::DailyAverage,
            &[
                "outbound_contact_duration.value",
                LOGIN,
                PROFILE_NAME,
                "contacted_leg_count.value",
            ],
        )
        .watch_first(1)
        .policy(SetPolicy::AlwaysNotify),
    ]
}

/// Observed by the record, autorecord and history subscriptions, never by the session
fn private() -> Vec<IndicatorSpec> {
    vec![
        IndicatorSpec::advanced(
            RECORD_INDICATOR,
            Rule::RecordJson { wrap: true },
            &["sessions.last.session.last_record.value"],
        )
        .shape(GetShape::Raw)
        .reset(ResetPolicy::ToNull)
        .silent_reset()
        .detached(),
        IndicatorSpec::advanced(AUTORECORD_WATCHER, Rule::AutoRecordWatcher, &[SESSION_ID, LOGIN, LOGGED])
            .shape(GetShape::Raw)
            .reset(ResetPolicy::To(json!({"login": null, "session_id": null, "logged": false})))
            .detached(),
        IndicatorSpec::advanced(
            USER_ACTIVITY,
            Rule::Activity,
            &[
                "last_outgoing_activity.value",
                "last_transfer_activity.value",
                LOGIN,
                PROFILE_NAME,
                SESSION_ID,
            ],
        )
        .watch_first(2)
        .shape(GetShape::Raw)
        .reset(ResetPolicy::To(json!([])))
        .detached(),
    ]
}

/// Full indicator set of a new session
pub fn build() -> IndicatorSet {
    let mut set = IndicatorSet::new();
    for spec in basic()
        .into_iter()
        .chain(advanced())
        .chain(dailies())
        .chain(private())
    {
        set.add(spec);
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::ComputeCtx;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_every_input_resolves() {
        let set = build();
        for (_, indicator) in set.iter().filter(|(_, i)| i.is_advanced()) {
            assert!(!indicator.inputs().is_empty(), "{} has no input", indicator.name());
        }
        for name in SUBSCRIBABLE {
            assert!(set.has(name), "{} missing", name);
        }
    }

    #[test]
    fn test_initial_values() {
        let set = build();
        assert_eq!(set.value_of("last_state_name"), json!("disabled"));
        assert_eq!(set.value_of(IS_LOGGED), serde_json::Value::Null);
        assert_eq!(set.value_of(USER_ACTIVITY), json!([]));
        assert_eq!(
            set.get(set.slot(AUTORECORD_WATCHER).unwrap()),
            json!({"login": null, "session_id": null, "logged": false})
        );
    }

    #[test]
    fn test_private_indicators_are_detached() {
        let set = build();
        for name in [RECORD_INDICATOR, AUTORECORD_WATCHER, USER_ACTIVITY] {
            assert!(!set.by_name(name).unwrap().is_attached());
        }
        assert!(set.by_name("user_vocal_state").unwrap().is_attached());
        assert!(!set.by_name(LOGIN).unwrap().is_attached());
    }

    #[test]
    fn test_withdrawal_names() {
        assert_eq!(pause_from_field("user.state_pause_lunch.duration('0')"), Some("lunch"));
        assert_eq!(
            pause_from_indicator("user_vocal_total_named_lunch_withdrawal_duration"),
            Some("lunch")
        );
        assert_eq!(pause_from_field("user.login"), None);
        assert!(is_subscribable("user_vocal_total_named_lunch_withdrawal_duration"));
        assert!(!is_subscribable("login"));
    }

    #[test]
    fn test_is_logged_survives_reset() {
        let mut set = build();
        let ctx = ComputeCtx::default();
        set.set_by_name(LOGGED, json!(1), &ctx);
        assert_eq!(set.value_of(IS_LOGGED), json!(1));
        set.take_notified();
        set.reset_all(&ctx);
        assert_eq!(set.value_of(IS_LOGGED), json!(1));
    }
}
