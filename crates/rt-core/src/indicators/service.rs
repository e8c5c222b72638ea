//! Indicators of a queue.

use super::{IndicatorSet, IndicatorSpec, ResetPolicy, Rule, SetPolicy};

pub const NAME: &str = "name";
pub const DISPLAY_NAME: &str = "display_name";

const NOT_MANAGEABLE: [&str; 4] = [
    "max_waiting_time_threshold.count('0')",
    "max_estimated_waiting_time_threshold.count('0')",
    "not_manageable_with_latent_users.count('0')",
    "not_manageable_without_latent_users.count('0')",
];

fn basic() -> Vec<IndicatorSpec> {
    [
        "latent_sessions_count",
        "logged_sessions_count",
        "working_sessions_count",
        "running_tasks_count",
        "contact_duration.count('0')",
        "waiting_duration.count('0')",
        "managed_tasks.count('0')",
        "failed_tasks.count('0')",
        NOT_MANAGEABLE[0],
        NOT_MANAGEABLE[1],
        NOT_MANAGEABLE[2],
        NOT_MANAGEABLE[3],
        DISPLAY_NAME,
        "oldest_contact_date",
        "supervision_sessions_count",
        "contact_duration.max('0')",
        "oldest_waiting_date",
        "waiting_duration.max('0')",
        NAME,
        "withdrawn_sessions_count",
        "outbound_sessions_count",
    ]
    .into_iter()
    .map(IndicatorSpec::basic)
    .collect()
}

fn advanced() -> Vec<IndicatorSpec> {
    use IndicatorSpec as S;
    let mut canceled = vec!["failed_tasks.count('0')"];
    canceled.extend(NOT_MANAGEABLE);

    vec![
        S::advanced(
            "users_count",
            Rule::Sum,
            &["latent_sessions_count", "logged_sessions_count"],
        ),
        S::advanced(
            "available_users_count",
            Rule::Difference,
            &["logged_sessions_count", "working_sessions_count"],
        ),
        S::advanced("managing_users_count", Rule::Mirror, &["working_sessions_count"]),
        S::advanced("current_tasks_count", Rule::Mirror, &["running_tasks_count"]),
        S::advanced("waiting_tasks_count", Rule::Idle, &[]),
        S::rate(
            "average_processing_duration",
            Rule::Average { denominators: 1, clamp: false },
            &["contact_duration.count('0')", "managed_tasks.count('0')"],
        ),
        S::rate(
            "average_waiting_duration",
            Rule::Average { denominators: 2, clamp: false },
            &[
                "waiting_duration.count('0')",
                "managed_tasks.count('0')",
                "failed_tasks.count('0')",
            ],
        ),
        S::advanced("not_manageable_tasks_count", Rule::Sum, &NOT_MANAGEABLE),
        S::advanced("canceled_tasks_count", Rule::Difference, &canceled),
        S::rate(
            "managed_tasks_rate",
            Rule::ManagedRate,
            &["managed_tasks.count('0')", "failed_tasks.count('0')"],
        )
        .reset(ResetPolicy::ToNull),
        S::advanced("service_display_name", Rule::MirrorIfTruthy, &[DISPLAY_NAME])
            .reset(ResetPolicy::Keep),
        S::advanced("managed_tasks_count", Rule::Mirror, &["managed_tasks.count('0')"]),
        S::advanced(
            "total_tasks_count",
            Rule::Sum,
            &["managed_tasks.count('0')", "failed_tasks.count('0')"],
        ),
        S::advanced(
            "max_current_duration_processing_tasks",
            Rule::IsoOrStop,
            &["oldest_contact_date"],
        ),
        S::advanced("max_duration_processing_tasks", Rule::Mirror, &["contact_duration.max('0')"])
            .policy(SetPolicy::EmptyAsZero),
        S::advanced(
            "max_current_duration_waiting_tasks",
            Rule::IsoOrStop,
            &["oldest_waiting_date"],
        ),
        S::advanced("max_duration_waiting_tasks", Rule::Mirror, &["waiting_duration.max('0')"])
            .policy(SetPolicy::EmptyAsZero),
        S::advanced("withdrawn_users_count", Rule::Mirror, &["withdrawn_sessions_count"]),
        S::advanced("outbound_users_count", Rule::Mirror, &["outbound_sessions_count"]),
        S::advanced("supervision_users_count", Rule::Mirror, &["supervision_sessions_count"]),
    ]
}

/// Full indicator set of a new queue
pub fn build() -> IndicatorSet {
    let mut set = IndicatorSet::new();
    for spec in basic().into_iter().chain(advanced()) {
        set.add(spec);
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::ComputeCtx;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_users_count_in_any_order() {
        let ctx = ComputeCtx::default();
        for order in [["latent_sessions_count", "logged_sessions_count"], ["logged_sessions_count", "latent_sessions_count"]] {
            let mut set = build();
            set.set_by_name(order[0], json!(3), &ctx);
            set.set_by_name(order[1], json!(4), &ctx);
            assert_eq!(set.value_of("users_count"), json!(7));
        }
    }

    #[test]
    fn test_available_and_canceled() {
        let ctx = ComputeCtx::default();
        let mut set = build();
        set.set_by_name("logged_sessions_count", json!(5), &ctx);
        set.set_by_name("working_sessions_count", json!(2), &ctx);
        assert_eq!(set.value_of("available_users_count"), json!(3));

        set.set_by_name("failed_tasks.count('0')", json!(10), &ctx);
        set.set_by_name("max_waiting_time_threshold.count('0')", json!(2), &ctx);
        set.set_by_name("not_manageable_with_latent_users.count('0')", json!(1), &ctx);
        assert_eq!(set.value_of("canceled_tasks_count"), json!(7));
        assert_eq!(set.value_of("not_manageable_tasks_count"), json!(3));
    }

    #[test]
    fn test_managed_tasks_rate_is_undefined_without_tasks() {
        let ctx = ComputeCtx::default();
        let mut set = build();
        assert_eq!(set.value_of("managed_tasks_rate"), serde_json::Value::Null);
        set.set_by_name("managed_tasks.count('0')", json!(1), &ctx);
        set.set_by_name("failed_tasks.count('0')", json!(3), &ctx);
        assert_eq!(set.value_of("managed_tasks_rate"), json!(25.0));
    }

    #[test]
    fn test_display_name_survives_reset() {
        let ctx = ComputeCtx::default();
        let mut set = build();
        set.set_by_name(DISPLAY_NAME, json!("Sales"), &ctx);
        set.reset_all(&ctx);
        assert_eq!(set.value_of("service_display_name"), json!("Sales"));
        assert_eq!(set.value_of("max_current_duration_processing_tasks"), json!("stop"));
    }

    #[test]
    fn test_max_duration_notifies_on_every_update() {
        let ctx = ComputeCtx::default();
        let mut set = build();
        let basic = set.slot("contact_duration.max('0')").unwrap();
        let slot = set.slot("max_duration_processing_tasks").unwrap();
        set.set(basic, json!(""), &ctx);
        assert_eq!(set.value_of("max_duration_processing_tasks"), json!(0));
        set.take_notified();
        set.reset(basic, &ctx);
        set.reset(basic, &ctx);
        let hits = set.take_notified().iter().filter(|n| n.slot == slot).count();
        assert_eq!(hits, 2);
    }
}
