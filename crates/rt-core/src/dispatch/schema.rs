//! The tables queried from dispatch and the fields read from each of them.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::localtime::daily_stamp;
use crate::lookup::SUPERVISOR_PROFILE;

/// Kind of a dispatch view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    Queues,
    Users,
    Withdrawal,
    CommunicationSessions,
    OutboundDailyCommunicationSessions,
    OutboundCommunicationSessions,
    CommunicationQueues,
    CommunicationTasks,
}

impl ViewKind {
    /// Views started on connection, in start order
    pub const ALL: [ViewKind; 7] = [
        ViewKind::Queues,
        ViewKind::Users,
        ViewKind::CommunicationSessions,
        ViewKind::OutboundDailyCommunicationSessions,
        ViewKind::OutboundCommunicationSessions,
        ViewKind::CommunicationQueues,
        ViewKind::CommunicationTasks,
    ];

    /// Views started in call-flow deployments
    pub const CALLFLOW: [ViewKind; 2] = [ViewKind::Users, ViewKind::CommunicationSessions];

    /// Root table of the list query
    pub fn db_root(self) -> &'static str {
        match self {
            ViewKind::Queues => "queues",
            ViewKind::Users => "users",
            ViewKind::Withdrawal
            | ViewKind::CommunicationSessions
            | ViewKind::OutboundDailyCommunicationSessions
            | ViewKind::OutboundCommunicationSessions => "sessions",
            ViewKind::CommunicationQueues => "file_tasks",
            ViewKind::CommunicationTasks => "tasks",
        }
    }

    /// Name of the view type, used in logs and errors
    pub fn type_name(self) -> &'static str {
        match self {
            ViewKind::Queues => "queues",
            ViewKind::Users => "users",
            ViewKind::Withdrawal => "users_sessions",
            ViewKind::CommunicationSessions => "communications_sessions",
            ViewKind::OutboundDailyCommunicationSessions => "outbound_daily_communications_sessions",
            ViewKind::OutboundCommunicationSessions => "outbound_communications_sessions",
            ViewKind::CommunicationQueues => "communications_queues",
            ViewKind::CommunicationTasks => "communications_tasks",
        }
    }

    /// Sorted field list of the view
    pub fn fields(self, callflow: bool) -> Vec<String> {
        let fields: &[&str] = match (self, callflow) {
            (ViewKind::Queues, _) => &SERVICE_FIELDS,
            (ViewKind::Users, false) => &USER_FIELDS,
            (ViewKind::Users, true) => &USER_FIELDS_CALLFLOW,
            (ViewKind::Withdrawal, _) => &WITHDRAWAL_FIELDS,
            (ViewKind::CommunicationSessions, false) => &COMMUNICATION_SESSION_FIELDS,
            (ViewKind::CommunicationSessions, true) => &COMMUNICATION_SESSION_FIELDS_CALLFLOW,
            (ViewKind::OutboundDailyCommunicationSessions, _) => &OUTBOUND_DAILY_FIELDS,
            (ViewKind::OutboundCommunicationSessions, _) => &OUTBOUND_FIELDS,
            (ViewKind::CommunicationQueues, _) => &COMMUNICATION_QUEUE_FIELDS,
            (ViewKind::CommunicationTasks, _) => &COMMUNICATION_TASK_FIELDS,
        };
        let mut fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        fields.sort();
        fields
    }

    /// Filter of the list query. The daily outbound filter depends on `now`;
    /// `from_midnight` starts it at the beginning of the day.
    pub fn filter(self, now: NaiveDateTime, from_midnight: bool) -> String {
        match self {
            ViewKind::Queues => ".[virtual_queue eq 0 and running]".to_string(),
            ViewKind::Users => format!(
                ".[sessions/last/session/profile_name ne '{}' and group/path eq '/default' \
                 or login eq 'consistent']",
                SUPERVISOR_PROFILE
            ),
            ViewKind::Withdrawal => format!(
                ".[session_type eq 3 and terminate_date eq '' and profile_name ne '{}']",
                SUPERVISOR_PROFILE
            ),
            ViewKind::CommunicationSessions => {
                ".[connections/last/call_id ne '' and session_type ne 3]".to_string()
            }
            ViewKind::OutboundDailyCommunicationSessions => format!(
                ".[session_type eq 3 and terminate_date gt '{}' and profile_name ne '{}' \
                 and user/group/path eq '/default']",
                daily_stamp(now, from_midnight),
                SUPERVISOR_PROFILE
            ),
            ViewKind::OutboundCommunicationSessions => format!(
                ".[session_type eq 3 and terminate_date eq '' and profile_name ne '{}' \
                 and user/group/path eq '/default']",
                SUPERVISOR_PROFILE
            ),
            ViewKind::CommunicationQueues => ".[terminate_date eq '']".to_string(),
            ViewKind::CommunicationTasks => String::new(),
        }
    }
}

/// Placeholder values of a new row, one per sorted field
pub fn compute_defaults(fields: &[String]) -> Vec<Value> {
    let mut sorted: Vec<&String> = fields.iter().collect();
    sorted.sort();
    sorted
        .into_iter()
        .map(|field| {
            if field.ends_with("count") {
                json!(0)
            } else if field.ends_with("_date") {
                Value::Null
            } else if field.ends_with("duration")
                || field.ends_with("duration('0')")
                || field.ends_with("count('0')")
            {
                json!(0)
            } else {
                json!("")
            }
        })
        .collect()
}

/// Dispatch field of a named withdrawal state, e.g. `pause_lunch`
pub fn withdrawal_field(state: &str) -> String {
    format!("user.state_{}.duration('0')", state)
}

const SERVICE_FIELDS: [&str; 22] = [
    "name",
    "display_name",
    "latent_sessions_count",
    "logged_sessions_count",
    "working_sessions_count",
    "withdrawn_sessions_count",
    "outbound_sessions_count",
    "supervision_sessions_count",
    "running_tasks_count",
    "waiting_tasks_count",
    "contact_duration.count('0')",
    "waiting_duration.count('0')",
    "max_waiting_time_threshold.count('0')",
    "max_estimated_waiting_time_threshold.count('0')",
    "not_manageable_with_latent_users.count('0')",
    "not_manageable_without_latent_users.count('0')",
    "managed_tasks.count('0')",
    "failed_tasks.count('0')",
    "oldest_contact_date",
    "contact_duration.max('0')",
    "oldest_waiting_date",
    "waiting_duration.max('0')",
];

const USER_FIELDS: [&str; 36] = [
    "login",
    "name",
    "contact_duration.max('0')",
    "hold_duration.max('0')",
    "ringing_duration.max('0')",
    "state_group_pause.duration('0')",
    "state_group_outbound.duration('0')",
    "states.last.state.start_date",
    "last_state_display_name",
    "last_state_name",
    "last_state_date",
    "last_task_display_name",
    "last_task_name",
    "tasks.last.task.start_date",
    "tasks.last.task.management_effective_date",
    "tasks.last.task.end_date",
    "total_inbound.count('0')",
    "lost_inbound.count('0')",
    "managed_inbound.count('0')",
    "total_tasks.count('0')",
    "transferred_inbound.count('0')",
    "redirected_inbound.count('0')",
    "task_state_held.duration('0')",
    "task_state_ringing.duration('0')",
    "task_state_contact.duration('0')",
    "sessions.last.session.login_date",
    "sessions.last.session.logout_date",
    "sessions.last.session.profile_name",
    "sessions.last.session.session_id",
    "sessions.last.session.last_record.value",
    "sessions.last.session.record_active.value",
    "sessions.last.session.current_spies.value",
    "sessions.last.session.current_mode",
    "sessions.last.session.phone_uri",
    "sessions.last.session.logged",
    "busy_count",
];

const USER_FIELDS_CALLFLOW: [&str; 7] = [
    "login",
    "name",
    "sessions.last.session.session_id",
    "sessions.last.session.profile_name",
    "sessions.last.session.logged",
    "sessions.last.session.last_record.value",
    "sessions.last.session.record_active.value",
];

const WITHDRAWAL_FIELDS: [&str; 2] = ["user.login", "profile_name"];

const COMMUNICATION_SESSION_FIELDS: [&str; 15] = [
    "create_date",
    "session_type",
    "session_id",
    "terminate_date",
    "user.login",
    "user.name",
    "manager_session.user.login",
    "manager_session.profile_name",
    "queue_name",
    "attributes.local_number.value",
    "attributes.remote_number.value",
    "start_date",
    "management_effective_date",
    "last_record.value",
    "record_active.value",
];

const COMMUNICATION_SESSION_FIELDS_CALLFLOW: [&str; 4] = [
    "session_id",
    "terminate_date",
    "last_record.value",
    "record_active.value",
];

const OUTBOUND_FIELDS: [&str; 18] = [
    "user.login",
    "user.name",
    "profile_name",
    "session_id",
    "outbound_call_id.value",
    "outbound_state.value",
    "outbound_hold_flag.value",
    "last_outbound_call_start.value",
    "last_outbound_call_contact_start.value",
    "last_outbound_call_target.value",
    "total_leg_count.value",
    "contacted_leg_count.value",
    "failed_leg_count.value",
    "canceled_leg_count.value",
    "outbound_contact_duration.value",
    "outbound_max_contact_duration.value",
    "last_outgoing_activity.value",
    "last_transfer_activity.value",
];

const OUTBOUND_DAILY_FIELDS: [&str; 9] = [
    "user.login",
    "profile_name",
    "session_id",
    "total_leg_count.value",
    "contacted_leg_count.value",
    "failed_leg_count.value",
    "canceled_leg_count.value",
    "outbound_contact_duration.value",
    "outbound_max_contact_duration.value",
];

const COMMUNICATION_QUEUE_FIELDS: [&str; 4] = [
    "attributes.local_number.value",
    "attributes.remote_number.value",
    "session.session_id",
    "queue_name",
];

const COMMUNICATION_TASK_FIELDS: [&str; 11] = [
    "task_id",
    "parent_call_session_id",
    "manager_session.profile_name",
    "start_date",
    "end_date",
    "stop_waiting_date",
    "management_date",
    "post_management_date",
    // user or queue
    "queue_type",
    "queue_display_name",
    "manager_session.user.login",
];

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fields_are_sorted() {
        for kind in ViewKind::ALL.into_iter().chain([ViewKind::Withdrawal]) {
            for callflow in [false, true] {
                let fields = kind.fields(callflow);
                let mut sorted = fields.clone();
                sorted.sort();
                assert_eq!(fields, sorted, "{:?}", kind);
            }
        }
        assert_eq!(ViewKind::Withdrawal.fields(false), ["profile_name", "user.login"]);
        assert_eq!(ViewKind::Users.fields(true).len(), 7);
    }

    #[test]
    fn test_defaults_follow_field_names() {
        let fields: Vec<String> = [
            "running_tasks_count",
            "oldest_contact_date",
            "state_group_pause.duration('0')",
            "managed_tasks.count('0')",
            "name",
        ]
        .iter()
        .map(|f| f.to_string())
        .collect();
        assert_eq!(
            compute_defaults(&fields),
            vec![json!(0), json!(""), Value::Null, json!(0), json!(0)]
        );
    }

    #[test]
    fn test_daily_filter_stamp() {
        let now = NaiveDateTime::parse_from_str("2017/03/29 15:30:12", "%Y/%m/%d %H:%M:%S").unwrap();
        let kind = ViewKind::OutboundDailyCommunicationSessions;
        assert!(kind.filter(now, true).contains("terminate_date gt '2017/03/29 00:00:00'"));
        assert!(kind.filter(now, false).contains("terminate_date gt '2017/03/29 15:30:12'"));
        assert_eq!(ViewKind::CommunicationTasks.filter(now, false), "");
    }

    #[test]
    fn test_withdrawal_field() {
        assert_eq!(withdrawal_field("pause_lunch"), "user.state_pause_lunch.duration('0')");
    }
}
