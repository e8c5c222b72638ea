//! Rows fed through dispatch views down to subscription deliveries

use std::time::Duration;

use cccp_rt_core::dispatch::{ItemAction, ListItem};
use cccp_rt_core::recording::{RecordingSink, RecordingTransport, TransportRequest};
use cccp_rt_core::{Delivery, DispatchClient, ListResponse, ObjectResponse, RtConfig, ViewKind};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::time::Instant;

type Client = DispatchClient<RecordingTransport, RecordingSink>;

fn setup() -> (Client, RecordingTransport, RecordingSink) {
    let transport = RecordingTransport::new();
    let sink = RecordingSink::new();
    let client = DispatchClient::new(RtConfig::default(), transport.clone(), sink.clone(), Instant::now()).unwrap();
    (client, transport, sink)
}

fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// Push `values`, keyed by field name, as the object response of a row
fn push(client: &mut Client, idx: u32, object_id: &str, values: Value) {
    let view = client.view(idx).unwrap();
    let pairs: Vec<(u32, Value)> = values
        .as_object()
        .unwrap()
        .iter()
        .map(|(field, value)| (view.field_index(field).unwrap(), value.clone()))
        .collect();
    client
        .on_object_response(idx, object_id, &ObjectResponse::from_pairs(pairs))
        .unwrap();
}

fn values_for<'a>(deliveries: &'a [Delivery], wanted_kind: &str, wanted_target: &str) -> Vec<&'a Value> {
    deliveries
        .iter()
        .filter_map(|delivery| match delivery {
            Delivery::Values { kind, target, values } if kind == wanted_kind && target == wanted_target => {
                Some(values)
            }
            _ => None,
        })
        .collect()
}

#[test]
fn test_user_view_feeds_profile_subscription() {
    let (mut client, transport, sink) = setup();
    client.start_views();
    let users = client.active_view(ViewKind::Users).unwrap();

    client.advance(Duration::from_millis(200));
    client.on_list_response(
        users,
        &ListResponse {
            items: vec![ListItem {
                item_id: "u1".into(),
                action: ItemAction::Add,
            }],
        },
    );
    assert!(transport.requests().contains(&TransportRequest::QueryObject {
        idx: users,
        object_id: "u1".into(),
        format_id: client.view(users).unwrap().format_id(),
    }));

    let response = client
        .subscribe_profile("Level1", &names(&["is_logged", "vocal_session_id"]))
        .unwrap();
    assert_eq!(response["data"], json!([]));

    push(
        &mut client,
        users,
        "u1",
        json!({
            "login": "alice",
            "name": "Alice",
            "sessions.last.session.profile_name": "Level1",
            "sessions.last.session.session_id": "s1",
            "sessions.last.session.logged": 1,
        }),
    );
    client.advance(Duration::from_millis(500));

    let deliveries = sink.take();
    let rows: Vec<&Value> = values_for(&deliveries, "profile", "Level1")
        .into_iter()
        .flat_map(|batch| batch.as_array().into_iter().flatten())
        .collect();
    assert!(rows.iter().any(|row| row["login"] == json!("alice")));
    assert!(rows.iter().any(|row| row.get("vocal_session_id").is_some()));

    assert_eq!(client.get_availability_from_login("alice").unwrap(), "unavailable");
    let users_list = client.get_users_list(&names(&["Level1", "Level2"]));
    assert_eq!(users_list.len(), 1);
}

#[test]
fn test_communication_subscription_follows_a_task() {
    let (mut client, _, sink) = setup();
    let sessions = client.start_view(ViewKind::CommunicationSessions, "");
    let tasks = client.start_view(ViewKind::CommunicationTasks, "");

    let response = client.subscribe_communication("sup1", &[], &[], &names(&["Sales"]));
    assert_eq!(response["data"], json!([]));

    push(
        &mut client,
        sessions,
        "o1",
        json!({"session_id": "c1", "create_date": "2017/03/29 15:30:00", "terminate_date": ""}),
    );
    push(
        &mut client,
        tasks,
        "t1",
        json!({
            "task_id": "t1",
            "parent_call_session_id": "c1",
            "queue_type": "queue",
            "queue_display_name": "Sales",
            "start_date": "2017/03/29 15:30:01",
        }),
    );
    client.advance(Duration::from_secs(2));

    let deliveries = sink.take();
    let batches = values_for(&deliveries, "communication", "sup1");
    assert!(!batches.is_empty());
    assert!(batches.iter().all(|batch| batch.as_array().is_some_and(|rows| !rows.is_empty())));
    assert_eq!(
        client.get_communications_list(&[], &names(&["Sales"])),
        vec![json!({"communication_id": "c1", "channel": "iv-vocal"})]
    );

    push(&mut client, tasks, "t1", json!({"end_date": "2017/03/29 15:32:00"}));
    client.advance(Duration::from_secs(2));
    assert!(!values_for(&sink.take(), "communication", "sup1").is_empty());
    assert!(client.get_communications_list(&[], &names(&["Sales"])).is_empty());

    client.advance(Duration::from_secs(10));
    assert!(!client.lut().listener().has_communication("c1"));
}

#[test]
fn test_unknown_subscription_errors() {
    let (mut client, _, _) = setup();
    let err = client.unsubscribe("nope", &[]).unwrap_err();
    assert_eq!(err.to_string(), "Subscription error: Unknown subscription id 'nope'");

    let err = client
        .subscribe("alice", "session", &names(&["is_logged"]), None)
        .unwrap_err();
    assert!(err.to_string().starts_with("Subscription error: Profile_name is missing"));
    assert_eq!(client.get_consistent_session_id(), Value::Null);
}
