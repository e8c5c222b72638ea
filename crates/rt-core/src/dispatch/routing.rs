//! Handlers turning complete view rows into registry updates.

use serde_json::{json, Map, Value};
use tracing::{debug, error};

use super::client::DispatchClient;
use super::protocol::DispatchTransport;
use super::schema::ViewKind;
use crate::indicators::session::{LOGGED, LOGIN, PROFILE_NAME, SESSION_ID};
use crate::localtime::now_naive_iso;
use crate::scheduler::TimerEvent;
use crate::subscriber::DeliverySink;
use crate::value::{truthy, value_key};

const INBOUND: &str = "inbound";
const OUTBOUND: &str = "outbound";

fn field<'a>(data: &'a Map<String, Value>, name: &str) -> &'a Value {
    data.get(name).unwrap_or(&Value::Null)
}

fn key(data: &Map<String, Value>, name: &str) -> String {
    value_key(field(data, name))
}

fn rename(data: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(value) = data.remove(from) {
        data.insert(to.to_string(), value);
    }
}

impl<T: DispatchTransport, S: DeliverySink> DispatchClient<T, S> {
    pub(super) fn route_row(&mut self, kind: ViewKind, idx: u32, object_id: &str, data: Map<String, Value>) {
        match kind {
            ViewKind::Queues => self.on_service_update(data),
            ViewKind::Users => self.on_user_update(idx, object_id, data),
            ViewKind::Withdrawal => self.on_withdrawal_update(data),
            ViewKind::CommunicationSessions => self.on_communication_session_update(data),
            ViewKind::OutboundCommunicationSessions => self.on_outbound_communication_session_update(data),
            ViewKind::OutboundDailyCommunicationSessions => {
                self.on_outbound_daily_communication_session_update(data)
            }
            ViewKind::CommunicationQueues => self.on_communication_queue_update(data),
            ViewKind::CommunicationTasks => self.on_communication_task_update(data),
        }
    }

    fn on_service_update(&mut self, data: Map<String, Value>) {
        let name = key(&data, "name");
        if name.is_empty() {
            debug!("Queue row without a name ignored");
            return;
        }
        self.lut_mut().apply_service_data(&name, &data);
    }

    /// A user row creates the session of a logged user. Rows of users no
    /// longer logged forget their session id, so the next login is seen.
    fn on_user_update(&mut self, idx: u32, object_id: &str, mut data: Map<String, Value>) {
        if truthy(field(&data, SESSION_ID)) {
            let profile = key(&data, PROFILE_NAME);
            let login = key(&data, LOGIN);
            if let Some(name) = data.get("name").cloned() {
                data.insert("user.name".to_string(), name);
            }
            self.lut_mut().apply_session_data(&profile, &login, &data);
        }

        if !truthy(field(&data, LOGGED)) {
            if let Some(view) = self.views.get_mut(&idx) {
                view.set_field(object_id, SESSION_ID, Value::Null);
            }
        }
    }

    fn on_withdrawal_update(&mut self, data: Map<String, Value>) {
        let profile = key(&data, "profile_name");
        let login = key(&data, "user.login");
        self.lut_mut().apply_withdrawal_data(&profile, &login, &data);
    }

    fn on_communication_session_update(&mut self, mut data: Map<String, Value>) {
        let communication_id = key(&data, "session_id");
        if communication_id.is_empty() {
            debug!("Communication row without a session id ignored");
            return;
        }
        rename(&mut data, "last_record.value", "sessions.last.session.last_record.value");
        rename(&mut data, "record_active.value", "sessions.last.session.record_active.value");

        self.lut_mut()
            .apply_communication_data(&communication_id, INBOUND, &data);

        if truthy(field(&data, "terminate_date")) {
            self.clean_communication(&communication_id);
        }
    }

    /// An outbound session row updates the agent's session, and while a
    /// call is running it also stands for the call's communication and task
    fn on_outbound_communication_session_update(&mut self, mut data: Map<String, Value>) {
        let login = key(&data, "user.login");
        let profile = key(&data, "profile_name");
        if login.is_empty() || profile.is_empty() {
            return;
        }
        self.lut_mut().apply_session_data(&profile, &login, &data);

        let call_id = field(&data, "outbound_call_id.value").clone();
        if !truthy(&call_id) {
            return;
        }
        let call_start = field(&data, "last_outbound_call_start.value").clone();
        let end_date = if call_start.as_str() == Some("stop") {
            json!(now_naive_iso())
        } else {
            json!("")
        };
        let overrides = [
            ("queue_type", json!(OUTBOUND)),
            ("manager_session.profile_name", json!(profile)),
            ("create_date", call_start.clone()),
            ("communication_create_date", json!({ "value": call_start })),
            (
                "attributes.local_number.value",
                field(&data, "last_outbound_call_target.value").clone(),
            ),
            ("attributes.remote_number.value", field(&data, "user.name").clone()),
            ("task_id", call_id.clone()),
            ("parent_call_session_id", call_id.clone()),
            (
                "management_date",
                field(&data, "last_outbound_call_contact_start.value").clone(),
            ),
            ("end_date", end_date),
        ];
        for (name, value) in overrides {
            data.insert(name.to_string(), value);
        }

        let communication_id = value_key(&call_id);
        let lut = self.lut_mut();
        lut.apply_communication_data(&communication_id, OUTBOUND, &data);
        if let Err(e) = lut.apply_task_data(&data) {
            error!("Outbound call {} not applied: {}", communication_id, e);
        }
    }

    fn on_outbound_daily_communication_session_update(&mut self, data: Map<String, Value>) {
        let login = key(&data, "user.login");
        let profile = key(&data, "profile_name");
        let session_id = key(&data, "session_id");
        if login.is_empty() || profile.is_empty() || session_id.is_empty() {
            return;
        }
        self.lut_mut().apply_daily_data(&profile, &login, &session_id, &data);
    }

    /// A queue row of a communication names the queue it waits in
    fn on_communication_queue_update(&mut self, mut data: Map<String, Value>) {
        let queue_name = key(&data, "queue_name");
        let display_name = self
            .lut()
            .service(&queue_name)
            .map(|service| service.table_name())
            .filter(|(name, _)| *name == queue_name)
            .map(|(_, display)| display);
        let Some(display_name) = display_name else {
            error!(
                "An Error occured, can't get update from file_task: {}",
                serde_json::Value::Object(data)
            );
            return;
        };

        data.insert("queue_display_name".to_string(), display_name);
        data.insert("queue_type".to_string(), json!("queue"));
        let communication_id = key(&data, "session.session_id");
        if communication_id.is_empty() {
            return;
        }
        self.lut_mut()
            .apply_communication_data(&communication_id, INBOUND, &data);
    }

    fn on_communication_task_update(&mut self, data: Map<String, Value>) {
        if let Err(e) = self.lut_mut().apply_task_data(&data) {
            error!("Task row not applied: {}", e);
        }
    }

    /// Forget a terminated communication after a delay. Terminations seen
    /// while a batch is pending go to the next batch.
    pub(super) fn clean_communication(&mut self, communication_id: &str) {
        if !self.clean_scheduled {
            self.pending_clean.push(communication_id.to_string());
            self.clean_scheduled = true;
            let delay = self.timings().terminated_cleanup();
            self.schedule(delay, TimerEvent::DelayedClean);
        } else {
            self.auxiliary_clean.push(communication_id.to_string());
        }
    }

    pub(super) fn delayed_clean(&mut self) {
        let batch = std::mem::take(&mut self.pending_clean);
        for communication_id in &batch {
            self.lut_mut().del_communication(communication_id);
        }
        debug!("{} terminated communications forgotten", batch.len());

        if self.auxiliary_clean.is_empty() {
            self.clean_scheduled = false;
            return;
        }
        self.pending_clean = std::mem::take(&mut self.auxiliary_clean);
        let delay = self.timings().terminated_cleanup();
        self.schedule(delay, TimerEvent::DelayedClean);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::RtConfig;
    use crate::dispatch::protocol::ObjectResponse;
    use crate::recording::{RecordingSink, RecordingTransport};
    use pretty_assertions::assert_eq;
    use tokio::time::Instant;

    type Client = DispatchClient<RecordingTransport, RecordingSink>;

    fn client() -> Client {
        DispatchClient::new(
            RtConfig::default(),
            RecordingTransport::new(),
            RecordingSink::new(),
            Instant::now(),
        )
        .unwrap()
    }

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

    #[test]
    fn test_terminated_communications_are_cleaned_in_batches() {
        let mut client = client();
        let idx = client.start_view(ViewKind::CommunicationSessions, "");

        push(&mut client, idx, "o1", json!({"session_id": "c1", "terminate_date": ""}));
        assert!(client.lut().listener().has_communication("c1"));

        push(&mut client, idx, "o1", json!({"terminate_date": "2017/03/29 15:30:12"}));
        client.advance(Duration::from_secs(5));
        push(&mut client, idx, "o2", json!({"session_id": "c2", "terminate_date": "2017/03/29 15:30:14"}));

        client.advance(Duration::from_secs(5));
        assert!(!client.lut().listener().has_communication("c1"));
        assert!(client.lut().listener().has_communication("c2"));

        client.advance(Duration::from_secs(10));
        assert!(!client.lut().listener().has_communication("c2"));
    }

    #[test]
    fn test_empty_session_id_is_ignored() {
        let mut client = client();
        let idx = client.start_view(ViewKind::CommunicationSessions, "");
        push(&mut client, idx, "o1", json!({"queue_name": "sales"}));
        assert_eq!(client.lut().listener().communications().count(), 0);
    }

    #[test]
    fn test_outbound_call_stands_for_a_communication() {
        let mut client = client();
        let idx = client.start_view(ViewKind::OutboundCommunicationSessions, "");
        push(
            &mut client,
            idx,
            "s1",
            json!({
                "user.login": "alice",
                "user.name": "Alice",
                "profile_name": "Level1",
                "session_id": "s1",
                "outbound_call_id.value": "call-1",
                "last_outbound_call_start.value": "2017/03/29 15:30:12",
                "last_outbound_call_target.value": "0102030405",
            }),
        );

        assert!(client.lut().profile("Level1").unwrap().has_session("alice"));
        let communication = client.lut().listener().communication("call-1").unwrap();
        assert_eq!(communication.communication_type(), OUTBOUND);
        assert!(client.lut().listener().task("call-1").is_some());
    }

    #[test]
    fn test_queue_rows_need_a_known_queue() {
        let mut client = client();
        let queues = client.start_view(ViewKind::CommunicationQueues, "");
        push(&mut client, queues, "f1", json!({"session.session_id": "c1", "queue_name": "sales"}));
        assert!(!client.lut().listener().has_communication("c1"));

        let services = client.start_view(ViewKind::Queues, "");
        push(&mut client, services, "q1", json!({"name": "sales", "display_name": "Sales"}));
        push(&mut client, queues, "f1", json!({"queue_name": "sales"}));
        assert!(client.lut().listener().has_communication("c1"));
    }

    #[test]
    fn test_task_rows_without_ids_are_rejected() {
        let mut client = client();
        let idx = client.start_view(ViewKind::CommunicationTasks, "");
        push(&mut client, idx, "t1", json!({"queue_type": "queue"}));
        assert_eq!(client.lut().listener().tasks().count(), 0);
    }
}
