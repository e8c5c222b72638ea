//! The dispatch client: views, timers and the query API.

use std::collections::HashMap;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, error};

use super::format::{build_format, FieldTable};
use super::protocol::{DispatchTransport, ItemAction, ListResponse, ObjectResponse};
use super::schema::{compute_defaults, withdrawal_field, ViewKind};
use crate::config::RtConfig;
use crate::error::{Result, RtError};
use crate::localtime::local_now;
use crate::lookup::IndicatorLut;
use crate::scheduler::{TimerEvent, Timers};
use crate::subscriber::{DeliverySink, Subscriber};

/// Rows of one started view
#[derive(Debug, Clone)]
pub struct View {
    kind: ViewKind,
    fields: Vec<String>,
    format_id: u32,
    defaults: Vec<Value>,
    field_table: FieldTable,
    rows: IndexMap<String, Vec<Value>>,
    object_queries: Vec<u32>,
}

impl View {
    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    /// Sorted field names; row values follow this order
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn format_id(&self) -> u32 {
        self.format_id
    }

    pub fn row(&self, object_id: &str) -> Option<&[Value]> {
        self.rows.get(object_id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Field index dispatch uses for `field`
    pub fn field_index(&self, field: &str) -> Option<u32> {
        self.field_table
            .iter()
            .find(|(_, path)| path.as_str() == field)
            .map(|(index, _)| *index)
    }

    /// Row as a field-keyed map
    pub(crate) fn row_data(&self, object_id: &str) -> Map<String, Value> {
        let Some(row) = self.rows.get(object_id) else {
            return Map::new();
        };
        self.fields.iter().cloned().zip(row.iter().cloned()).collect()
    }

    pub(crate) fn set_field(&mut self, object_id: &str, field: &str, value: Value) {
        let Some(pos) = self.fields.iter().position(|f| f == field) else {
            return;
        };
        if let Some(row) = self.rows.get_mut(object_id) {
            row[pos] = value;
        }
    }
}

/// Client of the dispatch real-time views.
///
/// Owns the indicator registry (through the [`Subscriber`]), the views and
/// the timers. Nothing here blocks: deferred work is queued on a virtual
/// clock and runs when the owner calls [`DispatchClient::advance_to`].
pub struct DispatchClient<T, S> {
    pub(super) config: RtConfig,
    pub(super) transport: T,
    pub(super) sink: S,
    pub(super) subscriber: Subscriber,
    pub(super) views: IndexMap<u32, View>,
    pub(super) active: HashMap<ViewKind, u32>,
    pub(super) withdrawal_fields: Vec<String>,
    next_idx: u32,
    next_format_id: u32,
    pub(super) pending_clean: Vec<String>,
    pub(super) auxiliary_clean: Vec<String>,
    pub(super) clean_scheduled: bool,
}

impl<T: DispatchTransport, S: DeliverySink> DispatchClient<T, S> {
    /// Create a client whose virtual clock starts at `now`.
    ///
    /// Fails when the configured reset time does not parse.
    pub fn new(config: RtConfig, transport: T, sink: S, now: Instant) -> Result<Self> {
        let timers = Timers::new(now, config.timings);
        let mut client = Self {
            transport,
            sink,
            subscriber: Subscriber::new(IndicatorLut::new(timers)),
            views: IndexMap::new(),
            active: HashMap::new(),
            withdrawal_fields: ViewKind::Withdrawal.fields(config.callflow),
            next_idx: 0,
            next_format_id: 0,
            pending_clean: Vec::new(),
            auxiliary_clean: Vec::new(),
            clean_scheduled: false,
            config,
        };
        if let Some(reset_time) = client.config.reset_time.clone() {
            client.setup_reset(&reset_time, local_now())?;
        }
        Ok(client)
    }

    pub fn config(&self) -> &RtConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn subscriber(&self) -> &Subscriber {
        &self.subscriber
    }

    pub fn lut(&self) -> &IndicatorLut {
        self.subscriber.lut()
    }

    pub(super) fn lut_mut(&mut self) -> &mut IndicatorLut {
        self.subscriber.lut_mut()
    }

    pub fn view(&self, idx: u32) -> Option<&View> {
        self.views.get(&idx)
    }

    /// Index of the running view of `kind`
    pub fn active_view(&self, kind: ViewKind) -> Option<u32> {
        self.active.get(&kind).copied()
    }

    pub(super) fn schedule(&mut self, delay: Duration, event: TimerEvent) {
        self.lut_mut().timers_mut().schedule(delay, event);
    }

    pub(super) fn timings(&self) -> crate::config::Timings {
        *self.lut().timers().timings()
    }

    // View lifecycle

    /// Start the views of the deployment mode
    pub fn start_views(&mut self) {
        let now = local_now();
        let kinds: &[ViewKind] = if self.config.callflow {
            &ViewKind::CALLFLOW
        } else {
            &ViewKind::ALL
        };
        if self.config.callflow {
            debug!("Dispatch setup for callflow usage.");
        }
        for &kind in kinds {
            let filter = kind.filter(now, true);
            self.start_view(kind, &filter);
        }
    }

    /// Register the format of a view and queue its list query.
    /// Returns the view index.
    pub fn start_view(&mut self, kind: ViewKind, filter: &str) -> u32 {
        let fields = match kind {
            ViewKind::Withdrawal => self.withdrawal_fields.clone(),
            _ => kind.fields(self.config.callflow),
        };

        self.next_format_id += 1;
        let (format, field_table) = build_format(self.next_format_id, &fields);
        self.transport.set_object_format(&format);

        let idx = self.reserve_idx();
        debug!("Dispatch view started on {} with idx {}.", kind.db_root(), idx);
        self.views.insert(
            idx,
            View {
                kind,
                defaults: compute_defaults(&fields),
                fields,
                format_id: format.format_id,
                field_table,
                rows: IndexMap::new(),
                object_queries: Vec::new(),
            },
        );
        self.active.insert(kind, idx);

        let delay = self.timings().view_query_delay();
        self.schedule(
            delay,
            TimerEvent::QueryList {
                idx,
                db_root: kind.db_root().to_string(),
                filter: filter.to_string(),
            },
        );
        debug!("Dispatch list query started on {} with idx {}.", kind.db_root(), idx);
        idx
    }

    /// Stop the list query of a view and every object query it started
    pub fn stop_view(&mut self, idx: u32) {
        let Some(view) = self.views.shift_remove(&idx) else {
            debug!("The view with idx {} seems to have been already stopped.", idx);
            return;
        };
        for query in &view.object_queries {
            debug!("Dispatch query stopped with idx {}.", query);
            self.transport.stop_query(*query);
        }
        self.transport.stop_query(idx);
        debug!("Dispatch query stopped with idx {}.", idx);
        if self.active.get(&view.kind) == Some(&idx) {
            self.active.remove(&view.kind);
        }
    }

    /// Read the named withdrawal states `states` (e.g. `pause_lunch`) from
    /// the withdrawal view, restarting it when the field list grows
    pub fn set_withdrawal_view(&mut self, states: &[String]) {
        let mut changed = false;
        for state in states {
            let field = withdrawal_field(state);
            if !self.withdrawal_fields.contains(&field) {
                self.withdrawal_fields.push(field);
                changed = true;
            }
        }
        if !changed {
            return;
        }
        self.withdrawal_fields.sort();

        if let Some(idx) = self.active_view(ViewKind::Withdrawal) {
            self.stop_view(idx);
        }
        let filter = ViewKind::Withdrawal.filter(local_now(), false);
        self.start_view(ViewKind::Withdrawal, &filter);
    }

    fn reserve_idx(&mut self) -> u32 {
        self.next_idx += 1;
        self.next_idx
    }

    // Inbound

    /// Rows added to or removed from the list of view `idx`
    pub fn on_list_response(&mut self, idx: u32, response: &ListResponse) {
        if !self.views.contains_key(&idx) {
            debug!("Dispatch list response about an unknown view with idx {}.", idx);
            self.transport.stop_query(idx);
            return;
        }

        for item in &response.items {
            let object_id = item.item_id.as_str();
            let Some(view) = self.views.get_mut(&idx) else {
                return;
            };
            if item.action == ItemAction::Delete {
                if view.rows.shift_remove(object_id).is_some() {
                    debug!("Dispatch object {} deleted.", object_id);
                } else {
                    debug!(
                        "Dispatch delete request on an object not in the list with idx {} !",
                        idx
                    );
                }
                continue;
            }

            if !view.rows.contains_key(object_id) {
                view.rows.insert(object_id.to_string(), view.defaults.clone());
            }
            let format_id = view.format_id;
            let query = self.reserve_idx();
            if let Some(view) = self.views.get_mut(&idx) {
                view.object_queries.push(query);
            }
            self.transport.query_object(idx, object_id, format_id);
            debug!("Dispatch object query started on id {} with idx {}.", object_id, query);
        }
    }

    /// Values of one row of view `idx`. The row is completed with the
    /// known values and handed to the handler of the view.
    pub fn on_object_response(&mut self, idx: u32, object_id: &str, response: &ObjectResponse) -> Result<()> {
        let Some(view) = self.views.get_mut(&idx) else {
            debug!("Dispatch details about an object in an unknown view with idx {}.", idx);
            self.transport.stop_query(idx);
            return Ok(());
        };

        let mut changes = Vec::with_capacity(response.values.len());
        for field in &response.values {
            let position = view
                .field_table
                .get(&field.field_index)
                .and_then(|path| view.fields.iter().position(|f| f == path));
            let Some(position) = position else {
                let err = RtError::unknown_field(view.kind.type_name(), field.field_index);
                error!("{}", err);
                return Err(err);
            };
            changes.push((position, field.value.clone().unwrap_or(Value::Null)));
        }

        if !view.rows.contains_key(object_id) {
            debug!(
                "Dispatch details about an object not in the list with idx {}! Object {} added.",
                idx, object_id
            );
            view.rows.insert(object_id.to_string(), view.defaults.clone());
        }
        if let Some(row) = view.rows.get_mut(object_id) {
            for (position, value) in changes {
                row[position] = value;
            }
        }

        let kind = view.kind;
        let data = view.row_data(object_id);
        self.route_row(kind, idx, object_id, data);
        self.pump();
        Ok(())
    }

    // Timers

    /// Current virtual time
    pub fn now(&self) -> Instant {
        self.lut().timers().now()
    }

    /// Deadline of the next queued event
    pub fn next_deadline(&self) -> Option<Instant> {
        self.lut().timers().scheduler().next_deadline()
    }

    pub fn advance(&mut self, delay: Duration) {
        let until = self.now() + delay;
        self.advance_to(until);
    }

    /// Fire every event due at or before `until`, in deadline order,
    /// including the ones scheduled while firing
    pub fn advance_to(&mut self, until: Instant) {
        self.pump();
        loop {
            let event = self.lut_mut().timers_mut().scheduler_mut().pop_due(until);
            let Some(event) = event else {
                break;
            };
            self.fire(event);
            self.pump();
        }
        self.lut_mut().timers_mut().scheduler_mut().settle(until);
    }

    fn fire(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::SessionFlush { profile, login, serial } => {
                self.lut_mut().flush_session(&profile, &login, serial)
            }
            TimerEvent::ProfileFlush { profile } => self.lut_mut().flush_profile(&profile),
            TimerEvent::CommunicationFlush { communication_id } => {
                self.lut_mut().flush_communication(&communication_id)
            }
            TimerEvent::TaskFlush { task_id } => self.lut_mut().flush_task(&task_id),
            TimerEvent::ListenerFlush => self.lut_mut().flush_listener(),
            TimerEvent::SubscriptionFlush { id } => self.subscriber.flush_subscription(&id),
            TimerEvent::CleanCommunication {
                communication_id,
                task_id,
            } => {
                if !self.lut_mut().clean_communication(&communication_id, &task_id) {
                    debug!(
                        "Task {} of communication {} was already cleaned",
                        task_id, communication_id
                    );
                }
            }
            TimerEvent::DelayedClean => self.delayed_clean(),
            TimerEvent::QueryList { idx, db_root, filter } => {
                if self.views.contains_key(&idx) {
                    self.transport.query_list(idx, &db_root, &filter);
                } else {
                    debug!("View {} stopped before its list query", idx);
                }
            }
            TimerEvent::StartResetLoop => self.start_reset_loop(),
            TimerEvent::ResetTick => self.reset_tick(),
        }
    }

    /// Route the pending notices and hand the resulting deliveries to the sink
    pub fn pump(&mut self) {
        self.subscriber.route_notices();
        for delivery in self.subscriber.take_deliveries() {
            delivery.deliver(&mut self.sink);
        }
    }

    // Query API

    /// Subscribe to indicators of a session (`kind` "session", with its
    /// profile) or of a queue (`kind` "service")
    pub fn subscribe(&mut self, target: &str, kind: &str, indicators: &[String], profile: Option<&str>) -> Result<Value> {
        let profile = profile.filter(|p| !p.is_empty());
        let response = self.subscriber.subscribe(target, kind, indicators, profile);
        self.pump();
        response
    }

    pub fn subscribe_profile(&mut self, target: &str, indicators: &[String]) -> Result<Value> {
        let response = self.subscriber.subscribe_profile(target, indicators);
        self.pump();
        response
    }

    /// Remove indicators from a profile subscription, or drop it when `removed` is empty
    pub fn unsubscribe_profile(&mut self, id: &str, removed: &[String]) -> Result<Option<Value>> {
        if removed.is_empty() {
            self.subscriber.unsubscribe(id)?;
            return Ok(None);
        }
        self.subscriber.update_profile_indicators(id, &[], removed)
    }

    pub fn subscribe_communication(
        &mut self,
        target: &str,
        indicators: &[String],
        profiles: &[String],
        queues: &[String],
    ) -> Value {
        let response = self
            .subscriber
            .subscribe_communication(target, indicators, profiles, queues);
        self.pump();
        response
    }

    /// Widen a communication subscription and add indicators to it
    pub fn update_communication_subscription(
        &mut self,
        id: &str,
        indicators: &[String],
        profiles: &[String],
        queues: &[String],
    ) -> Result<Option<Value>> {
        self.subscriber
            .update_communication_indicators(id, profiles, queues, indicators, &[])
    }

    /// Remove indicators from a communication subscription when a full
    /// scope is given, drop it otherwise
    pub fn unsubscribe_communication(
        &mut self,
        id: &str,
        removed: &[String],
        profiles: &[String],
        queues: &[String],
    ) -> Result<Option<Value>> {
        if !removed.is_empty() && !profiles.is_empty() && !queues.is_empty() {
            return self
                .subscriber
                .update_communication_indicators(id, &[], &[], &[], removed);
        }
        self.subscriber.unsubscribe(id)?;
        Ok(None)
    }

    /// Add indicators to a subscription; `kind` "profile" targets profile subscriptions
    pub fn update_subscription(&mut self, id: &str, kind: &str, indicators: &[String]) -> Result<Option<Value>> {
        if kind == crate::subscriber::PROFILE {
            return self.subscriber.update_profile_indicators(id, indicators, &[]);
        }
        self.subscriber.update_subscription(id, indicators, &[])
    }

    /// Remove indicators from a subscription, or drop it when `removed` is empty
    pub fn unsubscribe(&mut self, id: &str, removed: &[String]) -> Result<Option<Value>> {
        if removed.is_empty() {
            self.subscriber.unsubscribe(id)?;
            return Ok(None);
        }
        self.subscriber.update_subscription(id, &[], removed)
    }

    pub fn unsubscribe_all(&mut self) {
        self.subscriber.unsubscribe_all();
    }

    pub fn subscribe_record_values(&mut self) -> String {
        let id = self.subscriber.subscribe_record_values();
        self.pump();
        id
    }

    pub fn subscribe_autorecord_values(&mut self) -> String {
        let id = self.subscriber.subscribe_autorecord_values();
        self.pump();
        id
    }

    pub fn subscribe_history_values(&mut self) -> String {
        let id = self.subscriber.subscribe_history_values();
        self.pump();
        id
    }

    pub fn get_values_from_profiles(&self, indicators: &[String], ignored: &[String]) -> Vec<Value> {
        self.lut().get_values_from_profiles(indicators, ignored)
    }

    /// Logged users of the given profiles
    pub fn get_users_list(&self, profiles: &[String]) -> Vec<Value> {
        profiles
            .iter()
            .filter_map(|name| self.lut().profile(name))
            .flat_map(|profile| profile.get_session_list())
            .collect()
    }

    /// Running tasks held by the given profiles or queues
    pub fn get_communications_list(&self, profiles: &[String], queues: &[String]) -> Vec<Value> {
        self.lut().listener().get_communication_list(profiles, queues)
    }

    pub fn get_consistent_session_id(&mut self) -> Value {
        self.lut_mut().get_consistent_session_id()
    }

    pub fn get_availability_from_login(&self, login: &str) -> Result<&'static str> {
        self.lut().get_availability_from_login(login)
    }

    pub fn get_queues_table(&self) -> Map<String, Value> {
        self.lut().get_queues_table()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::protocol::{FieldValue, ListItem};
    use crate::recording::{RecordingSink, RecordingTransport, TransportRequest};
    use crate::subscriber::Delivery;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    type Client = DispatchClient<RecordingTransport, RecordingSink>;

    fn client(callflow: bool) -> (Client, RecordingTransport, RecordingSink) {
        let transport = RecordingTransport::new();
        let sink = RecordingSink::new();
        let config = RtConfig {
            callflow,
            ..RtConfig::default()
        };
        let client = DispatchClient::new(config, transport.clone(), sink.clone(), Instant::now()).unwrap();
        (client, transport, sink)
    }

    fn list(items: &[(&str, ItemAction)]) -> ListResponse {
        ListResponse {
            items: items
                .iter()
                .map(|(id, action)| ListItem {
                    item_id: id.to_string(),
                    action: *action,
                })
                .collect(),
        }
    }

    fn object(client: &Client, idx: u32, values: &[(&str, Value)]) -> ObjectResponse {
        let view = client.view(idx).unwrap();
        ObjectResponse::from_pairs(
            values
                .iter()
                .map(|(field, value)| (view.field_index(field).unwrap(), value.clone())),
        )
    }

    #[test]
    fn test_views_register_formats_then_query() {
        let (mut client, transport, _) = client(false);
        client.start_views();

        let requests = transport.take();
        assert_eq!(requests.len(), 7);
        assert!(requests
            .iter()
            .all(|r| matches!(r, TransportRequest::SetObjectFormat { .. })));
        assert!(client.active_view(ViewKind::Withdrawal).is_none());

        client.advance(Duration::from_millis(200));
        let queries = transport.take();
        assert_eq!(queries.len(), 7);
        assert_eq!(
            queries[0],
            TransportRequest::QueryList {
                idx: 1,
                db_root: "queues".into(),
                filter: ".[virtual_queue eq 0 and running]".into(),
            }
        );
    }

    #[test]
    fn test_callflow_starts_two_reduced_views() {
        let (mut client, _, _) = client(true);
        client.start_views();
        let users = client.active_view(ViewKind::Users).unwrap();
        assert_eq!(client.view(users).unwrap().fields().len(), 7);
        assert!(client.active_view(ViewKind::CommunicationSessions).is_some());
        assert!(client.active_view(ViewKind::Queues).is_none());
    }

    #[test]
    fn test_list_response_queries_rows() {
        let (mut client, transport, _) = client(false);
        let idx = client.start_view(ViewKind::Queues, "");
        transport.take();

        client.on_list_response(idx, &list(&[("q1", ItemAction::Add), ("q2", ItemAction::Add)]));
        client.on_list_response(idx, &list(&[("q1", ItemAction::Delete), ("q3", ItemAction::Add)]));

        let view = client.view(idx).unwrap();
        assert!(view.row("q1").is_none());
        assert!(view.row("q2").is_some());
        assert!(view.row("q3").is_some());
        assert_eq!(
            transport.take(),
            vec![
                TransportRequest::QueryObject { idx, object_id: "q1".into(), format_id: 1 },
                TransportRequest::QueryObject { idx, object_id: "q2".into(), format_id: 1 },
                TransportRequest::QueryObject { idx, object_id: "q3".into(), format_id: 1 },
            ]
        );

        client.stop_view(idx);
        let stops = transport.take();
        assert_eq!(stops.len(), 4);
        assert_eq!(stops[3], TransportRequest::StopQuery { idx });
        assert!(client.view(idx).is_none());
    }

    #[test]
    fn test_unknown_view_is_stopped() {
        let (mut client, transport, _) = client(false);
        client.on_list_response(42, &list(&[("q1", ItemAction::Add)]));
        client.on_object_response(43, "q1", &ObjectResponse::default()).unwrap();
        assert_eq!(
            transport.take(),
            vec![TransportRequest::StopQuery { idx: 42 }, TransportRequest::StopQuery { idx: 43 }]
        );
    }

    #[test]
    fn test_unknown_field_index_is_an_error() {
        let (mut client, _, _) = client(false);
        let idx = client.start_view(ViewKind::Queues, "");
        let response = ObjectResponse {
            values: vec![FieldValue {
                field_index: 999,
                value: Some(json!(1)),
            }],
        };
        assert_eq!(
            client.on_object_response(idx, "q1", &response).unwrap_err(),
            RtError::unknown_field("queues", 999)
        );
    }

    #[test]
    fn test_queue_rows_reach_subscriptions() {
        let (mut client, _, sink) = client(false);
        let idx = client.start_view(ViewKind::Queues, "");
        client.on_list_response(idx, &list(&[("q1", ItemAction::Add)]));

        let response = client
            .subscribe("sales", "service", &["logged_sessions_count".to_string()], None)
            .unwrap();
        assert!(response["data"].get("logged_sessions_count").is_some());

        let update = object(
            &client,
            idx,
            &[
                ("name", json!("sales")),
                ("display_name", json!("Sales")),
                ("logged_sessions_count", json!(3)),
            ],
        );
        client.on_object_response(idx, "q1", &update).unwrap();
        client.advance(Duration::from_millis(100));

        let deliveries = sink.take();
        assert_eq!(deliveries.len(), 1);
        let Delivery::Values { kind, target, values } = &deliveries[0] else {
            panic!("values expected");
        };
        assert_eq!((kind.as_str(), target.as_str()), ("service", "sales"));
        assert!(values.get("logged_sessions_count").is_some());
        assert_eq!(client.get_queues_table().get("sales"), Some(&json!("Sales")));
    }

    #[test]
    fn test_user_rows_create_logged_sessions_only() {
        let (mut client, _, _) = client(false);
        let idx = client.start_view(ViewKind::Users, "");

        let anonymous = object(&client, idx, &[("login", json!("bob"))]);
        client.on_object_response(idx, "u0", &anonymous).unwrap();
        assert!(client.lut().profiles().next().is_none());

        let update = object(
            &client,
            idx,
            &[
                ("login", json!("alice")),
                ("name", json!("Alice")),
                ("sessions.last.session.profile_name", json!("Level1")),
                ("sessions.last.session.session_id", json!("s1")),
                ("sessions.last.session.logged", json!(0)),
            ],
        );
        client.on_object_response(idx, "u1", &update).unwrap();
        assert!(client.lut().profile("Level1").unwrap().has_session("alice"));

        // A row of a user no longer logged forgets its session id
        let view = client.view(idx).unwrap();
        let pos = view
            .fields()
            .iter()
            .position(|f| f == "sessions.last.session.session_id")
            .unwrap();
        assert_eq!(view.row("u1").unwrap()[pos], Value::Null);
    }

    #[test]
    fn test_withdrawal_view_grows_and_restarts() {
        let (mut client, transport, _) = client(false);
        client.set_withdrawal_view(&["pause_lunch".to_string()]);
        let first = client.active_view(ViewKind::Withdrawal).unwrap();
        assert_eq!(
            client.view(first).unwrap().fields(),
            ["profile_name", "user.login", "user.state_pause_lunch.duration('0')"]
        );

        client.set_withdrawal_view(&["pause_lunch".to_string()]);
        assert_eq!(client.active_view(ViewKind::Withdrawal), Some(first));

        transport.take();
        client.set_withdrawal_view(&["pause_coffee".to_string()]);
        let second = client.active_view(ViewKind::Withdrawal).unwrap();
        assert_ne!(first, second);
        assert_eq!(client.view(second).unwrap().fields().len(), 4);
        assert_eq!(transport.take()[0], TransportRequest::StopQuery { idx: first });

        let update = object(
            &client,
            second,
            &[
                ("profile_name", json!("Level1")),
                ("user.login", json!("alice")),
                ("user.state_pause_coffee.duration('0')", json!(42)),
            ],
        );
        client.on_object_response(second, "w1", &update).unwrap();
        let session = client.lut().profile("Level1").unwrap().session("alice").unwrap();
        assert_eq!(
            session
                .indicators()
                .value_of("user_vocal_total_named_coffee_withdrawal_duration"),
            json!(42)
        );
    }
}
