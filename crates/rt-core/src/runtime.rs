//! Tokio host for a [`DispatchClient`].
//!
//! The client is not shared: one task owns it and drains a command
//! mailbox. Between commands the task sleeps until the next timer
//! deadline, then fires what is due. The virtual clock of the client
//! follows the tokio clock, so `tokio::time::pause` drives it in tests.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::config::RtConfig;
use crate::dispatch::{DispatchClient, DispatchTransport, ListResponse, ObjectResponse};
use crate::error::{Result, RtError};
use crate::subscriber::{Delivery, DeliverySink};

const MAILBOX_SIZE: usize = 1024;

type Job<T, S> = Box<dyn FnOnce(&mut DispatchClient<T, S>) + Send>;

enum Command<T, S> {
    ListResponse { idx: u32, response: ListResponse },
    ObjectResponse {
        idx: u32,
        object_id: String,
        response: ObjectResponse,
    },
    Call(Job<T, S>),
    Shutdown,
}

/// Sink forwarding every delivery on an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn push(&self, delivery: Delivery) {
        if self.tx.send(delivery).is_err() {
            debug!("Delivery dropped, receiver closed");
        }
    }
}

impl DeliverySink for ChannelSink {
    fn send(&mut self, kind: &str, target: &str, values: Value) {
        self.push(Delivery::Values {
            kind: kind.to_string(),
            target: target.to_string(),
            values,
        });
    }

    fn send_record_values(&mut self, values: Value) {
        self.push(Delivery::Record { values });
    }

    fn send_autorecord_values(&mut self, values: Value) {
        self.push(Delivery::AutoRecord { values });
    }

    fn send_history_values(&mut self, values: Value) {
        self.push(Delivery::History { values });
    }
}

/// Handle to a running engine task
pub struct RtHandle<T, S> {
    tx: mpsc::Sender<Command<T, S>>,
}

impl<T, S> Clone for RtHandle<T, S> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T, S> RtHandle<T, S>
where
    T: DispatchTransport + Send + 'static,
    S: DeliverySink + Send + 'static,
{
    /// Feed a decoded list response
    pub async fn list_response(&self, idx: u32, response: ListResponse) -> Result<()> {
        self.send(Command::ListResponse { idx, response }).await
    }

    /// Feed a decoded object response
    pub async fn object_response(&self, idx: u32, object_id: impl Into<String>, response: ObjectResponse) -> Result<()> {
        self.send(Command::ObjectResponse {
            idx,
            object_id: object_id.into(),
            response,
        })
        .await
    }

    /// Run `f` on the client inside the engine task and return its result
    pub async fn call<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut DispatchClient<T, S>) -> R + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job: Job<T, S> = Box::new(move |client| {
            let _ = reply.send(f(client));
        });
        self.send(Command::Call(job)).await?;
        rx.await.map_err(|_| RtError::Stopped)
    }

    pub async fn start_views(&self) -> Result<()> {
        self.call(|client| client.start_views()).await
    }

    pub async fn subscribe(
        &self,
        target: impl Into<String>,
        kind: impl Into<String>,
        indicators: Vec<String>,
        profile: Option<String>,
    ) -> Result<Value> {
        let (target, kind) = (target.into(), kind.into());
        self.call(move |client| client.subscribe(&target, &kind, &indicators, profile.as_deref()))
            .await?
    }

    pub async fn subscribe_profile(&self, target: impl Into<String>, indicators: Vec<String>) -> Result<Value> {
        let target = target.into();
        self.call(move |client| client.subscribe_profile(&target, &indicators))
            .await?
    }

    pub async fn subscribe_communication(
        &self,
        target: impl Into<String>,
        indicators: Vec<String>,
        profiles: Vec<String>,
        queues: Vec<String>,
    ) -> Result<Value> {
        let target = target.into();
        self.call(move |client| client.subscribe_communication(&target, &indicators, &profiles, &queues))
            .await
    }

    pub async fn unsubscribe(&self, id: impl Into<String>, removed: Vec<String>) -> Result<Option<Value>> {
        let id = id.into();
        self.call(move |client| client.unsubscribe(&id, &removed)).await?
    }

    pub async fn get_values_from_profiles(&self, indicators: Vec<String>, ignored: Vec<String>) -> Result<Vec<Value>> {
        self.call(move |client| client.get_values_from_profiles(&indicators, &ignored))
            .await
    }

    /// Stop the engine task; pending timers are dropped
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }

    async fn send(&self, command: Command<T, S>) -> Result<()> {
        self.tx.send(command).await.map_err(|_| RtError::Stopped)
    }
}

/// Start an engine task owning a new client
pub fn spawn<T, S>(config: RtConfig, transport: T, sink: S) -> Result<(RtHandle<T, S>, JoinHandle<()>)>
where
    T: DispatchTransport + Send + 'static,
    S: DeliverySink + Send + 'static,
{
    let client = DispatchClient::new(config, transport, sink, Instant::now())?;
    let (tx, rx) = mpsc::channel(MAILBOX_SIZE);
    let task = tokio::spawn(run(client, rx));
    Ok((RtHandle { tx }, task))
}

async fn run<T, S>(mut client: DispatchClient<T, S>, mut rx: mpsc::Receiver<Command<T, S>>)
where
    T: DispatchTransport,
    S: DeliverySink,
{
    info!("Real-time engine started");
    loop {
        let deadline = client.next_deadline();
        tokio::select! {
            command = rx.recv() => {
                client.advance_to(Instant::now());
                match command {
                    Some(Command::ListResponse { idx, response }) => client.on_list_response(idx, &response),
                    Some(Command::ObjectResponse { idx, object_id, response }) => {
                        // Logged where raised
                        let _ = client.on_object_response(idx, &object_id, &response);
                    }
                    Some(Command::Call(job)) => {
                        job(&mut client);
                        client.pump();
                    }
                    Some(Command::Shutdown) | None => break,
                }
            }
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                client.advance_to(Instant::now());
            }
        }
    }
    info!("Real-time engine stopped");
}
