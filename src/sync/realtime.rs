use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::core::task::Task;
use crate::error::{Error, Result};

use super::auth::AuthContext;
use super::{ChangeEvent, FeedMessage, SubscriptionStatus, TableScope};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const CHANNEL_CAPACITY: usize = 256;
const JOIN_REF: &str = "1";

/// Something that can open a change feed on a table.
pub trait ChangeFeed {
    fn subscribe(&self, scope: &TableScope, auth: &AuthContext) -> Result<Subscription>;
}

/// A live change feed. Dropping it (or calling [`Subscription::close`])
/// tells the connection task to leave the channel and stop.
pub struct Subscription {
    rx: mpsc::Receiver<FeedMessage>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wrap a plain receiver, for feeds driven by something other than a
    /// background connection task.
    pub fn from_receiver(rx: mpsc::Receiver<FeedMessage>) -> Self {
        Self {
            rx,
            shutdown: None,
            task: None,
        }
    }

    fn with_task(rx: mpsc::Receiver<FeedMessage>, shutdown: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    /// Wait for the next message. `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<FeedMessage> {
        self.rx.recv().await
    }

    /// A message that is already waiting, if any.
    pub fn try_next(&mut self) -> Option<FeedMessage> {
        self.rx.try_recv().ok()
    }

    /// Leave the channel and wait for the connection task to finish.
    pub async fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.rx.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("Change feed task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Change feed over the backend's realtime websocket (Phoenix channels).
#[derive(Debug, Clone)]
pub struct RealtimeFeed {
    socket_url: Url,
}

impl RealtimeFeed {
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self> {
        let mut socket_url =
            Url::parse(base_url).map_err(|e| Error::Config(format!("bad backend url {}: {}", base_url, e)))?;
        let scheme = match socket_url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => return Err(Error::Config(format!("unsupported url scheme {}", other))),
        };
        socket_url
            .set_scheme(scheme)
            .map_err(|_| Error::Config(format!("cannot use {} for {}", scheme, base_url)))?;
        socket_url.set_path("/realtime/v1/websocket");
        socket_url
            .query_pairs_mut()
            .clear()
            .append_pair("apikey", anon_key)
            .append_pair("vsn", "1.0.0");
        Ok(Self { socket_url })
    }

    pub fn socket_url(&self) -> &Url {
        &self.socket_url
    }
}

impl ChangeFeed for RealtimeFeed {
    fn subscribe(&self, scope: &TableScope, auth: &AuthContext) -> Result<Subscription> {
        let topic = format!(
            "realtime:{}-changes-{}",
            scope.table,
            uuid::Uuid::new_v4().simple()
        );
        let join = join_frame(&topic, scope, &auth.access_token);
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        log::info!("Subscribing to {}.{} changes on {}", scope.schema, scope.table, topic);
        let task = tokio::spawn(run_channel(
            self.socket_url.to_string(),
            topic,
            join,
            tx,
            shutdown_rx,
        ));
        Ok(Subscription::with_task(rx, shutdown_tx, task))
    }
}

/// One Phoenix channel message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Frame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    join_ref: Option<String>,
}

impl Frame {
    fn new(topic: &str, event: &str, payload: serde_json::Value, reference: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            reference: Some(reference),
            join_ref: Some(JOIN_REF.to_string()),
        }
    }

    fn encode(&self) -> String {
        // A struct of strings and a Value cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn join_frame(topic: &str, scope: &TableScope, access_token: &str) -> Frame {
    let payload = serde_json::json!({
        "config": {
            "broadcast": { "ack": false, "self": false },
            "presence": { "key": "" },
            "postgres_changes": [
                { "event": "*", "schema": scope.schema, "table": scope.table }
            ],
            "private": false
        },
        "access_token": access_token
    });
    Frame::new(topic, "phx_join", payload, JOIN_REF.to_string())
}

fn heartbeat_frame(reference: u64) -> Frame {
    Frame {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: serde_json::json!({}),
        reference: Some(reference.to_string()),
        join_ref: None,
    }
}

/// Translate an incoming frame for our topic into a feed message.
fn decode(frame: &Frame, topic: &str) -> Option<FeedMessage> {
    if frame.topic != topic {
        return None;
    }

    match frame.event.as_str() {
        "postgres_changes" => decode_change(&frame.payload).map(FeedMessage::Change),
        "phx_reply" if frame.reference.as_deref() == Some(JOIN_REF) => {
            let status = frame.payload.get("status").and_then(|s| s.as_str());
            if status == Some("ok") {
                Some(FeedMessage::Status(SubscriptionStatus::Subscribed))
            } else {
                let reason = frame
                    .payload
                    .pointer("/response/reason")
                    .and_then(|r| r.as_str())
                    .unwrap_or("join rejected");
                Some(FeedMessage::Status(SubscriptionStatus::ChannelError(
                    reason.to_string(),
                )))
            }
        }
        "system" => {
            let status = frame.payload.get("status").and_then(|s| s.as_str());
            let message = frame
                .payload
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or_default();
            if status == Some("error") {
                Some(FeedMessage::Status(SubscriptionStatus::ChannelError(
                    message.to_string(),
                )))
            } else {
                log::debug!("Realtime system message: {}", message);
                None
            }
        }
        "phx_error" => Some(FeedMessage::Status(SubscriptionStatus::ChannelError(
            "channel crashed".to_string(),
        ))),
        "phx_close" => Some(FeedMessage::Status(SubscriptionStatus::Closed)),
        _ => None,
    }
}

fn decode_change(payload: &serde_json::Value) -> Option<ChangeEvent> {
    let data = payload.get("data")?;
    let kind = data.get("type").and_then(|t| t.as_str())?;
    let record_key = if kind == "DELETE" { "old_record" } else { "record" };
    let record = data.get(record_key)?;

    let task: Task = match serde_json::from_value(record.clone()) {
        Ok(t) => t,
        Err(e) => {
            log::warn!("Skipping undecodable {} record: {}", kind, e);
            return None;
        }
    };

    match kind {
        "INSERT" => Some(ChangeEvent::Insert(task)),
        "UPDATE" => Some(ChangeEvent::Update(task)),
        "DELETE" => Some(ChangeEvent::Delete(task)),
        other => {
            log::debug!("Ignoring change of type {}", other);
            None
        }
    }
}

fn log_status(status: &SubscriptionStatus) {
    match status {
        SubscriptionStatus::Subscribed | SubscriptionStatus::Closed => {
            log::info!("Change feed status: {}", status)
        }
        SubscriptionStatus::TimedOut => log::warn!("Change feed status: {}", status),
        SubscriptionStatus::ChannelError(_) => log::error!("Change feed status: {}", status),
    }
}

async fn report(tx: &mpsc::Sender<FeedMessage>, status: SubscriptionStatus) {
    log_status(&status);
    let _ = tx.send(FeedMessage::Status(status)).await;
}

async fn run_channel(
    url: String,
    topic: String,
    join: Frame,
    tx: mpsc::Sender<FeedMessage>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let connected = tokio::select! {
        r = tokio_tungstenite::connect_async(url.as_str()) => r,
        _ = &mut shutdown => return,
    };
    let ws = match connected {
        Ok((ws, _)) => ws,
        Err(e) => {
            report(&tx, SubscriptionStatus::ChannelError(format!("connect failed: {}", e))).await;
            return;
        }
    };
    let (mut sink, mut stream) = ws.split();

    if let Err(e) = sink.send(Message::text(join.encode())).await {
        report(&tx, SubscriptionStatus::ChannelError(format!("join failed: {}", e))).await;
        return;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let join_deadline = tokio::time::sleep(JOIN_TIMEOUT);
    tokio::pin!(join_deadline);
    let mut joined = false;
    let mut next_ref: u64 = 2;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let leave = Frame::new(&topic, "phx_leave", serde_json::json!({}), next_ref.to_string());
                let _ = sink.send(Message::text(leave.encode())).await;
                let _ = sink.close().await;
                log_status(&SubscriptionStatus::Closed);
                break;
            }
            _ = &mut join_deadline, if !joined => {
                report(&tx, SubscriptionStatus::TimedOut).await;
                let _ = sink.close().await;
                break;
            }
            _ = heartbeat.tick() => {
                let beat = heartbeat_frame(next_ref);
                next_ref += 1;
                if let Err(e) = sink.send(Message::text(beat.encode())).await {
                    report(&tx, SubscriptionStatus::ChannelError(format!("heartbeat failed: {}", e))).await;
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let frame: Frame = match serde_json::from_str(text.as_str()) {
                        Ok(f) => f,
                        Err(e) => {
                            log::warn!("Unparseable realtime frame: {}", e);
                            continue;
                        }
                    };
                    let Some(message) = decode(&frame, &topic) else {
                        continue;
                    };
                    let ends = match &message {
                        FeedMessage::Status(status) => {
                            log_status(status);
                            if *status == SubscriptionStatus::Subscribed {
                                joined = true;
                            }
                            matches!(status, SubscriptionStatus::Closed | SubscriptionStatus::ChannelError(_))
                        }
                        FeedMessage::Change(change) => {
                            log::debug!("Change feed {} for task {}", change.kind(), change.task().id);
                            false
                        }
                    };
                    if tx.send(message).await.is_err() {
                        log::debug!("Change feed consumer gone, stopping");
                        break;
                    }
                    if ends {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    report(&tx, SubscriptionStatus::Closed).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    report(&tx, SubscriptionStatus::ChannelError(e.to_string())).await;
                    break;
                }
            }
        }
    }
}
