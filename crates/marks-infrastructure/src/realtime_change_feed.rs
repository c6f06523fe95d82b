//! RealtimeChangeFeed - `ChangeFeedTransport` over the project's realtime
//! websocket.
//!
//! Speaks the Phoenix channel protocol served at `/realtime/v1/websocket`:
//! one `phx_join` carrying a `postgres_changes` subscription for the owner's
//! rows, a `heartbeat` on the `phoenix` topic every [`HEARTBEAT_INTERVAL`],
//! and `postgres_changes` pushes for every row change.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use marks_core::config::RemoteConfig;
use marks_core::error::{MarksError, Result};
use marks_core::feed::{ChangeEvent, ChangeFeedTransport, ChangeKind, FeedFilter};
use marks_core::session::CredentialSource;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use url::Url;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
/// Largest frame or message accepted from the server
pub const MAX_MESSAGE_BYTES: usize = 1 << 20;

const SCHEMA: &str = "public";
const PROTOCOL_VSN: &str = "1.0.0";

/// Push channel reading the remote store's realtime change stream.
pub struct RealtimeChangeFeed {
    api_url: String,
    anon_key: String,
    credentials: Arc<dyn CredentialSource>,
    heartbeat_interval: Duration,
    max_message_bytes: usize,
}

impl RealtimeChangeFeed {
    pub fn new(config: &RemoteConfig, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            api_url: config.base_url().to_string(),
            anon_key: config.anon_key.clone(),
            credentials,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            max_message_bytes: MAX_MESSAGE_BYTES,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_max_message_bytes(mut self, bytes: usize) -> Self {
        self.max_message_bytes = bytes;
        self
    }

    /// `ws(s)://{project}/realtime/v1/websocket?apikey=..&vsn=1.0.0`
    pub fn socket_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| MarksError::config(format!("invalid remote.api_url: {}", e)))?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(MarksError::config(format!(
                    "remote.api_url scheme {} is not http(s)",
                    other
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| MarksError::config("remote.api_url cannot carry a websocket scheme"))?;
        let path = format!("{}/realtime/v1/websocket", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.query_pairs_mut()
            .clear()
            .append_pair("apikey", &self.anon_key)
            .append_pair("vsn", PROTOCOL_VSN);
        Ok(url)
    }

    fn socket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_message_size: Some(self.max_message_bytes),
            max_frame_size: Some(self.max_message_bytes),
            ..WebSocketConfig::default()
        }
    }
}

#[async_trait]
impl ChangeFeedTransport for RealtimeChangeFeed {
    async fn run(
        &self,
        filter: &FeedFilter,
        events: mpsc::UnboundedSender<ChangeEvent>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let token = self
            .credentials
            .access_token()
            .ok_or_else(|| MarksError::remote("feed", "no live session to authorize stream"))?;
        let url = self.socket_url()?;

        let connect = tokio_tungstenite::connect_async_with_config(
            url.as_str(),
            Some(self.socket_config()),
            false,
        );
        let (mut socket, _) = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            connected = connect => connected.map_err(feed_error)?,
        };

        let mut channel = Channel::new(filter);
        socket
            .send(channel.join(filter, &token)?)
            .await
            .map_err(feed_error)?;
        tracing::debug!("[RealtimeChangeFeed] Joining {}", channel.topic);

        let period = self.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    if let Ok(leave) = channel.leave() {
                        let _ = socket.send(leave).await;
                    }
                    let _ = socket.close(None).await;
                    return Ok(());
                }
                _ = heartbeat.tick() => {
                    socket.send(channel.heartbeat()?).await.map_err(feed_error)?;
                }
                frame = socket.next() => {
                    let Some(frame) = frame else {
                        tracing::debug!("[RealtimeChangeFeed] Server closed the socket");
                        return Ok(());
                    };
                    let text = match frame.map_err(feed_error)? {
                        Message::Text(text) => text,
                        Message::Close(_) => {
                            tracing::debug!("[RealtimeChangeFeed] Server sent close");
                            return Ok(());
                        }
                        _ => continue,
                    };
                    let Some(message) = decode(&text) else {
                        continue;
                    };
                    let forwarded = match channel.receive(message)? {
                        Incoming::Joined => {
                            tracing::debug!(
                                "[RealtimeChangeFeed] Subscribed to {} for owner {}",
                                filter.table,
                                filter.owner_id
                            );
                            events.send(ChangeEvent::resync())
                        }
                        Incoming::Change(event) => events.send(event),
                        Incoming::Ignored => Ok(()),
                    };
                    if forwarded.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn feed_error(error: impl std::fmt::Display) -> MarksError {
    MarksError::remote("feed", error.to_string())
}

/// Phoenix channel envelope (protocol vsn 1.0.0).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PhoenixMessage {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    join_ref: Option<String>,
}

impl PhoenixMessage {
    fn into_frame(self) -> Result<Message> {
        Ok(Message::Text(serde_json::to_string(&self)?))
    }

    fn status(&self) -> Option<&str> {
        self.payload.get("status").and_then(Value::as_str)
    }
}

fn decode(text: &str) -> Option<PhoenixMessage> {
    match serde_json::from_str(text) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::debug!("[RealtimeChangeFeed] Skipping undecodable frame: {}", e);
            None
        }
    }
}

#[derive(Debug)]
enum Incoming {
    /// The server acknowledged the subscription
    Joined,
    Change(ChangeEvent),
    Ignored,
}

/// Protocol state of one channel on one socket.
struct Channel {
    topic: String,
    join_ref: String,
    next_ref: u64,
    pending_heartbeat: Option<String>,
    joined: bool,
}

impl Channel {
    fn new(filter: &FeedFilter) -> Self {
        Self {
            topic: format!("realtime:{}-{}", filter.table, filter.owner_id),
            join_ref: "1".to_string(),
            next_ref: 2,
            pending_heartbeat: None,
            joined: false,
        }
    }

    fn make_ref(&mut self) -> String {
        let reference = self.next_ref.to_string();
        self.next_ref += 1;
        reference
    }

    fn join(&self, filter: &FeedFilter, token: &str) -> Result<Message> {
        PhoenixMessage {
            topic: self.topic.clone(),
            event: "phx_join".to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "ack": false, "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [{
                        "event": "*",
                        "schema": SCHEMA,
                        "table": filter.table,
                        "filter": filter.row_filter(),
                    }],
                    "private": false,
                },
                "access_token": token,
            }),
            reference: Some(self.join_ref.clone()),
            join_ref: Some(self.join_ref.clone()),
        }
        .into_frame()
    }

    fn leave(&mut self) -> Result<Message> {
        PhoenixMessage {
            topic: self.topic.clone(),
            event: "phx_leave".to_string(),
            payload: json!({}),
            reference: Some(self.make_ref()),
            join_ref: Some(self.join_ref.clone()),
        }
        .into_frame()
    }

    /// Fails if the previous heartbeat was never answered.
    fn heartbeat(&mut self) -> Result<Message> {
        if let Some(reference) = &self.pending_heartbeat {
            return Err(MarksError::remote(
                "feed",
                format!("heartbeat {} was not answered", reference),
            ));
        }
        let reference = self.make_ref();
        self.pending_heartbeat = Some(reference.clone());
        PhoenixMessage {
            topic: "phoenix".to_string(),
            event: "heartbeat".to_string(),
            payload: json!({}),
            reference: Some(reference),
            join_ref: None,
        }
        .into_frame()
    }

    fn receive(&mut self, message: PhoenixMessage) -> Result<Incoming> {
        if message.event == "phx_reply"
            && message.reference.is_some()
            && message.reference == self.pending_heartbeat
        {
            self.pending_heartbeat = None;
            return Ok(Incoming::Ignored);
        }
        if message.topic != self.topic {
            return Ok(Incoming::Ignored);
        }

        match message.event.as_str() {
            "phx_reply" if message.reference.as_deref() == Some(self.join_ref.as_str()) => {
                if message.status() != Some("ok") {
                    let response = message.payload.get("response").cloned().unwrap_or_default();
                    return Err(MarksError::remote(
                        "feed",
                        format!("subscription rejected: {}", response),
                    ));
                }
                if self.joined {
                    return Ok(Incoming::Ignored);
                }
                self.joined = true;
                Ok(Incoming::Joined)
            }
            "postgres_changes" if self.joined => Ok(Incoming::Change(change_event(&message.payload))),
            "system" if message.status() == Some("error") => Err(MarksError::remote(
                "feed",
                format!("channel error: {}", message.payload),
            )),
            "phx_error" => Err(MarksError::remote("feed", "channel crashed on the server")),
            "phx_close" => Err(MarksError::remote("feed", "channel closed by the server")),
            _ => Ok(Incoming::Ignored),
        }
    }
}

/// A change whose payload cannot be read still means something changed.
fn change_event(payload: &Value) -> ChangeEvent {
    payload
        .get("data")
        .cloned()
        .and_then(|data| serde_json::from_value(data).ok())
        .unwrap_or_else(|| {
            tracing::debug!("[RealtimeChangeFeed] Unreadable change payload, treating as change");
            ChangeEvent::new(ChangeKind::Unknown)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoSession;

    impl CredentialSource for NoSession {
        fn access_token(&self) -> Option<String> {
            None
        }
    }

    fn feed(api_url: &str) -> RealtimeChangeFeed {
        let config = RemoteConfig {
            api_url: api_url.to_string(),
            anon_key: "anon".to_string(),
            ..RemoteConfig::default()
        };
        RealtimeChangeFeed::new(&config, Arc::new(NoSession))
    }

    fn text(frame: Message) -> Value {
        match frame {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {:?}", other),
        }
    }

    fn reply(topic: &str, reference: &str, status: &str) -> PhoenixMessage {
        PhoenixMessage {
            topic: topic.to_string(),
            event: "phx_reply".to_string(),
            payload: json!({ "status": status, "response": {} }),
            reference: Some(reference.to_string()),
            join_ref: None,
        }
    }

    fn push(topic: &str, event: &str, payload: Value) -> PhoenixMessage {
        PhoenixMessage {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            reference: None,
            join_ref: None,
        }
    }

    #[test]
    fn test_socket_url() {
        let url = feed("https://project.example.co/").socket_url().unwrap();
        assert_eq!(
            url.as_str(),
            "wss://project.example.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
        let url = feed("http://127.0.0.1:54321").socket_url().unwrap();
        assert!(url.as_str().starts_with("ws://127.0.0.1:54321/realtime/v1/websocket?"));
        assert!(feed("ftp://project.example.co").socket_url().unwrap_err().is_config());
    }

    #[test]
    fn test_join_subscribes_to_owner_rows() {
        let filter = FeedFilter::new("bookmarks", "owner-1");
        let join = text(Channel::new(&filter).join(&filter, "tok").unwrap());

        assert_eq!(join["topic"], "realtime:bookmarks-owner-1");
        assert_eq!(join["event"], "phx_join");
        assert_eq!(join["ref"], "1");
        assert_eq!(join["payload"]["access_token"], "tok");
        let changes = &join["payload"]["config"]["postgres_changes"][0];
        assert_eq!(changes["event"], "*");
        assert_eq!(changes["schema"], "public");
        assert_eq!(changes["table"], "bookmarks");
        assert_eq!(changes["filter"], "user_id=eq.owner-1");
    }

    #[test]
    fn test_changes_are_forwarded_only_after_join() {
        let filter = FeedFilter::new("bookmarks", "owner-1");
        let mut channel = Channel::new(&filter);
        let topic = channel.topic.clone();
        let change = json!({ "data": { "type": "DELETE", "table": "bookmarks" }, "ids": [1] });

        assert!(matches!(
            channel.receive(push(&topic, "postgres_changes", change.clone())).unwrap(),
            Incoming::Ignored
        ));
        assert!(matches!(channel.receive(reply(&topic, "1", "ok")).unwrap(), Incoming::Joined));
        match channel.receive(push(&topic, "postgres_changes", change)).unwrap() {
            Incoming::Change(event) => assert_eq!(event.kind, ChangeKind::Delete),
            other => panic!("expected a change, got {:?}", other),
        }
        assert!(matches!(
            channel.receive(push("realtime:other", "postgres_changes", json!({}))).unwrap(),
            Incoming::Ignored
        ));
    }

    #[test]
    fn test_unreadable_change_payload_is_unknown() {
        assert_eq!(change_event(&json!({ "ids": [] })).kind, ChangeKind::Unknown);
        assert_eq!(
            change_event(&json!({ "data": { "type": "INSERT" } })).kind,
            ChangeKind::Insert
        );
    }

    #[test]
    fn test_rejected_join_and_channel_errors() {
        let filter = FeedFilter::new("bookmarks", "owner-1");
        let mut channel = Channel::new(&filter);
        let topic = channel.topic.clone();
        assert!(channel.receive(reply(&topic, "1", "error")).unwrap_err().is_remote());

        let mut channel = Channel::new(&filter);
        assert!(channel
            .receive(push(&topic, "system", json!({ "status": "error", "message": "denied" })))
            .unwrap_err()
            .is_remote());
        assert!(channel.receive(push(&topic, "phx_close", json!({}))).is_err());
    }

    #[test]
    fn test_unanswered_heartbeat_fails() {
        let mut channel = Channel::new(&FeedFilter::new("bookmarks", "owner-1"));
        let first = text(channel.heartbeat().unwrap());
        assert_eq!(first["topic"], "phoenix");
        let reference = first["ref"].as_str().unwrap().to_string();

        channel.receive(reply("phoenix", &reference, "ok")).unwrap();
        channel.heartbeat().unwrap();
        assert!(channel.heartbeat().unwrap_err().is_remote());
    }

    #[tokio::test]
    async fn test_run_without_session_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = feed("http://127.0.0.1:9")
            .run(&FeedFilter::new("bookmarks", "o"), tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_remote());
    }
}
