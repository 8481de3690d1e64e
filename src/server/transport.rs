//! The per-session transport: correlates a session's requests with their
//! responses and fans server pushes out to the session's open streams.

use super::dispatch::{into_error_data, RequestHandler};
use crate::error::{Error, Result};
use crate::protocol::{ProtocolMessage, Reply};
use crate::types::{
    ErrorData, InitializeRequestParams, LoggingMessageParams, Notification, RequestId,
    INVALID_PARAMS, INVALID_REQUEST,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::{FutureExt, Stream};
use serde::Serialize;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{RwLock, RwLockWriteGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the per-session push channel. Slow streams lag rather than
/// block the sender.
const PUSH_CHANNEL_CAPACITY: usize = 64;

/// Clears a request's in-flight entry however its dispatch ends, including
/// when the request future is dropped mid-handler.
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<RequestId, Instant>,
    id: RequestId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.id);
    }
}

/// A handle given to handler code to push notifications to the client
/// associated with one session.
#[derive(Clone)]
pub struct ConnectionHandle {
    session_id: Arc<str>,
    pub(crate) notification_sender: broadcast::Sender<String>,
    closed: CancellationToken,
}

impl ConnectionHandle {
    /// A handle bound to no session; pushes go nowhere.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let (notification_sender, _) = broadcast::channel(1);
        Self {
            session_id: Arc::from(""),
            notification_sender,
            closed: CancellationToken::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Pushes a notification over the session's open streams.
    ///
    /// Delivery is best-effort: with no stream attached the notification is
    /// dropped. Fails only once the session has been closed.
    pub async fn send_notification<T: Serialize>(&self, notification: Notification<T>) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::SessionClosed);
        }
        let json_string = serde_json::to_string(&notification)?;
        if self.notification_sender.send(json_string).is_err() {
            debug!(session_id = %self.session_id, method = %notification.method, "No stream attached, notification dropped");
        }
        Ok(())
    }

    /// Sends a `notifications/message` log entry to the client.
    pub async fn log(&self, level: &str, data: Value) -> Result<()> {
        self.send_notification(Notification::new(
            "notifications/message",
            Some(LoggingMessageParams {
                level: level.to_string(),
                logger: None,
                data,
            }),
        ))
        .await
    }
}

/// Wire state for one session.
///
/// Exactly one transport exists per session and it is owned by the session
/// store entry. Handlers for the same session run under a shared read guard of
/// `gate`; termination and reaping take the write guard, so a transport is
/// never closed underneath a running handler.
pub struct SessionTransport {
    session_id: Arc<str>,
    handler: Arc<dyn RequestHandler>,
    initialized: AtomicBool,
    gate: RwLock<()>,
    in_flight: DashMap<RequestId, Instant>,
    push: broadcast::Sender<String>,
    closed_flag: AtomicBool,
    closed: CancellationToken,
    last_activity: parking_lot::Mutex<Instant>,
}

impl SessionTransport {
    pub fn new(session_id: &str, handler: Arc<dyn RequestHandler>) -> Self {
        let (push, _) = broadcast::channel(PUSH_CHANNEL_CAPACITY);
        Self {
            session_id: Arc::from(session_id),
            handler,
            initialized: AtomicBool::new(false),
            gate: RwLock::new(()),
            in_flight: DashMap::new(),
            push,
            closed_flag: AtomicBool::new(false),
            closed: CancellationToken::new(),
            last_activity: parking_lot::Mutex::new(Instant::now()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed_flag.load(Ordering::Acquire)
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Number of requests currently executing against this session.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of streams currently attached for server push.
    pub fn stream_count(&self) -> usize {
        self.push.receiver_count()
    }

    fn connection_handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            session_id: Arc::clone(&self.session_id),
            notification_sender: self.push.clone(),
            closed: self.closed.clone(),
        }
    }

    /// Handles one inbound message.
    ///
    /// Returns `Ok(None)` for messages that need no reply (notifications and
    /// client responses). Domain failures come back as an error [`Reply`];
    /// only transport-level failures are returned as `Err`.
    pub async fn handle_message(&self, message: ProtocolMessage) -> Result<Option<Reply>> {
        let _guard = tokio::select! {
            guard = self.gate.read() => guard,
            _ = self.closed.cancelled() => return Err(Error::SessionClosed),
        };
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        self.touch();

        match message {
            ProtocolMessage::Notification { method, .. } => {
                debug!(session_id = %self.session_id, %method, "Notification received");
                Ok(None)
            }
            ProtocolMessage::Response { id } => {
                debug!(session_id = %self.session_id, ?id, "Client response received");
                Ok(None)
            }
            ProtocolMessage::Request { id, method, params } if method == "initialize" => {
                Ok(Some(self.initialize(id, params)))
            }
            ProtocolMessage::Request { id, method, params } => {
                if !self.is_initialized() {
                    return Ok(Some(Reply::error(
                        Some(id),
                        ErrorData::new(INVALID_REQUEST, "Session not initialized"),
                    )));
                }
                self.dispatch(id, method, params).await.map(Some)
            }
        }
    }

    fn initialize(&self, id: RequestId, params: Value) -> Reply {
        if self.is_initialized() {
            return Reply::error(
                Some(id),
                ErrorData::new(INVALID_REQUEST, "Session already initialized"),
            );
        }
        let params: InitializeRequestParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                return Reply::error(
                    Some(id),
                    ErrorData::new(INVALID_PARAMS, format!("Invalid initialize params: {}", e)),
                )
            }
        };
        let result = self.handler.initialize(&params);
        match serde_json::to_value(result) {
            Ok(result) => {
                self.initialized.store(true, Ordering::Release);
                info!(
                    session_id = %self.session_id,
                    client = %params.client_info.name,
                    protocol_version = %params.protocol_version,
                    "Session initialized"
                );
                Reply::success(id, result)
            }
            Err(e) => Reply::error(Some(id), into_error_data(e.into())),
        }
    }

    async fn dispatch(&self, id: RequestId, method: String, params: Value) -> Result<Reply> {
        match self.in_flight.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Ok(Reply::error(
                    Some(id.clone()),
                    ErrorData::new(
                        INVALID_REQUEST,
                        format!("Request id {} is already in flight", id),
                    ),
                ));
            }
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
            }
        }
        let _in_flight = InFlightGuard {
            in_flight: &self.in_flight,
            id: id.clone(),
        };

        let handle = self.connection_handle();
        let outcome = AssertUnwindSafe(self.handler.handle(&method, params, handle))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => Ok(Reply::success(id, result)),
            Ok(Err(error)) => Ok(Reply::error(Some(id), error)),
            Err(_) => {
                error!(session_id = %self.session_id, %method, "Handler panicked");
                Err(Error::Internal(format!("handler for '{}' panicked", method)))
            }
        }
    }

    /// Attaches a server-push stream. The stream yields serialized JSON-RPC
    /// messages and ends when the transport is closed.
    pub fn subscribe(&self) -> Result<impl Stream<Item = String> + Send + 'static> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        self.touch();
        let mut rx = self.push.subscribe();
        let closed = self.closed.clone();
        let session_id = Arc::clone(&self.session_id);

        Ok(async_stream::stream! {
            loop {
                let next = tokio::select! {
                    _ = closed.cancelled() => None,
                    msg = rx.recv() => Some(msg),
                };
                match next {
                    Some(Ok(message)) => yield message,
                    Some(Err(RecvError::Lagged(n))) => {
                        warn!(session_id = %session_id, skipped = n, "Stream lagged, messages dropped");
                    }
                    Some(Err(RecvError::Closed)) | None => break,
                }
            }
            debug!(session_id = %session_id, "Push stream ended");
        })
    }

    /// Waits for every running handler to finish, then closes the transport.
    pub async fn terminate(&self) {
        let _guard = self.gate.write().await;
        self.close();
    }

    /// Takes exclusive access if no handler is running right now.
    ///
    /// While the returned guard is held no new message can start executing,
    /// so the caller may remove and close the session without racing a request.
    pub fn try_exclusive(&self) -> Option<RwLockWriteGuard<'_, ()>> {
        let guard = self.gate.try_write().ok()?;
        self.in_flight.is_empty().then_some(guard)
    }

    /// Closes the transport, ending every attached stream. Idempotent; returns
    /// `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        if self.closed_flag.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.closed.cancel();
        debug!(session_id = %self.session_id, "Transport closed");
        true
    }
}

impl std::fmt::Debug for SessionTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTransport")
            .field("session_id", &self.session_id)
            .field("initialized", &self.is_initialized())
            .field("closed", &self.is_closed())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::DispatchTable;
    use crate::types::{CallToolResult, ListChangedCapability, Tool, METHOD_NOT_FOUND};
    use futures::StreamExt;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn init_message() -> ProtocolMessage {
        ProtocolMessage::from_value(json!({
            "jsonrpc": "2.0", "id": 0, "method": "initialize",
            "params": { "protocolVersion": "test", "clientInfo": {"name": "test", "version": "0"}, "capabilities": {} }
        }))
        .unwrap()
    }

    fn request(id: i64, method: &str, params: Value) -> ProtocolMessage {
        ProtocolMessage::Request {
            id: RequestId::Num(id),
            method: method.to_string(),
            params,
        }
    }

    fn transport(table: DispatchTable) -> Arc<SessionTransport> {
        Arc::new(SessionTransport::new("s-1", Arc::new(table)))
    }

    async fn initialized(table: DispatchTable) -> Arc<SessionTransport> {
        let t = transport(table);
        let reply = t.handle_message(init_message()).await.unwrap().unwrap();
        assert!(!reply.is_error());
        t
    }

    #[tokio::test]
    async fn test_initialize_then_dispatch() {
        let t = initialized(DispatchTable::new("test").register_tool(
            Tool {
                name: "noop".to_string(),
                ..Default::default()
            },
            |_, _| async { Ok(CallToolResult::default()) },
        ))
        .await;
        assert!(t.is_initialized());

        let reply = t.handle_message(request(1, "tools/list", Value::Null)).await.unwrap().unwrap();
        let value = serde_json::to_value(reply).unwrap();
        assert_eq!(value["id"], 1);
        assert_eq!(value["result"]["tools"][0]["name"], "noop");
    }

    #[tokio::test]
    async fn test_initialize_result_advertises_registered_capabilities() {
        let t = transport(DispatchTable::new("caps").register_tool(
            Tool::default(),
            |_, _| async { Ok(CallToolResult::default()) },
        ));
        let reply = t.handle_message(init_message()).await.unwrap().unwrap();
        let value = serde_json::to_value(reply).unwrap();
        assert_eq!(value["result"]["serverInfo"]["name"], "caps");
        assert_eq!(
            value["result"]["capabilities"]["tools"],
            serde_json::to_value(ListChangedCapability::default()).unwrap()
        );
        assert!(value["result"]["capabilities"].get("prompts").is_none());
    }

    #[tokio::test]
    async fn test_second_initialize_is_rejected() {
        let t = initialized(DispatchTable::new("test")).await;
        let reply = t.handle_message(init_message()).await.unwrap().unwrap();
        let value = serde_json::to_value(reply).unwrap();
        assert_eq!(value["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_request_before_initialize_is_rejected() {
        let t = transport(DispatchTable::new("test"));
        let reply = t.handle_message(request(3, "ping", Value::Null)).await.unwrap().unwrap();
        assert!(reply.is_error());
    }

    #[tokio::test]
    async fn test_notifications_need_no_reply() {
        let t = initialized(DispatchTable::new("test")).await;
        let notif = ProtocolMessage::Notification {
            method: "notifications/initialized".to_string(),
            params: Value::Null,
        };
        assert!(t.handle_message(notif).await.unwrap().is_none());
        let unknown = t.handle_message(request(4, "bogus/method", Value::Null)).await.unwrap().unwrap();
        let value = serde_json::to_value(unknown).unwrap();
        assert_eq!(value["error"]["code"], METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_messages_and_streams() {
        let t = initialized(DispatchTable::new("test")).await;
        assert!(t.close());
        assert!(!t.close(), "close must be idempotent");
        assert!(matches!(
            t.handle_message(request(5, "ping", Value::Null)).await,
            Err(Error::SessionClosed)
        ));
        assert!(t.subscribe().is_err());
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let t = initialized(DispatchTable::new("test").register_tool(
            Tool {
                name: "explode".to_string(),
                ..Default::default()
            },
            |_, _| async { panic!("kaboom") },
        ))
        .await;
        let result = t
            .handle_message(request(6, "tools/call", json!({ "name": "explode" })))
            .await;
        assert!(matches!(result, Err(Error::Internal(_))));
        assert_eq!(t.in_flight(), 0);
        // The session stays usable.
        assert!(t.handle_message(request(7, "ping", Value::Null)).await.is_ok());
    }

    #[tokio::test]
    async fn test_handler_pushes_reach_stream_until_close() {
        let t = initialized(DispatchTable::new("test").register_tool(
            Tool {
                name: "shout".to_string(),
                ..Default::default()
            },
            |handle, _| async move {
                handle.log("info", json!("hello stream")).await?;
                Ok(CallToolResult::default())
            },
        ))
        .await;

        let mut stream = Box::pin(t.subscribe().unwrap());
        assert_eq!(t.stream_count(), 1);
        t.handle_message(request(8, "tools/call", json!({ "name": "shout" })))
            .await
            .unwrap();

        let pushed = stream.next().await.unwrap();
        let pushed: Value = serde_json::from_str(&pushed).unwrap();
        assert_eq!(pushed["method"], "notifications/message");
        assert_eq!(pushed["params"]["data"], "hello stream");

        t.close();
        assert!(stream.next().await.is_none(), "stream must end on close");
    }

    #[tokio::test]
    async fn test_terminate_waits_for_running_handler() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let (entered_tx, release_rx) = (Arc::clone(&entered), Arc::clone(&release));
        let t = initialized(DispatchTable::new("test").register_tool(
            Tool {
                name: "slow".to_string(),
                ..Default::default()
            },
            move |_, _| {
                let (entered, release) = (Arc::clone(&entered_tx), Arc::clone(&release_rx));
                async move {
                    entered.notify_one();
                    release.notified().await;
                    Ok(CallToolResult::text("done"))
                }
            },
        ))
        .await;

        let worker = {
            let t = Arc::clone(&t);
            tokio::spawn(async move {
                t.handle_message(request(9, "tools/call", json!({ "name": "slow" }))).await
            })
        };
        entered.notified().await;
        assert_eq!(t.in_flight(), 1);
        assert!(t.try_exclusive().is_none(), "busy transport must not be reapable");

        let terminator = {
            let t = Arc::clone(&t);
            tokio::spawn(async move { t.terminate().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!t.is_closed(), "terminate must wait for the running handler");

        release.notify_one();
        let reply = worker.await.unwrap().unwrap().unwrap();
        assert!(!reply.is_error());
        terminator.await.unwrap();
        assert!(t.is_closed());
    }
}
