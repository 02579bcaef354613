//! The `Multiplexer`: owns one connection's reader task and writer
//! handle, correlates requests with replies by `(service, id)`, dispatches
//! inbound requests to a registered [`ServiceRegistry`], and tracks the
//! `connect` / `disconnect` / `destroy` lifecycle (spec §4.1).
//!
//! Shape grounded in the teacher's `spark-transport-tcp::listener`
//! bind/accept loop and `spark-core`'s `RequestId`-correlated `Message`,
//! generalised here to a framed, bidirectional multiplexer that is both
//! a request proxy and a request server on the same connection.

use crate::codec::FrameCodec;
use collab_core::dispatch::{Reply, ServiceRegistry, ValueStream};
use collab_core::error::{CoreError, Result};
use collab_core::protocol::{Frame, FrameKind, WireError};
use dashmap::DashMap;
use futures::SinkExt;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

/// `connect` / `disconnect` / `destroy` lifecycle signal a connection's
/// observers can subscribe to (spec §4.1).
#[derive(Clone, Debug)]
pub enum LifecycleEvent {
    Connect,
    Disconnect,
    Destroy,
}

enum Pending {
    Single(oneshot::Sender<Result<Reply>>),
}

/// One end of a framed duplex connection. Can be used both as a request
/// proxy (via [`Multiplexer::request`]) and, when constructed with a
/// [`ServiceRegistry`], as a request server that dispatches inbound
/// `REQUEST` frames to registered handlers.
pub struct Multiplexer {
    peer_service: String,
    registry: Option<Arc<ServiceRegistry>>,
    writer: mpsc::Sender<Frame>,
    pending: Arc<DashMap<u64, Pending>>,
    stream_senders: Arc<DashMap<u64, mpsc::UnboundedSender<Result<Value>>>>,
    next_id: AtomicU64,
    destroyed: Arc<AtomicBool>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
}

impl Multiplexer {
    /// Spawns the reader/writer tasks for `stream` and returns a handle.
    /// `registry` is `None` for a pure client connection that issues
    /// requests but serves none.
    pub fn spawn<T>(stream: T, peer_service: impl Into<String>, registry: Option<Arc<ServiceRegistry>>) -> Arc<Self>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let framed = Framed::new(stream, FrameCodec::new());
        let (mut sink, mut source) = futures::StreamExt::split(framed);

        let (writer_tx, mut writer_rx) = mpsc::channel::<Frame>(256);
        let (lifecycle_tx, _) = broadcast::channel(16);

        let mux = Arc::new(Self {
            peer_service: peer_service.into(),
            registry,
            writer: writer_tx,
            pending: Arc::new(DashMap::new()),
            stream_senders: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            destroyed: Arc::new(AtomicBool::new(false)),
            lifecycle: lifecycle_tx,
        });

        tokio::spawn(async move {
            while let Some(frame) = writer_rx.recv().await {
                if sink.send(frame).await.is_err() {
                    break;
                }
            }
        });

        let reader_mux = Arc::clone(&mux);
        tokio::spawn(async move {
            let _ = reader_mux.lifecycle.send(LifecycleEvent::Connect);
            loop {
                match futures::StreamExt::next(&mut source).await {
                    Some(Ok(frame)) => {
                        if let Err(err) = frame.validate() {
                            warn!(?err, "inbound frame failed validation, disconnecting");
                            let id = frame.id;
                            let _ = reader_mux
                                .writer
                                .send(error_frame(&reader_mux.peer_service, id, &err))
                                .await;
                            break;
                        }
                        reader_mux.handle_frame(frame).await;
                    }
                    Some(Err(err)) => {
                        warn!(%err, "frame decode error, disconnecting");
                        break;
                    }
                    None => break,
                }
            }
            reader_mux.disconnect();
        });

        mux
    }

    /// Issues a request to the peer and awaits its reply. Fails with
    /// [`CoreError::Disconnected`] immediately if the connection is
    /// already destroyed, or if it is destroyed before a reply arrives.
    pub async fn request(&self, name: impl Into<String>, args: Vec<Value>) -> Result<Reply> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(CoreError::Disconnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, Pending::Single(tx));

        let frame = Frame {
            kind: FrameKind::Request,
            service: self.peer_service.clone(),
            id,
            name: Some(name.into()),
            data: Some(Value::Array(args)),
        };

        if self.writer.send(frame).await.is_err() {
            self.pending.remove(&id);
            return Err(CoreError::Disconnected);
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(CoreError::Disconnected),
        }
    }

    /// Publishes a server-initiated `EVENT` frame.
    pub async fn emit_event(&self, name: impl Into<String>, data: Value) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(CoreError::Disconnected);
        }
        let frame = Frame {
            kind: FrameKind::Event,
            service: self.peer_service.clone(),
            id: 0,
            name: Some(name.into()),
            data: Some(data),
        };
        self.writer.send(frame).await.map_err(|_| CoreError::Disconnected)
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Fails all outstanding requests with `Disconnected` and marks the
    /// connection non-terminal-usable for new requests, but does not tear
    /// down the writer task (idempotent; `destroy` additionally closes
    /// the writer).
    pub fn disconnect(&self) {
        if self
            .destroyed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let pending_ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in pending_ids {
            if let Some((_, Pending::Single(tx))) = self.pending.remove(&id) {
                let _ = tx.send(Err(CoreError::Disconnected));
            }
        }
        let stream_ids: Vec<u64> = self.stream_senders.iter().map(|entry| *entry.key()).collect();
        for id in stream_ids {
            if let Some((_, tx)) = self.stream_senders.remove(&id) {
                let _ = tx.send(Err(CoreError::Disconnected));
            }
        }
        let _ = self.lifecycle.send(LifecycleEvent::Disconnect);
    }

    /// Terminal: equivalent to [`Multiplexer::disconnect`], plus emits
    /// `destroy` and rejects any future registration/requests for good
    /// (registration after destroy fails, per spec §4.1).
    pub fn destroy(&self) {
        self.disconnect();
        let _ = self.lifecycle.send(LifecycleEvent::Destroy);
    }

    async fn handle_frame(&self, frame: Frame) {
        match frame.kind {
            FrameKind::Request => self.handle_request(frame).await,
            FrameKind::ReplyValue => self.complete_single(frame.id, Ok(Reply::Value(frame.data.unwrap_or(Value::Null)))),
            FrameKind::ReplyError => {
                let wire: std::result::Result<WireError, _> =
                    serde_json::from_value(frame.data.unwrap_or(Value::Null));
                let err = match wire {
                    Ok(w) => wire_error_to_core(w),
                    Err(_) => CoreError::assert("malformed REPLY_ERROR data"),
                };
                self.complete_single(frame.id, Err(err));
            }
            FrameKind::ReplyStream => self.complete_stream(frame.id),
            FrameKind::StreamOutputData => self.push_stream_item(frame.id, frame.data.unwrap_or(Value::Null)),
            FrameKind::StreamOutputEnd => self.end_stream(frame.id),
            FrameKind::Event => debug!(service = %frame.service, name = ?frame.name, "event received"),
            FrameKind::StreamInputData | FrameKind::StreamInputEnd => {
                debug!(id = frame.id, "stream input frame received, no inbound streaming support yet");
            }
        }
    }

    async fn handle_request(&self, frame: Frame) {
        let Some(registry) = self.registry.clone() else {
            let err = CoreError::not_found("service", frame.service.clone());
            let _ = self.writer.send(error_frame(&self.peer_service, frame.id, &err)).await;
            return;
        };
        let name = frame.name.clone().unwrap_or_default();
        let args = match frame.data {
            Some(Value::Array(args)) => args,
            _ => vec![],
        };
        let id = frame.id;
        let writer = self.writer.clone();
        let peer_service = self.peer_service.clone();
        tokio::spawn(async move {
            match registry.dispatch(&name, args).await {
                Ok(Reply::Value(value)) => {
                    let reply = Frame {
                        kind: FrameKind::ReplyValue,
                        service: peer_service,
                        id,
                        name: None,
                        data: Some(value),
                    };
                    let _ = writer.send(reply).await;
                }
                Ok(Reply::Stream(stream)) => {
                    let opener = Frame {
                        kind: FrameKind::ReplyStream,
                        service: peer_service.clone(),
                        id,
                        name: None,
                        data: None,
                    };
                    if writer.send(opener).await.is_err() {
                        return;
                    }
                    drain_stream_to_frames(stream, id, peer_service, writer).await;
                }
                Err(err) => {
                    let _ = writer.send(error_frame(&peer_service, id, &err)).await;
                }
            }
        });
    }

    /// A reply for an id with no pending request — either a duplicate
    /// reply or one for an id that already completed — is a protocol
    /// error and fatal to the connection (spec §4.1).
    fn complete_single(&self, id: u64, outcome: Result<Reply>) {
        match self.pending.remove(&id) {
            Some((_, Pending::Single(tx))) => {
                let _ = tx.send(outcome);
            }
            None => {
                warn!(id, "reply for unknown or already-completed request id, disconnecting");
                self.disconnect();
            }
        }
    }

    fn complete_stream(&self, id: u64) {
        let (tx, rx) = mpsc::unbounded_channel::<Result<Value>>();
        self.stream_senders.insert(id, tx);
        let stream: ValueStream = Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }));
        match self.pending.remove(&id) {
            Some((_, Pending::Single(tx))) => {
                let _ = tx.send(Ok(Reply::Stream(stream)));
            }
            None => {
                self.stream_senders.remove(&id);
                warn!(id, "REPLY_STREAM for unknown or already-completed request id, disconnecting");
                self.disconnect();
            }
        }
    }

    fn push_stream_item(&self, id: u64, data: Value) {
        if let Some(tx) = self.stream_senders.get(&id) {
            let _ = tx.send(Ok(data));
        }
    }

    fn end_stream(&self, id: u64) {
        self.stream_senders.remove(&id);
    }
}

async fn drain_stream_to_frames(mut stream: ValueStream, id: u64, service: String, writer: mpsc::Sender<Frame>) {
    use futures::StreamExt;
    while let Some(item) = stream.next().await {
        match item {
            Ok(value) => {
                let frame = Frame {
                    kind: FrameKind::StreamOutputData,
                    service: service.clone(),
                    id,
                    name: None,
                    data: Some(value),
                };
                if writer.send(frame).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                let _ = writer.send(error_frame(&service, id, &err)).await;
                return;
            }
        }
    }
    // STREAM_* frames must not carry null data (spec §4.1's validation
    // table applies the non-null rule to all four kinds, including the
    // END markers), so the end-of-stream signal itself is the payload.
    let end = Frame {
        kind: FrameKind::StreamOutputEnd,
        service,
        id,
        name: None,
        data: Some(Value::Bool(true)),
    };
    let _ = writer.send(end).await;
}

fn error_frame(service: &str, id: u64, err: &CoreError) -> Frame {
    let wire = WireError::from(err);
    Frame {
        kind: FrameKind::ReplyError,
        service: service.to_owned(),
        id,
        name: None,
        data: Some(serde_json::to_value(wire).unwrap_or(Value::Null)),
    }
}

fn wire_error_to_core(wire: WireError) -> CoreError {
    match wire.kind.as_str() {
        "NotFound" => CoreError::not_found("remote", wire.message),
        "AlreadyExists" => CoreError::already_exists("remote", wire.message, ""),
        "EntityTooLarge" => CoreError::too_large("remote", 0, 0),
        "TypeError" => CoreError::type_error(wire.message),
        "Auth" => CoreError::Auth { reason: wire.message },
        "Disconnected" => CoreError::Disconnected,
        "InvalidEntity" => CoreError::invalid_entity("remote", wire.message),
        _ => CoreError::assert(wire.message),
    }
}
