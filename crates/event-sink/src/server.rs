//! Event sink server
//!
//! Accepts long-lived TCP streams from machines and feeds every decoded event
//! to an [`EventHandler`]. Each stream runs in its own task; a stream that
//! fails is logged and closed without affecting its siblings.
//!
//! Frames carry a 4-byte big-endian length prefix followed by a JSON event
//! envelope. When the peer half-closes, the server answers with a single
//! [`StreamAck`] frame and closes its side.

use crate::error::{SinkError, StreamError};
use crate::events::EventEnvelope;
use crate::metrics::SinkMetrics;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};
use uuid::Uuid;

pub const DEFAULT_EVENTS_SINK_PORT: u16 = 4002;

/// Largest accepted frame.
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// How long open streams may keep running after shutdown is requested.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Receives every event decoded from any stream.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, envelope: EventEnvelope);
}

/// Server reply sent once the peer has finished sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAck {
    /// Events decoded from the stream
    pub received: u64,
}

/// Codec used on both ends of an event stream.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Keeps the active-stream gauge in step with running stream tasks.
struct ActiveStream(SinkMetrics);

impl ActiveStream {
    fn open(metrics: &SinkMetrics) -> Self {
        metrics.stream_opened();
        Self(metrics.clone())
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.0.stream_closed();
    }
}

pub struct EventSinkServer<H> {
    handler: Arc<H>,
    metrics: SinkMetrics,
    drain_grace: Duration,
    span: Span,
}

impl<H> std::fmt::Debug for EventSinkServer<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSinkServer")
            .field("drain_grace", &self.drain_grace)
            .finish_non_exhaustive()
    }
}

impl<H: EventHandler> EventSinkServer<H> {
    pub fn new(handler: H, metrics: SinkMetrics, span: Span) -> Self {
        Self {
            handler: Arc::new(handler),
            metrics,
            drain_grace: DEFAULT_DRAIN_GRACE,
            span,
        }
    }

    pub fn with_drain_grace(mut self, drain_grace: Duration) -> Self {
        self.drain_grace = drain_grace;
        self
    }

    /// Accept streams on `listener` until `shutdown` fires.
    ///
    /// On shutdown the listener is closed at once and open streams get the
    /// drain grace to finish before they are aborted.
    ///
    /// # Errors
    ///
    /// [`SinkError::ServerStopped`] if shutdown was already requested, or an
    /// IO error if the listener is unusable.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<(), SinkError> {
        if shutdown.is_cancelled() {
            return Err(SinkError::ServerStopped);
        }
        let span = self.span.clone();
        self.accept_loop(listener, shutdown).instrument(span).await
    }

    async fn accept_loop(self, listener: TcpListener, shutdown: CancellationToken) -> Result<(), SinkError> {
        let local = listener.local_addr()?;
        info!(address = %local, "Event sink listening");

        let mut streams = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                Some(joined) = streams.join_next(), if !streams.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Event stream task failed");
                    }
                }

                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        let stream_span = info_span!(
                            parent: &self.span,
                            "stream",
                            peer = %peer,
                            stream_id = %Uuid::new_v4()
                        );
                        streams.spawn(
                            serve_stream(Arc::clone(&self.handler), self.metrics.clone(), socket, peer)
                                .instrument(stream_span),
                        );
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept event stream");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }

        drop(listener);
        info!(open_streams = streams.len(), "Event sink stopping");

        let drained = tokio::time::timeout(self.drain_grace, async {
            while streams.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                open_streams = streams.len(),
                "Drain grace elapsed, closing remaining event streams"
            );
            streams.shutdown().await;
        }

        info!("Event sink stopped");
        Ok(())
    }
}

async fn serve_stream<H: EventHandler>(handler: Arc<H>, metrics: SinkMetrics, socket: TcpStream, peer: SocketAddr) {
    let _active = ActiveStream::open(&metrics);
    debug!(peer = %peer, "Event stream opened");

    match read_events(handler.as_ref(), socket).await {
        Ok(received) => debug!(received, "Event stream closed"),
        Err(e) => {
            metrics.stream_error();
            warn!(error = %e, "Event stream failed");
        }
    }
}

async fn read_events<H: EventHandler>(handler: &H, socket: TcpStream) -> Result<u64, StreamError> {
    let mut framed = Framed::new(socket, frame_codec());
    let mut received = 0u64;

    while let Some(frame) = framed.next().await {
        let frame = frame?;
        let envelope = EventEnvelope::decode(&frame, Utc::now())?;
        received += 1;
        handler.handle(envelope).await;
    }

    let ack = serde_json::to_vec(&StreamAck { received }).map_err(StreamError::Ack)?;
    framed.send(Bytes::from(ack)).await?;
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;
    use std::sync::Mutex;
    use tokio::io::AsyncWriteExt;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, envelope: EventEnvelope) {
            self.0.lock().unwrap().push(envelope.id);
        }
    }

    #[tokio::test]
    async fn test_serve_refuses_to_start_after_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let metrics = SinkMetrics::new(&Registry::new()).unwrap();
        let server = EventSinkServer::new(Recorder::default(), metrics, Span::none());

        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let err = server.serve(listener, shutdown).await.unwrap_err();
        assert!(err.is_benign());
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let metrics = SinkMetrics::new(&Registry::new()).unwrap();
        let server = EventSinkServer::new(Recorder::default(), metrics, Span::none());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server.serve(listener, shutdown.clone()));

        // An acknowledged stream means the accept loop is running
        let mut client = Framed::new(TcpStream::connect(address).await.unwrap(), frame_codec());
        client.get_mut().shutdown().await.unwrap();
        let ack = client.next().await.unwrap().unwrap();
        let ack: StreamAck = serde_json::from_slice(&ack).unwrap();
        assert_eq!(ack, StreamAck { received: 0 });

        shutdown.cancel();
        task.await.unwrap().unwrap();

        assert!(TcpStream::connect(address).await.is_err());
    }

    #[test]
    fn test_codec_rejects_oversized_frames() {
        use bytes::BytesMut;
        use tokio_util::codec::Decoder;

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&((MAX_FRAME_LENGTH as u32) + 1).to_be_bytes());
        assert!(frame_codec().decode(&mut buf).is_err());
    }
}
