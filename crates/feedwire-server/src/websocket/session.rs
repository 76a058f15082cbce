//! WebSocket session lifecycle: handles a single connected client from
//! upgrade through disconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use feedwire_hub::{ChannelTransport, Hub, SessionClass};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::ConnectionSlot;
use crate::metrics::{WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// Per-connection timing and buffering.
#[derive(Clone, Copy, Debug)]
pub struct SessionOptions {
    /// Interval between server pings.
    pub heartbeat_interval: Duration,
    /// Close after this long without any frame from the client.
    pub heartbeat_timeout: Duration,
    /// Outbound frames buffered before deliveries fail.
    pub send_buffer: usize,
}

impl SessionOptions {
    /// Missed heartbeat ticks tolerated before the connection is dropped.
    fn max_missed(&self) -> u32 {
        let interval = self.heartbeat_interval.as_secs().max(1);
        u32::try_from((self.heartbeat_timeout.as_secs() / interval).max(1)).unwrap_or(u32::MAX)
    }
}

/// Run a WebSocket session for a connected client.
///
/// 1. Registers a [`ChannelTransport`] with the hub
/// 2. Forwards hub frames to the socket and pings every heartbeat interval
/// 3. Hands inbound text frames to [`Hub::handle_text`]
/// 4. Ends when the client closes, stops answering, or the hub closes the
///    transport (reaper or shutdown), then disconnects from the hub
#[instrument(skip_all, fields(session_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    hub: Arc<Hub>,
    class: SessionClass,
    options: SessionOptions,
    slot: ConnectionSlot,
) {
    let (transport, frames, closed) = ChannelTransport::channel(options.send_buffer);
    let id = match hub.connect(Arc::new(transport), class) {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "refusing session");
            let mut ws = ws;
            let _ = ws.send(Message::Close(None)).await;
            return;
        }
    };
    let _ = tracing::Span::current().record("session_id", tracing::field::display(&id));

    let started = Instant::now();
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    info!(class = class.as_str(), "client connected");

    let (ws_tx, mut ws_rx) = ws.split();
    let alive = Arc::new(AtomicBool::new(true));
    let mut outbound = tokio::spawn(forward_outbound(
        ws_tx,
        frames,
        closed.clone(),
        Arc::clone(&alive),
        options,
    ));
    let mut outbound_done = false;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(t))) => t.as_str().to_owned(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(s) => s,
                        Err(_) => {
                            debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        alive.store(true, Ordering::Relaxed);
                        let _ = hub.touch(&id);
                        continue;
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("client sent close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket read error");
                        break;
                    }
                    None => break,
                };
                alive.store(true, Ordering::Relaxed);
                let _ = hub.handle_text(&id, &text).await;
            }
            () = closed.cancelled() => {
                debug!("transport closed by hub");
                break;
            }
            _ = &mut outbound => {
                outbound_done = true;
                break;
            }
        }
    }

    let _ = hub.disconnect(&id);
    closed.cancel();
    if !outbound_done && tokio::time::timeout(Duration::from_secs(1), &mut outbound).await.is_err() {
        outbound.abort();
    }

    info!("client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    drop(slot);
}

/// Write hub frames and heartbeat pings to the socket until the transport
/// is closed, the socket fails, or the client misses too many heartbeats.
async fn forward_outbound(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<Arc<String>>,
    closed: CancellationToken,
    alive: Arc<AtomicBool>,
    options: SessionOptions,
) {
    let mut ping_interval = tokio::time::interval(options.heartbeat_interval);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;
    let max_missed = options.max_missed();
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                if ws_tx.send(Message::Text(String::clone(&frame).into())).await.is_err() {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if alive.swap(false, Ordering::Relaxed) {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        warn!(missed, "client unresponsive, disconnecting");
                        break;
                    }
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            () = closed.cancelled() => {
                // Flush what the hub already queued, then close.
                while let Ok(frame) = frames.try_recv() {
                    if ws_tx.send(Message::Text(String::clone(&frame).into())).await.is_err() {
                        return;
                    }
                }
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }
}
