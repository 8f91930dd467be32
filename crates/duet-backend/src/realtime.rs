use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use duet_types::events::{ClientFrame, RealtimeEvent, ServerFrame};

use crate::config::BackendConfig;
use crate::error::{BackendError, Result};

/// The server drops sockets that stay silent for too long; a ping every
/// 20 seconds keeps ours open.
const PING_INTERVAL: Duration = Duration::from_secs(20);

/// Events buffered between the socket reader and the consumer.
const EVENT_BUFFER: usize = 256;

/// A live change feed. Events arrive in delivery order; the feed ends
/// (`next()` returns `None`) when the connection closes. Dropping the
/// subscription stops the reader task.
pub struct Subscription {
    channel: String,
    rx: mpsc::Receiver<RealtimeEvent>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Wrap a reader task that feeds `rx`.
    pub fn from_parts(channel: String, rx: mpsc::Receiver<RealtimeEvent>, task: JoinHandle<()>) -> Self {
        Self { channel, rx, task }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn next(&mut self) -> Option<RealtimeEvent> {
        self.rx.recv().await
    }

    /// Take an already-delivered event without waiting.
    pub fn try_next(&mut self) -> Option<RealtimeEvent> {
        self.rx.try_recv().ok()
    }

    pub fn close(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
        debug!("Subscription to {} closed", self.channel);
    }
}

/// Open the realtime socket for one channel. `cookies` carries the account
/// session so that permission-filtered documents are delivered.
pub async fn connect(config: &BackendConfig, channel: String, cookies: Option<String>) -> Result<Subscription> {
    let url = config.realtime_url(&[channel.as_str()]);
    let mut request = url.as_str().into_client_request()?;
    if let Some(cookies) = cookies {
        let value = HeaderValue::from_str(&cookies)
            .map_err(|e| BackendError::InvalidRequest(format!("session cookie: {}", e)))?;
        request.headers_mut().insert(COOKIE, value);
    }

    let (socket, _) = connect_async(request).await?;
    info!("Realtime connected to {}", channel);

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let task = tokio::spawn(run_socket(socket, tx, channel.clone()));
    Ok(Subscription::from_parts(channel, rx, task))
}

async fn run_socket(
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    tx: mpsc::Sender<RealtimeEvent>,
    channel: String,
) {
    let (mut sink, mut stream) = socket.split();

    let ping = match serde_json::to_string(&ClientFrame::Ping) {
        Ok(ping) => ping,
        Err(e) => {
            warn!("Cannot encode ping frame: {}", e);
            return;
        }
    };

    let mut heartbeat = tokio::time::interval(PING_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            frame = stream.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("Realtime socket error on {}: {}", channel, e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => match serde_json::from_str::<ServerFrame>(text.as_str()) {
                        Ok(ServerFrame::Event(event)) => {
                            if tx.send(event).await.is_err() {
                                // Consumer is gone
                                break;
                            }
                        }
                        Ok(ServerFrame::Connected(_)) => debug!("Realtime handshake accepted for {}", channel),
                        Ok(ServerFrame::Error(e)) => warn!("Realtime error {}: {}", e.code, e.message),
                        Ok(ServerFrame::Response(_)) => trace!("Realtime pong"),
                        Err(e) => debug!("Ignoring unrecognised realtime frame: {}", e),
                    },
                    Message::Close(frame) => {
                        info!("Realtime socket closed by server: {:?}", frame);
                        break;
                    }
                    _ => {}
                }
            }
            _ = heartbeat.tick() => {
                if sink.send(Message::Text(ping.clone().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    debug!("Realtime reader for {} finished", channel);
}
