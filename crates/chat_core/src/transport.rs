use std::{sync::Arc, time::Duration};

use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use shared::{
    domain::Participant,
    protocol::{ClientFrame, ServerFrame},
};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);
const FRAME_BUFFER: usize = 256;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    Idle,
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Error)]
pub enum PushChannelError {
    #[error("server url must start with http:// or https://, got '{0}'")]
    UnsupportedScheme(String),
}

/// One push-channel connection, exclusively owned, keyed by the participant
/// identity it was constructed with. Identity changes mean disposing this
/// channel and constructing a new one; a live socket is never migrated.
pub struct PushChannel {
    endpoint: String,
    participant: Participant,
    reconnect_delay: Duration,
    inner: Mutex<ChannelState>,
    frames: broadcast::Sender<ServerFrame>,
}

struct ChannelState {
    phase: ChannelPhase,
    should_reconnect: bool,
    writer: Option<WsSink>,
    reader_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
}

impl PushChannel {
    pub fn new(server_url: &str, participant: Participant) -> Result<Arc<Self>, PushChannelError> {
        Self::new_with_reconnect_delay(server_url, participant, RECONNECT_DELAY)
    }

    pub fn new_with_reconnect_delay(
        server_url: &str,
        participant: Participant,
        reconnect_delay: Duration,
    ) -> Result<Arc<Self>, PushChannelError> {
        let endpoint = push_endpoint(server_url)?;
        let (frames, _) = broadcast::channel(FRAME_BUFFER);
        Ok(Arc::new(Self {
            endpoint,
            participant,
            reconnect_delay,
            inner: Mutex::new(ChannelState {
                phase: ChannelPhase::Idle,
                should_reconnect: true,
                writer: None,
                reader_task: None,
                reconnect_task: None,
            }),
            frames,
        }))
    }

    /// Decoded inbound frames. Malformed frames never reach subscribers.
    pub fn subscribe_frames(&self) -> broadcast::Receiver<ServerFrame> {
        self.frames.subscribe()
    }

    pub async fn phase(&self) -> ChannelPhase {
        self.inner.lock().await.phase
    }

    /// Opens the channel and registers this participant. No-op while a
    /// connection is already open or being opened, so repeated calls never
    /// produce a second socket or a duplicate registration frame. Failures
    /// are logged, not returned; a failed attempt feeds the retry cycle.
    pub async fn connect(self: &Arc<Self>) {
        {
            let mut state = self.inner.lock().await;
            match state.phase {
                ChannelPhase::Open | ChannelPhase::Connecting => return,
                ChannelPhase::Idle | ChannelPhase::Closed => {
                    state.phase = ChannelPhase::Connecting;
                }
            }
        }

        let stream = match connect_async(&self.endpoint).await {
            Ok((stream, _)) => stream,
            Err(err) => {
                warn!(endpoint = %self.endpoint, "push channel connect failed: {err}");
                let mut state = self.inner.lock().await;
                if state.phase == ChannelPhase::Connecting {
                    state.phase = ChannelPhase::Closed;
                    self.schedule_reconnect(&mut state);
                }
                return;
            }
        };

        let (mut writer, reader) = stream.split();

        let mut state = self.inner.lock().await;
        if state.phase != ChannelPhase::Connecting || !state.should_reconnect {
            // disconnect() won the race against the dial; drop the socket
            // without registering.
            if state.phase == ChannelPhase::Connecting {
                state.phase = ChannelPhase::Idle;
            }
            return;
        }

        let register = ClientFrame::Register {
            user_id: self.participant.user_id.clone(),
            user_type: self.participant.kind,
        };
        let payload = match serde_json::to_string(&register) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("failed to encode registration frame: {err}");
                state.phase = ChannelPhase::Closed;
                self.schedule_reconnect(&mut state);
                return;
            }
        };
        if let Err(err) = writer.send(Message::Text(payload)).await {
            warn!(endpoint = %self.endpoint, "push channel registration failed: {err}");
            state.phase = ChannelPhase::Closed;
            self.schedule_reconnect(&mut state);
            return;
        }

        state.writer = Some(writer);
        state.phase = ChannelPhase::Open;
        state.reader_task = Some(self.spawn_reader(reader));
        info!(
            endpoint = %self.endpoint,
            user_id = %self.participant.user_id,
            user_type = self.participant.kind.as_str(),
            "push channel open"
        );
    }

    /// Tears the channel down and disarms reconnection. Idempotent. Pending
    /// reconnect timers and the reader task are aborted so no late callback
    /// fires after this returns.
    pub async fn disconnect(&self) {
        let mut state = self.inner.lock().await;
        state.should_reconnect = false;
        if let Some(task) = state.reconnect_task.take() {
            task.abort();
        }
        if let Some(task) = state.reader_task.take() {
            task.abort();
        }
        if let Some(mut writer) = state.writer.take() {
            let _ = writer.close().await;
        }
        state.phase = ChannelPhase::Idle;
    }

    /// Re-arms reconnection and connects. Entry point for recovering after an
    /// explicit teardown.
    pub async fn reconnect(self: &Arc<Self>) {
        {
            let mut state = self.inner.lock().await;
            state.should_reconnect = true;
        }
        self.connect().await;
    }

    /// Fire-and-forget send. Dropped silently unless the channel is open; all
    /// state-changing traffic goes through the mutation gateway instead.
    pub async fn send_frame(&self, frame: &ClientFrame) {
        let payload = match serde_json::to_string(frame) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("failed to encode outbound frame: {err}");
                return;
            }
        };

        let mut state = self.inner.lock().await;
        if state.phase != ChannelPhase::Open {
            debug!("push channel not open; dropping outbound frame");
            return;
        }
        if let Some(writer) = state.writer.as_mut() {
            if let Err(err) = writer.send(Message::Text(payload)).await {
                warn!("push channel send failed: {err}");
            }
        }
    }

    fn spawn_reader(self: &Arc<Self>, mut reader: WsSource) -> JoinHandle<()> {
        let channel = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(message) = reader.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(frame) => {
                            let _ = channel.frames.send(frame);
                        }
                        Err(err) => {
                            warn!("discarding malformed push frame: {err}");
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!("push channel receive failed: {err}");
                        break;
                    }
                }
            }

            let mut state = channel.inner.lock().await;
            state.writer = None;
            state.reader_task = None;
            if state.should_reconnect {
                state.phase = ChannelPhase::Closed;
                channel.schedule_reconnect(&mut state);
            }
        })
    }

    fn schedule_reconnect(self: &Arc<Self>, state: &mut ChannelState) {
        let channel = Arc::clone(self);
        state.reconnect_task = Some(tokio::spawn(async move {
            tokio::time::sleep(channel.reconnect_delay).await;
            // Re-check at fire time: a disconnect() issued while this timer
            // was pending must suppress the attempt.
            let armed = { channel.inner.lock().await.should_reconnect };
            if armed {
                channel.connect().await;
            }
        }));
    }
}

fn push_endpoint(server_url: &str) -> Result<String, PushChannelError> {
    let ws_url = if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(PushChannelError::UnsupportedScheme(server_url.to_string()));
    };
    Ok(format!("{}/ws", ws_url.trim_end_matches('/')))
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
