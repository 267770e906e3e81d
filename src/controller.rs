use crate::audio::{pcm, AudioEngine, EncodedFrame};
use crate::error::{BridgeError, Result};
use crate::narration::{NarrationOutcome, Narrator};
use crate::net_link::{LiveConnector, NetCommand, NetEvent, SessionEvent, SessionId};
use crate::protocol::Blob;
use crate::state_machine::SessionState;
use crate::ui_bridge::{UiEvent, UiNotice, UiRequest};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

struct ActiveSession {
    id: SessionId,
    cmd_tx: mpsc::Sender<NetCommand>,
}

/// Channels the controller writes to.
pub struct ControllerChannels {
    /// Events of every session, tagged with their session id
    pub session_tx: mpsc::Sender<SessionEvent>,
    /// Encoded microphone frames
    pub frame_tx: mpsc::Sender<EncodedFrame>,
    /// Notices for the UI
    pub ui_tx: mpsc::Sender<UiNotice>,
    /// Finished narration audio
    pub narration_tx: mpsc::Sender<NarrationOutcome>,
}

/// Owns the live session lifecycle. All state lives here and is only
/// touched from the main event loop.
pub struct CoreController<E: AudioEngine, C: LiveConnector> {
    state: SessionState,
    session: Option<ActiveSession>,
    engine: E,
    connector: C,
    narrator: Option<Arc<Narrator>>,
    /// Generation of the narration request still in flight
    narration_in_flight: Option<u64>,
    /// Bumped on every stop; older narration results are discarded
    generation: u64,
    channels: ControllerChannels,
}

impl<E: AudioEngine, C: LiveConnector> CoreController<E, C> {
    pub fn new(
        engine: E,
        connector: C,
        narrator: Option<Arc<Narrator>>,
        channels: ControllerChannels,
    ) -> Self {
        Self {
            state: SessionState::Inactive,
            session: None,
            engine,
            connector,
            narrator,
            narration_in_flight: None,
            generation: 0,
            channels,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub async fn toggle(&mut self) {
        if self.state == SessionState::Inactive {
            self.start().await;
        } else {
            self.stop().await;
        }
    }

    pub async fn start(&mut self) {
        if self.state != SessionState::Inactive {
            return;
        }
        self.set_state(SessionState::Connecting).await;

        let id = Uuid::new_v4();
        log::info!("Starting live session {}", id);
        match self
            .connector
            .open(id, self.channels.session_tx.clone())
            .await
        {
            Ok(cmd_tx) => {
                self.session = Some(ActiveSession { id, cmd_tx });
            }
            Err(e) => self.fail(e).await,
        }
    }

    /// Close the session and release the audio devices. Safe to call in any
    /// state.
    pub async fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            log::info!("Stopping live session {}", session.id);
            // 队列满时直接丢弃发送端，会话任务读完队列后同样会关闭
            if let Err(e) = session.cmd_tx.try_send(NetCommand::Close) {
                log::debug!("Close not queued for session {}: {}", session.id, e);
            }
        }
        if self.engine.is_capturing() || self.engine.is_playing() {
            log::info!("Releasing audio devices");
            self.engine.stop();
        }
        self.generation += 1;
        if self.state != SessionState::Inactive {
            self.set_state(SessionState::Inactive).await;
        }
    }

    /// Terminal failure: report it, tear the session down, no retry.
    async fn fail(&mut self, err: BridgeError) {
        log::error!("Live session failed: {}", err);
        self.notify(UiNotice::error(&err)).await;
        self.stop().await;
    }

    async fn set_state(&mut self, state: SessionState) {
        self.state = state;
        log::info!("Session state: {:?}", state);
        self.notify(UiNotice::state(state)).await;
    }

    async fn notify(&self, notice: UiNotice) {
        if let Err(e) = self.channels.ui_tx.send(notice).await {
            log::warn!("Failed to queue UI notice: {}", e);
        }
    }

    fn is_current(&self, id: SessionId) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == id)
    }

    pub async fn handle_session_event(&mut self, event: SessionEvent) {
        if !self.is_current(event.session) {
            log::debug!("Ignoring event from stale session {}: {:?}", event.session, event.event);
            return;
        }

        match event.event {
            NetEvent::Opened => self.on_opened().await,
            NetEvent::Ready => log::info!("Session setup complete"),
            NetEvent::Audio(blob) => self.play_segment(blob),
            NetEvent::Interrupted => {
                log::info!("Model interrupted, flushing playback");
                self.engine.interrupt();
            }
            NetEvent::Transcript { speaker, text } => {
                log::info!("{}: {}", speaker.as_str(), text);
                self.notify(UiNotice::Transcript {
                    role: speaker.as_str(),
                    text,
                })
                .await;
            }
            NetEvent::TurnComplete => self.notify(UiNotice::TurnComplete).await,
            NetEvent::GoAway(time_left) => {
                log::warn!("Server will end the session soon (time left: {:?})", time_left);
            }
            NetEvent::Closed(reason) => {
                log::info!("Session closed: {:?}", reason);
                self.session = None;
                self.stop().await;
            }
            NetEvent::Error(message) => {
                self.session = None;
                self.fail(BridgeError::Transport(message)).await;
            }
        }
    }

    // 套接字打开后立即开始采集，帧在会话命令通道中排队
    async fn on_opened(&mut self) {
        if self.state != SessionState::Connecting {
            return;
        }
        if let Err(e) = self.engine.start_playback() {
            self.fail(e).await;
            return;
        }
        if let Err(e) = self.engine.start_capture(self.channels.frame_tx.clone()) {
            self.fail(e).await;
            return;
        }
        self.set_state(SessionState::Active).await;
    }

    fn play_segment(&mut self, blob: Blob) {
        // 格式错误的音频段直接丢弃
        let samples = match pcm::decode_segment(&blob.data) {
            Ok(samples) if !samples.is_empty() => samples,
            Ok(_) => return,
            Err(e) => {
                log::debug!("Dropping output segment ({}): {}", blob.mime_type, e);
                return;
            }
        };
        if let Err(e) = self.engine.enqueue(samples) {
            log::warn!("Failed to schedule output segment: {}", e);
        }
    }

    /// Forward a captured frame to the live session, in capture order.
    pub async fn handle_captured_frame(&mut self, frame: EncodedFrame) {
        let Some(session) = &self.session else {
            return;
        };
        if self.state != SessionState::Active {
            return;
        }
        // 主循环不能等待会话任务，否则双方可能互相阻塞
        match session.cmd_tx.try_send(NetCommand::SendAudio(frame)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!("Session {} is not keeping up, dropping captured frame", session.id);
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("Session {} no longer accepts audio", session.id);
            }
        }
    }

    pub async fn handle_ui_event(&mut self, event: UiEvent) {
        let UiEvent::Request(request) = event;
        log::info!("UI request: {:?}", request);
        match request {
            UiRequest::Toggle => self.toggle().await,
            UiRequest::Start => self.start().await,
            UiRequest::Stop => self.stop().await,
            UiRequest::Status => self.notify(UiNotice::state(self.state)).await,
            UiRequest::Say { text } => match &self.session {
                Some(session) if self.state.is_active() => {
                    if let Err(e) = session.cmd_tx.try_send(NetCommand::SendText(text)) {
                        log::warn!("Session {} did not take typed text: {}", session.id, e);
                    }
                }
                _ => {
                    let err = BridgeError::Transport("no active session".to_string());
                    self.notify(UiNotice::error(&err)).await;
                }
            },
            UiRequest::Narrate { text } => self.narrate(text).await,
        }
    }

    // 朗读只在会话进行时播放，借用会话的播放设备
    async fn narrate(&mut self, text: String) {
        if self.narration_in_flight.is_some() {
            log::info!("Narration already in progress, ignoring request");
            return;
        }
        if !self.state.is_active() {
            let err = BridgeError::Audio("narration needs an active session".to_string());
            self.notify(UiNotice::error(&err)).await;
            return;
        }
        let Some(narrator) = self.narrator.clone() else {
            log::warn!("Narration is not configured");
            return;
        };
        let generation = self.generation;
        self.narration_in_flight = Some(generation);
        let tx = self.channels.narration_tx.clone();
        tokio::spawn(async move {
            let result = narrator.synthesize(&text).await;
            let _ = tx.send(NarrationOutcome { generation, result }).await;
        });
    }

    pub async fn handle_narration(&mut self, outcome: NarrationOutcome) {
        self.narration_in_flight = None;
        if outcome.generation != self.generation {
            log::debug!("Dropping narration from a stopped session");
            return;
        }
        let samples = match outcome.result {
            Ok(samples) if samples.is_empty() => return,
            Ok(samples) => samples,
            Err(e) => {
                log::error!("Narration failed: {}", e);
                self.notify(UiNotice::error(&e)).await;
                return;
            }
        };
        if let Err(e) = self.engine.enqueue(samples) {
            log::error!("Narration playback failed: {}", e);
            self.notify(UiNotice::error(&e)).await;
        }
    }
}
