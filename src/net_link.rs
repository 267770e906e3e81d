use crate::audio::EncodedFrame;
use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::protocol::{
    self, Blob, ClientContentMessage, RealtimeInputMessage, ServerEvent, SetupMessage, Speaker,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;
use uuid::Uuid;

/// Identifies one live session; events from older sessions are ignored.
pub type SessionId = Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum NetEvent {
    /// Socket is up and the setup message has been sent
    Opened,
    /// Server acknowledged the setup
    Ready,
    Audio(Blob),
    Interrupted,
    Transcript { speaker: Speaker, text: String },
    TurnComplete,
    GoAway(Option<String>),
    /// Session ended normally (server or client close)
    Closed(Option<String>),
    /// Session ended with a transport failure
    Error(String),
}

impl From<ServerEvent> for NetEvent {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::SetupComplete => NetEvent::Ready,
            ServerEvent::Audio(blob) => NetEvent::Audio(blob),
            ServerEvent::Interrupted => NetEvent::Interrupted,
            ServerEvent::Transcript { speaker, text } => NetEvent::Transcript { speaker, text },
            ServerEvent::TurnComplete => NetEvent::TurnComplete,
            ServerEvent::GoAway(time_left) => NetEvent::GoAway(time_left),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session: SessionId,
    pub event: NetEvent,
}

#[derive(Debug)]
pub enum NetCommand {
    SendAudio(EncodedFrame),
    SendText(String),
    Close,
}

/// Parameters needed to open a live session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ws_url: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            ws_url: config.ws_url.to_string(),
            api_key: config.api_key.clone(),
            model: config.session_model.to_string(),
            voice: config.session_voice.to_string(),
            system_instruction: config.system_instruction.to_string(),
        }
    }
}

impl SessionConfig {
    /// Websocket URL with the API key as query parameter.
    pub fn session_url(&self) -> Result<Url> {
        Url::parse_with_params(&self.ws_url, &[("key", self.api_key.as_str())])
            .map_err(|e| BridgeError::Transport(format!("invalid ws_url: {}", e)))
    }
}

/// Opens live sessions. Returns the command channel of the new session;
/// everything the session produces is sent to `events` tagged with `session`.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn open(
        &self,
        session: SessionId,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<mpsc::Sender<NetCommand>>;
}

/// Websocket implementation of `LiveConnector`.
pub struct WsConnector {
    config: SessionConfig,
}

impl WsConnector {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LiveConnector for WsConnector {
    async fn open(
        &self,
        session: SessionId,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<mpsc::Sender<NetCommand>> {
        // 提前检查URL，避免启动任务后才失败
        self.config.session_url()?;

        let (tx_cmd, rx_cmd) = mpsc::channel::<NetCommand>(100);
        let net_link = NetLink::new(session, self.config.clone(), events, rx_cmd);
        tokio::spawn(async move {
            net_link.run().await;
        });
        Ok(tx_cmd)
    }
}

pub struct NetLink {
    session: SessionId,
    config: SessionConfig,
    tx: mpsc::Sender<SessionEvent>,
    rx_cmd: mpsc::Receiver<NetCommand>,
}

impl NetLink {
    pub fn new(
        session: SessionId,
        config: SessionConfig,
        tx: mpsc::Sender<SessionEvent>,
        rx_cmd: mpsc::Receiver<NetCommand>,
    ) -> Self {
        Self {
            session,
            config,
            tx,
            rx_cmd,
        }
    }

    // 会话结束后不重连，由用户手动重新开始
    pub async fn run(mut self) {
        let event = match self.connect_and_loop().await {
            Ok(reason) => NetEvent::Closed(reason),
            Err(e) => {
                log::error!("Live session {} failed: {:#}", self.session, e);
                NetEvent::Error(format!("{:#}", e))
            }
        };
        let _ = self.emit(event).await;
    }

    async fn emit(&self, event: NetEvent) -> anyhow::Result<()> {
        self.tx
            .send(SessionEvent {
                session: self.session,
                event,
            })
            .await?;
        Ok(())
    }

    // 进入连接和主循环，处理WebSocket消息和发送命令
    async fn connect_and_loop(&mut self) -> anyhow::Result<Option<String>> {
        let url = self.config.session_url()?;

        log::info!(
            "Session {}: connecting to {} (model {})",
            self.session,
            url.host_str().unwrap_or("?"),
            self.config.model
        );
        let (ws_stream, _) = connect_async(url.as_str()).await?;

        let (mut write, mut read) = ws_stream.split();

        // 第一条消息必须是 setup
        let setup = SetupMessage::audio(
            &self.config.model,
            &self.config.voice,
            &self.config.system_instruction,
        );
        let setup_json = serde_json::to_string(&setup)?;
        log::debug!("Sending setup: {}", setup_json);
        write.send(Message::Text(setup_json.into())).await?;

        self.emit(NetEvent::Opened).await?;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(msg)) => {
                            match msg {
                                Message::Text(text) => self.dispatch(text.as_bytes()).await?,
                                // 服务端的 JSON 也可能以二进制帧下发
                                Message::Binary(data) => self.dispatch(&data).await?,
                                Message::Close(frame) => {
                                    log::info!("Server closed session {}: {:?}", self.session, frame);
                                    return Ok(frame.map(|f| f.reason.as_str().to_string()));
                                }
                                _ => {}
                            }
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(None),
                    }
                }
                cmd = self.rx_cmd.recv() => {
                    match cmd {
                        Some(NetCommand::SendAudio(frame)) => {
                            log::trace!("Sending {} captured samples", frame.sample_count);
                            let json = serde_json::to_string(&RealtimeInputMessage::from(frame))?;
                            write.send(Message::Text(json.into())).await?;
                        }
                        Some(NetCommand::SendText(text)) => {
                            let json = serde_json::to_string(&ClientContentMessage::user_text(&text))?;
                            write.send(Message::Text(json.into())).await?;
                        }
                        Some(NetCommand::Close) | None => {
                            log::info!("Closing session {}", self.session);
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(Some("closed by client".to_string()));
                        }
                    }
                }
            }
        }
    }

    async fn dispatch(&self, raw: &[u8]) -> anyhow::Result<()> {
        match protocol::parse_server_frame(raw) {
            Some(events) => {
                for event in events {
                    self.emit(event.into()).await?;
                }
            }
            None => log::debug!("Ignoring non-JSON frame ({} bytes)", raw.len()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_config(ws_url: &str) -> SessionConfig {
        SessionConfig {
            ws_url: ws_url.to_string(),
            api_key: "k3y/+".to_string(),
            model: "models/live".to_string(),
            voice: "Kore".to_string(),
            system_instruction: String::new(),
        }
    }

    #[test]
    fn session_url_carries_encoded_key() {
        let url = session_config("wss://example.com/ws/live").session_url().unwrap();
        assert_eq!(url.as_str(), "wss://example.com/ws/live?key=k3y%2F%2B");
    }

    #[tokio::test]
    async fn invalid_url_is_a_transport_error() {
        let connector = WsConnector::new(session_config("not a url"));
        let (tx, _rx) = mpsc::channel(1);
        let err = connector.open(Uuid::new_v4(), tx).await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
    }

    #[test]
    fn server_events_map_to_net_events() {
        assert_eq!(NetEvent::from(ServerEvent::SetupComplete), NetEvent::Ready);
        assert_eq!(NetEvent::from(ServerEvent::Interrupted), NetEvent::Interrupted);
        assert_eq!(
            NetEvent::from(ServerEvent::GoAway(None)),
            NetEvent::GoAway(None)
        );
    }

    #[tokio::test]
    async fn unreachable_server_reports_error_once() {
        // nothing listens on port 9 locally
        let config = session_config("ws://127.0.0.1:9/live");
        let (tx, mut rx) = mpsc::channel(4);
        let (_cmd_tx, cmd_rx) = mpsc::channel(1);
        let session = Uuid::new_v4();
        NetLink::new(session, config, tx, cmd_rx).run().await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.session, session);
        assert!(matches!(event.event, NetEvent::Error(_)));
        assert!(rx.try_recv().is_err());
    }
}
