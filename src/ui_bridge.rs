use crate::config::Config;
use crate::error::BridgeError;
use crate::state_machine::SessionState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Requests from the UI process.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiRequest {
    Toggle,
    Start,
    Stop,
    Status,
    /// Typed text into the live session
    Say { text: String },
    /// Speak text through the narration voice
    Narrate { text: String },
}

/// Notices sent to the UI process.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiNotice {
    State { active: bool, state: &'static str },
    Error { kind: &'static str, message: String },
    Transcript { role: &'static str, text: String },
    TurnComplete,
}

impl UiNotice {
    pub fn state(state: SessionState) -> Self {
        UiNotice::State {
            active: state.is_active(),
            state: state.as_str(),
        }
    }

    pub fn error(err: &BridgeError) -> Self {
        UiNotice::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

pub enum UiEvent {
    Request(UiRequest),
}

pub struct UiBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
    tx: mpsc::Sender<UiEvent>,
    buffer_size: usize,
}

// UI进程和Core进程通过本地UDP通信，端口在配置中指定
impl UiBridge {
    pub async fn new(config: &Config, tx: mpsc::Sender<UiEvent>) -> anyhow::Result<Self> {
        let socket =
            UdpSocket::bind(format!("{}:{}", config.ui_local_ip, config.ui_local_port)).await?;
        let target_addr = format!("{}:{}", config.ui_remote_ip, config.ui_remote_port);

        Ok(Self {
            socket: Arc::new(socket),
            target_addr,
            tx,
            buffer_size: config.ui_buffer_size,
        })
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let (len, _) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            match serde_json::from_slice::<UiRequest>(&buf[..len]) {
                Ok(request) => {
                    if let Err(e) = self.tx.send(UiEvent::Request(request)).await {
                        log::error!("Failed to send UI event: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("Ignoring invalid UI message: {}", e);
                }
            }
        }
        Ok(())
    }

    pub async fn send_notice(&self, notice: &UiNotice) -> anyhow::Result<()> {
        let msg = serde_json::to_vec(notice)?;
        self.socket.send_to(&msg, &self.target_addr).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_are_parsed_by_type_tag() {
        let parse = |s: &str| serde_json::from_str::<UiRequest>(s).unwrap();
        assert_eq!(parse(r#"{"type":"toggle"}"#), UiRequest::Toggle);
        assert_eq!(parse(r#"{"type":"stop"}"#), UiRequest::Stop);
        assert_eq!(
            parse(r#"{"type":"say","text":"play a scale"}"#),
            UiRequest::Say {
                text: "play a scale".into()
            }
        );
        assert_eq!(
            parse(r#"{"type":"narrate","text":"Bach"}"#),
            UiRequest::Narrate { text: "Bach".into() }
        );
        assert!(serde_json::from_str::<UiRequest>(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn notices_serialize_with_type_tag() {
        let value = serde_json::to_value(UiNotice::state(SessionState::Active)).unwrap();
        assert_eq!(value, json!({"type": "state", "active": true, "state": "active"}));

        let err = BridgeError::Permission("no capture device".into());
        let value = serde_json::to_value(UiNotice::error(&err)).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["kind"], "permission");

        let value = serde_json::to_value(UiNotice::TurnComplete).unwrap();
        assert_eq!(value, json!({"type": "turn_complete"}));
    }

    #[tokio::test]
    async fn datagrams_round_trip_over_loopback() {
        let ui = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let core = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let bridge = Arc::new(UiBridge {
            socket: Arc::new(core),
            target_addr: ui.local_addr().unwrap().to_string(),
            tx,
            buffer_size: 1024,
        });

        let runner = bridge.clone();
        tokio::spawn(async move { runner.run().await });

        let core_addr = bridge.socket.local_addr().unwrap();
        ui.send_to(b"not json", core_addr).await.unwrap();
        ui.send_to(br#"{"type":"toggle"}"#, core_addr).await.unwrap();
        let UiEvent::Request(request) = rx.recv().await.unwrap();
        assert_eq!(request, UiRequest::Toggle);

        bridge
            .send_notice(&UiNotice::state(SessionState::Inactive))
            .await
            .unwrap();
        let mut buf = [0u8; 256];
        let (len, _) = ui.recv_from(&mut buf).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(value["active"], false);
    }
}
