mod audio;
mod config;
mod controller;
mod error;
mod narration;
mod net_link;
mod protocol;
mod state_machine;
mod ui_bridge;

use audio::{AudioSystem, EncodedFrame};
use config::Config;
use controller::{ControllerChannels, CoreController};
use narration::{NarrationOutcome, Narrator};
use net_link::{SessionConfig, SessionEvent, WsConnector};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use ui_bridge::{UiBridge, UiEvent, UiNotice};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Config::new()?;
    if let Err(e) = config.validate() {
        // 缺少 Key 时仍然启动，会话建立时再报告错误
        log::error!("{}", e);
    }
    log::info!(
        "{} v{} starting (model {})",
        env!("APP_NAME"),
        env!("APP_VERSION"),
        config.session_model
    );

    // 创建通道，用于组件间通信
    // 会话事件通道
    let (tx_session_event, mut rx_session_event) = mpsc::channel::<SessionEvent>(256);

    // 麦克风编码帧通道
    let (tx_frame, mut rx_frame) = mpsc::channel::<EncodedFrame>(64);

    // UI 请求和通知通道
    let (tx_ui_event, mut rx_ui_event) = mpsc::channel::<UiEvent>(32);
    let (tx_ui_notice, mut rx_ui_notice) = mpsc::channel::<UiNotice>(64);

    // 朗读结果通道
    let (tx_narration, mut rx_narration) = mpsc::channel::<NarrationOutcome>(4);

    // 启动UI桥，与UI进程通信
    let ui_bridge = Arc::new(UiBridge::new(&config, tx_ui_event).await?);
    let ui_bridge_clone = ui_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = ui_bridge_clone.run().await {
            log::error!("UiBridge error: {}", e);
        }
    });

    // 通知转发任务，UI 不在线时发送失败只记录日志
    tokio::spawn(async move {
        while let Some(notice) = rx_ui_notice.recv().await {
            if let Err(e) = ui_bridge.send_notice(&notice).await {
                log::warn!("Failed to send notice to UI: {}", e);
            }
        }
    });

    let narrator = if config.api_key.is_empty() {
        None
    } else {
        Some(Arc::new(Narrator::new(&config)))
    };

    let mut controller = CoreController::new(
        AudioSystem::new(config.audio_config()),
        WsConnector::new(SessionConfig::from(&config)),
        narrator,
        ControllerChannels {
            session_tx: tx_session_event,
            frame_tx: tx_frame,
            ui_tx: tx_ui_notice,
            narration_tx: tx_narration,
        },
    );

    log::info!("Bridge ready. State: {:?}", controller.state());

    // 主事件循环，所有会话状态只在这里修改
    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                controller.stop().await;
                break;
            }

            // 会话事件
            Some(event) = rx_session_event.recv() => {
                controller.handle_session_event(event).await;
            }

            // 麦克风数据，按采集顺序转发给会话
            Some(frame) = rx_frame.recv() => {
                controller.handle_captured_frame(frame).await;
            }

            // UI 请求
            Some(event) = rx_ui_event.recv() => {
                controller.handle_ui_event(event).await;
            }

            // 朗读完成
            Some(outcome) = rx_narration.recv() => {
                controller.handle_narration(outcome).await;
            }
        }
    }

    log::info!("Stopped. Final state: {}", controller.state().as_str());
    Ok(())
}
