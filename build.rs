use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    ui: Ui,
    network: Network,
    session: Session,
    audio: Audio,
    narration: Narration,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Ui {
    local_port: u16,
    remote_port: u16,
    local_ip: String,
    remote_ip: String,
    buffer_size: usize,
}

#[derive(Deserialize)]
struct Network {
    ws_url: String,
    api_base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct Session {
    model: String,
    voice: String,
    system_instruction: String,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
    input_sample_rate: u32,
    output_sample_rate: u32,
    chunk_size: usize,
    playback_period_size: usize,
}

#[derive(Deserialize)]
struct Narration {
    model: String,
    voice: String,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 应用信息
    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // UI 配置
    println!("cargo:rustc-env=UI_LOCAL_PORT={}", config.ui.local_port);
    println!("cargo:rustc-env=UI_REMOTE_PORT={}", config.ui.remote_port);
    println!("cargo:rustc-env=UI_LOCAL_IP={}", config.ui.local_ip);
    println!("cargo:rustc-env=UI_REMOTE_IP={}", config.ui.remote_ip);
    println!("cargo:rustc-env=UI_BUFFER_SIZE={}", config.ui.buffer_size);

    // 网络配置
    println!("cargo:rustc-env=WS_URL={}", config.network.ws_url);
    println!("cargo:rustc-env=API_BASE_URL={}", config.network.api_base_url);
    println!("cargo:rustc-env=API_KEY={}", config.network.api_key);

    // 会话配置
    println!("cargo:rustc-env=SESSION_MODEL={}", config.session.model);
    println!("cargo:rustc-env=SESSION_VOICE={}", config.session.voice);
    println!(
        "cargo:rustc-env=SESSION_SYSTEM_INSTRUCTION={}",
        config.session.system_instruction
    );

    // 音频配置
    println!("cargo:rustc-env=AUDIO_CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=AUDIO_INPUT_SAMPLE_RATE={}", config.audio.input_sample_rate);
    println!("cargo:rustc-env=AUDIO_OUTPUT_SAMPLE_RATE={}", config.audio.output_sample_rate);
    println!("cargo:rustc-env=AUDIO_CHUNK_SIZE={}", config.audio.chunk_size);
    println!(
        "cargo:rustc-env=AUDIO_PLAYBACK_PERIOD_SIZE={}",
        config.audio.playback_period_size
    );

    // 朗读配置
    println!("cargo:rustc-env=NARRATION_MODEL={}", config.narration.model);
    println!("cargo:rustc-env=NARRATION_VOICE={}", config.narration.voice);
}
