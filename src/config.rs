use crate::audio::AudioConfig;
use crate::error::{BridgeError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    // UI进程配置
    pub ui_local_port: u16,
    pub ui_remote_port: u16,
    pub ui_local_ip: &'static str,
    pub ui_remote_ip: &'static str,
    pub ui_buffer_size: usize,

    // 网络配置（静态部分）
    pub ws_url: &'static str,
    pub api_base_url: &'static str,

    // API Key（动态部分，可被 GEMINI_API_KEY 覆盖）
    pub api_key: String,

    // 实时会话参数
    pub session_model: &'static str,
    pub session_voice: &'static str,
    pub system_instruction: &'static str,

    // 音频参数
    pub capture_device: &'static str,
    pub playback_device: &'static str,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub chunk_size: usize,
    pub playback_period_size: usize,

    // 朗读参数
    pub narration_model: &'static str,
    pub narration_voice: &'static str,
}

fn parse<T: std::str::FromStr>(value: &str, name: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| BridgeError::Config(format!("Failed to parse {}", name)))
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取，只有 API Key 可以在运行时覆盖
    pub fn new() -> Result<Self> {
        let api_key = match std::env::var("GEMINI_API_KEY") {
            Ok(key) if !key.trim().is_empty() => key.trim().to_string(),
            _ => env!("API_KEY").to_string(),
        };

        Ok(Self {
            ui_local_port: parse(env!("UI_LOCAL_PORT"), "UI_LOCAL_PORT")?,
            ui_remote_port: parse(env!("UI_REMOTE_PORT"), "UI_REMOTE_PORT")?,
            ui_local_ip: env!("UI_LOCAL_IP"),
            ui_remote_ip: env!("UI_REMOTE_IP"),
            ui_buffer_size: parse(env!("UI_BUFFER_SIZE"), "UI_BUFFER_SIZE")?,

            ws_url: env!("WS_URL"),
            api_base_url: env!("API_BASE_URL"),
            api_key,

            session_model: env!("SESSION_MODEL"),
            session_voice: env!("SESSION_VOICE"),
            system_instruction: env!("SESSION_SYSTEM_INSTRUCTION"),

            capture_device: env!("AUDIO_CAPTURE_DEVICE"),
            playback_device: env!("AUDIO_PLAYBACK_DEVICE"),
            input_sample_rate: parse(env!("AUDIO_INPUT_SAMPLE_RATE"), "AUDIO_INPUT_SAMPLE_RATE")?,
            output_sample_rate: parse(
                env!("AUDIO_OUTPUT_SAMPLE_RATE"),
                "AUDIO_OUTPUT_SAMPLE_RATE",
            )?,
            chunk_size: parse(env!("AUDIO_CHUNK_SIZE"), "AUDIO_CHUNK_SIZE")?,
            playback_period_size: parse(
                env!("AUDIO_PLAYBACK_PERIOD_SIZE"),
                "AUDIO_PLAYBACK_PERIOD_SIZE",
            )?,

            narration_model: env!("NARRATION_MODEL"),
            narration_voice: env!("NARRATION_VOICE"),
        })
    }

    /// 没有 API Key 时无法建立会话
    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(BridgeError::Config(
                "no API key: set network.api_key or GEMINI_API_KEY".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(BridgeError::Config("audio.chunk_size must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            capture_device: self.capture_device.to_string(),
            playback_device: self.playback_device.to_string(),
            input_sample_rate: self.input_sample_rate,
            output_sample_rate: self.output_sample_rate,
            chunk_size: self.chunk_size,
            playback_period_size: self.playback_period_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_time_values_are_parsed() {
        let config = Config::new().unwrap();
        assert_eq!(config.input_sample_rate, 16000);
        assert_eq!(config.output_sample_rate, 24000);
        assert_eq!(config.chunk_size, 4096);
        assert!(config.ws_url.starts_with("wss://"));
    }

    #[test]
    fn missing_api_key_fails_validation() {
        let mut config = Config::new().unwrap();
        config.api_key = String::new();
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), "config");

        config.api_key = "test-key".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn audio_config_mirrors_settings() {
        let config = Config::new().unwrap();
        let audio = config.audio_config();
        assert_eq!(audio.input_sample_rate, config.input_sample_rate);
        assert_eq!(audio.chunk_size, config.chunk_size);
        assert_eq!(audio.capture_device, config.capture_device);
    }
}
