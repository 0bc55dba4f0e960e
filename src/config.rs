//! 通道驱动配置
//!
//! 帧大小、采样率、管道目录在驱动构造时固定，之后不可修改。
//!
//! 加载顺序（后者覆盖前者）：
//! 1. 内置默认值（`Default`）
//! 2. `EXTERNAL_MEDIA_` 前缀的环境变量，变量名为字段名大写，
//!    如 `EXTERNAL_MEDIA_FRAME_SIZE`、`EXTERNAL_MEDIA_PIPE_BASE_DIR`、
//!    `EXTERNAL_MEDIA_REASSEMBLE_PARTIAL_READS`

use std::path::PathBuf;

use config::{Config, Environment};
use serde::{Deserialize, Serialize};

use crate::error::MediaError;
use crate::frame::SLIN16_SAMPLE_RATE;

/// 默认帧大小：320个采样点 = 16kHz下20ms
pub const DEFAULT_FRAME_SIZE: u32 = 320;
/// 默认采样率
pub const DEFAULT_SAMPLE_RATE: u32 = SLIN16_SAMPLE_RATE;
/// 默认管道目录
pub const DEFAULT_PIPE_BASE_DIR: &str = "/tmp/asterisk_media";

/// 单帧最大采样点数（2048 * 2 = 4096字节 = PIPE_BUF，保证管道写入原子性）
pub const MAX_FRAME_SIZE: u32 = 2048;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "EXTERNAL_MEDIA";

/// 外部媒体通道配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConfig {
    /// 每帧采样点数
    pub frame_size: u32,
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// FIFO 所在目录
    pub pipe_base_dir: PathBuf,
    /// 短读时是否保留已读字节，下一拍继续拼帧（默认丢弃）
    pub reassemble_partial_reads: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            pipe_base_dir: PathBuf::from(DEFAULT_PIPE_BASE_DIR),
            reassemble_partial_reads: false,
        }
    }
}

impl MediaConfig {
    /// 从环境变量读取配置，未设置的项使用默认值
    pub fn from_env() -> Result<Self, MediaError> {
        Self::load(Environment::with_prefix(ENV_PREFIX))
    }

    /// 在默认值之上叠加给定的环境变量源，并校验
    pub fn load(env: Environment) -> Result<Self, MediaError> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(&Self::default()).map_err(invalid)?)
            .add_source(env)
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(invalid)?;

        config.validate()?;
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), MediaError> {
        if self.frame_size == 0 || self.frame_size > MAX_FRAME_SIZE {
            return Err(MediaError::InvalidConfig(format!(
                "帧大小必须在 1..={MAX_FRAME_SIZE} 之间，当前 {}",
                self.frame_size
            )));
        }
        // 只支持 SLIN16，采样率不可协商
        if self.sample_rate != SLIN16_SAMPLE_RATE {
            return Err(MediaError::InvalidConfig(format!(
                "采样率必须为 {SLIN16_SAMPLE_RATE} Hz，当前 {}",
                self.sample_rate
            )));
        }
        if self.pipe_base_dir.as_os_str().is_empty() {
            return Err(MediaError::InvalidConfig("管道目录不能为空".to_string()));
        }
        Ok(())
    }

    /// 单帧字节数（16位采样）
    pub fn frame_bytes(&self) -> usize {
        self.frame_size as usize * 2
    }

    /// 单帧时长（毫秒）
    pub fn frame_duration_ms(&self) -> u32 {
        self.frame_size * 1000 / self.sample_rate
    }
}

fn invalid(e: config::ConfigError) -> MediaError {
    MediaError::InvalidConfig(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MediaConfig::default();
        assert_eq!(config.frame_size, 320);
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.frame_bytes(), 640);
        assert_eq!(config.frame_duration_ms(), 20);
        assert!(!config.reassemble_partial_reads);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = MediaConfig::default();
        config.frame_size = 0;
        assert!(matches!(config.validate(), Err(MediaError::InvalidConfig(_))));

        config.frame_size = MAX_FRAME_SIZE + 1;
        assert!(config.validate().is_err());

        let mut config = MediaConfig::default();
        config.sample_rate = 8000;
        assert!(config.validate().is_err());

        let mut config = MediaConfig::default();
        config.pipe_base_dir = PathBuf::new();
        assert!(config.validate().is_err());
    }

    fn env_source(vars: &[(&str, &str)]) -> Environment {
        let vars: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix(ENV_PREFIX).source(Some(vars))
    }

    #[test]
    fn test_load_without_overrides_is_default() {
        let config = MediaConfig::load(env_source(&[])).unwrap();
        assert_eq!(config, MediaConfig::default());
    }

    #[test]
    fn test_env_overrides_defaults() {
        let config = MediaConfig::load(env_source(&[
            ("EXTERNAL_MEDIA_FRAME_SIZE", "160"),
            ("EXTERNAL_MEDIA_PIPE_BASE_DIR", "/var/run/media"),
            ("EXTERNAL_MEDIA_REASSEMBLE_PARTIAL_READS", "true"),
            // 前缀不同，不参与
            ("OTHER_FRAME_SIZE", "999"),
        ]))
        .unwrap();

        assert_eq!(config.frame_size, 160);
        assert_eq!(config.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(config.pipe_base_dir, PathBuf::from("/var/run/media"));
        assert!(config.reassemble_partial_reads);
    }

    #[test]
    fn test_env_values_validated() {
        let err = MediaConfig::load(env_source(&[("EXTERNAL_MEDIA_FRAME_SIZE", "abc")])).unwrap_err();
        assert!(matches!(err, MediaError::InvalidConfig(_)));

        let err = MediaConfig::load(env_source(&[("EXTERNAL_MEDIA_SAMPLE_RATE", "8000")])).unwrap_err();
        assert!(matches!(err, MediaError::InvalidConfig(_)));

        let err = MediaConfig::load(env_source(&[("EXTERNAL_MEDIA_FRAME_SIZE", "4096")])).unwrap_err();
        assert!(matches!(err, MediaError::InvalidConfig(_)));
    }

    #[test]
    fn test_ten_ms_frames() {
        let mut config = MediaConfig::default();
        config.frame_size = 160;
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_duration_ms(), 10);
        assert_eq!(config.frame_bytes(), 320);
    }
}
