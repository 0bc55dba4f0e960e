//! 外部媒体通道驱动 - 端点生命周期管理
//!
//! 配置在构造时传入并固定；不存在全局可变状态。

use std::time::{SystemTime, UNIX_EPOCH};

use ring::rand::{SecureRandom, SystemRandom};
use tracing::{info, warn};

use crate::channel::{CallContext, ChannelTech};
use crate::config::MediaConfig;
use crate::endpoint::{Endpoint, CHANNEL_TYPE};
use crate::error::MediaError;
use crate::frame::{AudioFormat, FormatCap};

/// 驱动描述
pub const DRIVER_DESCRIPTION: &str = "External Media Channel Driver (PCM Pipes)";

/// 通道ID中随机盐的字节数
const ID_SALT_LEN: usize = 8;

/// 外部媒体通道驱动
pub struct ExternalMediaDriver {
    config: MediaConfig,
    rng: SystemRandom,
}

impl ExternalMediaDriver {
    /// 创建驱动（相当于加载模块）
    pub fn new(config: MediaConfig) -> Result<Self, MediaError> {
        config.validate()?;

        info!("加载外部媒体通道驱动");
        info!(
            "  帧大小: {} 采样点 ({} ms @ {} Hz)",
            config.frame_size,
            config.frame_duration_ms(),
            config.sample_rate
        );
        info!("  管道目录: {}", config.pipe_base_dir.display());

        Ok(Self {
            config,
            rng: SystemRandom::new(),
        })
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    /// 生成通道ID: ch_<秒级时间戳>_<16位十六进制随机数>
    pub fn generate_channel_id(&self) -> Result<String, MediaError> {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut salt = [0u8; ID_SALT_LEN];
        self.rng
            .fill(&mut salt)
            .map_err(|_| MediaError::exhausted("随机数生成失败", None))?;

        Ok(format!("ch_{}_{}", secs, hex::encode(salt)))
    }
}

impl ChannelTech for ExternalMediaDriver {
    type Channel = Endpoint;

    fn type_name(&self) -> &'static str {
        CHANNEL_TYPE
    }

    fn description(&self) -> &'static str {
        DRIVER_DESCRIPTION
    }

    fn native_formats(&self) -> FormatCap {
        FormatCap::from(AudioFormat::Slin16)
    }

    fn request(&self, caps: FormatCap, owner: CallContext) -> Result<Endpoint, MediaError> {
        info!("请求外部媒体通道: owner={}", owner);

        if !caps.contains(AudioFormat::Slin16) {
            warn!(
                "请求的格式 {:?} 不包含 {}",
                caps.iter().map(AudioFormat::name).collect::<Vec<_>>(),
                AudioFormat::Slin16.name()
            );
            return Err(MediaError::IncompatibleFormat {
                required: AudioFormat::Slin16.name(),
            });
        }

        let id = self.generate_channel_id()?;
        Endpoint::create(&self.config, id, owner)
    }
}

impl Drop for ExternalMediaDriver {
    fn drop(&mut self) {
        info!("卸载外部媒体通道驱动");
    }
}
