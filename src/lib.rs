//! External Media - 通过命名管道桥接呼叫音频的虚拟通道
//!
//! 每个呼叫一对 FIFO，传输 16kHz 16位单声道 PCM，20ms/640字节一帧。

/// 错误类型
pub mod error;

/// 驱动配置
pub mod config;

/// 帧模型与格式能力
pub mod frame;

/// 命名管道传输
pub mod transport;

/// 帧桥（读写路径）
pub mod bridge;

/// 通道技术接口
pub mod channel;

/// 端点生命周期
pub mod endpoint;

/// 通道驱动
pub mod driver;

/// C ABI
pub mod capi;

/// 重新导出常用类型
pub use bridge::{BridgeStats, FrameBridge, InboundSource, WriteOutcome};
pub use channel::{CallContext, ChannelState, ChannelTech, Condition, MediaChannel};
pub use config::MediaConfig;
pub use driver::ExternalMediaDriver;
pub use endpoint::Endpoint;
pub use error::{HangupCause, MediaError, TransportError};
pub use frame::{AudioFormat, ControlFrame, FormatCap, MediaFrame, VoiceFrame};
pub use transport::PipeTransport;

/// 库版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 日志系统
pub mod logging;
