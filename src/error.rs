//! 错误类型定义
//!
//! 瞬时条件（管道暂无数据、管道已满、短读写）在帧桥内部吸收，不会出现在这里；
//! 这里只有需要上层（生命周期管理器 / 呼叫层）处理的错误。

use std::io;
use std::path::PathBuf;

/// 外部媒体通道错误类型
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("资源不足，无法创建端点: {reason}")]
    ResourceExhausted {
        reason: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("请求的格式能力不包含 {required}")]
    IncompatibleFormat { required: &'static str },

    #[error("管道传输不可用: {0}")]
    TransportUnavailable(#[source] TransportError),

    #[error("对端已关闭入站管道")]
    EndOfStream,

    #[error("管道IO错误: {0}")]
    Io(#[from] io::Error),

    #[error("配置无效: {0}")]
    InvalidConfig(String),

    #[error("不支持的操作: {0}")]
    Unsupported(&'static str),
}

/// 管道传输层错误
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("创建FIFO失败 {}: {source}", .path.display())]
    CreateFifo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("打开管道失败 {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("管道路径包含内部NUL字节: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("管道已拆除")]
    Closed,
}

/// 挂机原因（交给呼叫层使用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum HangupCause {
    /// 正常挂机
    Normal = 16,
    /// 拥塞（创建失败时拒绝请求）
    Congestion = 34,
    /// 其他失败
    Failure = 38,
}

impl MediaError {
    /// 映射为呼叫层的挂机原因
    pub fn hangup_cause(&self) -> HangupCause {
        match self {
            MediaError::ResourceExhausted { .. } | MediaError::IncompatibleFormat { .. } => {
                HangupCause::Congestion
            }
            MediaError::EndOfStream => HangupCause::Normal,
            _ => HangupCause::Failure,
        }
    }

    /// 是否为应触发拆除的致命流错误
    pub fn is_fatal(&self) -> bool {
        matches!(self, MediaError::EndOfStream | MediaError::Io(_))
    }

    pub(crate) fn exhausted(reason: impl Into<String>, source: Option<io::Error>) -> Self {
        MediaError::ResourceExhausted {
            reason: reason.into(),
            source,
        }
    }
}
