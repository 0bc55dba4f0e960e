//! 通道技术接口
//!
//! 宿主引擎通过这两个 trait 驱动通道：`ChannelTech` 负责按请求创建通道，
//! `MediaChannel` 是单个通道在呼叫期间的回调集合。

use std::fmt;

use crate::error::MediaError;
use crate::frame::{FormatCap, MediaFrame};

/// 通道状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// 已创建，尚未接通
    Down,
    /// 已接通，音频在流动
    Up,
    /// 已拆除
    Closed,
}

/// 指示条件码（振铃、保持等，取值由呼叫层定义）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Condition(pub i32);

/// 通道所属的呼叫上下文（由宿主分配）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallContext {
    name: String,
}

impl CallContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// 通道技术：创建通道
pub trait ChannelTech {
    type Channel: MediaChannel;

    /// 通道类型名，如 "ExternalMedia"
    fn type_name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// 本技术原生支持的格式
    fn native_formats(&self) -> FormatCap;

    /// 按请求的格式能力创建通道，失败时调用方以拥塞原因拒绝请求
    fn request(&self, caps: FormatCap, owner: CallContext) -> Result<Self::Channel, MediaError>;
}

/// 单个通道的回调
pub trait MediaChannel {
    /// 通道名，如 "ExternalMedia/ch_..."
    fn name(&self) -> String;

    fn state(&self) -> ChannelState;

    /// 发起呼叫（接通）
    fn call(&mut self, dest: &str) -> Result<(), MediaError>;

    /// 挂机，永不失败
    fn hangup(&mut self);

    /// 每拍读取一帧
    fn read(&mut self) -> Result<MediaFrame, MediaError>;

    /// 写入一帧
    fn write(&mut self, frame: &MediaFrame) -> Result<(), MediaError>;

    fn indicate(&mut self, condition: Condition) -> Result<(), MediaError>;

    /// 伪装（masquerade）后重新绑定呼叫上下文
    fn fixup(&mut self, new_owner: CallContext);
}
