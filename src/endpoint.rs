//! 端点：一个呼叫侧的音频桥实例
//!
//! 生命周期：
//! 1. `create` - 分配实例并创建两条 FIFO（失败则实例丢弃）
//! 2. `activate` - 非阻塞打开两端，状态变为 Up，排队 Answer 控制帧
//! 3. `teardown` - 关闭句柄、删除 FIFO，可重复调用（Drop 时也会执行）

use std::collections::VecDeque;
use std::io;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::bridge::{BridgeStats, FrameBridge, WriteOutcome};
use crate::channel::{CallContext, ChannelState, Condition, MediaChannel};
use crate::config::MediaConfig;
use crate::error::{MediaError, TransportError};
use crate::frame::{AudioFormat, ControlFrame, MediaFrame};
use crate::transport::PipeTransport;

/// 通道类型名
pub const CHANNEL_TYPE: &str = "ExternalMedia";

/// 外部媒体端点
#[derive(Debug)]
pub struct Endpoint {
    /// 唯一ID，用于派生管道路径
    id: String,

    /// 当前所属呼叫
    owner: CallContext,

    state: ChannelState,

    sample_rate: u32,

    /// 拆除后为 None
    transport: Option<PipeTransport>,

    bridge: FrameBridge,

    /// 等待交给呼叫层的控制帧
    controls: VecDeque<ControlFrame>,
}

impl Endpoint {
    /// 创建端点并生成 FIFO
    pub(crate) fn create(
        config: &MediaConfig,
        id: String,
        owner: CallContext,
    ) -> Result<Self, MediaError> {
        let transport = PipeTransport::materialize(&config.pipe_base_dir, &id).map_err(|e| {
            warn!("为通道 {} 创建管道失败: {}", id, e);
            let source = match e {
                TransportError::CreateFifo { source, .. } | TransportError::Open { source, .. } => {
                    Some(source)
                }
                _ => None,
            };
            MediaError::exhausted(format!("无法为 {id} 创建管道"), source)
        })?;

        let endpoint = Self {
            id,
            owner,
            state: ChannelState::Down,
            sample_rate: config.sample_rate,
            transport: Some(transport),
            bridge: FrameBridge::new(config),
            controls: VecDeque::new(),
        };
        info!("外部媒体通道已创建: {}", endpoint.channel_name());
        Ok(endpoint)
    }

    /// 打开管道并接通
    ///
    /// 打开失败时已打开的句柄会被关闭，FIFO 保留，状态不变。
    pub fn activate(&mut self) -> Result<(), MediaError> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(MediaError::TransportUnavailable(TransportError::Closed))?;

        transport.open().map_err(|e| {
            warn!("通道 {} 打开管道失败: {}", self.id, e);
            MediaError::TransportUnavailable(e)
        })?;

        if self.state != ChannelState::Up {
            self.state = ChannelState::Up;
            self.controls.push_back(ControlFrame::Answer);
        }
        Ok(())
    }

    /// 拆除端点：关闭句柄、删除 FIFO，永不失败
    pub fn teardown(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
            info!("外部媒体通道已拆除: {}", self.channel_name());
        }
        self.controls.clear();
        self.state = ChannelState::Closed;
    }

    /// 伪装后重新绑定呼叫上下文，不触碰管道
    pub fn rebind(&mut self, owner: CallContext) {
        debug!("通道 {} 所属呼叫 {} -> {}", self.id, self.owner, owner);
        self.owner = owner;
    }

    /// 读取一帧：先交付排队的控制帧，再读入站管道
    pub fn read_frame(&mut self) -> Result<MediaFrame, MediaError> {
        if let Some(control) = self.controls.pop_front() {
            return Ok(MediaFrame::Control(control));
        }

        let Some(transport) = self.transport.as_mut() else {
            return Err(MediaError::EndOfStream);
        };
        match transport.inbound_mut() {
            Some(inbound) => self.bridge.read_frame(inbound),
            // 尚未接通
            None => Ok(MediaFrame::Null),
        }
    }

    /// 写入一帧到出站管道
    pub fn write_frame(&mut self, frame: &MediaFrame) -> Result<WriteOutcome, MediaError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(MediaError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "endpoint torn down",
            )));
        };
        match transport.outbound_mut() {
            Some(outbound) => self.bridge.write_frame(outbound, frame),
            None => {
                debug!("通道 {} 尚未接通，丢弃写入帧", self.id);
                Ok(WriteOutcome::Dropped)
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel_name(&self) -> String {
        format!("{CHANNEL_TYPE}/{}", self.id)
    }

    pub fn owner(&self) -> &CallContext {
        &self.owner
    }

    pub fn frame_size(&self) -> u32 {
        self.bridge.frame_size()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn format(&self) -> AudioFormat {
        self.bridge.format()
    }

    /// 入站管道路径（拆除后为 None）
    pub fn inbound_path(&self) -> Option<&Path> {
        self.transport.as_ref().map(|t| t.inbound_path())
    }

    /// 出站管道路径（拆除后为 None）
    pub fn outbound_path(&self) -> Option<&Path> {
        self.transport.as_ref().map(|t| t.outbound_path())
    }

    pub fn stats(&self) -> &BridgeStats {
        self.bridge.stats()
    }
}

impl MediaChannel for Endpoint {
    fn name(&self) -> String {
        self.channel_name()
    }

    fn state(&self) -> ChannelState {
        self.state
    }

    fn call(&mut self, dest: &str) -> Result<(), MediaError> {
        info!("外部媒体呼叫: dest={}", dest);
        self.activate()
    }

    fn hangup(&mut self) {
        info!("外部媒体挂机: {}", self.channel_name());
        self.teardown();
    }

    fn read(&mut self) -> Result<MediaFrame, MediaError> {
        self.read_frame()
    }

    fn write(&mut self, frame: &MediaFrame) -> Result<(), MediaError> {
        self.write_frame(frame).map(|_| ())
    }

    fn indicate(&mut self, condition: Condition) -> Result<(), MediaError> {
        debug!("外部媒体指示: {:?}", condition);
        Err(MediaError::Unsupported("indicate"))
    }

    fn fixup(&mut self, new_owner: CallContext) {
        self.rebind(new_owner);
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.teardown();
    }
}
