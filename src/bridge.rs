//! 帧桥 - 引擎帧接口与管道字节流之间的转换
//!
//! 读路径：引擎每拍（约20ms）拉一帧，对入站管道做一次非阻塞读。
//! 写路径：引擎推送语音帧，对出站管道做一次非阻塞写，管道满则整帧丢弃。
//!
//! 本模块没有线程和定时器，所有调用都在引擎的读写回调中同步完成，
//! 不重试、不睡眠。

use std::io::{self, ErrorKind, Read, Write};

use tracing::{debug, info, trace, warn};

use crate::config::MediaConfig;
use crate::error::MediaError;
use crate::frame::{AudioFormat, MediaFrame, VoiceFrame};

/// 入站字节源
///
/// FIFO 读到 0 字节有两种含义：写端从未接入，或写端接入后已全部关闭。
/// 只有后者是流结束，由内核的挂断状态区分。
pub trait InboundSource: Read {
    /// 写端曾经接入且现已全部关闭
    fn writer_hung_up(&self) -> io::Result<bool>;
}

/// 一次写入的结果（对引擎而言除 Io 错误外都是成功）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// 整帧写入
    Written,
    /// 管道已满，整帧丢弃
    Dropped,
    /// 只写入了一部分（帧内数据丢失，不重试）
    Partial { written: usize, expected: usize },
    /// 非语音帧，忽略
    Ignored,
    /// 载荷长度不是整帧，拒绝写入
    Rejected { len: usize },
}

/// 帧桥统计信息
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BridgeStats {
    pub frames_read: u64,
    pub null_ticks: u64,
    pub partial_reads: u64,
    pub end_of_stream: u64,
    pub frames_written: u64,
    pub frames_dropped: u64,
    pub partial_writes: u64,
    pub ignored_frames: u64,
    pub rejected_frames: u64,
}

/// 帧桥：持有单帧暂存缓冲区
#[derive(Debug)]
pub struct FrameBridge {
    format: AudioFormat,
    frame_size: u32,

    /// 单帧暂存区，frame_size * 2 字节
    buffer: Vec<u8>,

    /// 暂存区已填充字节数（仅在拼帧模式下跨拍保留）
    cursor: usize,

    /// 短读时是否保留数据等待下一拍
    reassemble: bool,

    stats: BridgeStats,
}

impl FrameBridge {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            format: AudioFormat::Slin16,
            frame_size: config.frame_size,
            buffer: vec![0u8; config.frame_bytes()],
            cursor: 0,
            reassemble: config.reassemble_partial_reads,
            stats: BridgeStats::default(),
        }
    }

    /// 每帧字节数
    pub fn bytes_needed(&self) -> usize {
        self.buffer.len()
    }

    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    /// 暂存区中尚未凑满一帧的字节数
    pub fn pending_bytes(&self) -> usize {
        self.cursor
    }

    /// 读取一帧
    ///
    /// # 返回
    /// * `Ok(MediaFrame::Voice)` - 读满一帧
    /// * `Ok(MediaFrame::Null)` - 本拍无音频（无数据 / 短读）
    /// * `Err(MediaError::EndOfStream)` - 对端关闭
    /// * `Err(MediaError::Io)` - 其他IO错误
    pub fn read_frame<R: InboundSource>(&mut self, source: &mut R) -> Result<MediaFrame, MediaError> {
        let needed = self.bytes_needed();
        let start = if self.reassemble { self.cursor } else { 0 };

        match source.read(&mut self.buffer[start..needed]) {
            Ok(0) => {
                // 写端从未接入时 FIFO 读到的也是 0，这不是流结束
                if !source.writer_hung_up()? {
                    trace!("入站管道尚无写端");
                    self.stats.null_ticks += 1;
                    return Ok(MediaFrame::Null);
                }
                self.cursor = 0;
                self.stats.end_of_stream += 1;
                info!("入站管道对端已关闭");
                Err(MediaError::EndOfStream)
            }
            Ok(n) => {
                let filled = start + n;

                if filled == needed {
                    self.cursor = 0;
                    self.stats.frames_read += 1;
                    return Ok(MediaFrame::Voice(VoiceFrame {
                        format: self.format,
                        samples: self.frame_size,
                        data: self.buffer.clone(),
                    }));
                }

                self.stats.partial_reads += 1;
                self.stats.null_ticks += 1;
                if self.reassemble {
                    self.cursor = filled;
                    debug!("短读: 已缓存 {}/{} 字节", filled, needed);
                } else {
                    self.cursor = 0;
                    warn!("短读: 收到 {} 字节，需要 {} 字节，丢弃", n, needed);
                }
                Ok(MediaFrame::Null)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                self.stats.null_ticks += 1;
                Ok(MediaFrame::Null)
            }
            Err(e) => {
                warn!("读取管道失败: {}", e);
                Err(MediaError::Io(e))
            }
        }
    }

    /// 写入一帧
    ///
    /// 只转发长度恰为一帧的语音帧，其他长度的载荷拒绝写入。
    /// 管道满时整帧丢弃并返回成功：640字节小于 PIPE_BUF，
    /// 内核保证写入要么完整要么 EAGAIN，出站字节流始终按帧对齐。
    pub fn write_frame<W: Write>(
        &mut self,
        sink: &mut W,
        frame: &MediaFrame,
    ) -> Result<WriteOutcome, MediaError> {
        let voice = match frame {
            MediaFrame::Voice(voice) if !voice.data.is_empty() => voice,
            _ => {
                self.stats.ignored_frames += 1;
                return Ok(WriteOutcome::Ignored);
            }
        };

        let expected = voice.data.len();
        if expected != self.bytes_needed() {
            self.stats.rejected_frames += 1;
            warn!("语音帧长度 {} 字节，帧长应为 {} 字节，拒绝写入", expected, self.bytes_needed());
            return Ok(WriteOutcome::Rejected { len: expected });
        }

        match sink.write(&voice.data) {
            Ok(written) if written == expected => {
                self.stats.frames_written += 1;
                Ok(WriteOutcome::Written)
            }
            Ok(written) => {
                self.stats.partial_writes += 1;
                warn!("部分写入: 写入 {} 字节，应写 {} 字节", written, expected);
                Ok(WriteOutcome::Partial { written, expected })
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                self.stats.frames_dropped += 1;
                debug!("管道已满，丢弃帧");
                Ok(WriteOutcome::Dropped)
            }
            Err(e) => {
                warn!("写入管道失败: {}", e);
                Err(MediaError::Io(e))
            }
        }
    }
}
