//! 双向非阻塞管道传输
//!
//! 入站管道：外部进程 -> 引擎（本端只读）
//! 出站管道：引擎 -> 外部进程（本端只写）
//!
//! 两端都以 O_NONBLOCK 打开。呼叫处理线程同时服务很多通道，
//! 任何一次阻塞的 open/read/write 都会卡住所有通道。

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use mio::unix::pipe::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::bridge::InboundSource;
use crate::error::TransportError;
use crate::transport::fifo::{self, FIFO_MODE};

/// 入站管道文件名后缀（外部进程写，引擎读）
pub const INBOUND_SUFFIX: &str = "_to_engine.pcm";
/// 出站管道文件名后缀（引擎写，外部进程读）
pub const OUTBOUND_SUFFIX: &str = "_from_engine.pcm";

/// 一个端点独占的管道对
pub struct PipeTransport {
    inbound_path: PathBuf,
    outbound_path: PathBuf,

    /// 入站读端（None = 未打开）
    inbound: Option<Receiver>,

    /// 出站写端（None = 未打开）
    outbound: Option<Sender>,

    /// FIFO 文件是否已删除
    removed: bool,
}

impl PipeTransport {
    /// 根据目录和端点ID计算两条管道路径：(入站, 出站)
    pub fn pipe_paths(base_dir: &Path, id: &str) -> (PathBuf, PathBuf) {
        (
            base_dir.join(format!("{id}{INBOUND_SUFFIX}")),
            base_dir.join(format!("{id}{OUTBOUND_SUFFIX}")),
        )
    }

    /// 创建两条 FIFO
    ///
    /// 先删除同名残留文件；第二条创建失败时删除第一条，不留半成品。
    pub fn materialize(base_dir: &Path, id: &str) -> Result<Self, TransportError> {
        fifo::ensure_dir(base_dir);

        let (inbound_path, outbound_path) = Self::pipe_paths(base_dir, id);

        for path in [&inbound_path, &outbound_path] {
            if let Err(e) = fifo::remove_path(path) {
                debug!("删除残留文件失败 {}: {}", path.display(), e);
            }
        }

        fifo::create_fifo(&inbound_path, FIFO_MODE)?;

        if let Err(e) = fifo::create_fifo(&outbound_path, FIFO_MODE) {
            let _ = fifo::remove_path(&inbound_path);
            return Err(e);
        }

        info!("已为通道 {} 创建管道", id);
        info!("  入站: {}", inbound_path.display());
        info!("  出站: {}", outbound_path.display());

        Ok(Self {
            inbound_path,
            outbound_path,
            inbound: None,
            outbound: None,
            removed: false,
        })
    }

    /// 以非阻塞方式打开两端
    ///
    /// 任一端失败时关闭已打开的一端，FIFO 文件保留（调用方可重试或拆除）。
    pub fn open(&mut self) -> Result<(), TransportError> {
        if self.is_open() {
            debug!("管道已打开，忽略重复 open");
            return Ok(());
        }
        self.close_handles();

        let inbound = open_inbound(&self.inbound_path).map_err(|source| TransportError::Open {
            path: self.inbound_path.clone(),
            source,
        })?;

        let outbound = match open_outbound(&self.outbound_path) {
            Ok(sender) => sender,
            Err(source) => {
                drop(inbound);
                return Err(TransportError::Open {
                    path: self.outbound_path.clone(),
                    source,
                });
            }
        };

        self.inbound = Some(inbound);
        self.outbound = Some(outbound);
        info!(
            "已打开管道: 入站 {}, 出站 {}",
            self.inbound_path.display(),
            self.outbound_path.display()
        );
        Ok(())
    }

    /// 关闭两端并删除 FIFO 文件，可重复调用
    pub fn close(&mut self) {
        self.close_handles();

        if self.removed {
            return;
        }
        for path in [&self.inbound_path, &self.outbound_path] {
            if let Err(e) = fifo::remove_path(path) {
                warn!("删除管道文件失败 {}: {}", path.display(), e);
            }
        }
        self.removed = true;
    }

    /// 两端是否都已打开
    pub fn is_open(&self) -> bool {
        self.inbound.is_some() && self.outbound.is_some()
    }

    pub fn inbound_path(&self) -> &Path {
        &self.inbound_path
    }

    pub fn outbound_path(&self) -> &Path {
        &self.outbound_path
    }

    pub fn inbound_mut(&mut self) -> Option<&mut Receiver> {
        self.inbound.as_mut()
    }

    pub fn outbound_mut(&mut self) -> Option<&mut Sender> {
        self.outbound.as_mut()
    }

    // === 私有方法 ===

    fn close_handles(&mut self) {
        // drop 即 close(2)；None 时为空操作
        self.inbound = None;
        self.outbound = None;
    }
}

impl fmt::Debug for PipeTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeTransport")
            .field("inbound_path", &self.inbound_path)
            .field("outbound_path", &self.outbound_path)
            .field("inbound_open", &self.inbound.is_some())
            .field("outbound_open", &self.outbound.is_some())
            .field("removed", &self.removed)
            .finish()
    }
}

impl Drop for PipeTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl InboundSource for Receiver {
    fn writer_hung_up(&self) -> io::Result<bool> {
        fifo::writer_hung_up(self.as_raw_fd())
    }
}

fn open_nonblocking(path: &Path, read: bool, write: bool) -> io::Result<File> {
    OpenOptions::new()
        .read(read)
        .write(write)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

fn open_inbound(path: &Path) -> io::Result<Receiver> {
    let file = open_nonblocking(path, true, false)?;
    let receiver = unsafe { Receiver::from_raw_fd(file.into_raw_fd()) };
    receiver.set_nonblocking(true)?;
    Ok(receiver)
}

fn open_outbound(path: &Path) -> io::Result<Sender> {
    let file = match open_nonblocking(path, false, true) {
        Ok(file) => file,
        // 没有读端时非阻塞只写打开返回 ENXIO；改为读写打开占住管道，
        // 对端稍后接入即可读到数据
        Err(e) if e.raw_os_error() == Some(libc::ENXIO) => {
            debug!("出站管道暂无读端，以读写方式打开 {}", path.display());
            open_nonblocking(path, true, true)?
        }
        Err(e) => return Err(e),
    };
    let sender = unsafe { Sender::from_raw_fd(file.into_raw_fd()) };
    sender.set_nonblocking(true)?;
    Ok(sender)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fifo::is_fifo;
    use std::io::{ErrorKind, Read, Write};

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("external-media-pipe-{}-{}", tag, std::process::id()))
    }

    #[test]
    fn test_pipe_paths_derive_from_id() {
        let (inbound, outbound) = PipeTransport::pipe_paths(Path::new("/tmp/m"), "ch_1_ab");
        assert_eq!(inbound, PathBuf::from("/tmp/m/ch_1_ab_to_engine.pcm"));
        assert_eq!(outbound, PathBuf::from("/tmp/m/ch_1_ab_from_engine.pcm"));
        assert_ne!(inbound, outbound);
    }

    #[test]
    fn test_materialize_replaces_stale_files() {
        let dir = scratch_dir("stale");
        fifo::ensure_dir(&dir);
        let (inbound, _) = PipeTransport::pipe_paths(&dir, "stale");
        std::fs::write(&inbound, b"old").unwrap();

        let mut transport = PipeTransport::materialize(&dir, "stale").unwrap();
        assert!(is_fifo(transport.inbound_path()));
        assert!(is_fifo(transport.outbound_path()));

        transport.close();
        assert!(!transport.inbound_path().exists());
        assert!(!transport.outbound_path().exists());
        let _ = std::fs::remove_dir(&dir);
    }

    #[test]
    fn test_open_without_peer_does_not_block() {
        let dir = scratch_dir("nopeer");
        let mut transport = PipeTransport::materialize(&dir, "nopeer").unwrap();

        transport.open().unwrap();
        assert!(transport.is_open());

        // 入站没有写端：非阻塞读立即返回
        let mut buf = [0u8; 640];
        match transport.inbound_mut().unwrap().read(&mut buf) {
            Ok(0) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            other => panic!("unexpected read result: {other:?}"),
        }

        // 出站没有读端：写入进入内核缓冲区
        let written = transport.outbound_mut().unwrap().write(&buf).unwrap();
        assert_eq!(written, buf.len());

        transport.close();
        let _ = std::fs::remove_dir(&dir);
    }

    #[test]
    fn test_open_fails_after_close_and_close_is_idempotent() {
        let dir = scratch_dir("closed");
        let mut transport = PipeTransport::materialize(&dir, "closed").unwrap();
        transport.close();
        transport.close();

        assert!(matches!(transport.open(), Err(TransportError::Open { .. })));
        assert!(!transport.is_open());
        let _ = std::fs::remove_dir(&dir);
    }

    #[test]
    fn test_outbound_open_failure_closes_inbound() {
        let dir = scratch_dir("halfopen");
        let mut transport = PipeTransport::materialize(&dir, "halfopen").unwrap();
        let outbound = transport.outbound_path().to_path_buf();

        // 出站路径换成目录：只写打开返回 EISDIR
        fifo::remove_path(&outbound).unwrap();
        std::fs::create_dir(&outbound).unwrap();

        assert!(matches!(transport.open(), Err(TransportError::Open { path, .. }) if path == outbound));
        assert!(!transport.is_open());
        assert!(transport.inbound_mut().is_none());
        assert!(transport.outbound_mut().is_none());

        // 入站读端已关闭：此时非阻塞只写打开找不到读端
        let err = open_nonblocking(transport.inbound_path(), false, true).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENXIO));

        transport.close();
        let _ = std::fs::remove_dir(&outbound);
        let _ = std::fs::remove_dir(&dir);
    }

    #[test]
    fn test_materialize_failure_removes_first_fifo() {
        let dir = scratch_dir("halfmade");
        fifo::ensure_dir(&dir);
        let (inbound, outbound) = PipeTransport::pipe_paths(&dir, "halfmade");
        // 出站路径被目录占用，残留清理删不掉，第二次 mkfifo 失败
        std::fs::create_dir(&outbound).unwrap();

        let err = PipeTransport::materialize(&dir, "halfmade").unwrap_err();
        assert!(matches!(err, TransportError::CreateFifo { path, .. } if path == outbound));
        assert!(!inbound.exists());

        let _ = std::fs::remove_dir(&outbound);
        let _ = std::fs::remove_dir(&dir);
    }

    #[test]
    fn test_silent_writer_leaving_is_end_of_stream() {
        use crate::bridge::FrameBridge;
        use crate::config::MediaConfig;
        use crate::error::MediaError;
        use crate::frame::MediaFrame;

        let dir = scratch_dir("silent");
        let mut transport = PipeTransport::materialize(&dir, "silent").unwrap();
        transport.open().unwrap();
        let mut bridge = FrameBridge::new(&MediaConfig::default());

        // 写端从未接入
        let inbound = transport.inbound_mut().unwrap();
        assert_eq!(bridge.read_frame(inbound).unwrap(), MediaFrame::Null);

        // 写端接入后不写任何数据就关闭
        let writer = open_nonblocking(transport.inbound_path(), false, true).unwrap();
        let inbound = transport.inbound_mut().unwrap();
        assert_eq!(bridge.read_frame(inbound).unwrap(), MediaFrame::Null);
        drop(writer);

        let inbound = transport.inbound_mut().unwrap();
        assert!(matches!(bridge.read_frame(inbound), Err(MediaError::EndOfStream)));

        transport.close();
        let _ = std::fs::remove_dir(&dir);
    }

    #[test]
    fn test_drop_removes_fifos() {
        let dir = scratch_dir("drop");
        let (inbound, outbound) = {
            let transport = PipeTransport::materialize(&dir, "drop").unwrap();
            (
                transport.inbound_path().to_path_buf(),
                transport.outbound_path().to_path_buf(),
            )
        };
        assert!(!inbound.exists());
        assert!(!outbound.exists());
        let _ = std::fs::remove_dir(&dir);
    }
}
