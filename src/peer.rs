use tracing::{debug, error, info, trace, warn};
use external_media::logging::init;

use external_media::config::DEFAULT_FRAME_SIZE;
use external_media::transport::PipeTransport;
use external_media::InboundSource;

use mio::unix::pipe::{Receiver, Sender};
use mio::{Events, Interest, Poll, Token};

use std::fs::OpenOptions;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{FromRawFd, IntoRawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::Duration;

const FROM_ENGINE: Token = Token(0);

/// 等待写端可打开时的轮询间隔
const RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// 模拟外部编排进程：把引擎发出的音频原样回送（环回）
fn main() {
    // 日志系统初始化
    init();

    let mut args = std::env::args();
    let cmd = args.next().unwrap_or_else(|| "media-peer".to_string());

    if args.len() != 2 {
        println!("用法: {cmd} 管道目录 通道ID");
        println!("\n通道ID 形如 ch_1700000000_0123456789abcdef，由 media-engine 打印。");
        return;
    }
    let dir = args.next().unwrap_or_default();
    let id = args.next().unwrap_or_default();

    let (to_engine_path, from_engine_path) = PipeTransport::pipe_paths(Path::new(&dir), &id);
    let frame_bytes = DEFAULT_FRAME_SIZE as usize * 2;

    let mut from_engine = match open_reader(&from_engine_path) {
        Ok(receiver) => receiver,
        Err(e) => {
            error!("打开 {} 失败: {e}", from_engine_path.display());
            std::process::exit(1);
        }
    };

    // Setup the event loop.
    let mut poll = match Poll::new() {
        Ok(poll) => poll,
        Err(e) => {
            error!("创建事件循环失败: {e}");
            std::process::exit(1);
        }
    };
    let mut events = Events::with_capacity(16);
    if let Err(e) = poll.registry().register(&mut from_engine, FROM_ENGINE, Interest::READABLE) {
        error!("注册管道失败: {e}");
        std::process::exit(1);
    }

    let mut to_engine: Option<Sender> = None;
    let mut pending: Vec<u8> = Vec::with_capacity(frame_bytes * 4);
    let mut buf = vec![0u8; frame_bytes * 8];
    let mut received_bytes: u64 = 0;
    let mut echoed_frames: u64 = 0;
    let mut dropped_frames: u64 = 0;

    info!("环回对端已启动: {}", id);

    'outer: loop {
        // 引擎的读端打开后才能非阻塞打开写端
        if to_engine.is_none() {
            match open_writer(&to_engine_path) {
                Ok(sender) => {
                    info!("已连接入站管道 {}", to_engine_path.display());
                    to_engine = Some(sender);
                }
                Err(e) if e.raw_os_error() == Some(libc::ENXIO) => trace!("引擎尚未打开入站管道"),
                Err(e) => {
                    error!("打开 {} 失败: {e}", to_engine_path.display());
                    break;
                }
            }
        }

        let timeout = if to_engine.is_none() { Some(RETRY_INTERVAL) } else { None };
        if let Err(e) = poll.poll(&mut events, timeout) {
            if e.kind() == ErrorKind::Interrupted {
                continue;
            }
            error!("事件循环失败: {e}");
            break;
        }

        for event in events.iter() {
            if event.token() != FROM_ENGINE {
                continue;
            }

            // 读到 WouldBlock 为止
            loop {
                match from_engine.read(&mut buf) {
                    Ok(0) => {
                        if from_engine.writer_hung_up().unwrap_or(false) {
                            info!("引擎关闭出站管道");
                            break 'outer;
                        }
                        // 写端尚未接入
                        break;
                    }
                    Ok(n) => {
                        received_bytes += n as u64;
                        pending.extend_from_slice(&buf[..n]);
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("读取失败: {e}");
                        break 'outer;
                    }
                }
            }

            // 按整帧回送，不足一帧的留到下次
            let whole = pending.len() / frame_bytes * frame_bytes;
            if let Some(sender) = to_engine.as_mut() {
                for frame in pending[..whole].chunks_exact(frame_bytes) {
                    match sender.write(frame) {
                        Ok(n) if n == frame.len() => echoed_frames += 1,
                        Ok(n) => warn!("部分写入 {n}/{} 字节", frame.len()),
                        Err(e) if e.kind() == ErrorKind::WouldBlock => dropped_frames += 1,
                        Err(e) => {
                            warn!("写入失败: {e}");
                            break 'outer;
                        }
                    }
                }
            } else {
                dropped_frames += (whole / frame_bytes) as u64;
            }
            pending.drain(..whole);
            debug!("已接收 {received_bytes} 字节，回送 {echoed_frames} 帧");
        }
    }

    info!("环回结束: 接收 {received_bytes} 字节，回送 {echoed_frames} 帧，丢弃 {dropped_frames} 帧");
}

fn open_reader(path: &Path) -> std::io::Result<Receiver> {
    let file = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)?;
    let receiver = unsafe { Receiver::from_raw_fd(file.into_raw_fd()) };
    receiver.set_nonblocking(true)?;
    Ok(receiver)
}

fn open_writer(path: &Path) -> std::io::Result<Sender> {
    let file = OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)?;
    let sender = unsafe { Sender::from_raw_fd(file.into_raw_fd()) };
    sender.set_nonblocking(true)?;
    Ok(sender)
}
