use std::ffi::CString;
use std::fs::{self, Permissions};
use std::io::{self, ErrorKind};
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::Path;

use tracing::{debug, warn};

use crate::error::TransportError;

/// FIFO 默认权限：外部进程可能以其他用户运行
pub const FIFO_MODE: u32 = 0o666;

/// 创建命名管道
///
/// mkfifo 受 umask 影响，创建后再补一次 chmod（尽力而为）。
pub fn create_fifo(path: &Path, mode: u32) -> Result<(), TransportError> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| TransportError::InvalidPath(path.to_path_buf()))?;

    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), mode as libc::mode_t) };
    if rc < 0 {
        return Err(TransportError::CreateFifo {
            path: path.to_path_buf(),
            source: io::Error::last_os_error(),
        });
    }

    if let Err(e) = fs::set_permissions(path, Permissions::from_mode(mode)) {
        warn!("设置FIFO权限失败 {}: {}", path.display(), e);
    }
    Ok(())
}

/// 删除路径，已不存在视为成功
///
/// 返回是否真的删除了文件。
pub fn remove_path(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// 路径是否为已存在的 FIFO
pub fn is_fifo(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_fifo())
        .unwrap_or(false)
}

/// 读端上的写端是否已挂断
///
/// 内核只在写端接入过又全部关闭后才对读端报告 POLLHUP，
/// 从未有写端接入时不报告。超时为 0，不会阻塞。
pub fn writer_hung_up(fd: RawFd) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let rc = unsafe { libc::poll(&mut pfd, 1, 0) };
    if rc < 0 {
        let e = io::Error::last_os_error();
        if e.kind() == ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(e);
    }
    Ok(pfd.revents & libc::POLLHUP != 0)
}

/// 尽力创建目录（已存在不算错误）
pub(crate) fn ensure_dir(dir: &Path) {
    if let Err(e) = fs::create_dir_all(dir) {
        debug!("创建管道目录失败 {}: {}", dir.display(), e);
    }
}
