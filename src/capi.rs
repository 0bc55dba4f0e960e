//! C ABI for linking the channel driver into a C telephony host.
//!
//! Every endpoint handle wraps its `Endpoint` in a `Mutex`, so a host that
//! calls hangup from one thread while another is inside read/write is
//! serialized. All operations under the lock are non-blocking.
//!
//! Hangup only tears the endpoint down; the handle stays valid and later
//! reads/writes return `EM_ERR_STREAM`. The host frees it with
//! `external_media_channel_destroy` once no other thread can touch it.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_uchar};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::{Mutex, MutexGuard};

use crate::channel::{CallContext, ChannelTech, Condition, MediaChannel};
use crate::config::MediaConfig;
use crate::driver::ExternalMediaDriver;
use crate::endpoint::Endpoint;
use crate::error::HangupCause;
use crate::frame::{AudioFormat, FormatCap, MediaFrame, VoiceFrame};

/// `external_media_read` result: no audio this tick.
pub const EM_FRAME_NULL: c_int = 0;
/// `external_media_read` result: one voice frame copied out.
pub const EM_FRAME_VOICE: c_int = 1;
/// `external_media_read` result: one control frame, code in `out_control`.
pub const EM_FRAME_CONTROL: c_int = 2;

/// Host frame type value for voice frames.
pub const EM_FRAMETYPE_VOICE: c_int = 2;

/// Invalid argument (null pointer etc).
pub const EM_ERR_ARGS: c_int = -1;
/// Caller buffer too small.
pub const EM_ERR_BUFFER: c_int = -2;
/// Stream ended or fatal I/O error; the host should hang up.
pub const EM_ERR_STREAM: c_int = -3;
/// Operation failed.
pub const EM_ERR_FAILED: c_int = -4;

/// Opaque handle for the driver.
pub struct ExternalMediaDriverHandle(ExternalMediaDriver);

/// Opaque handle for one endpoint.
pub struct ExternalMediaChannelHandle(Mutex<Endpoint>);

impl ExternalMediaChannelHandle {
    fn lock(&self) -> MutexGuard<'_, Endpoint> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

unsafe fn opt_str<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(s) }.to_str().ok()
}

/// Install the tracing subscriber (no-op if the host already has one).
#[unsafe(no_mangle)]
pub extern "C" fn external_media_logging_init() {
    crate::logging::init();
}

/// Create a driver.
/// pipe_base_dir: NUL-terminated path, or null for the default directory.
/// frame_size / sample_rate: 0 selects the default.
/// reassemble: non-zero keeps short reads for the next tick.
/// Returns null if the configuration is invalid.
#[unsafe(no_mangle)]
pub extern "C" fn external_media_driver_create(
    pipe_base_dir: *const c_char,
    frame_size: u32,
    sample_rate: u32,
    reassemble: c_int,
) -> *mut ExternalMediaDriverHandle {
    let mut config = MediaConfig::default();
    if let Some(dir) = unsafe { opt_str(pipe_base_dir) } {
        config.pipe_base_dir = PathBuf::from(dir);
    }
    if frame_size != 0 {
        config.frame_size = frame_size;
    }
    if sample_rate != 0 {
        config.sample_rate = sample_rate;
    }
    config.reassemble_partial_reads = reassemble != 0;

    match ExternalMediaDriver::new(config) {
        Ok(driver) => Box::into_raw(Box::new(ExternalMediaDriverHandle(driver))),
        Err(e) => {
            tracing::error!("外部媒体驱动创建失败: {}", e);
            ptr::null_mut()
        }
    }
}

/// Create a driver from `EXTERNAL_MEDIA_*` environment variables.
#[unsafe(no_mangle)]
pub extern "C" fn external_media_driver_create_from_env() -> *mut ExternalMediaDriverHandle {
    match MediaConfig::from_env().and_then(ExternalMediaDriver::new) {
        Ok(driver) => Box::into_raw(Box::new(ExternalMediaDriverHandle(driver))),
        Err(e) => {
            tracing::error!("外部媒体驱动创建失败: {}", e);
            ptr::null_mut()
        }
    }
}

/// Destroy a driver handle. Endpoints already created stay valid.
#[unsafe(no_mangle)]
pub extern "C" fn external_media_driver_destroy(handle: *mut ExternalMediaDriverHandle) {
    if !handle.is_null() {
        unsafe { drop(Box::from_raw(handle)); }
    }
}

/// Request a new endpoint.
/// format_bits: requested `AudioFormat` bitmask (SLIN16 = 0x2 must be set).
/// owner: NUL-terminated name of the owning call.
/// cause: receives the hangup cause on failure (may be null).
/// Returns null on failure.
#[unsafe(no_mangle)]
pub extern "C" fn external_media_request(
    driver: *const ExternalMediaDriverHandle,
    format_bits: u32,
    owner: *const c_char,
    cause: *mut c_int,
) -> *mut ExternalMediaChannelHandle {
    let set_cause = |c: HangupCause| {
        if !cause.is_null() {
            unsafe { *cause = c as c_int; }
        }
    };

    if driver.is_null() {
        set_cause(HangupCause::Failure);
        return ptr::null_mut();
    }
    let driver = unsafe { &(*driver).0 };
    let owner = CallContext::new(unsafe { opt_str(owner) }.unwrap_or(""));

    match driver.request(FormatCap::from_bits(format_bits), owner) {
        Ok(endpoint) => Box::into_raw(Box::new(ExternalMediaChannelHandle(Mutex::new(endpoint)))),
        Err(e) => {
            tracing::warn!("外部媒体通道请求失败: {}", e);
            set_cause(e.hangup_cause());
            ptr::null_mut()
        }
    }
}

/// Open the pipes and answer. Returns 0 on success, EM_ERR_FAILED otherwise.
#[unsafe(no_mangle)]
pub extern "C" fn external_media_call(
    handle: *mut ExternalMediaChannelHandle,
    dest: *const c_char,
) -> c_int {
    if handle.is_null() {
        return EM_ERR_ARGS;
    }
    let channel = unsafe { &*handle };
    let dest = unsafe { opt_str(dest) }.unwrap_or("");
    match channel.lock().call(dest) {
        Ok(()) => 0,
        Err(_) => EM_ERR_FAILED,
    }
}

/// Hang up: close the pipes and remove the FIFOs. Safe to call repeatedly.
/// The handle remains valid until `external_media_channel_destroy`.
#[unsafe(no_mangle)]
pub extern "C" fn external_media_hangup(handle: *mut ExternalMediaChannelHandle) {
    if handle.is_null() {
        return;
    }
    let channel = unsafe { &*handle };
    channel.lock().hangup();
}

/// Free an endpoint handle (tearing it down first if needed).
/// The handle must not be used afterwards.
#[unsafe(no_mangle)]
pub extern "C" fn external_media_channel_destroy(handle: *mut ExternalMediaChannelHandle) {
    if !handle.is_null() {
        unsafe { drop(Box::from_raw(handle)); }
    }
}

/// Read one frame.
/// out_buf / out_max_len: receives voice payload; must hold at least
/// frame_size * 2 bytes. A smaller buffer returns EM_ERR_BUFFER before
/// anything is read from the pipe, so no audio is lost.
/// out_written: receives payload length (0 for null / control frames).
/// out_control: receives the control code when EM_FRAME_CONTROL is returned (may be null).
/// Returns EM_FRAME_* on success, EM_ERR_STREAM when the call should be torn down.
#[unsafe(no_mangle)]
pub extern "C" fn external_media_read(
    handle: *mut ExternalMediaChannelHandle,
    out_buf: *mut c_uchar,
    out_max_len: usize,
    out_written: *mut usize,
    out_control: *mut c_int,
) -> c_int {
    if handle.is_null() || out_buf.is_null() || out_written.is_null() {
        return EM_ERR_ARGS;
    }
    let channel = unsafe { &*handle };
    unsafe { *out_written = 0; }

    let mut endpoint = channel.lock();
    if out_max_len < endpoint.frame_size() as usize * 2 {
        return EM_ERR_BUFFER;
    }

    match endpoint.read() {
        Ok(MediaFrame::Voice(frame)) => {
            unsafe {
                ptr::copy_nonoverlapping(frame.data.as_ptr(), out_buf, frame.data.len());
                *out_written = frame.data.len();
            }
            EM_FRAME_VOICE
        }
        Ok(MediaFrame::Control(control)) => {
            if !out_control.is_null() {
                unsafe { *out_control = control as c_int; }
            }
            EM_FRAME_CONTROL
        }
        Ok(_) => EM_FRAME_NULL,
        Err(_) => EM_ERR_STREAM,
    }
}

/// Write one frame. Non-voice frame types are accepted and ignored.
/// Returns 0 on success (including a dropped frame), EM_ERR_STREAM on I/O failure.
#[unsafe(no_mangle)]
pub extern "C" fn external_media_write(
    handle: *mut ExternalMediaChannelHandle,
    frame_type: c_int,
    data: *const c_uchar,
    len: usize,
) -> c_int {
    if handle.is_null() {
        return EM_ERR_ARGS;
    }
    let channel = unsafe { &*handle };

    let frame = if frame_type == EM_FRAMETYPE_VOICE {
        if data.is_null() {
            return EM_ERR_ARGS;
        }
        let payload = unsafe { std::slice::from_raw_parts(data, len) };
        MediaFrame::Voice(VoiceFrame::new(AudioFormat::Slin16, payload.to_vec()))
    } else {
        MediaFrame::Other(frame_type as u32)
    };

    match channel.lock().write(&frame) {
        Ok(()) => 0,
        Err(_) => EM_ERR_STREAM,
    }
}

/// Indications are not supported; always returns EM_ERR_FAILED.
#[unsafe(no_mangle)]
pub extern "C" fn external_media_indicate(
    handle: *mut ExternalMediaChannelHandle,
    condition: c_int,
) -> c_int {
    if handle.is_null() {
        return EM_ERR_ARGS;
    }
    let channel = unsafe { &*handle };
    match channel.lock().indicate(Condition(condition)) {
        Ok(()) => 0,
        Err(_) => EM_ERR_FAILED,
    }
}

/// Re-associate the endpoint with a new owning call after a masquerade.
#[unsafe(no_mangle)]
pub extern "C" fn external_media_fixup(
    handle: *mut ExternalMediaChannelHandle,
    new_owner: *const c_char,
) -> c_int {
    if handle.is_null() {
        return EM_ERR_ARGS;
    }
    let channel = unsafe { &*handle };
    let owner = CallContext::new(unsafe { opt_str(new_owner) }.unwrap_or(""));
    channel.lock().fixup(owner);
    0
}

fn copy_path_out(path: Option<&Path>, out_buf: *mut c_char, out_max_len: usize) -> c_int {
    let Some(path) = path else {
        return EM_ERR_FAILED;
    };
    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return EM_ERR_FAILED;
    };
    let bytes = c_path.as_bytes_with_nul();
    if bytes.len() > out_max_len {
        return EM_ERR_BUFFER;
    }
    unsafe { ptr::copy_nonoverlapping(bytes.as_ptr() as *const c_char, out_buf, bytes.len()); }
    0
}

/// Copy the inbound (external -> engine) FIFO path, NUL-terminated.
#[unsafe(no_mangle)]
pub extern "C" fn external_media_inbound_path(
    handle: *mut ExternalMediaChannelHandle,
    out_buf: *mut c_char,
    out_max_len: usize,
) -> c_int {
    if handle.is_null() || out_buf.is_null() {
        return EM_ERR_ARGS;
    }
    let channel = unsafe { &*handle };
    let endpoint = channel.lock();
    copy_path_out(endpoint.inbound_path(), out_buf, out_max_len)
}

/// Copy the outbound (engine -> external) FIFO path, NUL-terminated.
#[unsafe(no_mangle)]
pub extern "C" fn external_media_outbound_path(
    handle: *mut ExternalMediaChannelHandle,
    out_buf: *mut c_char,
    out_max_len: usize,
) -> c_int {
    if handle.is_null() || out_buf.is_null() {
        return EM_ERR_ARGS;
    }
    let channel = unsafe { &*handle };
    let endpoint = channel.lock();
    copy_path_out(endpoint.outbound_path(), out_buf, out_max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capi_lifecycle() {
        let dir = std::env::temp_dir().join(format!("external-media-capi-{}", std::process::id()));
        let dir_c = CString::new(dir.as_os_str().as_bytes()).unwrap();

        let driver = external_media_driver_create(dir_c.as_ptr(), 0, 0, 0);
        assert!(!driver.is_null());

        // 格式不兼容：返回 null 并给出拥塞原因
        let mut cause: c_int = 0;
        let owner = CString::new("SIP/alice-0001").unwrap();
        let rejected = external_media_request(driver, AudioFormat::Ulaw as u32, owner.as_ptr(), &mut cause);
        assert!(rejected.is_null());
        assert_eq!(cause, HangupCause::Congestion as c_int);

        let channel = external_media_request(driver, AudioFormat::Slin16 as u32, owner.as_ptr(), &mut cause);
        assert!(!channel.is_null());

        let mut path_buf = [0 as c_char; 512];
        assert_eq!(external_media_inbound_path(channel, path_buf.as_mut_ptr(), path_buf.len()), 0);
        let inbound = PathBuf::from(
            unsafe { CStr::from_ptr(path_buf.as_ptr()) }.to_str().unwrap().to_string(),
        );
        assert!(inbound.exists());
        assert_eq!(external_media_outbound_path(channel, path_buf.as_mut_ptr(), 4), EM_ERR_BUFFER);

        let dest = CString::new("orchestrator").unwrap();
        assert_eq!(external_media_call(channel, dest.as_ptr()), 0);

        let mut buf = [0u8; 640];
        let mut written = 0usize;
        let mut control: c_int = 0;
        assert_eq!(
            external_media_read(channel, buf.as_mut_ptr(), buf.len(), &mut written, &mut control),
            EM_FRAME_CONTROL
        );
        assert_eq!(control, crate::frame::ControlFrame::Answer as c_int);
        assert_eq!(
            external_media_read(channel, buf.as_mut_ptr(), buf.len(), &mut written, &mut control),
            EM_FRAME_NULL
        );

        assert_eq!(external_media_write(channel, EM_FRAMETYPE_VOICE, buf.as_ptr(), buf.len()), 0);
        assert_eq!(external_media_write(channel, 4, ptr::null(), 0), 0);
        assert_eq!(external_media_indicate(channel, 3), EM_ERR_FAILED);

        let new_owner = CString::new("Local/bob-0002").unwrap();
        assert_eq!(external_media_fixup(channel, new_owner.as_ptr()), 0);

        external_media_hangup(channel);
        assert!(!inbound.exists());

        // 挂机后句柄仍有效，读写报告流结束
        assert_eq!(
            external_media_read(channel, buf.as_mut_ptr(), buf.len(), &mut written, &mut control),
            EM_ERR_STREAM
        );
        assert_eq!(external_media_write(channel, EM_FRAMETYPE_VOICE, buf.as_ptr(), buf.len()), EM_ERR_STREAM);
        external_media_hangup(channel);
        external_media_channel_destroy(channel);

        external_media_driver_destroy(driver);
        let _ = std::fs::remove_dir(&dir);
    }

    #[test]
    fn test_capi_small_buffer_keeps_frame() {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;

        let dir = std::env::temp_dir().join(format!("external-media-capi-buf-{}", std::process::id()));
        let dir_c = CString::new(dir.as_os_str().as_bytes()).unwrap();
        let driver = external_media_driver_create(dir_c.as_ptr(), 0, 0, 0);
        let owner = CString::new("SIP/carol-0003").unwrap();
        let channel = external_media_request(driver, AudioFormat::Slin16 as u32, owner.as_ptr(), ptr::null_mut());
        assert_eq!(external_media_call(channel, ptr::null()), 0);

        let mut buf = [0u8; 640];
        let mut written = 0usize;
        // Answer
        assert_eq!(
            external_media_read(channel, buf.as_mut_ptr(), buf.len(), &mut written, ptr::null_mut()),
            EM_FRAME_CONTROL
        );

        let inbound = unsafe { &*channel }.lock().inbound_path().unwrap().to_path_buf();
        let mut peer = std::fs::OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&inbound)
            .unwrap();
        peer.write_all(&[9u8; 640]).unwrap();

        // 缓冲区不足一帧：不读管道
        assert_eq!(
            external_media_read(channel, buf.as_mut_ptr(), 320, &mut written, ptr::null_mut()),
            EM_ERR_BUFFER
        );
        assert_eq!(written, 0);

        // 换足够大的缓冲区，帧仍在
        assert_eq!(
            external_media_read(channel, buf.as_mut_ptr(), buf.len(), &mut written, ptr::null_mut()),
            EM_FRAME_VOICE
        );
        assert_eq!(written, 640);
        assert!(buf.iter().all(|b| *b == 9));

        drop(peer);
        external_media_hangup(channel);
        external_media_channel_destroy(channel);
        external_media_driver_destroy(driver);
        let _ = std::fs::remove_dir(&dir);
    }

    #[test]
    fn test_capi_null_handles() {
        assert_eq!(external_media_call(ptr::null_mut(), ptr::null()), EM_ERR_ARGS);
        assert_eq!(external_media_write(ptr::null_mut(), EM_FRAMETYPE_VOICE, ptr::null(), 0), EM_ERR_ARGS);
        external_media_hangup(ptr::null_mut());
        external_media_channel_destroy(ptr::null_mut());
        external_media_driver_destroy(ptr::null_mut());

        let mut cause: c_int = 0;
        assert!(external_media_request(ptr::null(), 0, ptr::null(), &mut cause).is_null());
        assert_eq!(cause, HangupCause::Failure as c_int);

        assert!(external_media_driver_create(ptr::null(), 0, 8000, 0).is_null());
    }
}
