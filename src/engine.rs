use tracing::{debug, error, info, warn};
use external_media::logging::init;

use external_media::{
    CallContext, ChannelTech, ExternalMediaDriver, FormatCap, AudioFormat, MediaChannel, MediaConfig,
    MediaError, MediaFrame, VoiceFrame,
};

use std::f32::consts::PI;
use std::time::{Duration, Instant};

/// 测试音频率
const TONE_HZ: f32 = 440.0;
const TONE_AMPLITUDE: f32 = 8000.0;

/// 模拟宿主引擎：创建一个外部媒体通道，以帧节拍驱动读写
fn main() {
    // 日志系统初始化
    init();

    let mut args = std::env::args();
    let cmd = args.next().unwrap_or_else(|| "media-engine".to_string());

    let run_for = match args.next() {
        None => None,
        Some(secs) => match secs.parse::<u64>() {
            Ok(secs) => Some(Duration::from_secs(secs)),
            Err(_) => {
                println!("用法: {cmd} [运行秒数]");
                println!("\n环境变量 EXTERNAL_MEDIA_PIPE_BASE_DIR / EXTERNAL_MEDIA_FRAME_SIZE 可覆盖默认配置。");
                return;
            }
        },
    };

    let config = match MediaConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("配置无效: {e}");
            std::process::exit(1);
        }
    };
    let tick = Duration::from_millis(config.frame_duration_ms() as u64);
    let frame_size = config.frame_size as usize;
    let sample_rate = config.sample_rate as f32;

    let driver = match ExternalMediaDriver::new(config) {
        Ok(driver) => driver,
        Err(e) => {
            error!("驱动加载失败: {e}");
            std::process::exit(1);
        }
    };

    let mut channel = match driver.request(FormatCap::from(AudioFormat::Slin16), CallContext::new("Simulated/engine-0001")) {
        Ok(channel) => channel,
        Err(e) => {
            error!("通道请求失败: {e} (cause={:?})", e.hangup_cause());
            std::process::exit(1);
        }
    };

    println!("通道: {}", channel.name());
    if let (Some(inbound), Some(outbound)) = (channel.inbound_path(), channel.outbound_path()) {
        println!("外部进程写入: {}", inbound.display());
        println!("外部进程读取: {}", outbound.display());
    }
    println!("对端示例: media-peer {} {}", driver.config().pipe_base_dir.display(), channel.id());

    if let Err(e) = channel.call("simulated") {
        error!("接通失败: {e}");
        channel.hangup();
        std::process::exit(1);
    }

    let started = Instant::now();
    let mut next_tick = started;
    let mut phase: u64 = 0;

    loop {
        if run_for.is_some_and(|limit| started.elapsed() >= limit) {
            info!("到达运行时长，挂机");
            break;
        }

        // 读路径
        match channel.read() {
            Ok(MediaFrame::Voice(frame)) => {
                let peak = frame.pcm_samples().map(|s| s.unsigned_abs()).max().unwrap_or(0);
                debug!("收到语音帧: {} 采样点, 峰值 {}", frame.samples, peak);
            }
            Ok(MediaFrame::Control(control)) => info!("控制帧: {:?}", control),
            Ok(_) => {}
            Err(MediaError::EndOfStream) => {
                info!("外部进程关闭入站管道，挂机");
                break;
            }
            Err(e) => {
                warn!("读取失败，挂机: {e}");
                break;
            }
        }

        // 写路径：正弦测试音
        let samples: Vec<i16> = (0..frame_size)
            .map(|i| {
                let t = (phase + i as u64) as f32 / sample_rate;
                ((2.0 * PI * TONE_HZ * t).sin() * TONE_AMPLITUDE) as i16
            })
            .collect();
        phase += frame_size as u64;

        if let Err(e) = channel.write(&MediaFrame::Voice(VoiceFrame::from_samples(&samples))) {
            warn!("写入失败，挂机: {e}");
            break;
        }

        next_tick += tick;
        let now = Instant::now();
        if next_tick > now {
            std::thread::sleep(next_tick - now);
        } else {
            // 落后太多时重新对齐节拍
            next_tick = now;
        }
    }

    info!("统计: {:?}", channel.stats());
    channel.hangup();
}
