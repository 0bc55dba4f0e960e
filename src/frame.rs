//! 帧模型：语音帧、控制帧、空帧，以及格式能力集

/// SLIN16 的固定采样率
pub const SLIN16_SAMPLE_RATE: u32 = 16000;

/// 音频格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AudioFormat {
    /// 8kHz 16位有符号线性PCM
    Slin = 1 << 0,
    /// 16kHz 16位有符号线性PCM（本通道唯一支持的格式）
    Slin16 = 1 << 1,
    Ulaw = 1 << 2,
    Alaw = 1 << 3,
    G722 = 1 << 4,
    Opus = 1 << 5,
}

impl AudioFormat {
    const ALL: [AudioFormat; 6] = [
        AudioFormat::Slin,
        AudioFormat::Slin16,
        AudioFormat::Ulaw,
        AudioFormat::Alaw,
        AudioFormat::G722,
        AudioFormat::Opus,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AudioFormat::Slin => "slin",
            AudioFormat::Slin16 => "slin16",
            AudioFormat::Ulaw => "ulaw",
            AudioFormat::Alaw => "alaw",
            AudioFormat::G722 => "g722",
            AudioFormat::Opus => "opus",
        }
    }
}

/// 格式能力集（位掩码）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatCap(u32);

impl FormatCap {
    pub fn empty() -> Self {
        Self(0)
    }

    /// 从C侧传入的位掩码构造，未知位被忽略
    pub fn from_bits(bits: u32) -> Self {
        let known = AudioFormat::ALL.iter().fold(0, |acc, f| acc | *f as u32);
        Self(bits & known)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn with(mut self, format: AudioFormat) -> Self {
        self.0 |= format as u32;
        self
    }

    pub fn contains(self, format: AudioFormat) -> bool {
        self.0 & format as u32 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = AudioFormat> {
        AudioFormat::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

impl From<AudioFormat> for FormatCap {
    fn from(format: AudioFormat) -> Self {
        FormatCap::empty().with(format)
    }
}

/// 控制帧类型（由通道排队交给呼叫层）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ControlFrame {
    /// 已接通
    Answer = 4,
}

/// 一帧语音数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceFrame {
    pub format: AudioFormat,
    /// 采样点数
    pub samples: u32,
    /// 原始PCM字节（本机字节序 s16）
    pub data: Vec<u8>,
}

impl VoiceFrame {
    pub fn new(format: AudioFormat, data: Vec<u8>) -> Self {
        let samples = (data.len() / 2) as u32;
        Self { format, samples, data }
    }

    /// 由采样值构造 SLIN16 帧
    pub fn from_samples(samples: &[i16]) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            data.extend_from_slice(&s.to_ne_bytes());
        }
        Self::new(AudioFormat::Slin16, data)
    }

    /// 按本机字节序解析采样值
    pub fn pcm_samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.data
            .chunks_exact(2)
            .map(|pair| i16::from_ne_bytes([pair[0], pair[1]]))
    }

    pub fn datalen(&self) -> usize {
        self.data.len()
    }
}

/// 通道读写的帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaFrame {
    /// 语音帧
    Voice(VoiceFrame),
    /// 控制帧
    Control(ControlFrame),
    /// 本拍无音频
    Null,
    /// 其他帧类型（DTMF、文本等），写入时被忽略
    Other(u32),
}

impl MediaFrame {
    pub fn is_voice(&self) -> bool {
        matches!(self, MediaFrame::Voice(_))
    }
}
