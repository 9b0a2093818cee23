//! MPEG Layer III 帧头解析
//!
//! 只接受 Layer III；free-format（比特率索引0）和保留版本号不被视为有效帧头。

/// 采样率表（MPEG-1），MPEG-2/2.5 按 `lsf + mpeg25` 右移
const SAMPLE_RATES: [u32; 3] = [44100, 48000, 32000];

/// 比特率表（kbps），前15项为 MPEG-1，后15项为 LSF
const BITRATES_KBPS: [u32; 30] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, //
    0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160,
];

/// 已解析的帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub raw: u32,
    /// 低采样率扩展（MPEG-2 / 2.5）
    pub lsf: bool,
    pub mpeg25: bool,
    pub sample_rate: u32,
    /// 比特率（bit/s）
    pub bit_rate: u32,
    pub padding: bool,
    pub channels: u16,
    pub has_crc: bool,
}

impl FrameHeader {
    /// 快速判定：同步字、Layer III、比特率/采样率索引合法
    #[inline]
    pub fn probably_header(h: u32) -> bool {
        (h & 0xffe0_0000) == 0xffe0_0000
            && (h & (3 << 17)) == (1 << 17)
            && (h & (0xF << 12)) != (0xF << 12)
            && (h & (3 << 10)) != (3 << 10)
    }

    /// 解析帧头，非法时返回 None
    pub fn parse(h: u32) -> Option<Self> {
        if !Self::probably_header(h) {
            return None;
        }
        let version = (h >> 19) & 3;
        // 01 为保留版本
        if version == 1 {
            return None;
        }
        let (lsf, mpeg25) = if h & (1 << 20) != 0 {
            (h & (1 << 19) == 0, false)
        } else {
            (true, true)
        };
        let shift = lsf as u32 + mpeg25 as u32;
        let sample_rate = SAMPLE_RATES[((h >> 10) & 3) as usize] >> shift;
        let bitrate_index = (lsf as usize) * 15 + ((h >> 12) & 0xF) as usize;
        let bit_rate = BITRATES_KBPS[bitrate_index] * 1000;
        if bit_rate == 0 {
            return None;
        }
        Some(Self {
            raw: h,
            lsf,
            mpeg25,
            sample_rate,
            bit_rate,
            padding: (h >> 9) & 1 == 1,
            channels: if (h >> 6) & 3 == 3 { 1 } else { 2 },
            has_crc: (h >> 16) & 1 == 0,
        })
    }

    /// 帧字节数：floor(kbps × 144000 / (sr << lsf)) + padding
    #[inline]
    pub fn frame_size(&self) -> usize {
        let kbps = (self.bit_rate / 1000) as u64;
        let denom = (self.sample_rate as u64) << (self.lsf as u32);
        (kbps * 144_000 / denom) as usize + self.padding as usize
    }

    /// 每帧样本数
    #[inline]
    pub fn samples_per_frame(&self) -> u32 {
        samples_per_frame(self.lsf)
    }

    /// 平均帧长（不含 padding，非整数）
    pub fn average_frame_size(&self) -> f64 {
        let kbps = (self.bit_rate / 1000) as f64;
        kbps * 144_000.0 / ((self.sample_rate as u64) << (self.lsf as u32)) as f64
    }

    /// Layer III side info 长度
    pub fn side_info_size(&self) -> usize {
        match (self.lsf, self.channels) {
            (false, 1) => 17,
            (false, _) => 32,
            (true, 1) => 9,
            (true, _) => 17,
        }
    }
}

#[inline]
pub fn samples_per_frame(lsf: bool) -> u32 {
    if lsf { 576 } else { 1152 }
}

/// 最高比特率下每样本的字节数上限
pub fn max_bytes_per_sample(sample_rate: u32, lsf: bool) -> f64 {
    let denom = (sample_rate as u64) << (lsf as u32);
    let max_frame = (320 * 144_000 / denom) as f64 + 1.0;
    max_frame.ceil() / samples_per_frame(lsf) as f64
}
