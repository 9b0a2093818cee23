//! 流式采样率转换
//!
//! Kaiser 窗 sinc 多相滤波（直接查表，单精度累加）。状态按声道保存：
//! 滤波器记忆、分数相位、以及滤波器缩短后遗留的 "magic" 样本。
//! 同一条流切成任意块送入，输出与一次性送入逐位一致。

use super::pool::Reusable;
use crate::error::{AudioError, AudioResult};
use std::f64::consts::PI;

#[cfg(debug_assertions)]
macro_rules! debug_resampler {
    ($($arg:tt)*) => {
        tracing::debug!(target: "resampler", $($arg)*)
    };
}

#[cfg(not(debug_assertions))]
macro_rules! debug_resampler {
    ($($arg:tt)*) => {};
}

/// 滤波记忆中为输入块预留的长度
const BUFFER_SIZE: usize = 160;

#[rustfmt::skip]
static KAISER12: [f64; 68] = [
    0.99859849, 1.00000000, 0.99859849, 0.99440475, 0.98745105, 0.97779076,
    0.96549770, 0.95066529, 0.93340547, 0.91384741, 0.89213598, 0.86843014,
    0.84290116, 0.81573067, 0.78710866, 0.75723148, 0.72629970, 0.69451601,
    0.66208321, 0.62920216, 0.59606986, 0.56287762, 0.52980938, 0.49704014,
    0.46473455, 0.43304576, 0.40211431, 0.37206735, 0.34301800, 0.31506490,
    0.28829195, 0.26276832, 0.23854851, 0.21567274, 0.19416736, 0.17404546,
    0.15530766, 0.13794294, 0.12192957, 0.10723616, 0.09382272, 0.08164178,
    0.07063950, 0.06075685, 0.05193064, 0.04409466, 0.03718069, 0.03111947,
    0.02584161, 0.02127838, 0.01736250, 0.01402878, 0.01121463, 0.00886058,
    0.00691064, 0.00531256, 0.00401805, 0.00298291, 0.00216702, 0.00153438,
    0.00105297, 0.00069463, 0.00043489, 0.00025272, 0.00013031, 0.0000527734,
    0.00001000, 0.00000000,
];

#[rustfmt::skip]
static KAISER10: [f64; 36] = [
    0.99537781, 1.00000000, 0.99537781, 0.98162644, 0.95908712, 0.92831446,
    0.89005583, 0.84522401, 0.79486424, 0.74011713, 0.68217934, 0.62226347,
    0.56155915, 0.50119680, 0.44221549, 0.38553619, 0.33194107, 0.28205962,
    0.23636152, 0.19515633, 0.15859932, 0.12670280, 0.09935205, 0.07632451,
    0.05731132, 0.04193980, 0.02979584, 0.02044510, 0.01345224, 0.00839739,
    0.00488951, 0.00257636, 0.00115101, 0.00035515, 0.00000000, 0.00000000,
];

#[rustfmt::skip]
static KAISER8: [f64; 36] = [
    0.99635258, 1.00000000, 0.99635258, 0.98548012, 0.96759014, 0.94302200,
    0.91223751, 0.87580811, 0.83439927, 0.78875245, 0.73966538, 0.68797126,
    0.63451750, 0.58014482, 0.52566725, 0.47185369, 0.41941150, 0.36897272,
    0.32108304, 0.27619388, 0.23465776, 0.19672670, 0.16255380, 0.13219758,
    0.10562887, 0.08273982, 0.06335451, 0.04724088, 0.03412321, 0.02369490,
    0.01563093, 0.00959968, 0.00527363, 0.00233883, 0.00050000, 0.00000000,
];

#[rustfmt::skip]
static KAISER6: [f64; 36] = [
    0.99733006, 1.00000000, 0.99733006, 0.98935595, 0.97618418, 0.95799003,
    0.93501423, 0.90755855, 0.87598009, 0.84068475, 0.80211977, 0.76076565,
    0.71712752, 0.67172623, 0.62508937, 0.57774224, 0.53019925, 0.48295561,
    0.43647969, 0.39120616, 0.34752997, 0.30580127, 0.26632152, 0.22934058,
    0.19505503, 0.16360756, 0.13508755, 0.10953262, 0.08693120, 0.06722600,
    0.05031820, 0.03607231, 0.02432151, 0.01487334, 0.00752000, 0.00000000,
];

struct QualityMapping {
    base_length: usize,
    oversample: usize,
    downsample_bandwidth: f64,
    upsample_bandwidth: f64,
    window: &'static [f64],
}

const fn q(
    base_length: usize,
    oversample: usize,
    downsample_bandwidth: f64,
    upsample_bandwidth: f64,
    window: &'static [f64],
) -> QualityMapping {
    QualityMapping {
        base_length,
        oversample,
        downsample_bandwidth,
        upsample_bandwidth,
        window,
    }
}

static QUALITY_MAP: [QualityMapping; 11] = [
    q(8, 4, 0.830, 0.860, &KAISER6),
    q(16, 4, 0.850, 0.880, &KAISER6),
    q(32, 4, 0.882, 0.910, &KAISER6),
    q(48, 8, 0.895, 0.917, &KAISER8),
    q(64, 8, 0.921, 0.940, &KAISER8),
    q(80, 16, 0.922, 0.940, &KAISER10),
    q(96, 16, 0.940, 0.945, &KAISER10),
    q(128, 16, 0.950, 0.950, &KAISER10),
    q(160, 16, 0.960, 0.960, &KAISER10),
    q(192, 32, 0.968, 0.968, &KAISER12),
    q(256, 32, 0.975, 0.975, &KAISER12),
];

/// 窗函数表的三次插值
fn compute_func(x: f64, table: &[f64]) -> f64 {
    let y = x * (table.len() - 4) as f64;
    let ind = y.floor() as usize;
    let frac = y - ind as f64;
    let frac2 = frac * frac;
    let frac3 = frac2 * frac;
    let i3 = -0.1666666667 * frac + 0.1666666667 * frac3;
    let i2 = frac + 0.5 * frac2 - 0.5 * frac3;
    let i0 = -0.3333333333 * frac + 0.5 * frac2 - 0.1666666667 * frac3;
    let i1 = 1.0 - i3 - i2 - i0;
    let at = |k: usize| table.get(ind + k).copied().unwrap_or(0.0);
    i0 * at(0) + i1 * at(1) + i2 * at(2) + i3 * at(3)
}

/// 舍入到单精度后再以 f64 参与运算
#[inline]
fn fround(x: f64) -> f64 {
    x as f32 as f64
}

/// 加窗 sinc；横坐标与 cutoff 的乘积先按单精度舍入
fn sinc(cutoff: f64, x: f64, n: usize, window: &[f64]) -> f32 {
    let fabs = fround(x.abs());
    if fabs < 1e-6 {
        cutoff as f32
    } else if fabs > 0.5 * n as f64 {
        0.0
    } else {
        let xx = fround(x * cutoff);
        (cutoff * (PI * xx).sin() / (PI * xx)
            * compute_func(fround((2.0 * x / n as f64).abs()), window)) as f32
    }
}

/// 四路累加点积：单精度乘积，双精度累加，合并时逐级舍入
#[inline]
fn dot4(sinct: &[f32], iptr: &[f32]) -> f32 {
    let (mut a1, mut a2, mut a3, mut a4) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
    for (s, x) in sinct.chunks_exact(4).zip(iptr.chunks_exact(4)) {
        a1 += (s[0] * x[0]) as f64;
        a2 += (s[1] * x[1]) as f64;
        a3 += (s[2] * x[2]) as f64;
        a4 += (s[3] * x[3]) as f64;
    }
    (a1 + fround(a2 + fround(a3 + a4))) as f32
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// 重采样器池的 key：构造参数完全相同的实例才能互换
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResamplerKey {
    pub channels: usize,
    pub in_rate: u32,
    pub out_rate: u32,
    pub quality: u8,
}

impl ResamplerKey {
    pub fn build(&self) -> AudioResult<Resampler> {
        Resampler::new(self.channels, self.in_rate, self.out_rate, self.quality)
    }
}

/// 流式重采样器
pub struct Resampler {
    channels: usize,
    in_rate: u32,
    out_rate: u32,
    num_rate: u32,
    den_rate: u32,
    quality: u8,

    filt_len: usize,
    cutoff: f64,
    int_advance: usize,
    frac_advance: u64,
    sinc_table: Vec<f32>,

    mem_alloc_size: usize,
    mem: Vec<Vec<f32>>,
    last_sample: Vec<usize>,
    samp_frac_num: Vec<u64>,
    magic_samples: Vec<usize>,

    /// 滤波记忆里已有真实数据（迁移记忆时需要保留）
    filter_primed: bool,
    /// start()/end() 括起的逻辑流
    stream_started: bool,
}

impl std::fmt::Debug for Resampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resampler")
            .field("channels", &self.channels)
            .field("in_rate", &self.in_rate)
            .field("out_rate", &self.out_rate)
            .field("quality", &self.quality)
            .field("filt_len", &self.filt_len)
            .finish()
    }
}

impl Resampler {
    pub fn new(channels: usize, in_rate: u32, out_rate: u32, quality: u8) -> AudioResult<Self> {
        if channels == 0 {
            return Err(AudioError::InvalidInput("重采样声道数不能为 0".into()));
        }
        if in_rate == 0 || out_rate == 0 {
            return Err(AudioError::InvalidInput(format!(
                "非法采样率: {in_rate} -> {out_rate}"
            )));
        }
        if quality > 10 {
            return Err(AudioError::InvalidInput(format!("重采样质量越界: {quality}")));
        }
        let fact = gcd(in_rate, out_rate);
        let mut resampler = Self {
            channels,
            in_rate,
            out_rate,
            num_rate: in_rate / fact,
            den_rate: out_rate / fact,
            quality,
            filt_len: 0,
            cutoff: 1.0,
            int_advance: 0,
            frac_advance: 0,
            sinc_table: Vec::new(),
            mem_alloc_size: 0,
            mem: vec![Vec::new(); channels],
            last_sample: vec![0; channels],
            samp_frac_num: vec![0; channels],
            magic_samples: vec![0; channels],
            filter_primed: false,
            stream_started: false,
        };
        resampler.update_filter();
        Ok(resampler)
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn rates(&self) -> (u32, u32) {
        (self.in_rate, self.out_rate)
    }

    /// 约分后的比例（num, den）
    #[inline]
    pub fn ratio(&self) -> (u32, u32) {
        (self.num_rate, self.den_rate)
    }

    #[inline]
    pub fn quality(&self) -> u8 {
        self.quality
    }

    #[inline]
    pub fn filter_length(&self) -> usize {
        self.filt_len
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.stream_started
    }

    /// 全新状态下输入 `input_length` 个样本得到的输出数：ceil(L × den / num)
    pub fn output_length(&self, input_length: usize) -> usize {
        (input_length as u64 * self.den_rate as u64).div_ceil(self.num_rate as u64) as usize
    }

    pub fn start(&mut self) -> AudioResult<()> {
        if self.stream_started {
            return Err(AudioError::InvalidInput("重采样器已经 start".into()));
        }
        self.stream_started = true;
        Ok(())
    }

    /// 结束流：相位、magic 样本和记忆全部归零
    pub fn end(&mut self) -> AudioResult<()> {
        if !self.stream_started {
            return Err(AudioError::InvalidInput("重采样器尚未 start".into()));
        }
        self.reset_mem();
        self.stream_started = false;
        Ok(())
    }

    fn reset_mem(&mut self) {
        self.last_sample.fill(0);
        self.samp_frac_num.fill(0);
        self.magic_samples.fill(0);
        for ch in &mut self.mem {
            ch.fill(0.0);
        }
    }

    pub fn set_quality(&mut self, quality: u8) -> AudioResult<()> {
        if quality > 10 {
            return Err(AudioError::InvalidInput(format!("重采样质量越界: {quality}")));
        }
        if quality != self.quality {
            self.quality = quality;
            self.update_filter();
        }
        Ok(())
    }

    pub fn set_rate(&mut self, in_rate: u32, out_rate: u32) -> AudioResult<()> {
        if in_rate == 0 || out_rate == 0 {
            return Err(AudioError::InvalidInput(format!(
                "非法采样率: {in_rate} -> {out_rate}"
            )));
        }
        if in_rate == self.in_rate && out_rate == self.out_rate {
            return Ok(());
        }
        let old_den = self.den_rate as u64;
        let fact = gcd(in_rate, out_rate);
        self.in_rate = in_rate;
        self.out_rate = out_rate;
        self.num_rate = in_rate / fact;
        self.den_rate = out_rate / fact;
        let den = self.den_rate as u64;
        for frac in &mut self.samp_frac_num {
            *frac = (*frac * den / old_den).min(den - 1);
        }
        self.update_filter();
        Ok(())
    }

    fn update_filter(&mut self) {
        let old_length = self.filt_len;
        let mapping = &QUALITY_MAP[self.quality as usize];
        let num = self.num_rate as usize;
        let den = self.den_rate as usize;

        let mut filt_len = mapping.base_length;
        if num > den {
            self.cutoff =
                fround(fround(mapping.downsample_bandwidth) * den as f64 / num as f64);
            filt_len = filt_len * num / den;
            filt_len = ((filt_len - 1) & !7) + 8;
            let mut oversample = mapping.oversample;
            for factor in [2, 4, 8, 16] {
                if factor * den < num {
                    oversample >>= 1;
                }
            }
            debug_resampler!("downsampling oversample={}", oversample.max(1));
        } else {
            self.cutoff = fround(mapping.upsample_bandwidth);
        }
        self.filt_len = filt_len;

        let mut table = vec![0.0f32; den * filt_len];
        for i in 0..den {
            for j in 0..filt_len {
                let x = fround(j as f64 - (filt_len / 2) as f64 + 1.0) - fround(i as f64 / den as f64);
                table[i * filt_len + j] = sinc(self.cutoff, x, filt_len, mapping.window);
            }
        }
        self.sinc_table = table;
        self.int_advance = num / den;
        self.frac_advance = (num % den) as u64;

        let min_alloc = filt_len - 1 + BUFFER_SIZE;
        let max_magic = self.magic_samples.iter().copied().max().unwrap_or(0);
        let needed = min_alloc.max(old_length + 2 * max_magic + filt_len);
        if needed > self.mem_alloc_size {
            self.mem_alloc_size = needed;
            for ch in &mut self.mem {
                ch.resize(needed, 0.0);
            }
        }

        if !self.filter_primed {
            for ch in &mut self.mem {
                ch.fill(0.0);
            }
        } else if filt_len > old_length {
            self.grow_memory(old_length);
        } else if filt_len < old_length {
            self.shrink_memory(old_length);
        }
        debug_resampler!(
            "filter updated: {}/{} q={} filt_len={} cutoff={:.4}",
            self.num_rate,
            self.den_rate,
            self.quality,
            self.filt_len,
            self.cutoff
        );
    }

    /// 滤波器变长：尽量还原 magic 样本，再把旧记忆右对齐
    fn grow_memory(&mut self, old_length: usize) {
        let filt_len = self.filt_len;
        for i in 0..self.channels {
            let magic = self.magic_samples[i];
            let mem = &mut self.mem[i];
            let olen = old_length + 2 * magic;
            for j in (0..old_length - 1 + magic).rev() {
                mem[j + magic] = mem[j];
            }
            mem[..magic].fill(0.0);
            self.magic_samples[i] = 0;

            if filt_len > olen {
                for j in 0..olen - 1 {
                    mem[filt_len - 2 - j] = mem[olen - 2 - j];
                }
                for j in olen - 1..filt_len - 1 {
                    mem[filt_len - 2 - j] = 0.0;
                }
                self.last_sample[i] += (filt_len - olen) / 2;
            } else {
                let magic = (olen - filt_len) / 2;
                self.magic_samples[i] = magic;
                mem.copy_within(magic..magic + filt_len - 1 + magic, 0);
            }
        }
    }

    /// 滤波器变短：多出的记忆保存为 magic 样本，下次处理时先消耗
    fn shrink_memory(&mut self, old_length: usize) {
        let filt_len = self.filt_len;
        for i in 0..self.channels {
            let old_magic = self.magic_samples[i];
            let magic = (old_length - filt_len) / 2;
            let count = filt_len - 1 + magic + old_magic;
            self.mem[i].copy_within(magic..magic + count, 0);
            self.magic_samples[i] = magic + old_magic;
        }
    }

    /// 单声道直接查表卷积，输出追加到 `out`
    fn direct_single(&mut self, ch: usize, in_len: usize, out: &mut Vec<f32>) {
        let n = self.filt_len;
        let den = self.den_rate as u64;
        let mem = &self.mem[ch];
        let mut last_sample = self.last_sample[ch];
        let mut frac = self.samp_frac_num[ch];

        while last_sample < in_len {
            let base = frac as usize * n;
            let sinct = &self.sinc_table[base..base + n];
            let iptr = &mem[last_sample..last_sample + n];
            out.push(dot4(sinct, iptr));

            last_sample += self.int_advance;
            frac += self.frac_advance;
            if frac >= den {
                frac -= den;
                last_sample += 1;
            }
        }

        self.last_sample[ch] = last_sample;
        self.samp_frac_num[ch] = frac;
    }

    /// 处理记忆中 `[filt_len-1, filt_len-1+in_len)` 的样本，返回实际消耗数
    fn process_native(&mut self, ch: usize, in_len: usize, out: &mut Vec<f32>) -> usize {
        let n = self.filt_len;
        self.filter_primed = true;
        self.direct_single(ch, in_len, out);
        let consumed = in_len.min(self.last_sample[ch]);
        self.last_sample[ch] -= consumed;
        self.mem[ch].copy_within(consumed..consumed + n - 1, 0);
        consumed
    }

    fn process_magic(&mut self, ch: usize, out: &mut Vec<f32>) {
        let n = self.filt_len;
        let magic = self.magic_samples[ch];
        let consumed = self.process_native(ch, magic, out);
        self.magic_samples[ch] -= consumed;
        let rest = self.magic_samples[ch];
        if rest > 0 {
            let from = n - 1 + consumed;
            self.mem[ch].copy_within(from..from + rest, n - 1);
        }
    }

    fn process_channel(&mut self, ch: usize, input: &[f32], out: &mut Vec<f32>) {
        let filt_offs = self.filt_len - 1;
        let xlen = self.mem_alloc_size - filt_offs;
        if self.magic_samples[ch] > 0 {
            self.process_magic(ch, out);
        }
        let mut remaining = input;
        while !remaining.is_empty() {
            let ichunk = remaining.len().min(xlen);
            self.mem[ch][filt_offs..filt_offs + ichunk].copy_from_slice(&remaining[..ichunk]);
            let consumed = self.process_native(ch, ichunk, out);
            if consumed == 0 {
                // 相位已越过整个块：块内样本只作为滤波记忆
                remaining = &remaining[ichunk..];
            } else {
                remaining = &remaining[consumed..];
            }
        }
    }

    /// 重采样 `length` 个样本（每声道），返回平面输出
    pub fn resample<S: AsRef<[f32]>>(
        &mut self,
        input: &[S],
        length: usize,
    ) -> AudioResult<Vec<Vec<f32>>> {
        if !self.stream_started {
            return Err(AudioError::InvalidInput("重采样器尚未 start".into()));
        }
        if input.len() < self.channels {
            return Err(AudioError::InvalidInput(format!(
                "输入声道数 {} 少于重采样器声道数 {}",
                input.len(),
                self.channels
            )));
        }
        let capacity = self.output_length(length) + 1;
        let mut output = Vec::with_capacity(self.channels);
        for (ch, channel) in input.iter().take(self.channels).enumerate() {
            let channel = channel.as_ref();
            if channel.len() < length {
                return Err(AudioError::InvalidInput(format!(
                    "声道 {ch} 只有 {} 个样本，需要 {length}",
                    channel.len()
                )));
            }
            let mut out = Vec::with_capacity(capacity);
            self.process_channel(ch, &channel[..length], &mut out);
            output.push(out);
        }
        Ok(output)
    }
}

impl Reusable for Resampler {
    fn reset(&mut self) {
        if self.stream_started {
            self.reset_mem();
            self.stream_started = false;
        }
    }

    fn on_lend(&mut self) {
        self.stream_started = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, rate: f64, len: usize, amp: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amp * (2.0 * PI * freq * i as f64 / rate).sin() as f32)
            .collect()
    }

    fn rms(x: &[f32]) -> f64 {
        (x.iter().map(|&v| (v as f64).powi(2)).sum::<f64>() / x.len() as f64).sqrt()
    }

    #[test]
    fn test_ratio_reduced() {
        let r = Resampler::new(2, 44100, 48000, 4).unwrap();
        assert_eq!(r.ratio(), (147, 160));
        assert_eq!(r.filter_length(), 64);
        let d = Resampler::new(1, 44100, 11025, 0).unwrap();
        assert_eq!(d.ratio(), (4, 1));
        assert_eq!(d.filter_length(), 32);
    }

    #[test]
    fn test_cutoff_is_single_precision() {
        let d = Resampler::new(1, 44100, 11025, 0).unwrap();
        assert_eq!(d.cutoff, d.cutoff as f32 as f64);
        assert_eq!(d.cutoff as f32, 0.83f32 / 4.0);
        let u = Resampler::new(1, 44100, 48000, 4).unwrap();
        assert_eq!(u.cutoff, 0.94f32 as f64);
    }

    #[test]
    fn test_dot_product_accumulates_in_double() {
        // 单精度逐次累加会把 1 + 4e-8 吞掉；双精度累加保留到最终舍入
        let tiny = 4e-8f32;
        let mut sinct = vec![0.0f32; 16];
        sinct[0] = 1.0;
        sinct[4] = tiny;
        sinct[8] = tiny;
        sinct[12] = tiny;
        let ones = vec![1.0f32; 16];
        let got = dot4(&sinct, &ones);
        assert_eq!(got, (1.0f64 + 3.0 * tiny as f64) as f32);
        assert!(got > 1.0);
    }

    #[test]
    fn test_length_law_single_call() {
        for (inr, outr, q) in [(44100, 48000, 4), (48000, 44100, 3), (44100, 11025, 0), (22050, 44100, 6)] {
            let mut r = Resampler::new(1, inr, outr, q).unwrap();
            r.start().unwrap();
            let input = sine(440.0, inr as f64, 10_000, 0.5);
            let out = r.resample(&[input], 10_000).unwrap();
            assert_eq!(out[0].len(), r.output_length(10_000), "{inr}->{outr}");
        }
    }

    #[test]
    fn test_split_calls_bit_identical() {
        let input = sine(1000.0, 44100.0, 9_000, 0.8);
        let mut whole = Resampler::new(1, 44100, 48000, 5).unwrap();
        whole.start().unwrap();
        let expected = whole.resample(&[&input[..]], input.len()).unwrap();

        let mut split = Resampler::new(1, 44100, 48000, 5).unwrap();
        split.start().unwrap();
        let mut got = Vec::new();
        for chunk in [&input[..1234], &input[1234..1300], &input[1300..]] {
            got.extend(split.resample(&[chunk], chunk.len()).unwrap().remove(0));
        }
        assert_eq!(got.len(), expected[0].len());
        assert!(got.iter().zip(&expected[0]).all(|(a, b)| a.to_bits() == b.to_bits()));
    }

    #[test]
    fn test_downsample_preserves_level() {
        let mut r = Resampler::new(1, 44100, 11025, 0).unwrap();
        r.start().unwrap();
        let input = sine(200.0, 44100.0, 44100, 0.5);
        let out = r.resample(&[input], 44100).unwrap();
        let steady = &out[0][1000..10_000];
        let level = rms(steady);
        assert!((level - 0.5 / 2f64.sqrt()).abs() < 0.02, "rms {level}");
    }

    #[test]
    fn test_end_resets_state() {
        let input = sine(300.0, 48000.0, 3000, 0.3);
        let mut r = Resampler::new(1, 48000, 44100, 2).unwrap();
        r.start().unwrap();
        let first = r.resample(&[&input[..]], 3000).unwrap();
        r.end().unwrap();
        r.start().unwrap();
        let again = r.resample(&[&input[..]], 3000).unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn test_start_end_misuse() {
        let mut r = Resampler::new(2, 44100, 48000, 1).unwrap();
        assert!(r.end().is_err());
        assert!(r.resample(&[vec![0.0f32; 4], vec![0.0; 4]], 4).is_err());
        r.start().unwrap();
        assert!(r.start().is_err());
        assert!(r.resample(&[vec![0.0f32; 4]], 4).is_err());
        assert!(Resampler::new(1, 0, 44100, 1).is_err());
        assert!(Resampler::new(1, 44100, 48000, 11).is_err());
    }

    #[test]
    fn test_quality_change_mid_stream() {
        let input = sine(500.0, 44100.0, 20_000, 0.5);
        let mut r = Resampler::new(1, 44100, 48000, 8).unwrap();
        r.start().unwrap();
        let mut out = r.resample(&[&input[..5000]], 5000).unwrap().remove(0);
        r.set_quality(2).unwrap();
        out.extend(r.resample(&[&input[5000..10_000]], 5000).unwrap().remove(0));
        r.set_quality(9).unwrap();
        out.extend(r.resample(&[&input[10_000..]], 10_000).unwrap().remove(0));
        assert!(out.iter().all(|v| v.is_finite()));
        let expected = r.output_length(20_000) as i64;
        assert!((out.len() as i64 - expected).abs() < 300, "{} vs {expected}", out.len());
    }

    #[test]
    fn test_rate_change_mid_stream() {
        let input = sine(500.0, 44100.0, 8000, 0.5);
        let mut r = Resampler::new(1, 44100, 48000, 3).unwrap();
        r.start().unwrap();
        let a = r.resample(&[&input[..4000]], 4000).unwrap().remove(0);
        r.set_rate(44100, 22050).unwrap();
        let b = r.resample(&[&input[4000..]], 4000).unwrap().remove(0);
        assert!(a.len() > 4000);
        assert!(b.len() > 1800 && b.len() < 2200, "{}", b.len());
        assert!(b.iter().all(|v| v.is_finite()));
    }
}
