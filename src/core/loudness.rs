//! EBU R128 响度测量
//!
//! K 计权后按 100 ms 粒度保存环形历史，每满 400 ms 计算一个门限块，
//! 之后每 100 ms 再算一个。积分响度使用绝对门限 -70 LUFS 与相对门限 -10 LU。
//! 另外跟踪样本峰值、真峰值、首尾静音长度，可选短时响度与响度范围（LRA）。

use super::k_filter::KWeighting;
use super::true_peak::TruePeakInterpolator;
use crate::error::{AudioError, AudioResult};
use crate::tools::constants::loudness as consts;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

#[cfg(debug_assertions)]
macro_rules! debug_loudness {
    ($($arg:tt)*) => {
        tracing::debug!(target: "loudness", $($arg)*)
    };
}

#[cfg(not(debug_assertions))]
macro_rules! debug_loudness {
    ($($arg:tt)*) => {};
}

const HISTOGRAM_BUCKETS: usize = 1000;

/// 直方图桶边界，`[0]` 即绝对门限能量
static HISTOGRAM_BOUNDARIES: LazyLock<[f64; HISTOGRAM_BUCKETS + 1]> = LazyLock::new(|| {
    let mut b = [0.0; HISTOGRAM_BUCKETS + 1];
    b[0] = 10f64.powf((consts::ABSOLUTE_GATE_LUFS + 0.691) / 10.0);
    for (i, v) in b.iter_mut().enumerate().skip(1) {
        *v = 10f64.powf((i as f64 / 10.0 + consts::ABSOLUTE_GATE_LUFS + 0.691) / 10.0);
    }
    b
});

/// 每个桶的代表能量（桶中点）
static HISTOGRAM_ENERGIES: LazyLock<[f64; HISTOGRAM_BUCKETS]> = LazyLock::new(|| {
    let mut e = [0.0; HISTOGRAM_BUCKETS];
    for (i, v) in e.iter_mut().enumerate() {
        *v = 10f64.powf((i as f64 / 10.0 - 69.95 + 0.691) / 10.0);
    }
    e
});

#[inline]
fn absolute_gate_energy() -> f64 {
    HISTOGRAM_BOUNDARIES[0]
}

/// 能量 → LUFS
#[inline]
pub fn energy_to_loudness(energy: f64) -> f64 {
    10.0 * energy.log10() - 0.691
}

fn histogram_index(energy: f64) -> usize {
    let (mut lo, mut hi) = (0usize, HISTOGRAM_BUCKETS);
    while hi - lo != 1 {
        let mid = (lo + hi) / 2;
        if energy >= HISTOGRAM_BOUNDARIES[mid] {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}

/// 声道在响度加权中的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRole {
    Unused,
    Left,
    Right,
    Center,
    LeftSurround,
    RightSurround,
    DualMono,
}

impl ChannelRole {
    fn weight(self) -> f64 {
        match self {
            Self::Unused => 0.0,
            Self::LeftSurround | Self::RightSurround => 1.41,
            Self::DualMono => 2.0,
            _ => 1.0,
        }
    }
}

/// 默认声道映射
pub fn default_channel_map(channels: usize) -> Vec<ChannelRole> {
    use ChannelRole::*;
    match channels {
        4 => vec![Left, Right, LeftSurround, RightSurround],
        5 => vec![Left, Right, Center, LeftSurround, RightSurround],
        n => (0..n)
            .map(|i| match i {
                0 => Left,
                1 => Right,
                2 => Center,
                4 => LeftSurround,
                5 => RightSurround,
                _ => Unused,
            })
            .collect(),
    }
}

/// 门限块能量的存储方式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum BlockEnergies {
    List(Vec<f64>),
    Histogram(Vec<u32>),
}

impl BlockEnergies {
    fn new(histogram: bool) -> Self {
        if histogram {
            Self::Histogram(vec![0; HISTOGRAM_BUCKETS])
        } else {
            Self::List(Vec::new())
        }
    }

    /// 低于绝对门限的块直接丢弃
    fn push(&mut self, energy: f64) {
        if energy < absolute_gate_energy() {
            return;
        }
        match self {
            Self::List(list) => list.push(energy),
            Self::Histogram(hist) => hist[histogram_index(energy)] += 1,
        }
    }

    /// 已保存的块数
    pub fn count(&self) -> u64 {
        match self {
            Self::List(list) => list.len() as u64,
            Self::Histogram(hist) => hist.iter().map(|&c| c as u64).sum(),
        }
    }

    /// （能量和，块数）
    fn sum_above(&self, threshold: f64, start_index: usize) -> (f64, u64) {
        match self {
            Self::List(list) => list
                .iter()
                .filter(|&&e| e >= threshold)
                .fold((0.0, 0), |(s, n), &e| (s + e, n + 1)),
            Self::Histogram(hist) => hist
                .iter()
                .zip(HISTOGRAM_ENERGIES.iter())
                .skip(start_index)
                .fold((0.0, 0), |(s, n), (&c, &e)| (s + c as f64 * e, n + c as u64)),
        }
    }
}

/// 多组门限块合并后的积分响度（LUFS），无有效块时为 -∞
pub fn gated_loudness(sources: &[&BlockEnergies]) -> f64 {
    let (total, count) = sources.iter().fold((0.0, 0u64), |(s, n), b| {
        let (bs, bn) = b.sum_above(f64::NEG_INFINITY, 0);
        (s + bs, n + bn)
    });
    if count == 0 {
        return f64::NEG_INFINITY;
    }
    let relative_threshold = total / count as f64 * consts::RELATIVE_GATE_FACTOR;

    let start_index = if relative_threshold < absolute_gate_energy() {
        0
    } else {
        let idx = histogram_index(relative_threshold);
        if relative_threshold > HISTOGRAM_ENERGIES[idx] {
            idx + 1
        } else {
            idx
        }
    };

    let (gated, above) = sources.iter().fold((0.0, 0u64), |(s, n), b| {
        let (bs, bn) = b.sum_above(relative_threshold, start_index);
        (s + bs, n + bn)
    });
    if above == 0 {
        return f64::NEG_INFINITY;
    }
    energy_to_loudness(gated / above as f64)
}

/// 短时块能量的响度范围（LU）
pub fn loudness_range(sources: &[&BlockEnergies]) -> f64 {
    let mut list = Vec::new();
    let mut hist = [0u64; HISTOGRAM_BUCKETS];
    let mut any_histogram = false;
    for source in sources {
        match source {
            BlockEnergies::List(l) => list.extend_from_slice(l),
            BlockEnergies::Histogram(h) => {
                any_histogram = true;
                for (dst, &c) in hist.iter_mut().zip(h) {
                    *dst += c as u64;
                }
            }
        }
    }

    if any_histogram {
        // 列表中的能量并入直方图统一处理
        for &e in &list {
            if e >= absolute_gate_energy() {
                hist[histogram_index(e)] += 1;
            }
        }
        return histogram_loudness_range(&hist);
    }

    if list.is_empty() {
        return 0.0;
    }
    let mean = list.iter().sum::<f64>() / list.len() as f64;
    let gate = mean * consts::LRA_RELATIVE_GATE_FACTOR;
    let mut gated: Vec<f64> = list.into_iter().filter(|&e| e >= gate).collect();
    if gated.is_empty() {
        return 0.0;
    }
    gated.sort_by(f64::total_cmp);
    let n = gated.len() - 1;
    let lo = (n as f64 * consts::LRA_LOWER_PERCENTILE + 0.5) as usize;
    let hi = (n as f64 * consts::LRA_UPPER_PERCENTILE + 0.5) as usize;
    energy_to_loudness(gated[hi]) - energy_to_loudness(gated[lo])
}

fn histogram_loudness_range(hist: &[u64; HISTOGRAM_BUCKETS]) -> f64 {
    let size: u64 = hist.iter().sum();
    if size == 0 {
        return 0.0;
    }
    let power: f64 = hist
        .iter()
        .zip(HISTOGRAM_ENERGIES.iter())
        .map(|(&c, &e)| c as f64 * e)
        .sum();
    let gate = power / size as f64 * consts::LRA_RELATIVE_GATE_FACTOR;
    let mut index = histogram_index(gate);
    if gate > HISTOGRAM_ENERGIES[index] {
        index += 1;
    }
    let gated_size: u64 = hist[index..].iter().sum();
    if gated_size == 0 {
        return 0.0;
    }
    let n = (gated_size - 1) as f64;
    let lo = (n * consts::LRA_LOWER_PERCENTILE + 0.5) as u64;
    let hi = (n * consts::LRA_UPPER_PERCENTILE + 0.5) as u64;

    let mut cumulative = 0u64;
    let mut low_energy = None;
    let mut high_energy = HISTOGRAM_ENERGIES[HISTOGRAM_BUCKETS - 1];
    for (j, &c) in hist.iter().enumerate().skip(index) {
        cumulative += c;
        if low_energy.is_none() && cumulative > lo {
            low_energy = Some(HISTOGRAM_ENERGIES[j]);
        }
        if cumulative > hi {
            high_energy = HISTOGRAM_ENERGIES[j];
            break;
        }
    }
    let low_energy = low_energy.unwrap_or(high_energy);
    energy_to_loudness(high_energy) - energy_to_loudness(low_energy)
}

/// 测量选项
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoudnessConfig {
    /// 保留 3 s 历史，启用短时响度
    pub short_term: bool,
    /// 收集短时块计算 LRA（隐含 short_term）
    pub loudness_range: bool,
    pub true_peak: bool,
    /// 门限块用 1000 桶直方图代替列表
    pub histogram: bool,
}

impl Default for LoudnessConfig {
    fn default() -> Self {
        Self {
            short_term: false,
            loudness_range: false,
            true_peak: true,
            histogram: false,
        }
    }
}

/// 单曲响度结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoudnessResult {
    /// 参考电平 -18 LUFS 减去积分响度；全静音时为 None
    pub track_gain_db: Option<f64>,
    pub integrated_lufs: Option<f64>,
    /// 各声道 max(真峰值, 样本峰值) 的最大值
    pub true_peak: f64,
    pub sample_peak: f64,
    pub loudness_range_lu: Option<f64>,
    pub begin_silence_seconds: f64,
    pub end_silence_seconds: f64,
}

/// 可合并的测量摘要，用于专辑响度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoudnessSummary {
    pub sample_rate: u32,
    pub channels: usize,
    pub sample_peak: f64,
    pub true_peak: f64,
    pub blocks: BlockEnergies,
}

/// 多个摘要合并计算的积分响度
pub fn gated_loudness_of(summaries: &[LoudnessSummary]) -> f64 {
    let sources: Vec<&BlockEnergies> = summaries.iter().map(|s| &s.blocks).collect();
    gated_loudness(&sources)
}

#[derive(Debug, Clone, Default)]
struct SilenceTracker {
    run_started: Option<u64>,
    begin: u64,
}

/// 流式 EBU R128 测量器
#[derive(Debug, Clone)]
pub struct LoudnessMeter {
    config: LoudnessConfig,
    channels: usize,
    sample_rate: u32,
    roles: Vec<ChannelRole>,

    filter: KWeighting,
    filter_states: Vec<[f64; 5]>,
    interpolator: Option<TruePeakInterpolator>,
    sample_peak: Vec<f32>,
    true_peak: Vec<f32>,

    samples_in_100ms: usize,
    needed_frames: usize,
    audio_data: Vec<Vec<f64>>,
    audio_data_index: usize,
    audio_data_frames: usize,

    blocks: BlockEnergies,
    short_term_blocks: BlockEnergies,
    short_term_frame_counter: usize,

    silence: SilenceTracker,
    /// 已处理的样本帧数
    current_frame: u64,
}

impl LoudnessMeter {
    pub fn new(channels: usize, sample_rate: u32, config: LoudnessConfig) -> AudioResult<Self> {
        if channels == 0 {
            return Err(AudioError::InvalidInput("响度测量声道数不能为 0".into()));
        }
        if sample_rate < 16 {
            return Err(AudioError::InvalidInput(format!("非法采样率: {sample_rate}")));
        }
        let samples_in_100ms = (sample_rate as usize + 5) / 10;
        let keeps_short_term = config.short_term || config.loudness_range;
        let audio_data_frames = samples_in_100ms * if keeps_short_term { 30 } else { 4 };

        debug_loudness!(
            "meter: {channels}ch @{sample_rate}Hz, history={audio_data_frames} frames, {config:?}"
        );

        Ok(Self {
            config,
            channels,
            sample_rate,
            roles: default_channel_map(channels),
            filter: KWeighting::new(sample_rate),
            filter_states: vec![[0.0; 5]; channels],
            interpolator: config
                .true_peak
                .then(|| TruePeakInterpolator::new(channels, sample_rate)),
            sample_peak: vec![0.0; channels],
            true_peak: vec![0.0; channels],
            samples_in_100ms,
            needed_frames: samples_in_100ms * 4,
            audio_data: vec![vec![0.0; audio_data_frames]; channels],
            audio_data_index: 0,
            audio_data_frames,
            blocks: BlockEnergies::new(config.histogram),
            short_term_blocks: BlockEnergies::new(config.histogram),
            short_term_frame_counter: 0,
            silence: SilenceTracker::default(),
            current_frame: 0,
        })
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// 已处理时长（秒）
    pub fn duration(&self) -> f64 {
        self.current_frame as f64 / self.sample_rate as f64
    }

    pub fn set_channel_role(&mut self, channel: usize, role: ChannelRole) -> AudioResult<()> {
        let slot = self
            .roles
            .get_mut(channel)
            .ok_or_else(|| AudioError::InvalidInput(format!("声道索引越界: {channel}")))?;
        *slot = role;
        Ok(())
    }

    /// 送入平面样本，每声道 `frames` 个
    pub fn add_frames<S: AsRef<[f32]>>(&mut self, src: &[S], frames: usize) -> AudioResult<()> {
        if src.len() < self.channels {
            return Err(AudioError::InvalidInput(format!(
                "输入声道数 {} 少于测量声道数 {}",
                src.len(),
                self.channels
            )));
        }
        let planes: Vec<&[f32]> = src[..self.channels].iter().map(AsRef::as_ref).collect();
        if let Some(short) = planes.iter().position(|p| p.len() < frames) {
            return Err(AudioError::InvalidInput(format!(
                "声道 {short} 样本不足 {frames}"
            )));
        }

        let mut index = 0;
        let mut remaining = frames;
        while remaining > 0 {
            if remaining >= self.needed_frames {
                let n = self.needed_frames;
                self.filter_frames(&planes, index, n);
                index += n;
                remaining -= n;
                self.audio_data_index += n;

                let block = self.energy_in_interval(self.samples_in_100ms * 4);
                self.blocks.push(block);

                if self.config.loudness_range {
                    self.short_term_frame_counter += n;
                    if self.short_term_frame_counter == self.samples_in_100ms * 30 {
                        let st = self.energy_in_interval(self.samples_in_100ms * 30);
                        self.short_term_blocks.push(st);
                        self.short_term_frame_counter = self.samples_in_100ms * 20;
                    }
                }

                self.check_silence(block);
                self.current_frame += n as u64;
                self.needed_frames = self.samples_in_100ms;
                if self.audio_data_index == self.audio_data_frames {
                    self.audio_data_index = 0;
                }
            } else {
                self.filter_frames(&planes, index, remaining);
                self.audio_data_index += remaining;
                if self.config.loudness_range {
                    self.short_term_frame_counter += remaining;
                }
                self.current_frame += remaining as u64;
                self.needed_frames -= remaining;
                remaining = 0;
            }
        }
        Ok(())
    }

    fn filter_frames(&mut self, planes: &[&[f32]], start: usize, len: usize) {
        let end = start + len;
        for (c, plane) in planes.iter().enumerate() {
            let input = &plane[start..end];

            let peak = input.iter().fold(0.0f32, |m, v| m.max(v.abs()));
            self.sample_peak[c] = self.sample_peak[c].max(peak);

            if let Some(interp) = self.interpolator.as_mut() {
                let tp = interp.process(c, input);
                self.true_peak[c] = self.true_peak[c].max(tp);
            }

            let dst = &mut self.audio_data[c][self.audio_data_index..self.audio_data_index + len];
            self.filter.process(&mut self.filter_states[c], input, dst);
        }
    }

    /// 最近 `interval` 帧的加权均方能量
    fn energy_in_interval(&self, interval: usize) -> f64 {
        let idx = self.audio_data_index;
        let mut sum = 0.0;
        for (data, role) in self.audio_data.iter().zip(&self.roles) {
            if *role == ChannelRole::Unused {
                continue;
            }
            let square = |s: &[f64]| s.iter().map(|v| v * v).sum::<f64>();
            let channel_sum = if idx < interval {
                square(&data[..idx]) + square(&data[self.audio_data_frames - (interval - idx)..])
            } else {
                square(&data[idx - interval..idx])
            };
            sum += channel_sum * role.weight();
        }
        sum / interval as f64
    }

    fn check_silence(&mut self, block_energy: f64) {
        let momentary = if block_energy <= 0.0 {
            f64::NEG_INFINITY
        } else {
            energy_to_loudness(block_energy)
        };
        if momentary < consts::SILENCE_THRESHOLD_LUFS {
            if self.silence.run_started.is_none() {
                self.silence.run_started = Some(self.current_frame);
            }
        } else if let Some(started) = self.silence.run_started.take()
            && started == 0
        {
            self.silence.begin = self.current_frame;
        }
    }

    /// 瞬时响度（400 ms）
    pub fn loudness_momentary(&self) -> f64 {
        let e = self.energy_in_interval(self.samples_in_100ms * 4);
        if e <= 0.0 { f64::NEG_INFINITY } else { energy_to_loudness(e) }
    }

    /// 短时响度（3 s），需要启用 short_term 或 loudness_range
    pub fn loudness_shortterm(&self) -> AudioResult<f64> {
        let interval = self.samples_in_100ms * 30;
        if interval > self.audio_data_frames {
            return Err(AudioError::CalculationError("未启用短时响度历史".into()));
        }
        let e = self.energy_in_interval(interval);
        Ok(if e <= 0.0 { f64::NEG_INFINITY } else { energy_to_loudness(e) })
    }

    /// 积分响度（LUFS）
    pub fn loudness_global(&self) -> f64 {
        gated_loudness(&[&self.blocks])
    }

    pub fn loudness_range(&self) -> AudioResult<f64> {
        if !self.config.loudness_range {
            return Err(AudioError::CalculationError("未启用响度范围统计".into()));
        }
        Ok(loudness_range(&[&self.short_term_blocks]))
    }

    pub fn sample_peaks(&self) -> Vec<f64> {
        self.sample_peak.iter().map(|&p| p as f64).collect()
    }

    /// 每声道 max(真峰值, 样本峰值)
    pub fn true_peaks(&self) -> Vec<f64> {
        self.sample_peak
            .iter()
            .zip(&self.true_peak)
            .map(|(&s, &t)| s.max(t) as f64)
            .collect()
    }

    /// （开头静音, 结尾静音），单位秒
    pub fn silence(&self) -> (f64, f64) {
        let sr = self.sample_rate as f64;
        match self.silence.run_started {
            Some(0) => {
                let total = self.current_frame as f64 / sr;
                (total, total)
            }
            Some(started) => (
                self.silence.begin as f64 / sr,
                (self.current_frame - started) as f64 / sr,
            ),
            None => (self.silence.begin as f64 / sr, 0.0),
        }
    }

    pub fn result(&self) -> LoudnessResult {
        let integrated = self.loudness_global();
        let integrated = integrated.is_finite().then_some(integrated);
        let (begin, end) = self.silence();
        let max = |v: Vec<f64>| v.into_iter().fold(0.0f64, f64::max);
        LoudnessResult {
            track_gain_db: integrated.map(|l| consts::REFERENCE_LUFS - l),
            integrated_lufs: integrated,
            true_peak: max(self.true_peaks()),
            sample_peak: max(self.sample_peaks()),
            loudness_range_lu: self.loudness_range().ok(),
            begin_silence_seconds: begin,
            end_silence_seconds: end,
        }
    }

    pub fn summary(&self) -> LoudnessSummary {
        let max = |v: Vec<f64>| v.into_iter().fold(0.0f64, f64::max);
        LoudnessSummary {
            sample_rate: self.sample_rate,
            channels: self.channels,
            sample_peak: max(self.sample_peaks()),
            true_peak: max(self.true_peaks()),
            blocks: self.blocks.clone(),
        }
    }
}
