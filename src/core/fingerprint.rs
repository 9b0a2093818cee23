//! 声学指纹（Chromaprint 算法 1 兼容）
//!
//! 11025 Hz 单声道输入，4096 点汉明窗 + 实数 FFT，频点能量折叠到 12 个半音，
//! 5 帧加权平滑后得到色度图像；在积分图上运行 16 个分类器，
//! 每行得到一个 32 位子指纹，差分压缩后以 URL 安全 base64 输出。

use crate::error::{AudioError, AudioResult, calculation_error};
use crate::tools::constants::fingerprint as consts;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use std::f64::consts::PI;
use std::sync::Arc;

#[cfg(debug_assertions)]
macro_rules! debug_fingerprint {
    ($($arg:tt)*) => {
        tracing::debug!(target: "fingerprint", $($arg)*)
    };
}

#[cfg(not(debug_assertions))]
macro_rules! debug_fingerprint {
    ($($arg:tt)*) => {};
}

const NOTES: usize = 12;
const RING: usize = 8;
const SMOOTHING: [f64; 5] = [0.25, 0.75, 1.0, 0.75, 0.25];
const NOTE_BASE_FREQUENCY: f64 = 27.5;
const MIN_ROW_NORM: f64 = 0.01;
const MAX_SAMPLES: usize = consts::MAX_DURATION_SECONDS * consts::SAMPLE_RATE as usize;

type Row = [f64; NOTES];

#[derive(Debug, Clone, Copy)]
struct Classifier {
    kind: u8,
    y: usize,
    h: usize,
    w: usize,
    t: [f64; 3],
}

const fn c(kind: u8, y: usize, h: usize, w: usize, t0: f64, t1: f64, t2: f64) -> Classifier {
    Classifier {
        kind,
        y,
        h,
        w,
        t: [t0, t1, t2],
    }
}

#[rustfmt::skip]
static CLASSIFIERS: [Classifier; 16] = [
    c(0, 4, 3, 15, 1.98215, 2.35817, 2.63523),
    c(4, 4, 6, 15, -1.03809, -0.651211, -0.282167),
    c(1, 0, 4, 16, -0.298702, 0.119262, 0.558497),
    c(3, 8, 2, 12, -0.105439, 0.0153946, 0.135898),
    c(3, 4, 4, 8, -0.142891, 0.0258736, 0.200632),
    c(4, 0, 3, 5, -0.826319, -0.590612, -0.368214),
    c(1, 2, 2, 9, -0.557409, -0.233035, 0.0534525),
    c(2, 7, 3, 4, -0.0646826, 0.00620476, 0.0784847),
    c(2, 6, 2, 16, -0.192387, -0.029699, 0.215855),
    c(2, 1, 3, 2, -0.0397818, -0.00568076, 0.0292026),
    c(5, 10, 1, 15, -0.53823, -0.369934, -0.190235),
    c(3, 6, 2, 10, -0.124877, 0.0296483, 0.139239),
    c(2, 1, 1, 14, -0.101475, 0.0225617, 0.231971),
    c(3, 5, 6, 4, -0.0799915, -0.00729616, 0.063262),
    c(1, 9, 2, 12, -0.272556, 0.019424, 0.302559),
    c(3, 4, 2, 14, -0.164292, -0.0321188, 0.08463),
];

/// 分类器覆盖的最大行宽
const CLASSIFIER_SPAN: usize = 16;

/// 行 = 时间，列 = 半音；`area` 两端都包含
struct IntegralImage {
    data: Vec<Row>,
}

impl IntegralImage {
    fn new(rows: &[Row]) -> Self {
        let mut data = rows.to_vec();
        for x in 0..data.len() {
            for y in 0..NOTES {
                let mut v = data[x][y];
                if y > 0 {
                    v += data[x][y - 1];
                }
                if x > 0 {
                    v += data[x - 1][y];
                    if y > 0 {
                        v -= data[x - 1][y - 1];
                    }
                }
                data[x][y] = v;
            }
        }
        Self { data }
    }

    fn area(&self, x1: usize, y1: usize, x2: usize, y2: usize) -> f64 {
        if x2 < x1 || y2 < y1 {
            return 0.0;
        }
        let mut area = self.data[x2][y2];
        if x1 > 0 {
            area -= self.data[x1 - 1][y2];
            if y1 > 0 {
                area += self.data[x1 - 1][y1 - 1];
            }
        }
        if y1 > 0 {
            area -= self.data[x2][y1 - 1];
        }
        area
    }
}

#[inline]
fn compare(a: f64, b: f64) -> f64 {
    (1.0 + a).ln() - (1.0 + b).ln()
}

/// 灰码量化
#[inline]
fn quantize(value: f64, t: &[f64; 3]) -> u32 {
    if value < t[1] {
        if value < t[0] { 0 } else { 1 }
    } else if value < t[2] {
        3
    } else {
        2
    }
}

impl Classifier {
    fn classify(&self, image: &IntegralImage, x: usize) -> u32 {
        let Self { y, h, w, .. } = *self;
        let area = |x1, y1, x2, y2| image.area(x1, y1, x2, y2);
        let value = match self.kind {
            0 => compare(area(x, y, x + w - 1, y + h - 1), 0.0),
            1 => {
                let h2 = h / 2;
                compare(
                    area(x, y + h2, x + w - 1, y + h - 1),
                    area(x, y, x + w - 1, y + h2 - 1),
                )
            }
            2 => {
                let w2 = w / 2;
                compare(
                    area(x + w2, y, x + w - 1, y + h - 1),
                    area(x, y, x + w2 - 1, y + h - 1),
                )
            }
            3 => {
                let (h2, w2) = (h / 2, w / 2);
                let a = area(x, y + h2, x + w2 - 1, y + h - 1)
                    + area(x + w2, y, x + w - 1, y + h2 - 1);
                let b = area(x, y, x + w2 - 1, y + h2 - 1)
                    + area(x + w2, y + h2, x + w - 1, y + h - 1);
                compare(a, b)
            }
            4 => {
                let h3 = h / 3;
                let a = area(x, y + h3, x + w - 1, y + 2 * h3 - 1);
                let b = area(x, y, x + w - 1, y + h3 - 1)
                    + area(x, y + 2 * h3, x + w - 1, y + h - 1);
                compare(a, b)
            }
            _ => {
                let w3 = w / 3;
                let a = area(x + w3, y, x + 2 * w3 - 1, y + h - 1);
                let b = area(x, y, x + w3 - 1, y + h - 1)
                    + area(x + 2 * w3, y, x + w - 1, y + h - 1);
                compare(a, b)
            }
        };
        quantize(value, &self.t)
    }
}

/// 流式指纹计算器
pub struct Fingerprinter {
    fft: Arc<dyn RealToComplex<f64>>,
    fft_input: Vec<f64>,
    spectrum: Vec<Complex<f64>>,
    window: Vec<f64>,
    note_of_bin: Vec<usize>,

    pending: Vec<f32>,
    frames_processed: usize,

    note_ring: [Row; RING],
    ring_index: usize,
    frames_seen: usize,
    image: Vec<Row>,
}

impl std::fmt::Debug for Fingerprinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fingerprinter")
            .field("frames_processed", &self.frames_processed)
            .field("rows", &self.image.len())
            .finish()
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

impl Fingerprinter {
    pub fn new() -> Self {
        let n = consts::FRAME_SIZE;
        let fft = RealFftPlanner::<f64>::new().plan_fft_forward(n);
        let fft_input = fft.make_input_vec();
        let spectrum = fft.make_output_vec();
        let window = (0..n)
            .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / n as f64).cos())
            .collect();
        let note_of_bin = (consts::MIN_BIN..consts::MAX_BIN)
            .map(|bin| {
                let freq = bin as f64 * consts::SAMPLE_RATE as f64 / n as f64;
                let octave = (freq / NOTE_BASE_FREQUENCY).log2();
                ((NOTES as f64 * (octave - octave.floor())) as usize).min(NOTES - 1)
            })
            .collect();

        Self {
            fft,
            fft_input,
            spectrum,
            window,
            note_of_bin,
            pending: Vec::with_capacity(n * 2),
            frames_processed: 0,
            note_ring: [[0.0; NOTES]; RING],
            ring_index: 0,
            frames_seen: 0,
            image: Vec::new(),
        }
    }

    /// 已接受的样本数
    #[inline]
    pub fn frames_processed(&self) -> usize {
        self.frames_processed
    }

    /// 色度图像行数
    #[inline]
    pub fn rows(&self) -> usize {
        self.image.len()
    }

    /// 还没收满 120 秒
    pub fn needs_samples(&self) -> bool {
        self.frames_processed < MAX_SAMPLES
    }

    /// 已收到超过 7 秒
    pub fn can_calculate(&self) -> bool {
        self.frames_processed > consts::MIN_DURATION_SECONDS * consts::SAMPLE_RATE as usize
    }

    /// 送入 11025 Hz 单声道样本，返回实际接受的数量（超出 120 秒的部分丢弃）
    pub fn feed(&mut self, samples: &[f32]) -> AudioResult<usize> {
        let accepted = samples.len().min(MAX_SAMPLES - self.frames_processed);
        self.pending.extend_from_slice(&samples[..accepted]);
        self.frames_processed += accepted;

        let mut consumed = 0;
        while self.pending.len() - consumed >= consts::FRAME_SIZE {
            self.process_frame(consumed)?;
            consumed += consts::HOP_SIZE;
        }
        self.pending.drain(..consumed);
        Ok(accepted)
    }

    fn process_frame(&mut self, start: usize) -> AudioResult<()> {
        let frame = &self.pending[start..start + consts::FRAME_SIZE];
        for ((dst, &x), &w) in self.fft_input.iter_mut().zip(frame).zip(&self.window) {
            *dst = x as f64 * w;
        }
        self.fft
            .process(&mut self.fft_input, &mut self.spectrum)
            .map_err(|e| calculation_error("FFT失败", e))?;

        let notes = &mut self.note_ring[self.ring_index];
        *notes = [0.0; NOTES];
        for (bin, &note) in (consts::MIN_BIN..consts::MAX_BIN).zip(&self.note_of_bin) {
            let c = self.spectrum[bin];
            notes[note] += c.re * c.re + c.im * c.im;
        }
        self.ring_index = (self.ring_index + 1) & (RING - 1);

        if self.frames_seen >= SMOOTHING.len() - 1 {
            self.emit_row();
        } else {
            self.frames_seen += 1;
        }
        Ok(())
    }

    fn emit_row(&mut self) {
        let offset = (self.ring_index + 3) & (RING - 1);
        let mut row = [0.0; NOTES];
        for (i, value) in row.iter_mut().enumerate() {
            for (j, coeff) in SMOOTHING.iter().enumerate() {
                *value += self.note_ring[(offset + j) & (RING - 1)][i] * coeff;
            }
        }
        let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm < MIN_ROW_NORM {
            row = [0.0; NOTES];
        } else {
            for v in &mut row {
                *v /= norm;
            }
        }
        self.image.push(row);
    }

    /// 未压缩的子指纹序列
    pub fn calculate_raw(&self) -> AudioResult<Vec<u32>> {
        let rows = self.image.len();
        if rows < CLASSIFIER_SPAN + 1 {
            return Err(AudioError::CalculationError(format!(
                "InsufficientLength: 色度图只有 {rows} 行"
            )));
        }
        let integral = IntegralImage::new(&self.image);
        let length = rows - CLASSIFIER_SPAN + 1;
        let fingerprint = (0..length)
            .map(|x| {
                CLASSIFIERS
                    .iter()
                    .fold(0u32, |acc, c| (acc << 2) | c.classify(&integral, x))
            })
            .collect();
        Ok(fingerprint)
    }

    /// 压缩后的 base64 指纹
    pub fn calculate(&self) -> AudioResult<String> {
        let raw = self.calculate_raw()?;
        debug_fingerprint!("{} sub-fingerprints from {} rows", raw.len(), self.image.len());
        Ok(URL_SAFE_NO_PAD.encode(compress(&raw)))
    }
}

/// `[算法号][长度 3 字节大端][3 位正常值][5 位异常值]`
pub fn compress(fingerprint: &[u32]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(fingerprint.len() * 8);
    let mut prev = 0u32;
    for (i, &cur) in fingerprint.iter().enumerate() {
        let mut x = if i == 0 { cur } else { cur ^ prev };
        prev = cur;
        let (mut bit, mut last_bit) = (1u8, 0u8);
        while x != 0 {
            if x & 1 != 0 {
                bits.push(bit - last_bit);
                last_bit = bit;
            }
            x >>= 1;
            bit += 1;
        }
        bits.push(0);
    }

    let len = fingerprint.len();
    let mut out = vec![
        consts::ALGORITHM,
        (len >> 16) as u8,
        (len >> 8) as u8,
        len as u8,
    ];
    pack_bits(&mut out, bits.iter().map(|&b| b.min(7)), 3);
    pack_bits(&mut out, bits.iter().filter(|&&b| b >= 7).map(|&b| b - 7), 5);
    out
}

/// 低位优先打包
fn pack_bits(out: &mut Vec<u8>, values: impl Iterator<Item = u8>, width: u32) {
    let mut holder = 0u32;
    let mut size = 0u32;
    for v in values {
        holder |= (v as u32) << size;
        size += width;
        while size >= 8 {
            out.push(holder as u8);
            holder >>= 8;
            size -= 8;
        }
    }
    if size > 0 {
        out.push(holder as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 按秒切换音高的测试信号
    fn melody(seconds: usize) -> Vec<f32> {
        let sr = consts::SAMPLE_RATE as f64;
        let notes = [220.0, 330.0, 262.0, 392.0, 294.0, 440.0, 349.0];
        (0..seconds * consts::SAMPLE_RATE as usize)
            .map(|i| {
                let t = i as f64 / sr;
                let f = notes[(t as usize) % notes.len()];
                (0.4 * (2.0 * PI * f * t).sin() + 0.2 * (2.0 * PI * 2.0 * f * t).sin()) as f32
            })
            .collect()
    }

    fn fingerprint_of(samples: &[f32]) -> Fingerprinter {
        let mut fp = Fingerprinter::new();
        fp.feed(samples).unwrap();
        fp
    }

    #[test]
    fn test_deterministic() {
        let input = melody(12);
        let a = fingerprint_of(&input).calculate().unwrap();
        let b = fingerprint_of(&input).calculate().unwrap();
        assert_eq!(a, b);
        assert!(!a.contains('=') && !a.contains('+') && !a.contains('/'));
    }

    #[test]
    fn test_chunked_feed_matches_whole() {
        let input = melody(10);
        let whole = fingerprint_of(&input).calculate_raw().unwrap();
        let mut fp = Fingerprinter::new();
        for chunk in input.chunks(777) {
            fp.feed(chunk).unwrap();
        }
        assert_eq!(fp.calculate_raw().unwrap(), whole);
    }

    #[test]
    fn test_truncation_preserves_prefix() {
        let input = melody(14);
        let full = fingerprint_of(&input).calculate_raw().unwrap();
        let short = fingerprint_of(&input[..input.len() * 2 / 3]).calculate_raw().unwrap();
        assert!(short.len() < full.len());
        assert_eq!(&full[..short.len()], &short[..]);
    }

    #[test]
    fn test_header_layout() {
        let input = melody(10);
        let fp = fingerprint_of(&input);
        let raw = fp.calculate_raw().unwrap();
        let bytes = URL_SAFE_NO_PAD.decode(fp.calculate().unwrap()).unwrap();
        assert_eq!(bytes[0], 1);
        let len = ((bytes[1] as usize) << 16) | ((bytes[2] as usize) << 8) | bytes[3] as usize;
        assert_eq!(len, raw.len());
        assert_eq!(bytes, compress(&raw));
    }

    #[test]
    fn test_compress_small() {
        // 0b101：位置 1 和 3 → 差分 1, 2, 终止 0
        let out = compress(&[0b101]);
        assert_eq!(&out[..4], &[1, 0, 0, 1]);
        // 3 位打包：1 | 2<<3 | 0<<6
        assert_eq!(out[4], 1 | (2 << 3));
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn test_gates() {
        let mut fp = Fingerprinter::new();
        assert!(!fp.can_calculate());
        fp.feed(&melody(5)).unwrap();
        assert!(!fp.can_calculate());
        assert!(fp.needs_samples());
        fp.feed(&melody(3)).unwrap();
        assert!(fp.can_calculate());

        let mut full = Fingerprinter::new();
        let accepted = full.feed(&vec![0.0; MAX_SAMPLES + 500]).unwrap();
        assert_eq!(accepted, MAX_SAMPLES);
        assert!(!full.needs_samples());
        assert_eq!(full.feed(&[0.0; 10]).unwrap(), 0);
    }

    #[test]
    fn test_too_short() {
        let fp = fingerprint_of(&melody(1));
        assert!(matches!(fp.calculate(), Err(AudioError::CalculationError(_))));
    }

    #[test]
    fn test_silence_gives_zero_rows() {
        let fp = fingerprint_of(&vec![0.0; consts::SAMPLE_RATE as usize * 8]);
        let raw = fp.calculate_raw().unwrap();
        assert!(raw.iter().all(|&v| v == raw[0]));
    }
}
