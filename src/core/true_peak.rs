//! 真峰值插值
//!
//! 48 抽头多相 FIR（每相 12 抽头）。96 kHz 以下 4 倍过采样，
//! 192 kHz 以下 2 倍，更高采样率直接等于样本峰值。

const PHASE_LENGTH: usize = 12;
const HISTORY: usize = PHASE_LENGTH - 1;

#[rustfmt::skip]
static HALF_COEFFS: [f32; 24] = [
    0.0017089843750, -0.0291748046875, -0.0189208984375, -0.0083007812500,
    0.0109863281250, 0.0292968750000, 0.0330810546875, 0.0148925781250,
    -0.0196533203125, -0.0517578125000, -0.0582275390625, -0.0266113281250,
    0.0332031250000, 0.0891113281250, 0.1015625000000, 0.0476074218750,
    -0.0594482421875, -0.1665039062500, -0.2003173828125, -0.1022949218750,
    0.1373291015625, 0.4650878906250, 0.7797851562500, 0.9721679687500,
];

/// 完整 48 抽头系数（后半为前半镜像）
fn coefficients() -> [f32; 48] {
    let mut c = [0.0f32; 48];
    for (i, &v) in HALF_COEFFS.iter().enumerate() {
        c[i] = v;
        c[47 - i] = v;
    }
    c
}

/// 过采样倍数
pub fn oversampling_factor(sample_rate: u32) -> usize {
    if sample_rate < 96_000 {
        4
    } else if sample_rate < 192_000 {
        2
    } else {
        1
    }
}

/// 按声道保存 11 个历史样本的真峰值插值器
#[derive(Debug, Clone)]
pub struct TruePeakInterpolator {
    factor: usize,
    coeffs: [f32; 48],
    history: Vec<[f32; HISTORY]>,
    scratch: Vec<f32>,
}

impl TruePeakInterpolator {
    pub fn new(channels: usize, sample_rate: u32) -> Self {
        Self {
            factor: oversampling_factor(sample_rate),
            coeffs: coefficients(),
            history: vec![[0.0; HISTORY]; channels],
            scratch: Vec::new(),
        }
    }

    #[inline]
    pub fn factor(&self) -> usize {
        self.factor
    }

    /// 处理一个声道的一段输入，返回这段内插值后的最大绝对值
    ///
    /// 倍数为 1 时返回 0，由调用方改用样本峰值。
    pub fn process(&mut self, channel: usize, input: &[f32]) -> f32 {
        if self.factor == 1 || input.is_empty() {
            return 0.0;
        }
        let Some(history) = self.history.get_mut(channel) else {
            return 0.0;
        };

        self.scratch.clear();
        self.scratch.extend_from_slice(history);
        self.scratch.extend_from_slice(input);

        let mut peak = 0.0f32;
        for window in self.scratch.windows(PHASE_LENGTH) {
            for j in (0..self.factor).rev() {
                let mut sample = 0.0f32;
                for (k, &v) in window.iter().enumerate() {
                    sample += v * self.coeffs[j + 4 * k];
                }
                peak = peak.max(sample.abs());
            }
        }

        let tail = self.scratch.len() - HISTORY;
        history.copy_from_slice(&self.scratch[tail..]);
        peak
    }

    pub fn reset(&mut self) {
        for h in &mut self.history {
            *h = [0.0; HISTORY];
        }
    }
}
