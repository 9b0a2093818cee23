//! K 计权滤波器
//!
//! 高架 + 高通两级双二阶由模拟原型按采样率求系数，卷积成一个 5 阶直接 II 型滤波器。

use std::f64::consts::PI;

/// 5 阶 K 计权系数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KWeighting {
    pub b: [f64; 5],
    pub a: [f64; 5],
}

impl KWeighting {
    pub fn new(sample_rate: u32) -> Self {
        let sr = sample_rate as f64;

        // 第一级：高架
        let f0 = 1681.974450955533;
        let g = 3.999843853973347;
        let q = 0.7071752369554196;
        let k = (PI * f0 / sr).tan();
        let vh = 10f64.powf(g / 20.0);
        let vb = vh.powf(0.4996667741545416);
        let a0 = 1.0 + k / q + k * k;
        let pb = [
            (vh + vb * k / q + k * k) / a0,
            2.0 * (k * k - vh) / a0,
            (vh - vb * k / q + k * k) / a0,
        ];
        let pa = [1.0, 2.0 * (k * k - 1.0) / a0, (1.0 - k / q + k * k) / a0];

        // 第二级：高通
        let f0 = 38.13547087602444;
        let q = 0.5003270373238773;
        let k = (PI * f0 / sr).tan();
        let d = 1.0 + k / q + k * k;
        let rb = [1.0, -2.0, 1.0];
        let ra = [1.0, 2.0 * (k * k - 1.0) / d, (1.0 - k / q + k * k) / d];

        Self {
            b: convolve3(&pb, &rb),
            a: convolve3(&pa, &ra),
        }
    }

    /// 滤波一段输入，结果写入 `output`；`state` 为该声道的直接 II 型状态
    pub fn process(&self, state: &mut [f64; 5], input: &[f32], output: &mut [f64]) {
        let (a, b) = (&self.a, &self.b);
        for (x, y) in input.iter().zip(output.iter_mut()) {
            state[0] = *x as f64 - a[1] * state[1] - a[2] * state[2] - a[3] * state[3] - a[4] * state[4];
            *y = b[0] * state[0] + b[1] * state[1] + b[2] * state[2] + b[3] * state[3] + b[4] * state[4];
            state[4] = state[3];
            state[3] = state[2];
            state[2] = state[1];
            state[1] = state[0];
        }
        for v in &mut state[1..] {
            if v.is_subnormal() {
                *v = 0.0;
            }
        }
    }
}

fn convolve3(p: &[f64; 3], r: &[f64; 3]) -> [f64; 5] {
    [
        p[0] * r[0],
        p[0] * r[1] + p[1] * r[0],
        p[0] * r[2] + p[1] * r[1] + p[2] * r[0],
        p[1] * r[2] + p[2] * r[1],
        p[2] * r[2],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gain_db(sample_rate: u32, freq: f64) -> f64 {
        let filter = KWeighting::new(sample_rate);
        let mut state = [0.0; 5];
        let n = sample_rate as usize * 2;
        let input: Vec<f32> = (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / sample_rate as f64).sin() as f32)
            .collect();
        let mut output = vec![0.0; n];
        filter.process(&mut state, &input, &mut output);
        let tail = &output[n / 2..];
        let ms = tail.iter().map(|v| v * v).sum::<f64>() / tail.len() as f64;
        10.0 * (ms / 0.5).log10()
    }

    #[test]
    fn test_48k_coefficients() {
        // 48 kHz 下的标准系数
        let k = KWeighting::new(48000);
        let expected_b = [1.53512485958697, -2.69169618940638, 1.19839281085285];
        let expected_a = [1.0, -1.69065929318241, 0.73248077421585];
        let conv_b = convolve3(&expected_b, &[1.0, -2.0, 1.0]);
        for (x, y) in k.b.iter().zip(conv_b) {
            assert!((x - y).abs() < 1e-5, "{x} vs {y}");
        }
        assert!((k.a[0] - 1.0).abs() < 1e-12);
        assert!((k.a[1] - (expected_a[1] - 1.99004745483398)).abs() < 1e-5);
    }

    #[test]
    fn test_frequency_response() {
        assert!((gain_db(48000, 1000.0) - 0.69).abs() < 0.1);
        assert!(gain_db(48000, 20.0) < -10.0);
        assert!((gain_db(48000, 10_000.0) - 4.0).abs() < 0.5);
    }
}
