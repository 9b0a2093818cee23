//! 声道数重映射
//!
//! 4 声道按 L R SL SR，6 声道按 L R C LFE SL SR。
//! 未定义矩阵的组合：多出的输入声道丢弃，多出的输出声道补静音。

use crate::error::{AudioError, AudioResult};

const SQRT_HALF: f32 = std::f32::consts::FRAC_1_SQRT_2;

#[derive(Debug, Clone)]
pub struct ChannelMixer {
    output_channels: usize,
}

impl ChannelMixer {
    pub fn new(output_channels: usize) -> AudioResult<Self> {
        if output_channels == 0 {
            return Err(AudioError::InvalidInput("输出声道数不能为 0".into()));
        }
        Ok(Self { output_channels })
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.output_channels
    }

    pub fn set_channels(&mut self, channels: usize) -> AudioResult<()> {
        if channels == 0 {
            return Err(AudioError::InvalidInput("输出声道数不能为 0".into()));
        }
        self.output_channels = channels;
        Ok(())
    }

    /// 平面输入 → 平面输出，处理前 `length` 个样本
    pub fn mix<S: AsRef<[f32]>>(&self, input: &[S], length: usize) -> Vec<Vec<f32>> {
        let mut output = vec![vec![0.0f32; length]; self.output_channels];
        self.mix_into(input, length, &mut output);
        output
    }

    /// 写入调用方提供的缓冲，每个输出声道至少 `length` 长
    pub fn mix_into<S: AsRef<[f32]>, D: AsMut<[f32]>>(
        &self,
        input: &[S],
        length: usize,
        output: &mut [D],
    ) {
        let inputs: Vec<&[f32]> = input.iter().map(|c| &c.as_ref()[..length]).collect();
        let mut frame_in = vec![0.0f32; inputs.len()];
        let mut frame_out = vec![0.0f32; self.output_channels];
        for i in 0..length {
            for (dst, src) in frame_in.iter_mut().zip(&inputs) {
                *dst = src[i];
            }
            mix_frame(&frame_in, &mut frame_out);
            for (dst, &v) in output.iter_mut().zip(&frame_out) {
                dst.as_mut()[i] = v;
            }
        }
    }

    /// 交错输入 → 交错输出
    pub fn mix_interleaved(&self, input: &[f32], input_channels: usize) -> AudioResult<Vec<f32>> {
        if input_channels == 0 || input.len() % input_channels != 0 {
            return Err(AudioError::InvalidInput(format!(
                "交错缓冲长度 {} 与声道数 {input_channels} 不匹配",
                input.len()
            )));
        }
        let frames = input.len() / input_channels;
        let mut output = vec![0.0f32; frames * self.output_channels];
        for (src, dst) in input
            .chunks_exact(input_channels)
            .zip(output.chunks_exact_mut(self.output_channels))
        {
            mix_frame(src, dst);
        }
        Ok(output)
    }
}

/// 单个采样帧的重映射
fn mix_frame(input: &[f32], output: &mut [f32]) {
    match (input.len(), output.len()) {
        (a, b) if a == b => output.copy_from_slice(input),
        (1, 2) => {
            output[0] = input[0];
            output[1] = input[0];
        }
        (1, 4) => output.copy_from_slice(&[input[0], input[0], 0.0, 0.0]),
        (1, 6) => output.copy_from_slice(&[0.0, 0.0, input[0], 0.0, 0.0, 0.0]),
        (2, 1) => output[0] = (input[0] + input[1]) / 2.0,
        (2, 4) => output.copy_from_slice(&[input[0], input[1], 0.0, 0.0]),
        (2, 6) => output.copy_from_slice(&[input[0], input[1], 0.0, 0.0, 0.0, 0.0]),
        (4, 1) => output[0] = (input[0] + input[1] + input[2] + input[3]) / 4.0,
        (4, 2) => {
            output[0] = (input[0] + input[2]) / 2.0;
            output[1] = (input[1] + input[3]) / 2.0;
        }
        (4, 6) => output.copy_from_slice(&[input[0], input[1], 0.0, 0.0, input[2], input[3]]),
        (6, 1) => {
            let [l, r, c, _lfe, sl, sr] = [input[0], input[1], input[2], input[3], input[4], input[5]];
            output[0] = SQRT_HALF * (l + r) + c + 0.5 * (sl + sr);
        }
        (6, 2) => {
            let [l, r, c, _lfe, sl, sr] = [input[0], input[1], input[2], input[3], input[4], input[5]];
            output[0] = l + SQRT_HALF * (c + sl);
            output[1] = r + SQRT_HALF * (c + sr);
        }
        (6, 4) => {
            let [l, r, c, _lfe, sl, sr] = [input[0], input[1], input[2], input[3], input[4], input[5]];
            output.copy_from_slice(&[l + SQRT_HALF * c, r + SQRT_HALF * c, sl, sr]);
        }
        (_, _) => {
            let n = input.len().min(output.len());
            output[..n].copy_from_slice(&input[..n]);
            output[n..].fill(0.0);
        }
    }
}
