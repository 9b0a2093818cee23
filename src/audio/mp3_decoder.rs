//! MP3 解码上下文
//!
//! 帧切分、编码器延迟/尾部填充裁剪、定位后的样本丢弃都在这里完成；
//! 单帧的比特流解码交给 symphonia 的 MPEG 音频解码器。

use super::decoder::{CodecDecoder, DecodeStep, DecodedBuffer};
use super::mp3_demuxer::StreamMetadata;
use super::mp3_header::FrameHeader;
use super::pool::Reusable;
use super::seeker::SeekResult;
use crate::error::{AudioError, AudioResult, decoding_error};
use crate::tools::constants::mp3;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Channels, Signal};
use symphonia::core::codecs::{CODEC_TYPE_MP3, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::formats::Packet;
use symphonia::core::sample::Sample;

#[cfg(debug_assertions)]
macro_rules! debug_mp3 {
    ($($arg:tt)*) => {
        tracing::debug!(target: "mp3_decoder", $($arg)*)
    };
}

#[cfg(not(debug_assertions))]
macro_rules! debug_mp3 {
    ($($arg:tt)*) => {};
}

/// 解码时需要的流参数
#[derive(Debug, Clone, Copy)]
struct StreamParams {
    sample_rate: u32,
    channels: usize,
    samples_per_frame: u32,
    total_frames: u64,
    padding_start_frame: Option<u64>,
    encoder_padding: u32,
}

pub struct Mp3Decoder {
    decoder: Option<Box<dyn Decoder>>,
    params: Option<StreamParams>,
    started: bool,
    current_frame: u64,
    samples_to_skip: u64,
    target_frames: usize,
    pending: Vec<Vec<f32>>,
    pending_len: usize,
    output_samples: u64,
    invalid_frames: usize,
    scratch: Vec<Vec<f32>>,
}

impl Default for Mp3Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Mp3Decoder {
    pub fn new() -> Self {
        Self {
            decoder: None,
            params: None,
            started: false,
            current_frame: 0,
            samples_to_skip: 0,
            target_frames: 0,
            pending: Vec::new(),
            pending_len: 0,
            output_samples: 0,
            invalid_frames: 0,
            scratch: Vec::new(),
        }
    }

    /// 当前帧号（下一帧解码前）
    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    fn make_decoder(metadata: &StreamMetadata) -> AudioResult<Box<dyn Decoder>> {
        let channels = if metadata.channel_count == 1 {
            Channels::FRONT_LEFT
        } else {
            Channels::FRONT_LEFT | Channels::FRONT_RIGHT
        };
        let mut codec_params = CodecParameters::new();
        codec_params
            .for_codec(CODEC_TYPE_MP3)
            .with_sample_rate(metadata.sample_rate)
            .with_channels(channels)
            .with_max_frames_per_packet(metadata.samples_per_frame as u64);
        symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| decoding_error("无法创建 MP3 解码器", e))
    }

    fn reset_decoding_state(&mut self) {
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.reset();
        }
        for ch in &mut self.pending {
            ch.clear();
        }
        self.pending_len = 0;
        self.output_samples = 0;
        self.invalid_frames = 0;
    }

    /// 解码一帧到 scratch，返回样本数
    fn decode_frame(&mut self, frame: &[u8], params: &StreamParams) -> AudioResult<usize> {
        let spf = params.samples_per_frame as usize;
        let channels = params.channels;
        self.scratch.resize_with(channels, Vec::new);
        for ch in &mut self.scratch {
            ch.clear();
        }

        let Some(decoder) = self.decoder.as_mut() else {
            return Err(AudioError::InvalidInput("解码器尚未 start".into()));
        };
        let packet = Packet::new_from_slice(0, self.current_frame * spf as u64, spf as u64, frame);
        let result = match decoder.decode(&packet) {
            Ok(decoded) => {
                let n = decoded.frames();
                append_planar(&decoded, &mut self.scratch);
                Ok(n)
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(n) => {
                self.invalid_frames = 0;
                Ok(n)
            }
            Err(symphonia::core::errors::Error::DecodeError(msg)) => {
                self.invalid_frames += 1;
                debug_mp3!("frame {} undecodable: {msg}", self.current_frame);
                if self.invalid_frames >= mp3::MAX_INVALID_FRAMES {
                    return Err(AudioError::DecodingError(format!(
                        "连续无效帧过多（{}）",
                        self.invalid_frames
                    )));
                }
                // 无效帧以一帧静音占位，后续帧的时间轴不漂移
                for ch in &mut self.scratch {
                    ch.resize(spf, 0.0);
                }
                Ok(spf)
            }
            Err(symphonia::core::errors::Error::ResetRequired) => {
                if let Some(decoder) = self.decoder.as_mut() {
                    decoder.reset();
                }
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 帧解码后的裁剪与累积；攒满目标长度时返回刷出的缓冲
    fn frame_decoded(&mut self, mut decoded: usize, params: &StreamParams) -> Option<DecodedBuffer> {
        if let Some(padding_start) = params.padding_start_frame
            && self.current_frame >= padding_start
        {
            if self.current_frame == padding_start {
                let trim = (params.encoder_padding % params.samples_per_frame) as usize;
                decoded = decoded.saturating_sub(trim);
            } else {
                return None;
            }
        }

        let skipped = (decoded as u64).min(self.samples_to_skip) as usize;
        self.samples_to_skip -= skipped as u64;
        if decoded <= skipped {
            return None;
        }

        for (ch, pending) in self.pending.iter_mut().enumerate() {
            match self.scratch.get(ch) {
                Some(src) if src.len() >= decoded => pending.extend_from_slice(&src[skipped..decoded]),
                Some(src) => {
                    let start = skipped.min(src.len());
                    pending.extend_from_slice(&src[start..]);
                    pending.resize(self.pending_len + decoded - skipped, 0.0);
                }
                None => pending.resize(self.pending_len + decoded - skipped, 0.0),
            }
        }
        self.pending_len += decoded - skipped;

        if self.pending_len >= self.target_frames {
            Some(self.take_pending(self.target_frames, params.sample_rate))
        } else {
            None
        }
    }

    fn take_pending(&mut self, count: usize, sample_rate: u32) -> DecodedBuffer {
        let count = count.min(self.pending_len);
        let channels = self
            .pending
            .iter_mut()
            .map(|ch| {
                let rest = ch.split_off(count);
                std::mem::replace(ch, rest)
            })
            .collect();
        self.pending_len -= count;
        let start_sample = self.output_samples;
        self.output_samples += count as u64;
        DecodedBuffer {
            channels,
            length: count,
            sample_rate,
            start_sample,
        }
    }
}

/// symphonia 缓冲按声道追加为 f32
fn append_planar(decoded: &AudioBufferRef<'_>, out: &mut [Vec<f32>]) {
    match decoded {
        AudioBufferRef::U8(buf) => copy_planes(buf, out, |s: u8| (s as i32 - 128) as f32 / 128.0),
        AudioBufferRef::U16(buf) => {
            copy_planes(buf, out, |s: u16| (s as i32 - 32768) as f32 / 32768.0)
        }
        AudioBufferRef::U24(buf) => copy_planes(buf, out, |s| {
            ((s.inner() as i32) - 8_388_608) as f32 / 8_388_608.0
        }),
        AudioBufferRef::U32(buf) => copy_planes(buf, out, |s: u32| {
            (s as i64 - 2_147_483_648) as f32 / 2_147_483_648.0
        }),
        AudioBufferRef::S8(buf) => copy_planes(buf, out, |s: i8| s as f32 / 128.0),
        AudioBufferRef::S16(buf) => copy_planes(buf, out, |s: i16| s as f32 / 32768.0),
        AudioBufferRef::S24(buf) => copy_planes(buf, out, |s| s.inner() as f32 / 8_388_608.0),
        AudioBufferRef::S32(buf) => copy_planes(buf, out, |s: i32| s as f32 / 2_147_483_648.0),
        AudioBufferRef::F32(buf) => copy_planes(buf, out, |s: f32| s),
        AudioBufferRef::F64(buf) => copy_planes(buf, out, |s: f64| s as f32),
    }
}

fn copy_planes<T, F>(buf: &AudioBuffer<T>, out: &mut [Vec<f32>], convert: F)
where
    T: Sample + Copy,
    F: Fn(T) -> f32,
{
    let source_channels = buf.spec().channels.count();
    let frames = buf.frames();
    for (ch, dst) in out.iter_mut().enumerate() {
        if source_channels == 0 {
            dst.resize(dst.len() + frames, 0.0);
            continue;
        }
        // 单声道帧出现在立体声流中时复制到所有声道
        let plane = buf.chan(ch.min(source_channels - 1));
        dst.extend(plane[..frames].iter().map(|&s| convert(s)));
    }
}

impl Reusable for Mp3Decoder {
    fn reset(&mut self) {
        self.reset_decoding_state();
        self.started = false;
        self.params = None;
        self.current_frame = 0;
        self.samples_to_skip = 0;
    }
}

impl CodecDecoder for Mp3Decoder {
    fn start(&mut self, metadata: &StreamMetadata) -> AudioResult<()> {
        if self.started {
            return Err(AudioError::InvalidInput("解码器已经 start".into()));
        }
        let needs_new = self.decoder.is_none()
            || self
                .params
                .is_none_or(|p| p.sample_rate != metadata.sample_rate);
        if needs_new {
            self.decoder = Some(Self::make_decoder(metadata)?);
        }
        self.reset_decoding_state();

        let channels = metadata.channel_count.max(1) as usize;
        self.params = Some(StreamParams {
            sample_rate: metadata.sample_rate,
            channels,
            samples_per_frame: metadata.samples_per_frame,
            total_frames: if metadata.frames == 0 {
                u64::MAX
            } else {
                metadata.frames
            },
            padding_start_frame: metadata.padding_start_frame,
            encoder_padding: metadata.encoder_padding_samples,
        });
        self.pending = vec![Vec::new(); channels];
        self.current_frame = 0;
        self.samples_to_skip = (metadata.encoder_delay_samples + mp3::DECODER_DELAY) as u64;
        if self.target_frames == 0 {
            self.target_frames = metadata.sample_rate as usize;
        }
        self.started = true;
        debug_mp3!(
            "start: skip={} total_frames={}",
            self.samples_to_skip,
            metadata.frames
        );
        Ok(())
    }

    fn decode_until_flush(&mut self, buffer: &[u8], start_offset: u64) -> AudioResult<DecodeStep> {
        let Some(params) = self.params.filter(|_| self.started) else {
            return Err(AudioError::InvalidInput("解码器尚未 start".into()));
        };

        let mut pos = 0usize;
        while pos + 4 <= buffer.len() {
            if self.current_frame >= params.total_frames {
                break;
            }
            let raw = u32::from_be_bytes([buffer[pos], buffer[pos + 1], buffer[pos + 2], buffer[pos + 3]]);
            let Some(header) = FrameHeader::parse(raw) else {
                pos += 1;
                continue;
            };
            if header.sample_rate != params.sample_rate {
                pos += 1;
                continue;
            }
            let size = header.frame_size();
            if pos + size > buffer.len() {
                break;
            }
            let decoded = self.decode_frame(&buffer[pos..pos + size], &params)?;
            pos += size;
            self.current_frame += 1;

            if let Some(flushed) = self.frame_decoded(decoded, &params) {
                return Ok(DecodeStep {
                    consumed_until: start_offset + pos as u64,
                    flushed: Some(flushed),
                });
            }
        }

        Ok(DecodeStep {
            consumed_until: start_offset + pos as u64,
            flushed: None,
        })
    }

    fn end(&mut self) -> Option<DecodedBuffer> {
        if !self.started {
            return None;
        }
        self.started = false;
        let sample_rate = self.params.map_or(0, |p| p.sample_rate);
        if self.pending_len == 0 {
            return None;
        }
        Some(self.take_pending(self.pending_len, sample_rate))
    }

    fn apply_seek(&mut self, seek: &SeekResult) {
        self.reset_decoding_state();
        self.current_frame = seek.frame;
        self.samples_to_skip = seek.samples_to_skip;
        if seek.frame == 0 {
            self.samples_to_skip += mp3::DECODER_DELAY as u64;
        }
    }

    fn current_sample_index(&self) -> u64 {
        self.output_samples
    }

    fn set_target_buffer_frames(&mut self, frames: usize) {
        self.target_frames = frames.max(1);
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn has_reached_end(&self) -> bool {
        self.params
            .is_some_and(|p| self.current_frame >= p.total_frames)
    }
}
