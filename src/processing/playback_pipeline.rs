//! 播放管线
//!
//! 解码 → 混到输出声道数 → 重采样到输出采样率，按固定时长切成缓冲。
//! 定位时先结束并重启重采样器，再经 Seeker 把解码器放到目标帧之前。

use super::protocol::{AudioSource, ErrorReport, FilledBuffer, PlaybackRequest, PlaybackResponse, TrackSummary};
use super::{PipelineResources, open_stream};
use crate::audio::{
    ByteWindow, ChannelMixer, CodecDecoder, CodecName, DecodedBuffer, DecoderRegistry, Lease,
    Resampler, ResamplerKey, ScratchBuffers, ScratchRole, StreamMetadata, seek,
};
use crate::error::{AudioError, AudioResult};
use crate::tools::constants::{defaults, mp3, playback};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::thread::JoinHandle;

#[cfg(debug_assertions)]
macro_rules! debug_playback {
    ($($arg:tt)*) => {
        tracing::debug!(target: "playback_pipeline", $($arg)*)
    };
}

#[cfg(not(debug_assertions))]
macro_rules! debug_playback {
    ($($arg:tt)*) => {};
}

/// 播放管线配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub output_sample_rate: u32,
    pub output_channels: usize,
    /// 每个输出缓冲的时长（秒）
    pub buffer_seconds: f64,
    pub resampler_quality: u8,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            output_sample_rate: defaults::OUTPUT_SAMPLE_RATE,
            output_channels: defaults::OUTPUT_CHANNELS,
            buffer_seconds: playback::BUFFER_SECONDS,
            resampler_quality: defaults::RESAMPLER_QUALITY,
        }
    }
}

impl PlaybackConfig {
    fn validate(&self) -> AudioResult<()> {
        if self.output_sample_rate == 0 || self.output_channels == 0 {
            return Err(AudioError::InvalidInput(format!(
                "非法输出格式: {} Hz × {} 声道",
                self.output_sample_rate, self.output_channels
            )));
        }
        if !(self.buffer_seconds > 0.0) {
            return Err(AudioError::InvalidInput(format!(
                "缓冲时长必须为正: {}",
                self.buffer_seconds
            )));
        }
        if self.resampler_quality > 10 {
            return Err(AudioError::InvalidInput(format!(
                "重采样质量越界: {}",
                self.resampler_quality
            )));
        }
        Ok(())
    }

    /// 每个输出缓冲的样本数
    pub fn buffer_frames(&self) -> usize {
        ((self.buffer_seconds * self.output_sample_rate as f64).round() as usize).max(1)
    }
}

struct LoadedTrack {
    window: ByteWindow,
    metadata: StreamMetadata,
    decoder: Lease<CodecName, Box<dyn CodecDecoder>>,
    resampler: Option<Lease<ResamplerKey, Resampler>>,
    mixer: ChannelMixer,
    scratch: ScratchBuffers,
    offset: u64,
    /// 输出格式下尚未切成缓冲的样本
    pending: Vec<Vec<f32>>,
    /// 自上次 load/seek 起已输出的样本数
    emitted: u64,
    base_time: f64,
    exhausted: bool,
}

impl LoadedTrack {
    fn pending_len(&self) -> usize {
        self.pending.first().map_or(0, Vec::len)
    }

    /// 解码一步，把刷出的样本转换到输出格式
    fn decode_more(&mut self, buffer_seconds: f64) -> AudioResult<()> {
        let data_end = self.metadata.data_end;
        if self.offset >= data_end || self.decoder.has_reached_end() {
            return self.drain_decoder();
        }

        let chunk_bytes = ((self.metadata.max_bytes_per_sample
            * self.metadata.sample_rate as f64
            * buffer_seconds)
            .ceil() as u64)
            .max(2 * mp3::MAX_FRAME_BYTES as u64);
        let block =
            self.window
                .read_block_of_size_at(chunk_bytes, self.offset, playback::READ_PADDING_FACTOR)?;
        let usable = block.len().min((data_end - self.offset) as usize);
        let step = self
            .decoder
            .decode_until_flush(&block[..usable], self.offset)?;

        let advanced = step.consumed_until > self.offset;
        self.offset = self.offset.max(step.consumed_until);
        match step.flushed {
            Some(buffer) => self.push_output(&buffer),
            None if !advanced || self.offset >= data_end => self.drain_decoder(),
            None => Ok(()),
        }
    }

    fn drain_decoder(&mut self) -> AudioResult<()> {
        if let Some(rest) = self.decoder.end() {
            self.push_output(&rest)?;
        }
        self.exhausted = true;
        debug_playback!("解码到流末尾, offset={}", self.offset);
        Ok(())
    }

    fn push_output(&mut self, buffer: &DecodedBuffer) -> AudioResult<()> {
        let length = buffer.length;
        if length == 0 {
            return Ok(());
        }
        let channels = self.mixer.channels();
        let mixed = self.scratch.planar(ScratchRole::Mix, channels, length);
        self.mixer.mix_into(&buffer.channels, length, mixed);

        match self.resampler.as_mut() {
            Some(resampler) => {
                let resampled = resampler.resample(mixed, length)?;
                for (dst, src) in self.pending.iter_mut().zip(&resampled) {
                    dst.extend_from_slice(src);
                }
            }
            None => {
                for (dst, src) in self.pending.iter_mut().zip(mixed.iter()) {
                    dst.extend_from_slice(&src[..length]);
                }
            }
        }
        Ok(())
    }

    fn take_buffer(&mut self, frames: usize, sample_rate: u32) -> FilledBuffer {
        let length = frames.min(self.pending_len());
        let channels = self
            .pending
            .iter_mut()
            .map(|c| c.drain(..length).collect())
            .collect();
        let start_time = self.base_time + self.emitted as f64 / sample_rate as f64;
        self.emitted += length as u64;
        FilledBuffer {
            channels,
            length,
            start_time,
            end_time: start_time + length as f64 / sample_rate as f64,
        }
    }
}

/// 播放管线；同一时刻只持有一条曲目
pub struct PlaybackPipeline {
    config: PlaybackConfig,
    resources: PipelineResources,
    track: Option<LoadedTrack>,
}

impl PlaybackPipeline {
    pub fn new(config: PlaybackConfig, registry: DecoderRegistry) -> AudioResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            resources: PipelineResources::new(registry),
            track: None,
        })
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn metadata(&self) -> Option<&StreamMetadata> {
        self.track.as_ref().map(|t| &t.metadata)
    }

    /// 当前曲目已经没有更多样本
    pub fn is_finished(&self) -> bool {
        self.track
            .as_ref()
            .is_none_or(|t| t.exhausted && t.pending_len() == 0)
    }

    /// 加载曲目；之前的曲目连同租借的实例一起释放
    pub fn load_track(&mut self, source: &AudioSource) -> AudioResult<StreamMetadata> {
        self.track = None;

        let mut window = source.open()?;
        let (codec, metadata) =
            open_stream(&mut window, source.file_name(), self.resources.registry())?;

        let mut decoder = self.resources.lease_decoder(codec)?;
        decoder.set_target_buffer_frames(
            ((self.config.buffer_seconds * metadata.sample_rate as f64).ceil() as usize).max(1),
        );
        decoder.start(&metadata)?;

        let resampler = if metadata.sample_rate != self.config.output_sample_rate {
            Some(self.resources.lease_resampler(ResamplerKey {
                channels: self.config.output_channels,
                in_rate: metadata.sample_rate,
                out_rate: self.config.output_sample_rate,
                quality: self.config.resampler_quality,
            })?)
        } else {
            None
        };

        debug_playback!(
            "加载 {}: {} Hz × {} → {} Hz × {}",
            source.display_name(),
            metadata.sample_rate,
            metadata.channel_count,
            self.config.output_sample_rate,
            self.config.output_channels
        );

        self.track = Some(LoadedTrack {
            offset: metadata.data_start,
            window,
            metadata: metadata.clone(),
            decoder,
            resampler,
            mixer: ChannelMixer::new(self.config.output_channels)?,
            scratch: ScratchBuffers::new(),
            pending: vec![Vec::new(); self.config.output_channels],
            emitted: 0,
            base_time: 0.0,
            exhausted: false,
        });
        Ok(metadata)
    }

    /// 产出最多 `count` 个缓冲；流末尾的最后一个可能较短，之后返回空
    pub fn fill_buffers(&mut self, count: usize) -> AudioResult<Vec<FilledBuffer>> {
        let frames = self.config.buffer_frames();
        let buffer_seconds = self.config.buffer_seconds;
        let sample_rate = self.config.output_sample_rate;
        let track = self
            .track
            .as_mut()
            .ok_or_else(|| AudioError::InvalidInput("尚未加载曲目".into()))?;

        let needed = frames.saturating_mul(count);
        while track.pending_len() < needed && !track.exhausted {
            track.decode_more(buffer_seconds)?;
        }

        let mut buffers = Vec::with_capacity(count);
        while buffers.len() < count && track.pending_len() > 0 {
            buffers.push(track.take_buffer(frames, sample_rate));
        }
        Ok(buffers)
    }

    /// 定位到 `time` 秒并填充 `count` 个缓冲；返回缓冲和实际起始时间
    pub fn seek(&mut self, time: f64, count: usize) -> AudioResult<(Vec<FilledBuffer>, f64)> {
        let track = self
            .track
            .as_mut()
            .ok_or_else(|| AudioError::InvalidInput("尚未加载曲目".into()))?;

        if let Some(resampler) = track.resampler.as_mut() {
            if resampler.is_started() {
                resampler.end()?;
            }
            resampler.start()?;
        }

        let result = seek(time, &mut track.metadata, &mut track.window)?;
        if !track.decoder.is_started() {
            track.decoder.start(&track.metadata)?;
        }
        track.decoder.apply_seek(&result);

        track.offset = result.offset;
        for channel in &mut track.pending {
            channel.clear();
        }
        track.emitted = 0;
        track.base_time = result.time;
        track.exhausted = false;
        debug_playback!(
            "定位 {time:.3}s → {:.3}s, 帧 {}, 偏移 {}, 丢弃 {} 样本",
            result.time,
            result.frame,
            result.offset,
            result.samples_to_skip
        );

        let buffers = self.fill_buffers(count)?;
        Ok((buffers, result.time))
    }

    /// 处理一条请求；Shutdown 由调用方的循环处理
    pub fn handle(&mut self, request: PlaybackRequest) -> Option<PlaybackResponse> {
        let response = match request {
            PlaybackRequest::LoadTrack { source } => self
                .load_track(&source)
                .map(|m| PlaybackResponse::Loaded(TrackSummary::from(&m))),
            PlaybackRequest::FillBuffers { count } => {
                self.fill_buffers(count).map(|buffers| PlaybackResponse::Buffers {
                    buffers,
                    base_time: None,
                })
            }
            PlaybackRequest::Seek { time, count } => {
                self.seek(time, count)
                    .map(|(buffers, base)| PlaybackResponse::Buffers {
                        buffers,
                        base_time: Some(base),
                    })
            }
            PlaybackRequest::Shutdown => return None,
        };
        Some(response.unwrap_or_else(|e| {
            tracing::warn!("播放请求失败: {e}");
            PlaybackResponse::Error(ErrorReport::from(&e))
        }))
    }

    /// 在新线程上启动播放 actor
    pub fn spawn(config: PlaybackConfig, registry: DecoderRegistry) -> AudioResult<PlaybackHandle> {
        config.validate()?;
        let (request_tx, request_rx) = crossbeam_channel::unbounded();
        let (response_tx, response_rx) = crossbeam_channel::unbounded();
        let thread = std::thread::Builder::new()
            .name("playback-actor".into())
            .spawn(move || match Self::new(config, registry) {
                Ok(pipeline) => pipeline.serve(&request_rx, &response_tx),
                Err(e) => {
                    let _ = response_tx.send(PlaybackResponse::Error(ErrorReport::from(&e)));
                }
            })?;
        Ok(PlaybackHandle {
            requests: request_tx,
            responses: response_rx,
            thread: Some(thread),
        })
    }

    fn serve(mut self, requests: &Receiver<PlaybackRequest>, responses: &Sender<PlaybackResponse>) {
        while let Ok(request) = requests.recv() {
            let Some(response) = self.handle(request) else {
                break;
            };
            if responses.send(response).is_err() {
                break;
            }
        }
        debug_playback!("播放 actor 退出");
    }
}

/// 播放 actor 句柄；一问一答
pub struct PlaybackHandle {
    requests: Sender<PlaybackRequest>,
    responses: Receiver<PlaybackResponse>,
    thread: Option<JoinHandle<()>>,
}

impl PlaybackHandle {
    pub fn request(&self, request: PlaybackRequest) -> AudioResult<PlaybackResponse> {
        self.requests
            .send(request)
            .map_err(|_| AudioError::InvalidInput("播放 actor 已退出".into()))?;
        self.responses
            .recv()
            .map_err(|_| AudioError::InvalidInput("播放 actor 已退出".into()))
    }

    pub fn shutdown(mut self) -> AudioResult<()> {
        self.stop()
    }

    fn stop(&mut self) -> AudioResult<()> {
        let _ = self.requests.send(PlaybackRequest::Shutdown);
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| AudioError::InvalidInput("播放 actor 线程 panic".into()))?;
        }
        Ok(())
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("关闭播放 actor 失败: {e}");
        }
    }
}
