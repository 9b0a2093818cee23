//! 处理管线模块
//!
//! 分析管线（时长、指纹、响度）与播放管线（解码、混音、重采样、定位），
//! 各自以单线程 actor 运行，通过 crossbeam 通道收发 `protocol` 中的消息。

pub mod analysis_pipeline;
pub mod playback_pipeline;
pub mod protocol;

pub use analysis_pipeline::{
    AnalysisConfig, AnalysisHandle, AnalysisJob, AnalysisPipeline, JobRequest,
    JobStart, JobState, analyze_source,
};
pub use playback_pipeline::{PlaybackConfig, PlaybackHandle, PlaybackPipeline};
pub use protocol::{
    AnalysisEvent, AnalysisEventKind, AnalysisRequest, AnalysisResult, AudioSource, ErrorReport,
    FilledBuffer, PlaybackRequest, PlaybackResponse, TrackSummary,
};

use crate::audio::{
    ByteWindow, CodecDecoder, CodecName, DecoderRegistry, Lease, Resampler, ResamplerKey,
    ResourcePool, StreamMetadata, demux, sniff_codec,
};
use crate::error::{AudioError, AudioResult};
use std::path::Path;

/// 嗅探 codec、确认有解码器插件，然后解复用
pub fn open_stream(
    window: &mut ByteWindow,
    file_name: Option<&Path>,
    registry: &DecoderRegistry,
) -> AudioResult<(CodecName, StreamMetadata)> {
    let codec = match sniff_codec(window, file_name)? {
        Some(codec) if codec != CodecName::Unknown => codec,
        _ => {
            return Err(AudioError::UnsupportedFormat(
                "无法识别的音频内容".into(),
            ));
        }
    };
    if !registry.supports(codec) {
        return Err(AudioError::CodecNotSupported(codec.to_string()));
    }
    let metadata = demux(codec.as_str(), window)?;
    Ok((codec, metadata))
}

/// 一个 actor 独占的解码器/重采样器池
pub struct PipelineResources {
    registry: DecoderRegistry,
    decoders: ResourcePool<CodecName, Box<dyn CodecDecoder>>,
    resamplers: ResourcePool<ResamplerKey, Resampler>,
}

impl PipelineResources {
    pub fn new(registry: DecoderRegistry) -> Self {
        Self {
            registry,
            decoders: ResourcePool::new(),
            resamplers: ResourcePool::new(),
        }
    }

    pub fn registry(&self) -> &DecoderRegistry {
        &self.registry
    }

    pub fn decoders(&self) -> &ResourcePool<CodecName, Box<dyn CodecDecoder>> {
        &self.decoders
    }

    pub fn resamplers(&self) -> &ResourcePool<ResamplerKey, Resampler> {
        &self.resamplers
    }

    pub fn lease_decoder(
        &self,
        codec: CodecName,
    ) -> AudioResult<Lease<CodecName, Box<dyn CodecDecoder>>> {
        self.decoders.alloc(codec, || self.registry.construct(codec))
    }

    /// 借出的重采样器已经 start
    pub fn lease_resampler(&self, key: ResamplerKey) -> AudioResult<Lease<ResamplerKey, Resampler>> {
        self.resamplers.alloc(key, || key.build())
    }
}
