//! MP3 Stream Engine
//!
//! MP3 流式播放与分析引擎：自研容器解析（Xing/Info/LAME/VBRI、ID3、RIFF 封装）、
//! 精确定位、流式重采样、声道混合，以及 EBU R128 响度测量和声学指纹。
//!
//! ## 核心特性
//! - 字节窗口按块换页读取，任意大小的文件只常驻一个窗口
//! - CBR 按平均帧长、VBR 按 TOC 或逐帧扫描的 seek 表定位
//! - 解码器/重采样器经资源池复用，每个管线 actor 独占自己的池
//! - 分析任务按 30 秒分块执行，块间响应取消

pub mod audio;
pub mod core;
pub mod error;
pub mod processing;
pub mod tools;

// 重新导出核心类型
pub use audio::{
    ByteWindow, ChannelMixer, CodecDecoder, CodecName, DecoderRegistry, Resampler, SeekResult,
    StreamMetadata, demux, seek, sniff_codec,
};
pub use core::{Fingerprinter, LoudnessConfig, LoudnessMeter, LoudnessResult};
pub use error::{AudioError, AudioResult, ErrorCategory};
pub use processing::{
    AnalysisConfig, AnalysisPipeline, AudioSource, PlaybackConfig, PlaybackPipeline,
};
