//! 管线消息协议
//!
//! 分析与播放两个 actor 的请求/事件类型，全部可 serde 序列化，
//! 便于跨进程或落盘回放。

use crate::audio::{ByteWindow, MemorySource, StreamMetadata};
use crate::core::LoudnessResult;
use crate::error::{AudioError, AudioResult, ErrorCategory};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 音频字节来源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AudioSource {
    File { path: PathBuf },
    Memory { name: Option<String>, bytes: Vec<u8> },
}

impl AudioSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File { path: path.into() }
    }

    pub fn memory(name: Option<String>, bytes: Vec<u8>) -> Self {
        Self::Memory { name, bytes }
    }

    /// 用于按扩展名兜底嗅探的文件名
    pub fn file_name(&self) -> Option<&Path> {
        match self {
            Self::File { path } => Some(path.as_path()),
            Self::Memory { name, .. } => name.as_deref().map(Path::new),
        }
    }

    /// 打开字节窗口
    pub fn open(&self) -> AudioResult<ByteWindow> {
        match self {
            Self::File { path } => ByteWindow::open(path),
            Self::Memory { bytes, .. } => Ok(ByteWindow::new(MemorySource::new(bytes.clone()))),
        }
    }

    /// 日志和报告里显示的名字
    pub fn display_name(&self) -> String {
        match self {
            Self::File { path } => path.display().to_string(),
            Self::Memory { name, bytes } => name
                .clone()
                .unwrap_or_else(|| format!("<memory:{} bytes>", bytes.len())),
        }
    }
}

/// 管线边界上的错误报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub category: ErrorCategory,
    pub message: String,
}

impl ErrorReport {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl From<&AudioError> for ErrorReport {
    fn from(err: &AudioError) -> Self {
        Self {
            category: ErrorCategory::from_audio_error(err),
            message: err.to_string(),
        }
    }
}

impl From<AudioError> for ErrorReport {
    fn from(err: AudioError) -> Self {
        Self::from(&err)
    }
}

// ==================== 分析 ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisRequest {
    Analyze {
        id: u64,
        source: AudioSource,
        want_fingerprint: bool,
        want_loudness: bool,
    },
    Abort {
        id: u64,
    },
    Shutdown,
}

/// 一次分析的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// 时长（秒）
    pub duration: f64,
    pub fingerprint: Option<String>,
    pub loudness: Option<LoudnessResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AnalysisEventKind {
    /// 已处理字节比例 `[0, 1]`
    Progress(f64),
    /// 预计剩余毫秒数，每个任务最多一次
    Estimate(u64),
    Result(AnalysisResult),
    Error(ErrorReport),
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisEvent {
    pub id: u64,
    pub kind: AnalysisEventKind,
}

impl AnalysisEvent {
    pub fn new(id: u64, kind: AnalysisEventKind) -> Self {
        Self { id, kind }
    }

    /// 该任务的最后一个事件
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            AnalysisEventKind::Result(_) | AnalysisEventKind::Error(_) | AnalysisEventKind::Abort
        )
    }
}

// ==================== 播放 ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybackRequest {
    LoadTrack { source: AudioSource },
    FillBuffers { count: usize },
    Seek { time: f64, count: usize },
    Shutdown,
}

/// 已加载曲目的概要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub bit_rate: u32,
    pub is_vbr: bool,
    pub frames: u64,
    pub duration_seconds: f64,
}

impl From<&StreamMetadata> for TrackSummary {
    fn from(m: &StreamMetadata) -> Self {
        Self {
            sample_rate: m.sample_rate,
            channel_count: m.channel_count,
            bit_rate: m.bit_rate,
            is_vbr: m.is_vbr,
            frames: m.frames,
            duration_seconds: m.duration_seconds,
        }
    }
}

/// 输出采样率、输出声道数下的一段 PCM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilledBuffer {
    pub channels: Vec<Vec<f32>>,
    /// 每声道样本数
    pub length: usize,
    pub start_time: f64,
    pub end_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybackResponse {
    Loaded(TrackSummary),
    Buffers {
        buffers: Vec<FilledBuffer>,
        base_time: Option<f64>,
    },
    Error(ErrorReport),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_json_shape() {
        let req = AnalysisRequest::Analyze {
            id: 3,
            source: AudioSource::file("a.mp3"),
            want_fingerprint: true,
            want_loudness: false,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["type"], "analyze");
        assert_eq!(json["source"]["kind"], "file");
        let back: AnalysisRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn test_error_report_category() {
        let report = ErrorReport::from(AudioError::CodecNotSupported("aac".into()));
        assert_eq!(report.category, ErrorCategory::Format);
        assert!(report.message.contains("aac"));
    }

    #[test]
    fn test_terminal_events() {
        assert!(!AnalysisEvent::new(1, AnalysisEventKind::Progress(0.5)).is_terminal());
        assert!(AnalysisEvent::new(1, AnalysisEventKind::Abort).is_terminal());
    }

    #[test]
    fn test_memory_source_name() {
        let src = AudioSource::memory(Some("clip.mp3".into()), vec![0; 4]);
        assert_eq!(src.file_name(), Some(Path::new("clip.mp3")));
        assert_eq!(AudioSource::memory(None, vec![0; 4]).display_name(), "<memory:4 bytes>");
    }
}
