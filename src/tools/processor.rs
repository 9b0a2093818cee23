//! 文件处理模块
//!
//! 单个文件的分析、渲染与流信息读取；每次调用使用自己的资源池。

use super::batch_state::BatchStats;
use super::cli::{AnalyzeOptions, RenderOptions};
use super::utils;
use crate::audio::{ByteWindow, DecoderRegistry, StreamMetadata};
use crate::error::{AudioError, AudioResult, ErrorCategory};
use crate::processing::{
    AnalysisConfig, AnalysisResult, AudioSource, ErrorReport, JobRequest, PipelineResources,
    PlaybackConfig, PlaybackPipeline, analyze_source, open_stream,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 每次向播放管线请求的缓冲个数
const RENDER_BATCH: usize = 8;

/// 单个文件的处理结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Analyzed { result: AnalysisResult },
    Failed { error: ErrorReport },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReport {
    pub file: PathBuf,
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

impl FileReport {
    pub fn new(file: &Path, result: AudioResult<AnalysisResult>) -> Self {
        let outcome = match result {
            Ok(result) => FileOutcome::Analyzed { result },
            Err(e) => FileOutcome::Failed {
                error: ErrorReport::from(&e),
            },
        };
        Self {
            file: file.to_path_buf(),
            outcome,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, FileOutcome::Analyzed { .. })
    }
}

/// 分析单个文件
pub fn analyze_file(path: &Path, options: &AnalyzeOptions) -> AudioResult<AnalysisResult> {
    let resources = PipelineResources::new(DecoderRegistry::default());
    let request = JobRequest {
        id: 0,
        source: AudioSource::file(path),
        want_fingerprint: options.fingerprint,
        want_loudness: options.loudness,
    };
    analyze_source(&request, &resources, &AnalysisConfig::default())
}

/// 分析并记入统计，失败时输出一行提示
pub fn analyze_and_record(
    path: &Path,
    options: &AnalyzeOptions,
    stats: &BatchStats,
    verbose: bool,
) -> FileReport {
    let result = analyze_file(path, options);
    let filename = utils::extract_filename_lossy(path);
    match &result {
        Ok(_) => {
            let count = stats.inc_processed();
            if verbose {
                println!("[OK] [{count}] {filename}");
            }
        }
        Err(e) => {
            let category = ErrorCategory::from_audio_error(e);
            if verbose {
                println!("[FAIL] {filename} - [{}] {e}", category.display_name());
                if let Some(source) = std::error::Error::source(e) {
                    println!("      原因 / Cause: {source}");
                }
            } else {
                println!("[FAIL] {filename} - [{}] {e} / 处理失败", category.display_name());
            }
            stats.inc_failed(category, filename);
        }
    }
    FileReport::new(path, result)
}

/// 串行处理多个文件
pub fn analyze_files_serial(
    files: &[PathBuf],
    options: &AnalyzeOptions,
    stats: &BatchStats,
    verbose: bool,
) -> Vec<FileReport> {
    files
        .iter()
        .enumerate()
        .map(|(index, file)| {
            if verbose {
                println!(
                    "[PROCESSING] [{}/{}] 处理 / Processing: {}",
                    index + 1,
                    files.len(),
                    utils::extract_filename_lossy(file)
                );
            }
            analyze_and_record(file, options, stats, verbose)
        })
        .collect()
}

/// 解复用得到的流信息
pub fn describe_file(path: &Path) -> AudioResult<StreamMetadata> {
    let mut window = ByteWindow::open(path)?;
    let (_, metadata) = open_stream(&mut window, Some(path), &DecoderRegistry::default())?;
    Ok(metadata)
}

/// 渲染结果概要
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderSummary {
    pub output_path: PathBuf,
    pub sample_rate: u32,
    pub channels: usize,
    /// 实际起始时间（秒）
    pub start_time: f64,
    pub frames_written: u64,
}

impl RenderSummary {
    pub fn duration(&self) -> f64 {
        self.frames_written as f64 / self.sample_rate as f64
    }
}

/// 经播放管线渲染为 32 位浮点 WAV
pub fn render_file(options: &RenderOptions) -> AudioResult<RenderSummary> {
    let channels = u16::try_from(options.channels)
        .ok()
        .filter(|&c| c > 0)
        .ok_or_else(|| AudioError::InvalidInput(format!("非法声道数: {}", options.channels)))?;
    let config = PlaybackConfig {
        output_sample_rate: options.sample_rate,
        output_channels: options.channels,
        ..PlaybackConfig::default()
    };
    let mut pipeline = PlaybackPipeline::new(config, DecoderRegistry::default())?;
    pipeline.load_track(&AudioSource::file(&options.input_path))?;

    let (mut buffers, start_time) = if options.start > 0.0 {
        pipeline.seek(options.start, RENDER_BATCH)?
    } else {
        (pipeline.fill_buffers(RENDER_BATCH)?, 0.0)
    };

    let spec = hound::WavSpec {
        channels,
        sample_rate: options.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&options.output_path, spec)?;
    let limit = options
        .duration
        .map(|d| (d * options.sample_rate as f64).round() as u64);

    let mut written = 0u64;
    'render: while !buffers.is_empty() {
        for buffer in &buffers {
            let take = limit.map_or(buffer.length, |l| {
                buffer.length.min(l.saturating_sub(written) as usize)
            });
            for i in 0..take {
                for channel in &buffer.channels {
                    writer.write_sample(channel[i])?;
                }
            }
            written += take as u64;
            if limit.is_some_and(|l| written >= l) {
                break 'render;
            }
        }
        buffers = pipeline.fill_buffers(RENDER_BATCH)?;
    }
    writer.finalize()?;

    Ok(RenderSummary {
        output_path: options.output_path.clone(),
        sample_rate: options.sample_rate,
        channels: options.channels,
        start_time,
        frames_written: written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_outcome_json() {
        let failed = FileReport::new(
            Path::new("x.mp3"),
            Err(AudioError::UnsupportedFormat("bad".into())),
        );
        assert!(!failed.is_ok());
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"]["category"], "Format");

        let ok = FileReport::new(
            Path::new("y.mp3"),
            Ok(AnalysisResult {
                duration: 3.5,
                fingerprint: None,
                loudness: None,
            }),
        );
        assert!(ok.is_ok());
        assert_eq!(serde_json::to_value(&ok).unwrap()["result"]["duration"], 3.5);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = describe_file(Path::new("/no/such/file.mp3")).unwrap_err();
        assert_eq!(ErrorCategory::from_audio_error(&err), ErrorCategory::Io);
    }
}
