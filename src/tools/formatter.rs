//! 结果格式化模块
//!
//! 分析报告以 comfy-table 表格或 JSON 输出，流信息以两列表格输出。

use super::batch_state::BatchStatsSnapshot;
use super::processor::{FileOutcome, FileReport, RenderSummary};
use super::utils;
use crate::audio::StreamMetadata;
use crate::error::{AudioError, AudioResult};
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use serde::Serialize;
use std::path::Path;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 报告头：工具版本和生成时间
pub fn create_output_header() -> String {
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    format!("MP3 Stream Engine v{VERSION} / Analysis Report\nlog date: {now}\n")
}

fn right(text: String) -> Cell {
    Cell::new(text).set_alignment(CellAlignment::Right)
}

/// 分析结果表格
pub fn format_reports_table(reports: &[FileReport]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "File / 文件",
        "Duration / 时长",
        "Integrated (LUFS)",
        "Gain (dB)",
        "True Peak (dBTP)",
        "LRA (LU)",
        "Silence / 静音 (s)",
        "Fingerprint / 指纹",
    ]);

    for report in reports {
        let name = utils::extract_filename_lossy(&report.file);
        match &report.outcome {
            FileOutcome::Analyzed { result } => {
                let loudness = result.loudness.as_ref();
                let silence = loudness.map_or_else(
                    || "-".to_string(),
                    |l| format!("{:.2} / {:.2}", l.begin_silence_seconds, l.end_silence_seconds),
                );
                let fingerprint = result.fingerprint.as_deref().map_or_else(
                    || "-".to_string(),
                    |f| format!("{}… ({} chars)", &f[..f.len().min(12)], f.len()),
                );
                table.add_row(vec![
                    Cell::new(name),
                    right(utils::duration_string(result.duration)),
                    right(utils::optional_db_string(loudness.and_then(|l| l.integrated_lufs))),
                    right(utils::optional_db_string(loudness.and_then(|l| l.track_gain_db))),
                    right(loudness.map_or_else(|| "-".into(), |l| utils::peak_db_string(l.true_peak))),
                    right(utils::optional_db_string(loudness.and_then(|l| l.loudness_range_lu))),
                    right(silence),
                    Cell::new(fingerprint),
                ]);
            }
            FileOutcome::Failed { error } => {
                table.add_row(vec![
                    Cell::new(name),
                    Cell::new(format!("[{}] {}", error.category.display_name(), error.message)),
                ]);
            }
        }
    }
    table.to_string()
}

/// 批量统计尾部
pub fn create_output_footer(stats: &BatchStatsSnapshot) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "成功 / Processed: {}  失败 / Failed: {}  成功率 / Success rate: {:.1}%\n",
        stats.processed,
        stats.failed,
        stats.success_rate()
    ));
    for (category, files) in &stats.error_stats {
        output.push_str(&format!("   {category}: {}\n", files.join(", ")));
    }
    output
}

#[derive(Serialize)]
struct JsonReport<'a> {
    tool_version: &'static str,
    generated_at: String,
    files: &'a [FileReport],
}

/// JSON 报告
pub fn format_reports_json(reports: &[FileReport]) -> AudioResult<String> {
    let report = JsonReport {
        tool_version: VERSION,
        generated_at: chrono::Local::now().to_rfc3339(),
        files: reports,
    };
    serde_json::to_string_pretty(&report)
        .map_err(|e| AudioError::InvalidInput(format!("JSON序列化失败: {e}")))
}

/// 流信息表格
pub fn format_metadata(path: &Path, metadata: &StreamMetadata) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Field / 字段", "Value / 值"]);

    let rows: Vec<(&str, String)> = vec![
        ("file", utils::extract_filename_lossy(path)),
        ("sample_rate", format!("{} Hz", metadata.sample_rate)),
        ("channels", metadata.channel_count.to_string()),
        ("bit_rate", format!("{} bps", metadata.bit_rate)),
        ("vbr", metadata.is_vbr.to_string()),
        ("lsf", metadata.lsf.to_string()),
        ("frames", metadata.frames.to_string()),
        ("samples_per_frame", metadata.samples_per_frame.to_string()),
        ("duration", utils::duration_string(metadata.duration_seconds)),
        ("data_start", metadata.data_start.to_string()),
        ("data_end", metadata.data_end.to_string()),
        ("average_frame_size", format!("{:.2}", metadata.average_frame_size)),
        ("encoder_delay", metadata.encoder_delay_samples.to_string()),
        ("encoder_padding", metadata.encoder_padding_samples.to_string()),
        ("toc", metadata.toc.is_some().to_string()),
    ];
    for (field, value) in rows {
        table.add_row(vec![Cell::new(field), right(value)]);
    }
    table.to_string()
}

/// 渲染完成信息
pub fn format_render_summary(summary: &RenderSummary) -> String {
    format!(
        "已写出 / Wrote {}: {} 帧, {} Hz × {} 声道, 起点 {:.3}s, 时长 {}",
        summary.output_path.display(),
        summary.frames_written,
        summary.sample_rate,
        summary.channels,
        summary.start_time,
        utils::duration_string(summary.duration())
    )
}

/// 打印到标准输出，或写入文件
pub fn write_output(text: &str, output_path: Option<&Path>) -> AudioResult<()> {
    match output_path {
        Some(path) => {
            std::fs::write(path, text)?;
            println!("结果已保存到 / Saved to: {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::AnalysisResult;

    #[test]
    fn test_table_contains_rows() {
        let reports = vec![FileReport::new(
            Path::new("dir/song.mp3"),
            Ok(AnalysisResult {
                duration: 61.0,
                fingerprint: Some("AQAAABCDEFGHIJKLMNOP".into()),
                loudness: None,
            }),
        )];
        let table = format_reports_table(&reports);
        assert!(table.contains("song.mp3"));
        assert!(table.contains("1:01.000"));
        assert!(table.contains("AQAAABCDEFGH"));
    }

    #[test]
    fn test_json_report() {
        let json = format_reports_json(&[]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["tool_version"], VERSION);
        assert!(value["files"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_header_has_date() {
        assert!(create_output_header().contains("log date:"));
    }
}
