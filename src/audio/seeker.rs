//! 时间 → 字节偏移/帧号换算
//!
//! CBR 直接按平均帧长计算；VBR 优先用 Xing TOC，其次用帧索引（VBRI 精确表或扫描表）。
//! 非元数据来源时回退若干帧，让解码器预热位储备。

use super::byte_window::ByteWindow;
use super::mp3_demuxer::StreamMetadata;
use super::seek_table::Mp3SeekTable;
use crate::error::AudioResult;
use crate::tools::constants::mp3;
use serde::{Deserialize, Serialize};

#[cfg(debug_assertions)]
macro_rules! debug_seeker {
    ($($arg:tt)*) => {
        tracing::debug!(target: "seeker", $($arg)*)
    };
}

#[cfg(not(debug_assertions))]
macro_rules! debug_seeker {
    ($($arg:tt)*) => {};
}

/// 定位结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeekResult {
    /// 实际定位到的时间（秒）
    pub time: f64,
    /// 开始读取的字节偏移，位于 `[data_start, data_end]`
    pub offset: u64,
    /// 解码后需要丢弃的样本数
    pub samples_to_skip: u64,
    /// 开始解码的帧号
    pub frame: u64,
}

/// 计算 `time` 秒对应的读取位置
pub fn seek(
    time: f64,
    metadata: &mut StreamMetadata,
    window: &mut ByteWindow,
) -> AudioResult<SeekResult> {
    let duration = metadata.duration_seconds;
    let spf = metadata.samples_per_frame as u64;
    let frame_duration = metadata.frame_duration();

    let time = time.clamp(0.0, duration.max(0.0));
    let frames = (duration * metadata.sample_rate as f64 / spf as f64).floor() as u64;
    let mut frame = if duration > 0.0 {
        (time / duration * frames as f64).floor() as u64
    } else {
        0
    };
    let mut current_time = frame as f64 * frame_duration;
    let mut target_frame = frame.saturating_sub(mp3::SEEK_PREROLL_FRAMES);
    let mut samples_to_skip = (frame - target_frame) * spf;

    let offset = if !metadata.is_vbr {
        metadata.data_start + (target_frame as f64 * metadata.average_frame_size) as u64
    } else if let Some(toc) = metadata.toc.as_deref() {
        let ratio = if frames > 0 {
            frame as f64 / frames as f64
        } else {
            0.0
        };
        frame = ((ratio * 100.0).round() / 100.0 * frames as f64).floor() as u64;
        current_time = (frame + 1) as f64 * frame_duration;
        samples_to_skip = spf;
        target_frame = frame;
        let toc_ratio = if frames > 0 {
            frame as f64 / frames as f64
        } else {
            0.0
        };
        let toc_index = ((toc_ratio * 100.0).round() as usize).min(99);
        let percentage = toc.get(toc_index).copied().unwrap_or(0) as f64 / 256.0;
        let span = metadata.data_end.saturating_sub(metadata.data_start) as f64;
        metadata.data_start + (percentage * span) as u64
    } else {
        if metadata.seek_table.is_none() {
            metadata.seek_table = Some(Mp3SeekTable::new());
        }
        metadata.fill_seek_table_until(time + frame_duration, window)?;
        match metadata.seek_table.as_ref() {
            Some(table) if table.is_from_metadata() => {
                frame = table.closest_frame_of(frame);
                current_time = (frame + 1) as f64 * frame_duration;
                samples_to_skip = spf;
                target_frame = frame;
                table.offset_of_frame(frame).unwrap_or(metadata.data_start)
            }
            Some(table) => table
                .offset_of_frame(target_frame)
                .unwrap_or(metadata.data_start),
            None => metadata.data_start,
        }
    };

    if target_frame == 0 {
        samples_to_skip = metadata.encoder_delay_samples as u64;
    }

    let result = SeekResult {
        time: current_time.clamp(0.0, duration.max(0.0)),
        offset: offset.clamp(metadata.data_start, metadata.data_end.max(metadata.data_start)),
        samples_to_skip,
        frame: target_frame,
    };
    debug_seeker!("seek {time:.3}s -> {result:?}");
    Ok(result)
}
