//! MP3 帧偏移索引
//!
//! 两种来源：VBRI 头中的精确表（`is_from_metadata`），或者按需向前扫描帧头
//! 增量构建的表。表只增长不收缩，偏移单调递增。

use super::byte_window::ByteWindow;
use super::mp3_header::FrameHeader;
use crate::error::AudioResult;
use crate::tools::constants::mp3;

#[cfg(debug_assertions)]
macro_rules! debug_seek_table {
    ($($arg:tt)*) => {
        tracing::debug!(target: "seek_table", $($arg)*)
    };
}

#[cfg(not(debug_assertions))]
macro_rules! debug_seek_table {
    ($($arg:tt)*) => {};
}

/// 扫描所需的流参数（从 StreamMetadata 拷贝出来，避免借用冲突）
#[derive(Debug, Clone, Copy)]
pub struct FrameLayout {
    pub data_start: u64,
    pub data_end: u64,
    pub sample_rate: u32,
    pub samples_per_frame: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Mp3SeekTable {
    frames: u64,
    filled_until: f64,
    table: Vec<u64>,
    last_frame_size: u64,
    frames_per_entry: u64,
    is_from_metadata: bool,
    complete: bool,
}

impl Mp3SeekTable {
    /// 空表，等待 `fill_until` 扫描
    pub fn new() -> Self {
        Self {
            frames_per_entry: 1,
            ..Default::default()
        }
    }

    /// 由 VBRI 元数据构造的精确表
    pub fn from_metadata(table: Vec<u64>, frames: u64, frames_per_entry: u64, duration: f64) -> Self {
        Self {
            frames,
            filled_until: duration,
            table,
            last_frame_size: 0,
            frames_per_entry: frames_per_entry.max(1),
            is_from_metadata: true,
            complete: true,
        }
    }

    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// 已索引覆盖的时长（秒）
    #[inline]
    pub fn filled_until(&self) -> f64 {
        self.filled_until
    }

    #[inline]
    pub fn is_from_metadata(&self) -> bool {
        self.is_from_metadata
    }

    /// 是否已扫描到数据末尾
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    #[inline]
    pub fn frames_per_entry(&self) -> u64 {
        self.frames_per_entry
    }

    #[inline]
    pub fn entries(&self) -> &[u64] {
        &self.table
    }

    /// 最接近的已索引帧号
    pub fn closest_frame_of(&self, frame: u64) -> u64 {
        let frame = self.frames.min(frame) as f64;
        let fpe = self.frames_per_entry as f64;
        ((frame / fpe).round() * fpe) as u64
    }

    /// 帧号对应的字节偏移
    pub fn offset_of_frame(&self, frame: u64) -> Option<u64> {
        if self.table.is_empty() {
            return None;
        }
        let index = (self.closest_frame_of(frame) / self.frames_per_entry) as usize;
        self.table.get(index.min(self.table.len() - 1)).copied()
    }

    /// 把索引扩展到至少覆盖 `target_time` 秒（或数据末尾）
    ///
    /// 幂等；单次调用最多扫描 `MAX_FRAMES_PER_FILL` 帧，调用方可重复调用继续扩展。
    pub fn fill_until(
        &mut self,
        target_time: f64,
        layout: &FrameLayout,
        window: &mut ByteWindow,
    ) -> AudioResult<()> {
        if self.filled_until >= target_time || self.complete {
            return Ok(());
        }
        let spf = layout.samples_per_frame as f64;
        let max_frames = (target_time * layout.sample_rate as f64 / spf).ceil() as u64;
        let end = layout.data_end.min(window.size());

        let mut offset = match self.table.last() {
            Some(&last) if self.frames > 0 => last + self.last_frame_size,
            _ => layout.data_start,
        };
        let budget_end = self.frames + mp3::MAX_FRAMES_PER_FILL;

        while self.frames < max_frames && self.frames < budget_end {
            if offset + 4 > end {
                self.complete = true;
                break;
            }
            let raw = window.u32_be(offset)?;
            match FrameHeader::parse(raw) {
                Some(header) => {
                    let size = header.frame_size() as u64;
                    self.table.push(offset);
                    self.frames += 1;
                    self.last_frame_size = size;
                    offset += size;
                }
                None => offset += 1,
            }
        }

        self.filled_until = spf / layout.sample_rate as f64 * self.frames as f64;
        debug_seek_table!(
            "seek table filled: {} frames, {:.2}s, complete={}",
            self.frames,
            self.filled_until,
            self.complete
        );
        Ok(())
    }

    /// 一直扫描到数据末尾
    pub fn fill_to_end(&mut self, layout: &FrameLayout, window: &mut ByteWindow) -> AudioResult<()> {
        while !self.complete {
            let before = self.frames;
            self.fill_until(f64::MAX, layout, window)?;
            if self.frames == before && !self.complete {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::byte_window::MemorySource;

    fn cbr_stream(frames: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for _ in 0..frames {
            let mut frame = vec![0u8; 417];
            frame[..4].copy_from_slice(&0xFFFB_9004u32.to_be_bytes());
            out.extend_from_slice(&frame);
        }
        out
    }

    fn layout(len: u64) -> FrameLayout {
        FrameLayout {
            data_start: 0,
            data_end: len,
            sample_rate: 44100,
            samples_per_frame: 1152,
        }
    }

    #[test]
    fn test_incremental_fill() {
        let data = cbr_stream(200);
        let len = data.len() as u64;
        let mut window = ByteWindow::new(MemorySource::new(data));
        let mut table = Mp3SeekTable::new();

        table.fill_until(1.0, &layout(len), &mut window).unwrap();
        let after_one_second = table.frames();
        assert_eq!(after_one_second, (44100.0f64 / 1152.0).ceil() as u64);
        assert!(table.filled_until() >= 1.0);

        // 幂等
        table.fill_until(0.5, &layout(len), &mut window).unwrap();
        assert_eq!(table.frames(), after_one_second);

        table.fill_to_end(&layout(len), &mut window).unwrap();
        assert_eq!(table.frames(), 200);
        assert!(table.is_complete());
        assert!(table.entries().windows(2).all(|w| w[0] < w[1]));
        assert_eq!(table.offset_of_frame(3), Some(3 * 417));
        assert_eq!(table.offset_of_frame(10_000), Some(199 * 417));
    }

    #[test]
    fn test_skips_garbage_between_frames() {
        let mut data = vec![0u8; 7];
        data.extend(cbr_stream(3));
        let len = data.len() as u64;
        let mut window = ByteWindow::new(MemorySource::new(data));
        let mut table = Mp3SeekTable::new();
        table.fill_to_end(&layout(len), &mut window).unwrap();
        assert_eq!(table.entries(), &[7, 7 + 417, 7 + 834]);
    }

    #[test]
    fn test_metadata_table_closest_frame() {
        let table = Mp3SeekTable::from_metadata(vec![100, 200, 300, 400], 300, 100, 7.8);
        assert!(table.is_from_metadata());
        assert_eq!(table.closest_frame_of(149), 100);
        assert_eq!(table.closest_frame_of(151), 200);
        assert_eq!(table.offset_of_frame(151), Some(300));
        assert_eq!(table.closest_frame_of(1000), 300);
    }
}
