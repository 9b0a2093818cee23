//! MP3 容器解复用
//!
//! 从字节窗口推导出 `StreamMetadata`：ID3v2 跳过、RIFF/WAVE 封装、帧同步、
//! Xing/Info/LAME 与 VBRI 厂商头、时长推导。

use super::byte_window::ByteWindow;
use super::mp3_header::{self, FrameHeader};
use super::seek_table::{FrameLayout, Mp3SeekTable};
use crate::error::{AudioError, AudioResult, format_error};
use crate::tools::constants::mp3;
use serde::Serialize;

#[cfg(debug_assertions)]
macro_rules! debug_demuxer {
    ($($arg:tt)*) => {
        tracing::debug!(target: "demuxer", $($arg)*)
    };
}

#[cfg(not(debug_assertions))]
macro_rules! debug_demuxer {
    ($($arg:tt)*) => {};
}

/// 解复用得到的流元数据
///
/// 除 `seek_table` 可被惰性扩展外，创建后不再修改。
#[derive(Debug, Clone, Serialize)]
pub struct StreamMetadata {
    pub sample_rate: u32,
    pub channel_count: u16,
    /// 比特率（bit/s）；VBR 时为最后观察到的帧比特率
    pub bit_rate: u32,
    pub is_vbr: bool,
    pub lsf: bool,
    pub data_start: u64,
    pub data_end: u64,
    pub frames: u64,
    pub duration_seconds: f64,
    pub samples_per_frame: u32,
    pub average_frame_size: f64,
    pub encoder_delay_samples: u32,
    pub encoder_padding_samples: u32,
    pub padding_start_frame: Option<u64>,
    pub max_bytes_per_sample: f64,
    #[serde(skip)]
    pub seek_table: Option<Mp3SeekTable>,
    #[serde(skip)]
    pub toc: Option<Vec<u8>>,
}

impl StreamMetadata {
    fn from_header(header: &FrameHeader, data_start: u64, data_end: u64) -> Self {
        Self {
            sample_rate: header.sample_rate,
            channel_count: header.channels,
            bit_rate: header.bit_rate,
            is_vbr: false,
            lsf: header.lsf,
            data_start,
            data_end,
            frames: 0,
            duration_seconds: 0.0,
            samples_per_frame: header.samples_per_frame(),
            average_frame_size: header.average_frame_size(),
            encoder_delay_samples: mp3::DEFAULT_ENCODER_DELAY,
            encoder_padding_samples: 0,
            padding_start_frame: None,
            max_bytes_per_sample: mp3_header::max_bytes_per_sample(header.sample_rate, header.lsf),
            seek_table: None,
            toc: None,
        }
    }

    /// 扫描参数快照
    pub fn frame_layout(&self) -> FrameLayout {
        FrameLayout {
            data_start: self.data_start,
            data_end: self.data_end,
            sample_rate: self.sample_rate,
            samples_per_frame: self.samples_per_frame,
        }
    }

    /// 若存在扫描型索引，则把它扩展到 `time` 秒
    pub fn fill_seek_table_until(&mut self, time: f64, window: &mut ByteWindow) -> AudioResult<()> {
        let layout = self.frame_layout();
        match self.seek_table.as_mut() {
            Some(table) => table.fill_until(time, &layout, window),
            None => Ok(()),
        }
    }

    /// 每帧时长（秒）
    #[inline]
    pub fn frame_duration(&self) -> f64 {
        self.samples_per_frame as f64 / self.sample_rate as f64
    }
}

/// 按 codec 名分派的解复用入口
pub fn demux(codec: &str, window: &mut ByteWindow) -> AudioResult<StreamMetadata> {
    match codec {
        "mp3" => demux_mp3(window),
        other => Err(format_error(other, "没有对应的解复用器")),
    }
}

fn unsupported(msg: impl Into<String>) -> AudioError {
    AudioError::UnsupportedFormat(msg.into())
}

/// ID3v2 标签之后的偏移
fn skip_id3v2(window: &mut ByteWindow) -> AudioResult<u64> {
    if window.size() < 10 || !window.matches_at(0, b"ID3") {
        return Ok(0);
    }
    let header = window.bytes_at(0, 10)?;
    let footer = ((header[5] >> 4) & 1) as u64 * 10;
    let size = ((header[6] as u64 & 0x7f) << 21)
        | ((header[7] as u64 & 0x7f) << 14)
        | ((header[8] as u64 & 0x7f) << 7)
        | (header[9] as u64 & 0x7f);
    Ok(size + 10 + footer)
}

/// 末尾 ID3v1 标签之前的偏移
fn data_end_without_id3v1(window: &mut ByteWindow) -> u64 {
    let size = window.size();
    if size >= 128 && window.matches_at(size - 128, b"TAG") {
        size - 128
    } else {
        size
    }
}

fn read_header(window: &mut ByteWindow, offset: u64, end: u64) -> Option<FrameHeader> {
    if offset + 4 > end {
        return None;
    }
    window.u32_be(offset).ok().and_then(FrameHeader::parse)
}

/// 解复用裸 MP3 或 RIFF 封装的 MP3
pub fn demux_mp3(window: &mut ByteWindow) -> AudioResult<StreamMetadata> {
    if window.size() < 4 {
        return Err(unsupported("文件过短"));
    }
    let offset = skip_id3v2(window)?;
    if window.matches_at(offset, b"RIFF") && window.matches_at(offset + 8, b"WAVE") {
        return demux_mp3_from_wav(offset, window);
    }

    let data_end = data_end_without_id3v1(window);
    let scan_end = data_end.min(offset + mp3::MAX_SYNC_SCAN_BYTES);

    let mut index = offset;
    while index + 4 <= scan_end {
        let Some(header) = read_header(window, index, data_end) else {
            index += 1;
            continue;
        };
        let frame_size = header.frame_size() as u64;
        let next_valid = read_header(window, index + frame_size, data_end).is_some();
        let has_vbri = window.matches_at(index + 36, b"VBRI");
        if !next_valid && !has_vbri {
            index += 1;
            continue;
        }

        let mut metadata = StreamMetadata::from_header(&header, index, data_end);

        if has_vbri {
            parse_vbri(index + 36, &mut metadata, window)?;
            return finish(metadata, window);
        }
        if let Some(tag) = find_xing(index, &header, window) {
            parse_xing(tag, &mut metadata, window)?;
            return finish(metadata, window);
        }

        // 无厂商头：沿帧链统计一致的帧头
        let mut found = 0;
        let mut pos = index;
        let mut reached_end = false;
        while found < mp3::REQUIRED_HEADERS {
            if pos + 4 > data_end {
                reached_end = true;
                break;
            }
            let Some(h) = read_header(window, pos, data_end) else {
                break;
            };
            if h.sample_rate != header.sample_rate || h.lsf != header.lsf {
                break;
            }
            if h.bit_rate != metadata.bit_rate {
                metadata.bit_rate = h.bit_rate;
                metadata.is_vbr = true;
            }
            found += 1;
            pos += h.frame_size() as u64;
        }
        if found >= mp3::REQUIRED_HEADERS || (reached_end && found > 0) {
            debug_demuxer!("frame sync at {index}, {found} consistent headers");
            return finish(metadata, window);
        }
        index += 1;
    }

    tracing::warn!("在前 {} 字节内未找到有效的 MP3 帧头", mp3::MAX_SYNC_SCAN_BYTES);
    Err(unsupported("未找到 MP3 帧头"))
}

/// Xing/Info 标签位置（side info 之后，考虑 CRC）
fn find_xing(index: u64, header: &FrameHeader, window: &mut ByteWindow) -> Option<u64> {
    let base = index + 4 + header.side_info_size() as u64;
    let candidates = if header.has_crc {
        [base + 2, base]
    } else {
        [base, base + 2]
    };
    candidates
        .into_iter()
        .find(|&pos| window.matches_at(pos, b"Xing") || window.matches_at(pos, b"Info"))
}

fn parse_xing(tag: u64, metadata: &mut StreamMetadata, window: &mut ByteWindow) -> AudioResult<()> {
    if window.matches_at(tag, b"Xing") {
        metadata.is_vbr = true;
    }
    let spf = metadata.samples_per_frame as u64;
    let flags = window.u32_be(tag + 4)?;
    let mut pos = tag + 8;
    let mut frames = None;

    if flags & 0x1 != 0 {
        let n = window.u32_be(pos)? as u64;
        metadata.frames = n;
        metadata.duration_seconds = (n * spf) as f64 / metadata.sample_rate as f64;
        frames = Some(n);
        pos += 4;
    }
    if flags & 0x2 != 0 {
        pos += 4;
    }
    if flags & 0x4 != 0 {
        metadata.toc = Some(window.bytes_at(pos, 100)?.to_vec());
        pos += 100;
    }
    if flags & 0x8 != 0 {
        pos += 4;
    }

    if window.matches_at(pos, b"LAME") {
        pos += 9 + 1 + 1 + 8 + 1 + 1;
        let packed = window.u24_be(pos)?;
        metadata.encoder_delay_samples = packed >> 12;
        let padding = packed & 0xFFF;
        if let Some(frames) = frames
            && padding > 0
        {
            let padding = padding.saturating_sub(mp3::DECODER_DELAY);
            let padded_frames = (padding as u64).div_ceil(spf);
            metadata.padding_start_frame = Some(frames.saturating_sub(padded_frames + 1));
            metadata.encoder_padding_samples = padding;
        }
        pos += 3 + 1 + 1 + 2 + 4 + 2 + 2;
        debug_demuxer!(
            "LAME tag: delay={} padding={}",
            metadata.encoder_delay_samples,
            metadata.encoder_padding_samples
        );
    }

    metadata.data_start = pos;
    Ok(())
}

fn parse_vbri(tag: u64, metadata: &mut StreamMetadata, window: &mut ByteWindow) -> AudioResult<()> {
    metadata.is_vbr = true;
    let spf = metadata.samples_per_frame as u64;
    let mut pos = tag + 4 + 10;
    let frames = window.u32_be(pos)? as u64;
    metadata.frames = frames;
    metadata.duration_seconds = (frames * spf) as f64 / metadata.sample_rate as f64;
    pos += 4;
    let entries = window.u16_be(pos)? as u64;
    let scale = window.u16_be(pos + 2)? as u64;
    let entry_size = window.u16_be(pos + 4)? as u64;
    let frames_per_entry = window.u16_be(pos + 6)? as u64;
    pos += 8;

    if !(1..=4).contains(&entry_size) {
        return Err(unsupported(format!("VBRI 表项宽度非法: {entry_size}")));
    }

    let data_start = pos + entries + entry_size;
    let mut table = Vec::with_capacity(entries as usize + 1);
    let mut offset = data_start;
    table.push(offset);
    for j in 0..entries {
        let at = pos + j * entry_size;
        let value = match entry_size {
            1 => window.u8_at(at)? as u64,
            2 => window.u16_be(at)? as u64,
            3 => window.u24_be(at)? as u64,
            _ => window.u32_be(at)? as u64,
        };
        offset += value * scale;
        table.push(offset);
    }

    metadata.seek_table = Some(Mp3SeekTable::from_metadata(
        table,
        frames,
        frames_per_entry,
        metadata.duration_seconds,
    ));
    metadata.encoder_delay_samples = mp3::VBRI_ENCODER_DELAY;
    metadata.data_start = data_start;
    debug_demuxer!("VBRI: {frames} frames, {entries} entries");
    Ok(())
}

/// 补全时长并做最终校验
fn finish(mut metadata: StreamMetadata, window: &mut ByteWindow) -> AudioResult<StreamMetadata> {
    if metadata.duration_seconds == 0.0 {
        let size = metadata.data_end.saturating_sub(metadata.data_start);
        if !metadata.is_vbr {
            metadata.duration_seconds = (size * 8) as f64 / metadata.bit_rate as f64;
            metadata.frames = (metadata.sample_rate as f64 * metadata.duration_seconds
                / metadata.samples_per_frame as f64) as u64;
        } else {
            let layout = metadata.frame_layout();
            let mut table = Mp3SeekTable::new();
            table.fill_to_end(&layout, window)?;
            metadata.frames = table.frames();
            metadata.duration_seconds = metadata.frames as f64 * metadata.frame_duration();
            metadata.seek_table = Some(table);
        }
    }

    if metadata.duration_seconds < mp3::MIN_DURATION_SECONDS {
        return Err(unsupported(format!(
            "时长过短: {:.3}s",
            metadata.duration_seconds
        )));
    }
    debug_demuxer!(
        "demuxed: {} Hz, {} ch, {:.2}s, vbr={}",
        metadata.sample_rate,
        metadata.channel_count,
        metadata.duration_seconds,
        metadata.is_vbr
    );
    Ok(metadata)
}

/// RIFF/WAVE 封装的 MP3（format tag 0x0055）
fn demux_mp3_from_wav(riff: u64, window: &mut ByteWindow) -> AudioResult<StreamMetadata> {
    let chunk_size = window.u32_le(riff + 4)? as u64;
    let data_end = (riff + chunk_size + 8).min(window.size());
    let fmt_size = window.u32_le(riff + 16)? as u64;
    let format_tag = window.u16_le(riff + 20)?;
    if format_tag != 0x0055 {
        return Err(unsupported(format!(
            "RIFF 封装的不是 MP3 (format tag 0x{format_tag:04x})"
        )));
    }
    let channels = window.u16_le(riff + 22)?;
    let sample_rate = window.u32_le(riff + 24)?;
    if sample_rate == 0 {
        return Err(unsupported("RIFF 采样率为 0"));
    }
    let byte_rate = window.u32_le(riff + 28)?;
    let block_size = window.u16_le(riff + 44)?;
    let encoder_delay = window.u16_le(riff + 48)?;
    let lsf = sample_rate < 32_000;
    let spf = mp3_header::samples_per_frame(lsf);

    let scan_end = (riff + mp3::WAV_CHUNK_SCAN_BYTES).min(window.size());
    let mut pos = riff + 20 + fmt_size;
    let mut duration = 0.0;
    let mut frames = 0u64;

    while pos + 8 <= scan_end {
        let id = window.bytes_at(pos, 4)?.to_vec();
        let size = window.u32_le(pos + 4)? as u64;
        match &id[..] {
            b"fact" => {
                let samples = window.u32_le(pos + 8)? as u64;
                duration = samples as f64 / sample_rate as f64;
                frames = samples / spf as u64;
            }
            b"data" => {
                let data_start = pos + 8;
                if duration == 0.0 {
                    if byte_rate == 0 {
                        return Err(unsupported("RIFF byte rate 为 0"));
                    }
                    duration = data_end.saturating_sub(data_start) as f64 / byte_rate as f64;
                    frames = (duration * sample_rate as f64 / spf as f64) as u64;
                }
                if duration < mp3::MIN_DURATION_SECONDS {
                    return Err(unsupported(format!("时长过短: {duration:.3}s")));
                }
                debug_demuxer!("MP3 in RIFF: data [{data_start}, {data_end}), {duration:.2}s");
                return Ok(StreamMetadata {
                    sample_rate,
                    channel_count: channels,
                    bit_rate: byte_rate * 8,
                    is_vbr: false,
                    lsf,
                    data_start,
                    data_end,
                    frames,
                    duration_seconds: duration,
                    samples_per_frame: spf,
                    average_frame_size: block_size as f64,
                    encoder_delay_samples: encoder_delay as u32,
                    encoder_padding_samples: 0,
                    padding_start_frame: None,
                    max_bytes_per_sample: mp3_header::max_bytes_per_sample(sample_rate, lsf),
                    seek_table: None,
                    toc: None,
                });
            }
            _ => {}
        }
        // chunk 按偶数字节对齐
        pos += 8 + size + (size & 1);
    }
    Err(unsupported("RIFF 中未找到 data chunk"))
}
