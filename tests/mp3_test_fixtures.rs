//! MP3 测试固件生成器
//!
//! 合成静音 MPEG-1 Layer III 流（44.1 kHz、128 kbps、立体声），
//! 可选 Xing/Info+LAME、VBRI、ID3v2/ID3v1 与 RIFF 封装。

#![allow(dead_code)]

use fs2::FileExt;
use std::fs::{File, OpenOptions, create_dir_all};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

pub const SAMPLE_RATE: u32 = 44_100;
pub const SAMPLES_PER_FRAME: u64 = 1152;
/// 128 kbps 的 byte rate
pub const BYTE_RATE: u32 = 16_000;
/// 不带 padding 的帧头及帧长
pub const PLAIN_HEADER: u32 = 0xFFFB_9004;
pub const PLAIN_FRAME_BYTES: usize = 417;
/// 带 padding 的帧头及帧长
pub const PADDED_HEADER: u32 = 0xFFFB_9204;
pub const PADDED_FRAME_BYTES: usize = 418;
/// 解码器固有延迟（样本）
pub const DECODER_DELAY: u64 = 529;

pub fn log(msg_zh: impl AsRef<str>, msg_en: impl AsRef<str>) {
    println!("{} / {}", msg_zh.as_ref(), msg_en.as_ref());
}

fn fixtures_base_dir() -> &'static PathBuf {
    static ROOT: OnceLock<PathBuf> = OnceLock::new();
    ROOT.get_or_init(|| {
        let path = std::env::var("MP3_ENGINE_FIXTURES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("tests/fixtures"));
        create_dir_all(&path).expect("无法创建测试固件目录");
        path
    })
}

/// 获取特定固件文件路径
pub fn fixture_path(name: &str) -> PathBuf {
    fixtures_base_dir().join(name)
}

/// 跨进程文件锁 + 进程内互斥，避免并发写入导致的截断文件。
struct FixtureLock {
    _mutex_guard: std::sync::MutexGuard<'static, ()>,
    lock_file: File,
}

impl FixtureLock {
    fn acquire() -> Self {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        let mutex = MUTEX.get_or_init(|| Mutex::new(()));
        let guard = mutex.lock().unwrap_or_else(|e| e.into_inner());

        let lock_path = fixtures_base_dir().join(".lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .expect("无法创建固件锁文件");
        file.lock_exclusive()
            .expect("无法获取固件文件锁，可能被其他进程占用");

        Self {
            _mutex_guard: guard,
            lock_file: file,
        }
    }
}

impl Drop for FixtureLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.lock_file);
    }
}

/// 写出固件；内容相同的已有文件不重写
///
/// 先写临时文件再 rename，并发读取方只会看到完整文件。
pub fn write_fixture(name: &str, bytes: &[u8]) -> PathBuf {
    let _guard = FixtureLock::acquire();
    let path = fixture_path(name);
    let up_to_date = std::fs::read(&path).is_ok_and(|existing| existing == bytes);
    if !up_to_date {
        let partial = fixture_path(&format!("{name}.partial"));
        std::fs::write(&partial, bytes).expect("无法写入固件");
        std::fs::rename(&partial, &path).expect("无法替换固件");
        log(
            format!("  生成 {name} ({} 字节)", bytes.len()),
            format!("  Generated {name} ({} bytes)", bytes.len()),
        );
    }
    path
}

/// 单个全零帧
pub fn frame(header: u32, size: usize) -> Vec<u8> {
    let mut f = vec![0u8; size];
    f[..4].copy_from_slice(&header.to_be_bytes());
    f
}

/// 第 `i` 帧是否带 padding（41 帧中 40 帧带 padding）
pub fn is_padded(i: usize) -> bool {
    i % 41 != 0
}

/// 静音 CBR 流
pub fn silent_cbr(frames: usize) -> Vec<u8> {
    (0..frames)
        .flat_map(|i| {
            if is_padded(i) {
                frame(PADDED_HEADER, PADDED_FRAME_BYTES)
            } else {
                frame(PLAIN_HEADER, PLAIN_FRAME_BYTES)
            }
        })
        .collect()
}

/// `silent_cbr(frames)` 中每帧的起始偏移，末尾附流长度
pub fn frame_offsets(frames: usize) -> Vec<u64> {
    let mut offsets = Vec::with_capacity(frames + 1);
    let mut pos = 0u64;
    for i in 0..frames {
        offsets.push(pos);
        let size = if is_padded(i) {
            PADDED_FRAME_BYTES
        } else {
            PLAIN_FRAME_BYTES
        };
        pos += size as u64;
    }
    offsets.push(pos);
    offsets
}

/// 按字节数推导的 CBR 时长
pub fn cbr_duration(bytes: usize) -> f64 {
    (bytes * 8) as f64 / (BYTE_RATE * 8) as f64
}

/// 完整解码 `frames` 帧后可得到的样本数
pub fn decoded_samples(frames: usize) -> u64 {
    frames as u64 * SAMPLES_PER_FRAME - 576 - DECODER_DELAY
}

/// Xing/Info 头中 LAME 扩展的写入参数
pub struct LameTag {
    pub delay: u32,
    pub padding: u32,
}

/// 以 Xing（`vbr`）或 Info 头帧开头的流；头帧之后是 `frames` 个静音帧
pub fn silent_with_xing(frames: usize, vbr: bool, lame: Option<LameTag>) -> Vec<u8> {
    let mut first = frame(PLAIN_HEADER, PLAIN_FRAME_BYTES);
    let body = silent_cbr(frames);

    // MPEG-1 立体声 side info 为 32 字节
    let mut pos = 4 + 32;
    first[pos..pos + 4].copy_from_slice(if vbr { b"Xing" } else { b"Info" });
    first[pos + 4..pos + 8].copy_from_slice(&0x0Fu32.to_be_bytes());
    pos += 8;
    first[pos..pos + 4].copy_from_slice(&(frames as u32).to_be_bytes());
    pos += 4;
    first[pos..pos + 4].copy_from_slice(&(body.len() as u32).to_be_bytes());
    pos += 4;
    for i in 0..100 {
        first[pos + i] = (i * 256 / 100) as u8;
    }
    pos += 100;
    first[pos..pos + 4].copy_from_slice(&50u32.to_be_bytes());
    pos += 4;

    if let Some(tag) = lame {
        first[pos..pos + 9].copy_from_slice(b"LAME3.100");
        let at = pos + 9 + 1 + 1 + 8 + 1 + 1;
        let packed = (tag.delay << 12) | (tag.padding & 0xFFF);
        first[at..at + 3].copy_from_slice(&packed.to_be_bytes()[1..]);
    }

    let mut out = first;
    out.extend(body);
    out
}

/// 以 VBRI 头帧开头的流；`entries` 个两字节表项，每项覆盖 `frames / entries` 帧
pub fn silent_with_vbri(frames: usize, entries: usize) -> Vec<u8> {
    let mut first = frame(PLAIN_HEADER, PLAIN_FRAME_BYTES);
    let body = silent_cbr(frames);
    let frames_per_entry = frames / entries;

    let tag = 36;
    first[tag..tag + 4].copy_from_slice(b"VBRI");
    first[tag + 4..tag + 6].copy_from_slice(&1u16.to_be_bytes());
    first[tag + 10..tag + 14].copy_from_slice(&(body.len() as u32).to_be_bytes());
    let mut pos = tag + 14;
    first[pos..pos + 4].copy_from_slice(&(frames as u32).to_be_bytes());
    first[pos + 4..pos + 6].copy_from_slice(&(entries as u16).to_be_bytes());
    first[pos + 6..pos + 8].copy_from_slice(&1u16.to_be_bytes());
    first[pos + 8..pos + 10].copy_from_slice(&2u16.to_be_bytes());
    first[pos + 10..pos + 12].copy_from_slice(&(frames_per_entry as u16).to_be_bytes());
    pos += 12;

    for j in 0..entries {
        let bytes: usize = (j * frames_per_entry..(j + 1) * frames_per_entry)
            .map(|i| {
                if is_padded(i) {
                    PADDED_FRAME_BYTES
                } else {
                    PLAIN_FRAME_BYTES
                }
            })
            .sum();
        first[pos + j * 2..pos + j * 2 + 2].copy_from_slice(&(bytes as u16).to_be_bytes());
    }

    let mut out = first;
    out.extend(body);
    out
}

/// 前面加 ID3v2 标签（`tag_bytes` 字节负载），末尾加 ID3v1 标签
pub fn with_id3(stream: Vec<u8>, tag_bytes: u32) -> Vec<u8> {
    let mut out = b"ID3\x03\x00\x00".to_vec();
    out.extend_from_slice(&[
        ((tag_bytes >> 21) & 0x7f) as u8,
        ((tag_bytes >> 14) & 0x7f) as u8,
        ((tag_bytes >> 7) & 0x7f) as u8,
        (tag_bytes & 0x7f) as u8,
    ]);
    out.extend(vec![0u8; tag_bytes as usize]);
    out.extend(stream);
    let mut v1 = b"TAG".to_vec();
    v1.resize(128, b' ');
    out.extend(v1);
    out
}

/// RIFF/WAVE 封装（format tag 0x0055），带 fact 样本数
pub fn riff_wrapped(stream: &[u8], total_samples: u32, codec_delay: u16) -> Vec<u8> {
    let mut fmt = Vec::with_capacity(30);
    fmt.extend_from_slice(&0x0055u16.to_le_bytes());
    fmt.extend_from_slice(&2u16.to_le_bytes());
    fmt.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    fmt.extend_from_slice(&BYTE_RATE.to_le_bytes());
    fmt.extend_from_slice(&1u16.to_le_bytes());
    fmt.extend_from_slice(&0u16.to_le_bytes());
    fmt.extend_from_slice(&12u16.to_le_bytes());
    fmt.extend_from_slice(&1u16.to_le_bytes());
    fmt.extend_from_slice(&2u32.to_le_bytes());
    fmt.extend_from_slice(&(PADDED_FRAME_BYTES as u16).to_le_bytes());
    fmt.extend_from_slice(&1u16.to_le_bytes());
    fmt.extend_from_slice(&codec_delay.to_le_bytes());

    let mut body = b"WAVE".to_vec();
    body.extend_from_slice(b"fmt ");
    body.extend_from_slice(&(fmt.len() as u32).to_le_bytes());
    body.extend(fmt);
    body.extend_from_slice(b"fact");
    body.extend_from_slice(&4u32.to_le_bytes());
    body.extend_from_slice(&total_samples.to_le_bytes());
    body.extend_from_slice(b"data");
    body.extend_from_slice(&(stream.len() as u32).to_le_bytes());
    body.extend_from_slice(stream);
    if stream.len() % 2 == 1 {
        body.push(0);
    }

    let mut out = b"RIFF".to_vec();
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend(body);
    out
}
