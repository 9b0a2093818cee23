//! 字节窗口读取器
//!
//! 在大文件之上维护一个 `[start, end)` 的缓存窗口，解复用器和解码循环
//! 通过它做随机访问。窗口未命中时按“请求 + 预读”整体换页。

use crate::error::{AudioError, AudioResult};
use crate::tools::constants::defaults;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[cfg(debug_assertions)]
macro_rules! debug_window {
    ($($arg:tt)*) => {
        tracing::debug!(target: "byte_window", $($arg)*)
    };
}

#[cfg(not(debug_assertions))]
macro_rules! debug_window {
    ($($arg:tt)*) => {};
}

/// 可随机读取的字节源
pub trait ByteSource {
    /// 源的总字节数
    fn size(&self) -> u64;

    /// 读取 `[start, end)`，调用方保证 `end <= size()`
    fn read_at(&mut self, start: u64, end: u64) -> AudioResult<Vec<u8>>;
}

/// 基于文件的字节源
pub struct FileSource {
    file: File,
    size: u64,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> AudioResult<Self> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

impl ByteSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&mut self, start: u64, end: u64) -> AudioResult<Vec<u8>> {
        let mut buf = vec![0u8; end.saturating_sub(start) as usize];
        self.file.seek(SeekFrom::Start(start))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// 内存字节源（测试、已整体载入的数据）
#[derive(Clone)]
pub struct MemorySource {
    data: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

impl ByteSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&mut self, start: u64, end: u64) -> AudioResult<Vec<u8>> {
        Ok(self.data[start as usize..end as usize].to_vec())
    }
}

/// 字节窗口
///
/// 所有成功的读取都落在当前缓存区间内；借出的切片在下一次可能换页的调用前
/// 由借用检查器保证失效。
pub struct ByteWindow {
    source: Box<dyn ByteSource + Send>,
    size: u64,
    start: u64,
    buffer: Vec<u8>,
    lookahead: u64,
}

impl ByteWindow {
    pub fn new(source: impl ByteSource + Send + 'static) -> Self {
        Self::with_lookahead(source, defaults::WINDOW_LOOKAHEAD)
    }

    pub fn with_lookahead(source: impl ByteSource + Send + 'static, lookahead: u64) -> Self {
        let size = source.size();
        Self {
            source: Box::new(source),
            size,
            start: 0,
            buffer: Vec::new(),
            lookahead,
        }
    }

    /// 打开文件并包装成窗口
    pub fn open<P: AsRef<Path>>(path: P) -> AudioResult<Self> {
        Ok(Self::new(FileSource::open(path)?))
    }

    /// 字节源总大小
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// 当前窗口起点（绝对偏移）
    #[inline]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// 当前窗口终点（不含）
    #[inline]
    pub fn end(&self) -> u64 {
        self.start + self.buffer.len() as u64
    }

    #[inline]
    fn covers(&self, offset: u64, length: u64) -> bool {
        offset >= self.start && offset + length <= self.end()
    }

    /// 带重试的底层读取：仅对可重试的I/O错误重试
    fn fetch(&mut self, start: u64, end: u64) -> AudioResult<()> {
        let mut attempt = 0;
        loop {
            match self.source.read_at(start, end) {
                Ok(bytes) => {
                    debug_window!("window refill [{start}, {end}) ({} bytes)", bytes.len());
                    self.start = start;
                    self.buffer = bytes;
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < defaults::IO_RETRY_LIMIT => {
                    attempt += 1;
                    tracing::warn!("读取 [{start}, {end}) 失败，第{attempt}次重试: {e}");
                    std::thread::sleep(Duration::from_millis(
                        defaults::IO_RETRY_BACKOFF_MS * attempt as u64,
                    ));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 保证 `[offset, offset+length)` 驻留在窗口中
    pub fn ensure(&mut self, offset: u64, length: u64) -> AudioResult<()> {
        if offset + length > self.size {
            return Err(AudioError::UnexpectedEof {
                offset,
                length,
                size: self.size,
            });
        }
        if self.covers(offset, length) {
            return Ok(());
        }
        let end = (offset + length + self.lookahead).min(self.size);
        self.fetch(offset, end)
    }

    /// 返回 `[offset, offset+length)` 的切片
    pub fn bytes_at(&mut self, offset: u64, length: u64) -> AudioResult<&[u8]> {
        self.ensure(offset, length)?;
        let rel = (offset - self.start) as usize;
        Ok(&self.buffer[rel..rel + length as usize])
    }

    /// 顺序读取的摊还版本，预读放大系数为 1
    pub fn buffer_of_size_at(&mut self, size: u64, start: u64) -> AudioResult<&[u8]> {
        self.read_block_of_size_at(size, start, 1)
    }

    /// 读取从 `start` 开始最多 `size` 字节的块
    ///
    /// 命中时直接返回已有缓存；未命中时换页到 `[start, start + size × padding_factor)`。
    /// 返回的切片在源末尾处可能短于 `size`。
    pub fn read_block_of_size_at(
        &mut self,
        size: u64,
        start: u64,
        padding_factor: u64,
    ) -> AudioResult<&[u8]> {
        if self.size == 0 {
            return Err(AudioError::UnexpectedEof {
                offset: start,
                length: size,
                size: 0,
            });
        }
        let start = start.min(self.size - 1);
        let end = (start + size).min(self.size);
        if !self.covers(start, end - start) {
            let fetch_end = (start + size * padding_factor.max(1)).min(self.size);
            self.fetch(start, fetch_end)?;
        }
        let rel = (start - self.start) as usize;
        let len = (end - start) as usize;
        Ok(&self.buffer[rel..rel + len])
    }

    /// 当前缓存块
    #[inline]
    pub fn block(&self) -> &[u8] {
        &self.buffer
    }

    /// 当前缓存块中从绝对偏移 `offset` 开始的部分
    pub fn block_at(&self, offset: u64) -> Option<&[u8]> {
        if offset < self.start || offset > self.end() {
            return None;
        }
        Some(&self.buffer[(offset - self.start) as usize..])
    }

    /// 绝对偏移转换为缓存内偏移
    pub fn to_buffer_offset(&self, offset: u64) -> Option<usize> {
        (offset >= self.start && offset < self.end()).then(|| (offset - self.start) as usize)
    }

    fn array_at<const N: usize>(&mut self, offset: u64) -> AudioResult<[u8; N]> {
        let bytes = self.bytes_at(offset, N as u64)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn u8_at(&mut self, offset: u64) -> AudioResult<u8> {
        Ok(self.array_at::<1>(offset)?[0])
    }

    pub fn u16_be(&mut self, offset: u64) -> AudioResult<u16> {
        Ok(u16::from_be_bytes(self.array_at(offset)?))
    }

    pub fn u16_le(&mut self, offset: u64) -> AudioResult<u16> {
        Ok(u16::from_le_bytes(self.array_at(offset)?))
    }

    pub fn i16_be(&mut self, offset: u64) -> AudioResult<i16> {
        Ok(i16::from_be_bytes(self.array_at(offset)?))
    }

    pub fn i16_le(&mut self, offset: u64) -> AudioResult<i16> {
        Ok(i16::from_le_bytes(self.array_at(offset)?))
    }

    pub fn u24_be(&mut self, offset: u64) -> AudioResult<u32> {
        let [a, b, c] = self.array_at::<3>(offset)?;
        Ok(u32::from_be_bytes([0, a, b, c]))
    }

    pub fn u24_le(&mut self, offset: u64) -> AudioResult<u32> {
        let [a, b, c] = self.array_at::<3>(offset)?;
        Ok(u32::from_le_bytes([a, b, c, 0]))
    }

    pub fn u32_be(&mut self, offset: u64) -> AudioResult<u32> {
        Ok(u32::from_be_bytes(self.array_at(offset)?))
    }

    pub fn u32_le(&mut self, offset: u64) -> AudioResult<u32> {
        Ok(u32::from_le_bytes(self.array_at(offset)?))
    }

    pub fn i32_be(&mut self, offset: u64) -> AudioResult<i32> {
        Ok(i32::from_be_bytes(self.array_at(offset)?))
    }

    pub fn i32_le(&mut self, offset: u64) -> AudioResult<i32> {
        Ok(i32::from_le_bytes(self.array_at(offset)?))
    }

    pub fn u64_be(&mut self, offset: u64) -> AudioResult<u64> {
        Ok(u64::from_be_bytes(self.array_at(offset)?))
    }

    pub fn u64_le(&mut self, offset: u64) -> AudioResult<u64> {
        Ok(u64::from_le_bytes(self.array_at(offset)?))
    }

    pub fn f32_be(&mut self, offset: u64) -> AudioResult<f32> {
        Ok(f32::from_be_bytes(self.array_at(offset)?))
    }

    pub fn f32_le(&mut self, offset: u64) -> AudioResult<f32> {
        Ok(f32::from_le_bytes(self.array_at(offset)?))
    }

    pub fn f64_be(&mut self, offset: u64) -> AudioResult<f64> {
        Ok(f64::from_be_bytes(self.array_at(offset)?))
    }

    pub fn f64_le(&mut self, offset: u64) -> AudioResult<f64> {
        Ok(f64::from_le_bytes(self.array_at(offset)?))
    }

    /// 比较 `offset` 处的字节是否等于 `tag`，越界返回 false
    pub fn matches_at(&mut self, offset: u64, tag: &[u8]) -> bool {
        self.bytes_at(offset, tag.len() as u64)
            .map(|b| b == tag)
            .unwrap_or(false)
    }
}
