//! 解码器插件边界
//!
//! 解码器不持有回调：每次 `decode_until_flush` 返回一个 `DecodeStep`，
//! 由调用方决定如何处理刷出的缓冲。具体实现通过 `DecoderRegistry` 按 codec 名构造。

use super::mp3_decoder::Mp3Decoder;
use super::mp3_demuxer::StreamMetadata;
use super::pool::Reusable;
use super::seeker::SeekResult;
use super::sniffer::CodecName;
use crate::error::{AudioError, AudioResult};
use crate::tools::constants::pool as pool_consts;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// 一段解码输出（平面布局）
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    pub channels: Vec<Vec<f32>>,
    /// 每声道样本数
    pub length: usize,
    pub sample_rate: u32,
    /// 首样本在本次 start/seek 之后输出序列中的位置
    pub start_sample: u64,
}

impl DecodedBuffer {
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// 时长（秒）
    pub fn duration(&self) -> f64 {
        self.length as f64 / self.sample_rate as f64
    }
}

/// 一次解码调用的结果
#[derive(Debug, Default)]
pub struct DecodeStep {
    /// 已消费到的绝对字节偏移，下次从这里继续读取
    pub consumed_until: u64,
    /// 攒满目标长度时刷出的缓冲
    pub flushed: Option<DecodedBuffer>,
}

/// 解码器插件接口
pub trait CodecDecoder: Reusable {
    /// 开始一条新流；重复 start 是错误
    fn start(&mut self, metadata: &StreamMetadata) -> AudioResult<()>;

    /// 从 `buffer`（位于绝对偏移 `start_offset`）解码，直到刷出一个缓冲或数据用尽
    fn decode_until_flush(&mut self, buffer: &[u8], start_offset: u64) -> AudioResult<DecodeStep>;

    /// 结束流并刷出剩余样本
    fn end(&mut self) -> Option<DecodedBuffer>;

    /// 定位后重置解码状态
    fn apply_seek(&mut self, seek: &SeekResult);

    /// 已输出的样本数
    fn current_sample_index(&self) -> u64;

    fn set_target_buffer_frames(&mut self, frames: usize);

    fn is_started(&self) -> bool;

    /// 已解码到流的最后一帧
    fn has_reached_end(&self) -> bool;
}

pub type DecoderFactory = Arc<dyn Fn() -> AudioResult<Box<dyn CodecDecoder>> + Send + Sync>;

/// codec 名 → 解码器构造函数
#[derive(Clone)]
pub struct DecoderRegistry {
    factories: HashMap<CodecName, DecoderFactory>,
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(
            CodecName::Mp3,
            Arc::new(|| Ok(Box::new(Mp3Decoder::new()) as Box<dyn CodecDecoder>)),
        );
        registry
    }
}

impl DecoderRegistry {
    /// 不含任何插件的注册表
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, codec: CodecName, factory: DecoderFactory) {
        self.factories.insert(codec, factory);
    }

    pub fn supports(&self, codec: CodecName) -> bool {
        self.factories.contains_key(&codec)
    }

    pub fn supported_codecs(&self) -> Vec<CodecName> {
        let mut codecs: Vec<_> = self.factories.keys().copied().collect();
        codecs.sort_by_key(|c| c.as_str());
        codecs
    }

    /// 构造解码器；构造失败按线性退避重试
    pub fn construct(&self, codec: CodecName) -> AudioResult<Box<dyn CodecDecoder>> {
        let factory = self
            .factories
            .get(&codec)
            .ok_or_else(|| AudioError::CodecNotSupported(codec.to_string()))?;

        let mut attempt = 0;
        loop {
            match factory() {
                Ok(decoder) => return Ok(decoder),
                Err(e) if attempt < pool_consts::PLUGIN_RETRIES => {
                    attempt += 1;
                    tracing::warn!("{codec} 解码器构造失败，第{attempt}次重试: {e}");
                    std::thread::sleep(Duration::from_millis(
                        pool_consts::PLUGIN_BACKOFF_MS * attempt as u64,
                    ));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
