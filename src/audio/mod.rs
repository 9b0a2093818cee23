//! 音频引擎底层模块
//!
//! 字节窗口读取、MP3 解复用与寻址、解码插件边界、声道混合、重采样和实例池。

pub mod byte_window;
pub mod channel_mixer;
pub mod decoder;
pub mod mp3_decoder;
pub mod mp3_demuxer;
pub mod mp3_header;
pub mod pool;
pub mod resampler;
pub mod seek_table;
pub mod seeker;
pub mod sniffer;

pub use byte_window::{ByteSource, ByteWindow, FileSource, MemorySource};
pub use channel_mixer::ChannelMixer;
pub use decoder::{CodecDecoder, DecodeStep, DecodedBuffer, DecoderFactory, DecoderRegistry};
pub use mp3_decoder::Mp3Decoder;
pub use mp3_demuxer::{StreamMetadata, demux};
pub use pool::{Lease, ResourcePool, Reusable, ScratchBuffers, ScratchRole};
pub use resampler::{Resampler, ResamplerKey};
pub use seek_table::Mp3SeekTable;
pub use seeker::{SeekResult, seek};
pub use sniffer::{CodecName, sniff_codec};
