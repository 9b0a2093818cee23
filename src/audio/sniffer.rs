//! 编码格式嗅探
//!
//! 先看文件内容（前 8 KB 的魔数/帧头），不认识再看扩展名。

use super::byte_window::ByteWindow;
use super::mp3_header::FrameHeader;
use crate::error::AudioResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// 嗅探窗口大小
pub const SNIFF_LENGTH: u64 = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecName {
    Mp3,
    Wav,
    Aac,
    Webm,
    Ogg,
    Unknown,
}

impl CodecName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
            Self::Aac => "aac",
            Self::Webm => "webm",
            Self::Ogg => "ogg",
            Self::Unknown => "unknown",
        }
    }

    /// 从扩展名推断
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "mp3" | "mpeg" | "mpg" => Some(Self::Mp3),
            "wav" | "wave" => Some(Self::Wav),
            "aac" | "m4a" | "mp4" => Some(Self::Aac),
            "webm" => Some(Self::Webm),
            "ogg" | "oga" | "opus" => Some(Self::Ogg),
            _ => None,
        }
    }
}

impl fmt::Display for CodecName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RIFF 里的 format tag 决定真实编码
fn refine_wav(buffer: &[u8], riff: usize) -> CodecName {
    if riff + 22 > buffer.len() {
        return CodecName::Wav;
    }
    match u16::from_le_bytes([buffer[riff + 20], buffer[riff + 21]]) {
        0x0055 => CodecName::Mp3,
        0x0001 | 0x0003 => CodecName::Wav,
        _ => CodecName::Unknown,
    }
}

/// 只看内容
pub fn codec_from_contents(buffer: &[u8]) -> Option<CodecName> {
    let length = buffer.len().min(SNIFF_LENGTH as usize);
    if length < 4 {
        return None;
    }
    for i in 0..length - 4 {
        let value = u32::from_be_bytes([buffer[i], buffer[i + 1], buffer[i + 2], buffer[i + 3]]);
        if &buffer[i..i + 4] == b"RIFF" && i + 12 < length && &buffer[i + 8..i + 12] == b"WAVE" {
            return Some(refine_wav(buffer, i));
        } else if value >> 16 == 0xFFF1 || value >> 16 == 0xFFF9 {
            return Some(CodecName::Aac);
        } else if value == 0x1A45_DFA3 {
            return Some(CodecName::Webm);
        } else if &buffer[i..i + 4] == b"OggS" {
            return Some(CodecName::Ogg);
        } else if &buffer[i..i + 3] == b"ID3" || FrameHeader::probably_header(value) {
            return Some(CodecName::Mp3);
        }
    }
    None
}

/// 只看文件名
pub fn codec_from_file_name(path: &Path) -> Option<CodecName> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(CodecName::from_extension)
}

/// 内容优先，扩展名兜底
pub fn sniff_codec(window: &mut ByteWindow, file_name: Option<&Path>) -> AudioResult<Option<CodecName>> {
    if window.size() > 0 {
        let block = window.read_block_of_size_at(SNIFF_LENGTH, 0, 1)?;
        if let Some(codec) = codec_from_contents(block) {
            return Ok(Some(codec));
        }
    }
    Ok(file_name.and_then(codec_from_file_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn riff_with_tag(tag: u16) -> Vec<u8> {
        let mut v = b"RIFF\0\0\0\0WAVEfmt \x10\0\0\0".to_vec();
        v.extend_from_slice(&tag.to_le_bytes());
        v.extend_from_slice(&[0u8; 16]);
        v
    }

    #[test]
    fn test_content_detection() {
        assert_eq!(codec_from_contents(&riff_with_tag(0x55)), Some(CodecName::Mp3));
        assert_eq!(codec_from_contents(&riff_with_tag(1)), Some(CodecName::Wav));
        assert_eq!(codec_from_contents(&riff_with_tag(0x11)), Some(CodecName::Unknown));
        assert_eq!(codec_from_contents(b"ID3\x03\0\0\0\0\0\0"), Some(CodecName::Mp3));
        assert_eq!(codec_from_contents(b"OggS\0\0\0\0"), Some(CodecName::Ogg));
        assert_eq!(codec_from_contents(&[0x1A, 0x45, 0xDF, 0xA3, 0, 0]), Some(CodecName::Webm));
        assert_eq!(codec_from_contents(&[0xFF, 0xF1, 0x50, 0x80, 0, 0]), Some(CodecName::Aac));
        assert_eq!(codec_from_contents(&[0, 0, 0xFF, 0xFB, 0x90, 0x04, 0]), Some(CodecName::Mp3));
        assert_eq!(codec_from_contents(&[0u8; 64]), None);
    }

    #[test]
    fn test_extension_fallback() {
        assert_eq!(
            codec_from_file_name(Path::new("a/b/Track.MP3")),
            Some(CodecName::Mp3)
        );
        assert_eq!(codec_from_file_name(Path::new("noext")), None);
    }
}
