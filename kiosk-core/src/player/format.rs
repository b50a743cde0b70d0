//! Container detection from leading bytes.

use std::fmt;

use crate::protocol::MediaType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
    Mp4,
    Webm,
    Mp3,
    Ogg,
    Wav,
}

impl MediaFormat {
    pub fn media_type(self) -> MediaType {
        match self {
            MediaFormat::Png | MediaFormat::Jpeg | MediaFormat::Gif | MediaFormat::Webp => {
                MediaType::Image
            }
            MediaFormat::Mp4 | MediaFormat::Webm => MediaType::Video,
            MediaFormat::Mp3 | MediaFormat::Ogg | MediaFormat::Wav => MediaType::Audio,
        }
    }

    /// Identify `bytes` by magic number. `None` for anything unknown.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        let starts = |magic: &[u8]| bytes.starts_with(magic);
        let riff = |kind: &[u8; 4]| bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == kind;

        if starts(b"\x89PNG\r\n\x1a\n") {
            Some(MediaFormat::Png)
        } else if starts(&[0xFF, 0xD8, 0xFF]) {
            Some(MediaFormat::Jpeg)
        } else if starts(b"GIF87a") || starts(b"GIF89a") {
            Some(MediaFormat::Gif)
        } else if riff(b"WEBP") {
            Some(MediaFormat::Webp)
        } else if riff(b"WAVE") {
            Some(MediaFormat::Wav)
        } else if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
            Some(MediaFormat::Mp4)
        } else if starts(&[0x1A, 0x45, 0xDF, 0xA3]) {
            Some(MediaFormat::Webm)
        } else if starts(b"ID3") || (bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0) {
            Some(MediaFormat::Mp3)
        } else if starts(b"OggS") {
            Some(MediaFormat::Ogg)
        } else {
            None
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MediaFormat::Png => "png",
            MediaFormat::Jpeg => "jpeg",
            MediaFormat::Gif => "gif",
            MediaFormat::Webp => "webp",
            MediaFormat::Mp4 => "mp4",
            MediaFormat::Webm => "webm",
            MediaFormat::Mp3 => "mp3",
            MediaFormat::Ogg => "ogg",
            MediaFormat::Wav => "wav",
        };
        f.write_str(s)
    }
}
