//! Codec identification and the derived audio/video format descriptions.

use crate::error::{DemuxError, Result};

/// Audio codecs the demuxer recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Vorbis,
    Opus,
    Aac,
}

/// Video codecs the demuxer recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    Vp8,
    Vp9,
}

/// Map a Matroska codec id string to an audio codec.
pub fn audio_codec_from_id(codec_id: &str) -> Option<AudioCodec> {
    match codec_id {
        "A_VORBIS" => Some(AudioCodec::Vorbis),
        "A_OPUS" => Some(AudioCodec::Opus),
        "A_AAC" => Some(AudioCodec::Aac),
        _ => None,
    }
}

/// Map a Matroska codec id string to a video codec.
pub fn video_codec_from_id(codec_id: &str) -> Option<VideoCodec> {
    match codec_id {
        "V_VP8" => Some(VideoCodec::Vp8),
        "V_VP9" => Some(VideoCodec::Vp9),
        _ => None,
    }
}

/// Decoder-facing description of the selected video track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoFormat {
    pub codec: VideoCodec,
    pub width: u64,
    pub height: u64,
    /// Chroma plane dimensions for 4:2:0 content.
    pub chroma_width: u64,
    pub chroma_height: u64,
    pub crop_left: u64,
    pub crop_top: u64,
    /// Picture dimensions after cropping.
    pub crop_width: u64,
    pub crop_height: u64,
    pub display_width: u64,
    pub display_height: u64,
    /// Frame rate; zero when the container does not declare one.
    pub fps: f64,
}

impl VideoFormat {
    /// Derive the format from the raw track fields.
    pub(crate) fn from_track(
        codec: VideoCodec,
        width: u64,
        height: u64,
        display_width: u64,
        display_height: u64,
        crop_left: u64,
        crop_top: u64,
        crop_right: u64,
        crop_bottom: u64,
    ) -> Self {
        Self {
            codec,
            width,
            height,
            chroma_width: width >> 1,
            chroma_height: height >> 1,
            crop_left,
            crop_top,
            crop_width: width.saturating_sub(crop_left).saturating_sub(crop_right),
            crop_height: height.saturating_sub(crop_top).saturating_sub(crop_bottom),
            display_width: if display_width > 0 { display_width } else { width },
            display_height: if display_height > 0 { display_height } else { height },
            fps: 0.0,
        }
    }
}

/// Decoder-facing description of the selected audio track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFormat {
    pub codec: AudioCodec,
    pub channels: u64,
    /// Sampling rate in Hz.
    pub rate: f64,
    /// Bits per sample; zero when not declared.
    pub bit_depth: u64,
}

/// Split a Vorbis CodecPrivate blob into its three setup headers.
///
/// The blob starts with a packet count (must be 2, meaning three packets),
/// then the Xiph-style lengths of the first two packets as 255-run bytes;
/// the third packet takes whatever remains.
pub fn split_vorbis_private(data: &[u8]) -> Result<[Vec<u8>; 3]> {
    let mut pos = 0usize;
    let take_byte = |pos: &mut usize| -> Result<u8> {
        let byte = *data.get(*pos).ok_or_else(|| {
            DemuxError::InvalidCodecHeader("Vorbis private data truncated".into())
        })?;
        *pos += 1;
        Ok(byte)
    };

    let count = take_byte(&mut pos)?;
    if count != 2 {
        return Err(DemuxError::InvalidCodecHeader(format!(
            "expected 2 Vorbis header lengths, found {}",
            count
        )));
    }

    let mut lengths = [0usize; 2];
    for len in lengths.iter_mut() {
        loop {
            let byte = take_byte(&mut pos)?;
            *len += byte as usize;
            if byte < 255 {
                break;
            }
        }
    }

    let rest = &data[pos..];
    if lengths[0] + lengths[1] > rest.len() {
        return Err(DemuxError::InvalidCodecHeader(format!(
            "Vorbis header lengths {}+{} exceed {} remaining bytes",
            lengths[0],
            lengths[1],
            rest.len()
        )));
    }
    let (first, rest) = rest.split_at(lengths[0]);
    let (second, third) = rest.split_at(lengths[1]);
    Ok([first.to_vec(), second.to_vec(), third.to_vec()])
}
