//! Track and buffer metadata exchanged between demuxer, decoder and engine.

use serde::Serialize;
use symphonia::core::codecs::CodecParameters;

pub const MIME_FLAC: &str = "audio/flac";
pub const MIME_MPEG: &str = "audio/mpeg";
pub const MIME_AAC: &str = "audio/mp4a-latm";
pub const MIME_VORBIS: &str = "audio/vorbis";
pub const MIME_OPUS: &str = "audio/opus";
pub const MIME_ALAC: &str = "audio/alac";
pub const MIME_RAW: &str = "audio/raw";

/// Format of one container track as reported by the demuxer.
///
/// Any key may be missing; the engine skips audio tracks with incomplete keys.
#[derive(Clone, Debug, Default)]
pub struct TrackFormat {
    pub mime: Option<String>,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u16>,
    pub duration_us: Option<i64>,
    /// Parameters a decoder needs for `configure`.
    pub codec_params: Option<CodecParameters>,
}

impl TrackFormat {
    /// Describe a Symphonia track.
    pub fn from_codec_params(params: &CodecParameters) -> Self {
        Self {
            mime: mime_for_codec(params).map(str::to_string),
            sample_rate: params.sample_rate,
            channel_count: params.channels.map(|c| c.count() as u16),
            duration_us: duration_us_from_codec_params(params),
            codec_params: Some(params.clone()),
        }
    }

    /// Collapse into a descriptor when every key the engine needs is present.
    pub fn descriptor(&self) -> Option<TrackDescriptor> {
        Some(TrackDescriptor {
            mime: self.mime.clone()?,
            sample_rate: self.sample_rate?,
            channel_count: self.channel_count?,
            duration_us: self.duration_us?,
        })
    }
}

/// The audio track a session decodes. Fixed once the session is open.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TrackDescriptor {
    pub mime: String,
    pub sample_rate: u32,
    pub channel_count: u16,
    pub duration_us: i64,
}

/// Per-buffer flag set, as carried by [`BufferInfo`] and input queueing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags(0);
    pub const CODEC_CONFIG: BufferFlags = BufferFlags(2);
    pub const END_OF_STREAM: BufferFlags = BufferFlags(4);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_end_of_stream(self) -> bool {
        self.contains(Self::END_OF_STREAM)
    }
}

impl std::ops::BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: BufferFlags) -> BufferFlags {
        BufferFlags(self.0 | rhs.0)
    }
}

/// Placement of decoded data inside an output slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferInfo {
    /// Byte offset of the payload within the slot.
    pub offset: usize,
    /// Payload size in bytes.
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

/// `audio/*` MIME type for a Symphonia codec, if it is one we can name.
pub fn mime_for_codec(params: &CodecParameters) -> Option<&'static str> {
    use symphonia::core::codecs::*;
    let mime = match params.codec {
        CODEC_TYPE_FLAC => MIME_FLAC,
        CODEC_TYPE_MP1 | CODEC_TYPE_MP2 | CODEC_TYPE_MP3 => MIME_MPEG,
        CODEC_TYPE_AAC => MIME_AAC,
        CODEC_TYPE_VORBIS => MIME_VORBIS,
        CODEC_TYPE_OPUS => MIME_OPUS,
        CODEC_TYPE_ALAC => MIME_ALAC,
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE | CODEC_TYPE_PCM_S24LE
        | CODEC_TYPE_PCM_S24BE | CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE
        | CODEC_TYPE_PCM_U8 | CODEC_TYPE_PCM_S8 | CODEC_TYPE_PCM_F32LE
        | CODEC_TYPE_PCM_F32BE | CODEC_TYPE_PCM_F64LE | CODEC_TYPE_PCM_F64BE
        | CODEC_TYPE_PCM_ALAW | CODEC_TYPE_PCM_MULAW => MIME_RAW,
        _ => return None,
    };
    Some(mime)
}

pub fn is_audio_mime(mime: &str) -> bool {
    mime.starts_with("audio/")
}

/// Duration in microseconds from codec metadata.
///
/// Returns `None` if the container does not provide total frames or sample rate.
fn duration_us_from_codec_params(params: &CodecParameters) -> Option<i64> {
    let frames = params.n_frames?;
    let rate = params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    i64::try_from(frames.saturating_mul(1_000_000) / rate).ok()
}
