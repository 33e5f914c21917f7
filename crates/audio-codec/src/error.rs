//! Error type shared by the engine and its collaborators.
//!
//! Every variant carries a distinct negative code so a foreign caller can keep
//! receiving a plain integer status.

use symphonia::core::errors::Error as SymphoniaError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CodecError>;

#[derive(Error, Debug)]
pub enum CodecError {
    /// No track with an `audio/` MIME type (and complete format keys) was found.
    #[error("no audio track found")]
    NoAudioTrack,

    /// Only two-channel tracks are decoded.
    #[error("unsupported channel count {0} (stereo only)")]
    UnsupportedChannelCount(u16),

    /// No decoder is available for the track's MIME type.
    #[error("no decoder for mime type {0}")]
    UnsupportedMime(String),

    /// The track format lacks the parameters needed to configure a decoder.
    #[error("track format has no codec parameters")]
    MissingCodecParameters,

    /// Creating, configuring or starting the decoder failed.
    #[error("decoder setup failed: {0}")]
    DecoderSetup(String),

    /// An operation was attempted in the wrong lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// A slot index that is not currently lent out was passed back.
    #[error("invalid buffer slot {0}")]
    InvalidSlot(usize),

    /// `pull_output` was called while a previous output buffer is still held.
    #[error("an output buffer is already held; release it first")]
    OutputAlreadyHeld,

    #[error("unknown session {0}")]
    UnknownSession(u64),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("demux: {0}")]
    Demux(String),

    #[error("decode: {0}")]
    Decode(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Raw non-zero status reported by a collaborator.
    #[error("status {0}")]
    Status(i32),
}

impl CodecError {
    /// Integer status for callers that cannot carry a typed error.
    pub fn code(&self) -> i32 {
        match self {
            CodecError::NoAudioTrack => -2,
            CodecError::UnsupportedChannelCount(_) => -3,
            CodecError::UnsupportedMime(_) => -4,
            CodecError::MissingCodecParameters => -5,
            CodecError::InvalidState(_) => -6,
            CodecError::InvalidSlot(_) => -7,
            CodecError::OutputAlreadyHeld => -8,
            CodecError::UnknownSession(_) => -9,
            CodecError::Io(_) => -10,
            CodecError::Demux(_) => -11,
            CodecError::Decode(_) => -12,
            CodecError::Unsupported(_) => -13,
            CodecError::DecoderSetup(_) => -14,
            CodecError::Status(code) => *code,
        }
    }

    /// Whether this error can only arise while a session is being set up.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            CodecError::NoAudioTrack
                | CodecError::UnsupportedChannelCount(_)
                | CodecError::UnsupportedMime(_)
                | CodecError::MissingCodecParameters
                | CodecError::DecoderSetup(_)
        )
    }

    /// Re-tag an error raised while bringing up a decoder as a setup failure.
    pub(crate) fn into_setup(self) -> Self {
        if self.is_setup_error() {
            self
        } else {
            CodecError::DecoderSetup(self.to_string())
        }
    }
}

impl From<SymphoniaError> for CodecError {
    fn from(e: SymphoniaError) -> Self {
        match e {
            SymphoniaError::IoError(e) => CodecError::Io(e),
            SymphoniaError::DecodeError(msg) => CodecError::Decode(msg.to_string()),
            SymphoniaError::SeekError(kind) => CodecError::Demux(format!("seek: {kind:?}")),
            SymphoniaError::Unsupported(what) => CodecError::Unsupported(what.to_string()),
            SymphoniaError::LimitError(what) => CodecError::Decode(format!("limit: {what}")),
            SymphoniaError::ResetRequired => CodecError::Decode("reset required".to_string()),
        }
    }
}
