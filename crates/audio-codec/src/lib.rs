//! Compressed audio → PCM decode engine.
//!
//! A [`DecodeSession`] sits between a container [`Demuxer`] and a buffer-pool
//! [`Decoder`], cycling compressed samples in and interleaved PCM out under
//! fixed per-call wait bounds. Symphonia-backed implementations of both
//! collaborators are provided; [`SessionRegistry`] offers the same operations
//! keyed by handle.

pub mod codec;
pub mod config;
pub mod demux;
pub mod error;
pub mod format;
pub mod registry;
pub mod session;
pub mod source;

#[cfg(test)]
mod testing;

pub use codec::{Decoder, DecoderFactory, OutputEvent, SymphoniaCodecs, SymphoniaDecoder};
pub use config::EngineConfig;
pub use demux::{Demuxer, SeekMode, SymphoniaDemuxer};
pub use error::{CodecError, Result};
pub use format::{BufferFlags, BufferInfo, TrackDescriptor, TrackFormat};
pub use registry::{SessionId, SessionRegistry};
pub use session::{
    DecodeSession, OutputBuffer, PullOutput, SeekPosition, SymphoniaSession, UNKNOWN_POSITION_US,
};
pub use source::ByteRangeSource;
