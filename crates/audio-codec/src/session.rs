//! Buffer-cycle engine.
//!
//! A [`DecodeSession`] owns one demuxer and one decoder and moves data in one
//! direction per cycle: demuxer → input slot → decoder → output slot → caller.
//! Every call is synchronous and bounded by the configured slot timeouts, so a
//! slow decoder degrades to fewer queued inputs or a [`PullOutput::Retry`],
//! never to a hang.
//!
//! ## Output leases
//! A [`PullOutput::Data`] view borrows the session, so it cannot be kept across
//! [`DecodeSession::release_output`]. While a buffer is held, a second pull is
//! rejected with [`CodecError::OutputAlreadyHeld`].

use std::fs::File;

use symphonia::core::io::MediaSource;
use symphonia::core::probe::Hint;

use crate::codec::{Decoder, DecoderFactory, OutputEvent, SymphoniaCodecs, SymphoniaDecoder};
use crate::config::EngineConfig;
use crate::demux::{Demuxer, SeekMode, SymphoniaDemuxer};
use crate::error::{CodecError, Result};
use crate::format::{BufferFlags, BufferInfo, TrackDescriptor, TrackFormat, is_audio_mime};
use crate::source::ByteRangeSource;

/// Sentinel returned by [`SeekPosition::as_micros`] when the position is unknown.
pub const UNKNOWN_POSITION_US: i64 = i64::MAX;

/// Result of a single [`DecodeSession::pull_output`] call.
#[derive(Debug)]
pub enum PullOutput<'a> {
    /// Decoded PCM; held until [`DecodeSession::release_output`].
    Data(OutputBuffer<'a>),
    /// Nothing decoded within the wait bound; call again later.
    Retry,
    /// The decoder has produced its last buffer.
    EndOfStream,
}

/// Borrowed view of a held output buffer.
#[derive(Clone, Copy, Debug)]
pub struct OutputBuffer<'a> {
    bytes: &'a [u8],
    info: BufferInfo,
}

impl<'a> OutputBuffer<'a> {
    /// Interleaved PCM payload.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether this is also the last buffer of the stream.
    pub fn is_end_of_stream(&self) -> bool {
        self.info.flags.is_end_of_stream()
    }

    pub fn presentation_time_us(&self) -> i64 {
        self.info.presentation_time_us
    }
}

/// Where the demuxer landed after a seek.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekPosition {
    Micros(u64),
    /// The demuxer could not report a timestamp (for example past the end).
    Unknown,
}

impl SeekPosition {
    /// Position as a signed microsecond count, [`UNKNOWN_POSITION_US`] if unknown.
    pub fn as_micros(self) -> i64 {
        match self {
            SeekPosition::Micros(us) => i64::try_from(us).unwrap_or(UNKNOWN_POSITION_US),
            SeekPosition::Unknown => UNKNOWN_POSITION_US,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct HeldOutput {
    slot: usize,
    info: BufferInfo,
}

/// One open decode of one audio track.
pub struct DecodeSession<X: Demuxer, C: Decoder> {
    demuxer: X,
    decoder: C,
    config: EngineConfig,
    track: TrackDescriptor,
    input_exhausted: bool,
    output_exhausted: bool,
    held: Option<HeldOutput>,
    closed: bool,
}

/// Session over the Symphonia demuxer and software decoder.
pub type SymphoniaSession = DecodeSession<SymphoniaDemuxer, SymphoniaDecoder>;

/// First `audio/*` track with a complete format, checked against the stereo restriction.
fn find_audio_track<X: Demuxer>(demuxer: &X) -> Result<(usize, TrackFormat, TrackDescriptor)> {
    for index in 0..demuxer.track_count() {
        let Some(format) = demuxer.track_format(index) else {
            continue;
        };
        if !format.mime.as_deref().is_some_and(is_audio_mime) {
            continue;
        }
        let Some(track) = format.descriptor() else {
            tracing::debug!(index, "audio track with incomplete format skipped");
            continue;
        };
        if track.channel_count != 2 {
            return Err(CodecError::UnsupportedChannelCount(track.channel_count));
        }
        return Ok((index, format, track));
    }
    Err(CodecError::NoAudioTrack)
}

impl<X: Demuxer, C: Decoder> DecodeSession<X, C> {
    /// Select the first stereo audio track of `demuxer`, start a matching
    /// decoder and queue the first batch of input.
    ///
    /// On failure every handle created so far is released before returning.
    pub fn open<F>(mut demuxer: X, factory: &F, config: EngineConfig) -> Result<Self>
    where
        F: DecoderFactory<Decoder = C>,
    {
        let (index, format, track) = find_audio_track(&demuxer)?;
        demuxer.select_track(index)?;

        let mut decoder = factory
            .create_decoder_by_type(&track.mime)
            .map_err(CodecError::into_setup)?;
        decoder.configure(&format).map_err(CodecError::into_setup)?;
        decoder.start().map_err(CodecError::into_setup)?;

        // From here on, dropping the session stops the decoder.
        let mut session = Self {
            demuxer,
            decoder,
            config,
            track,
            input_exhausted: false,
            output_exhausted: false,
            held: None,
            closed: false,
        };
        session.fill_input_buffers()?;

        tracing::info!(
            mime = %session.track.mime,
            sample_rate = session.track.sample_rate,
            channels = session.track.channel_count,
            duration_us = session.track.duration_us,
            track = index,
            "decode session opened"
        );
        Ok(session)
    }

    pub fn track(&self) -> &TrackDescriptor {
        &self.track
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn demuxer(&self) -> &X {
        &self.demuxer
    }

    pub fn decoder(&self) -> &C {
        &self.decoder
    }

    pub fn is_input_exhausted(&self) -> bool {
        self.input_exhausted
    }

    pub fn is_output_held(&self) -> bool {
        self.held.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(CodecError::InvalidState("session closed"));
        }
        Ok(())
    }

    /// Move compressed samples from the demuxer into free decoder input slots.
    ///
    /// Stops early when no slot frees up within the input timeout. Only a
    /// failed read marks the input as exhausted; `advance` is not trusted.
    fn fill_input_buffers(&mut self) -> Result<()> {
        if self.input_exhausted {
            return Ok(());
        }
        let timeout = self.config.input_timeout();
        let mut queued = 0usize;

        for _ in 0..self.config.max_input_fills {
            let Some(slot) = self.decoder.dequeue_input_buffer(timeout)? else {
                break;
            };
            let Some(buf) = self.decoder.input_buffer(slot) else {
                // Hand the slot straight back so the pool does not shrink.
                self.decoder
                    .queue_input_buffer(slot, 0, 0, BufferFlags::NONE)?;
                break;
            };

            match self.demuxer.read_sample_data(buf) {
                Some(size) => {
                    let pts = self.demuxer.sample_time_us().unwrap_or(0);
                    self.decoder
                        .queue_input_buffer(slot, size, pts, BufferFlags::NONE)?;
                    queued += 1;
                    self.demuxer.advance();
                }
                None => {
                    self.input_exhausted = true;
                    self.decoder
                        .queue_input_buffer(slot, 0, 0, BufferFlags::END_OF_STREAM)?;
                    tracing::debug!(queued, "input exhausted; end of stream queued");
                    break;
                }
            }
        }

        if queued > 0 {
            tracing::trace!(queued, "input buffers filled");
        }
        Ok(())
    }

    /// Fill input, then poll the decoder for the next output buffer.
    ///
    /// "Format changed" notifications are retried without limit; each retry
    /// waits at most one output timeout, so the caller's cadence bounds it.
    pub fn pull_output(&mut self) -> Result<PullOutput<'_>> {
        self.ensure_open()?;
        if self.held.is_some() {
            return Err(CodecError::OutputAlreadyHeld);
        }
        if self.output_exhausted {
            return Ok(PullOutput::EndOfStream);
        }

        self.fill_input_buffers()?;

        let timeout = self.config.output_timeout();
        let (slot, info) = loop {
            match self.decoder.dequeue_output_buffer(timeout)? {
                OutputEvent::FormatChanged => {
                    tracing::debug!("decoder output format changed");
                }
                OutputEvent::TryAgainLater { info } => {
                    return Ok(self.no_output(info));
                }
                OutputEvent::Buffer { slot, info } => break (slot, info),
            }
        };

        let in_bounds = match self.decoder.output_buffer(slot) {
            None => {
                self.decoder.release_output_buffer(slot)?;
                tracing::debug!(slot, "output buffer memory unavailable");
                return Ok(self.no_output(info));
            }
            Some(mem) => info
                .offset
                .checked_add(info.size)
                .is_some_and(|end| end <= mem.len()),
        };
        if !in_bounds {
            self.decoder.release_output_buffer(slot)?;
            return Err(CodecError::Decode(format!(
                "output buffer range {}+{} out of bounds",
                info.offset, info.size
            )));
        }

        self.held = Some(HeldOutput { slot, info });
        match self.held_output() {
            Some(buffer) => Ok(PullOutput::Data(buffer)),
            None => Err(CodecError::InvalidSlot(slot)),
        }
    }

    /// Classify a poll that produced no readable data.
    fn no_output(&mut self, info: BufferInfo) -> PullOutput<'static> {
        if info.flags.is_end_of_stream() {
            self.output_exhausted = true;
            tracing::debug!("decoder reached end of stream");
            PullOutput::EndOfStream
        } else {
            PullOutput::Retry
        }
    }

    /// View of the currently held output buffer, if any.
    pub fn held_output(&mut self) -> Option<OutputBuffer<'_>> {
        let held = self.held?;
        let mem = self.decoder.output_buffer(held.slot)?;
        let bytes = mem.get(held.info.offset..held.info.offset + held.info.size)?;
        Some(OutputBuffer {
            bytes,
            info: held.info,
        })
    }

    /// Return the held output buffer to the decoder. No-op if nothing is held.
    pub fn release_output(&mut self) -> Result<()> {
        let Some(held) = self.held.take() else {
            return Ok(());
        };
        if held.info.flags.is_end_of_stream() {
            self.output_exhausted = true;
        }
        self.decoder.release_output_buffer(held.slot)
    }

    /// Reposition to the nearest sync point at or before `ms` and refill input.
    pub fn seek(&mut self, ms: u64) -> Result<SeekPosition> {
        self.ensure_open()?;
        self.decoder.flush()?;
        let target_us = i64::try_from(ms.saturating_mul(1_000)).unwrap_or(i64::MAX);
        self.demuxer.seek_to(target_us, SeekMode::PreviousSync)?;

        self.input_exhausted = false;
        self.output_exhausted = false;
        self.held = None;

        let sample_time = self.demuxer.sample_time_us();
        self.fill_input_buffers()?;

        let position = match sample_time {
            Some(us) if us >= 0 => SeekPosition::Micros(us as u64),
            _ => SeekPosition::Unknown,
        };
        tracing::info!(target_ms = ms, position = ?position, "seeked");
        Ok(position)
    }

    /// Stop the decoder and drop any held output. Later calls do nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.held = None;
        if let Err(e) = self.decoder.stop() {
            tracing::warn!("decoder stop failed: {e}");
        }
        tracing::debug!("decode session closed");
    }
}

impl<X: Demuxer, C: Decoder> Drop for DecodeSession<X, C> {
    fn drop(&mut self) {
        self.close();
    }
}

impl SymphoniaSession {
    /// Open a session over any Symphonia media source.
    pub fn open_media_source(
        source: Box<dyn MediaSource>,
        hint: Hint,
        config: EngineConfig,
    ) -> Result<Self> {
        let demuxer = SymphoniaDemuxer::open(source, &hint)?;
        let codecs = SymphoniaCodecs::new(config.clone());
        Self::open(demuxer, &codecs, config)
    }

    /// Open a session over `length` bytes of `file` starting at `offset`.
    pub fn open_byte_range(
        file: File,
        offset: u64,
        length: u64,
        hint: Hint,
        config: EngineConfig,
    ) -> Result<Self> {
        let source = ByteRangeSource::new(file, offset, length)?;
        Self::open_media_source(Box::new(source), hint, config)
    }
}
