//! Demuxer seam and its Symphonia-backed implementation.
//!
//! The trait follows the extractor model: a cursor over the selected track's
//! compressed samples, where reading copies the current sample and `advance`
//! moves to the next one.

use symphonia::core::errors::{Error as SymphoniaError, SeekErrorKind};
use symphonia::core::formats::{
    FormatOptions, FormatReader, Packet, SeekMode as FormatSeekMode, SeekTo,
};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::error::{CodecError, Result};
use crate::format::TrackFormat;

/// Where a timestamp seek may land relative to the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekMode {
    /// Nearest sync point at or before the target.
    PreviousSync,
    /// Nearest sync point at or after the target.
    NextSync,
    /// Nearest sync point in either direction.
    ClosestSync,
}

/// Container-side collaborator of a decode session.
pub trait Demuxer {
    fn track_count(&self) -> usize;

    /// Format of track `index`, or `None` if it cannot be described.
    fn track_format(&self, index: usize) -> Option<TrackFormat>;

    fn select_track(&mut self, index: usize) -> Result<()>;

    /// Copy the current sample into `buf`.
    ///
    /// `None` means no more sample data; this is the only authoritative
    /// end-of-stream signal.
    fn read_sample_data(&mut self, buf: &mut [u8]) -> Option<usize>;

    /// Move to the next sample. The return value is advisory and may report
    /// `false` before the real end of the stream.
    fn advance(&mut self) -> bool;

    fn seek_to(&mut self, time_us: i64, mode: SeekMode) -> Result<()>;

    /// Timestamp of the current sample, `None` when it cannot be determined.
    fn sample_time_us(&mut self) -> Option<i64>;
}

/// [`Demuxer`] over a probed Symphonia [`FormatReader`].
pub struct SymphoniaDemuxer {
    reader: Box<dyn FormatReader>,
    selected: Option<SelectedTrack>,
    current: Option<Packet>,
    exhausted: bool,
}

#[derive(Clone, Copy, Debug)]
struct SelectedTrack {
    id: u32,
    time_base: Option<TimeBase>,
    sample_rate: Option<u32>,
}

impl SymphoniaDemuxer {
    /// Probe `source` and wrap the resulting format reader.
    pub fn open(source: Box<dyn MediaSource>, hint: &Hint) -> Result<Self> {
        let mss = MediaSourceStream::new(source, Default::default());
        let probed = symphonia::default::get_probe().format(
            hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        Ok(Self::from_reader(probed.format))
    }

    pub fn from_reader(reader: Box<dyn FormatReader>) -> Self {
        Self {
            reader,
            selected: None,
            current: None,
            exhausted: false,
        }
    }

    /// Ensure `current` holds the next packet of the selected track, if any remain.
    fn load_current(&mut self) {
        if self.current.is_some() || self.exhausted {
            return;
        }
        let Some(track) = self.selected else {
            return;
        };
        loop {
            match self.reader.next_packet() {
                Ok(packet) if packet.track_id() == track.id => {
                    self.current = Some(packet);
                    return;
                }
                Ok(_) => continue,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    tracing::debug!("demuxer reached end of stream");
                    self.exhausted = true;
                    return;
                }
                Err(e) => {
                    tracing::warn!("demuxer read failed, treating as end of stream: {e}");
                    self.exhausted = true;
                    return;
                }
            }
        }
    }

    fn ts_to_us(&self, ts: u64) -> Option<i64> {
        let track = self.selected?;
        if let Some(tb) = track.time_base {
            let time = tb.calc_time(ts);
            let us = time
                .seconds
                .saturating_mul(1_000_000)
                .saturating_add((time.frac * 1_000_000.0).round() as u64);
            return i64::try_from(us).ok();
        }
        let rate = track.sample_rate.filter(|r| *r > 0)? as u64;
        i64::try_from(ts.saturating_mul(1_000_000) / rate).ok()
    }
}

impl Demuxer for SymphoniaDemuxer {
    fn track_count(&self) -> usize {
        self.reader.tracks().len()
    }

    fn track_format(&self, index: usize) -> Option<TrackFormat> {
        let track = self.reader.tracks().get(index)?;
        Some(TrackFormat::from_codec_params(&track.codec_params))
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        let track = self
            .reader
            .tracks()
            .get(index)
            .ok_or_else(|| CodecError::Demux(format!("track index {index} out of range")))?;
        self.selected = Some(SelectedTrack {
            id: track.id,
            time_base: track.codec_params.time_base,
            sample_rate: track.codec_params.sample_rate,
        });
        self.current = None;
        self.exhausted = false;
        Ok(())
    }

    fn read_sample_data(&mut self, buf: &mut [u8]) -> Option<usize> {
        self.load_current();
        let packet = self.current.as_ref()?;
        let data = packet.buf();
        if data.len() > buf.len() {
            tracing::warn!(
                sample_bytes = data.len(),
                capacity = buf.len(),
                "sample exceeds input buffer capacity"
            );
            return None;
        }
        buf[..data.len()].copy_from_slice(data);
        Some(data.len())
    }

    fn advance(&mut self) -> bool {
        self.current = None;
        self.load_current();
        self.current.is_some()
    }

    fn seek_to(&mut self, time_us: i64, mode: SeekMode) -> Result<()> {
        let track = self
            .selected
            .ok_or(CodecError::InvalidState("seek before track selection"))?;
        let us = time_us.max(0) as u64;
        let time = Time::new(us / 1_000_000, (us % 1_000_000) as f64 / 1_000_000.0);
        // Accurate seeks land on a packet at or before the requested time.
        let format_mode = match mode {
            SeekMode::PreviousSync => FormatSeekMode::Accurate,
            SeekMode::NextSync | SeekMode::ClosestSync => FormatSeekMode::Coarse,
        };

        self.current = None;
        match self.reader.seek(
            format_mode,
            SeekTo::Time {
                time,
                track_id: Some(track.id),
            },
        ) {
            Ok(seeked) => {
                tracing::debug!(
                    required_ts = seeked.required_ts,
                    actual_ts = seeked.actual_ts,
                    "demuxer seeked"
                );
                self.exhausted = false;
                Ok(())
            }
            Err(SymphoniaError::SeekError(SeekErrorKind::OutOfRange)) => {
                tracing::debug!(time_us, "seek past end of stream");
                self.exhausted = true;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn sample_time_us(&mut self) -> Option<i64> {
        self.load_current();
        let ts = self.current.as_ref()?.ts();
        self.ts_to_us(ts)
    }
}
