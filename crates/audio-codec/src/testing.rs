//! Scripted collaborators for engine tests.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use symphonia::core::audio::Channels;
use symphonia::core::codecs::{CODEC_TYPE_PCM_S16LE, CodecParameters};
use symphonia::core::units::TimeBase;

use crate::codec::{Decoder, DecoderFactory, OutputEvent};
use crate::demux::{Demuxer, SeekMode};
use crate::error::{CodecError, Result};
use crate::format::{BufferFlags, BufferInfo, TrackFormat};

pub(crate) const UNSUPPORTED_MIME: &str = "audio/unsupported";

pub(crate) fn channel_mask(channels: u16) -> Channels {
    Channels::from_bits_truncate((1u32 << channels) - 1)
}

/// Format of a 16-bit PCM track as the Symphonia WAV reader would report it.
pub(crate) fn pcm_s16_track(sample_rate: u32, channels: u16, frames: u64) -> TrackFormat {
    let mut params = CodecParameters::new();
    params
        .for_codec(CODEC_TYPE_PCM_S16LE)
        .with_sample_rate(sample_rate)
        .with_time_base(TimeBase::new(1, sample_rate))
        .with_n_frames(frames)
        .with_channels(channel_mask(channels))
        .with_bits_per_sample(16)
        .with_bits_per_coded_sample(16)
        .with_max_frames_per_packet(4096);
    TrackFormat::from_codec_params(&params)
}

pub(crate) fn stereo_format() -> TrackFormat {
    TrackFormat {
        mime: Some("audio/fake".to_string()),
        sample_rate: Some(44_100),
        channel_count: Some(2),
        duration_us: Some(0),
        codec_params: None,
    }
}

/// Demuxer over a fixed list of `(timestamp, bytes)` samples; every sample is a sync point.
pub(crate) struct FakeDemuxer {
    pub tracks: Vec<TrackFormat>,
    pub samples: Vec<(i64, Vec<u8>)>,
    pub advance_lies: bool,
    end_us: i64,
    cursor: usize,
    selected: Option<usize>,
    reads: usize,
}

impl FakeDemuxer {
    /// `count` four-byte samples `[i, i, i, i]`, `step_us` apart.
    pub fn stereo(count: usize, step_us: i64) -> Self {
        let end_us = count as i64 * step_us;
        let mut format = stereo_format();
        format.duration_us = Some(end_us);
        Self {
            tracks: vec![format],
            samples: (0..count)
                .map(|i| (i as i64 * step_us, vec![i as u8; 4]))
                .collect(),
            advance_lies: false,
            end_us,
            cursor: 0,
            selected: None,
            reads: 0,
        }
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl Demuxer for FakeDemuxer {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> Option<TrackFormat> {
        self.tracks.get(index).cloned()
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        self.selected = Some(index);
        Ok(())
    }

    fn read_sample_data(&mut self, buf: &mut [u8]) -> Option<usize> {
        self.reads += 1;
        let (_, data) = self.samples.get(self.cursor)?;
        buf[..data.len()].copy_from_slice(data);
        Some(data.len())
    }

    fn advance(&mut self) -> bool {
        self.cursor = (self.cursor + 1).min(self.samples.len());
        !self.advance_lies && self.cursor < self.samples.len()
    }

    fn seek_to(&mut self, time_us: i64, _mode: SeekMode) -> Result<()> {
        self.cursor = if time_us >= self.end_us {
            self.samples.len()
        } else {
            self.samples
                .iter()
                .rposition(|(ts, _)| *ts <= time_us)
                .unwrap_or(0)
        };
        Ok(())
    }

    fn sample_time_us(&mut self) -> Option<i64> {
        self.samples.get(self.cursor).map(|(ts, _)| *ts)
    }
}

/// Knobs for [`FakeDecoder`].
#[derive(Clone, Debug, Default)]
pub(crate) struct FakeBehaviour {
    /// Input slots that may be lent at once; unlimited when `None`.
    pub input_slots: Option<usize>,
    /// Never return queued input slots to the pool.
    pub stall_inputs: bool,
    /// Garbage bytes placed before each output payload.
    pub output_offset: usize,
    /// "Format changed" events emitted before the first buffer.
    pub format_changes: usize,
    /// Number of leading output buffers whose memory cannot be retrieved.
    pub unreadable_outputs: usize,
    /// Deliver end of stream as an empty flagged buffer instead of a flagged empty poll.
    pub eos_as_buffer: bool,
    pub flush_status: Option<i32>,
    /// Fail the n-th (1-based) `queue_input_buffer` call.
    pub fail_queue_at: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct DecoderLog {
    pub started: usize,
    pub stopped: usize,
    pub flushed: usize,
    pub released: Vec<usize>,
    pub queued: Vec<(usize, BufferFlags)>,
    /// Timeout passed to every `dequeue_input_buffer` call.
    pub input_waits: Vec<Duration>,
    /// Timeout passed to every `dequeue_output_buffer` call.
    pub output_waits: Vec<Duration>,
}

pub(crate) struct FakeCodecs {
    behaviour: FakeBehaviour,
    log: Rc<RefCell<DecoderLog>>,
}

impl FakeCodecs {
    pub fn new(behaviour: FakeBehaviour) -> Self {
        Self {
            behaviour,
            log: Rc::default(),
        }
    }

    pub fn log(&self) -> DecoderLog {
        self.log.borrow().clone()
    }
}

impl DecoderFactory for FakeCodecs {
    type Decoder = FakeDecoder;

    fn create_decoder_by_type(&self, mime: &str) -> Result<FakeDecoder> {
        if mime == UNSUPPORTED_MIME {
            return Err(CodecError::UnsupportedMime(mime.to_string()));
        }
        Ok(FakeDecoder {
            format_changes_left: self.behaviour.format_changes,
            unreadable_left: self.behaviour.unreadable_outputs,
            behaviour: self.behaviour.clone(),
            log: self.log.clone(),
            inputs_in_use: 0,
            lent_inputs: HashMap::new(),
            next_slot: 0,
            pending: HashMap::new(),
            ready: VecDeque::new(),
            lent_outputs: HashMap::new(),
            lent_without_memory: HashSet::new(),
            input_ended: false,
            queue_calls: 0,
        })
    }
}

/// Decoder that "decodes" by copying each queued input into its own output buffer.
pub(crate) struct FakeDecoder {
    behaviour: FakeBehaviour,
    log: Rc<RefCell<DecoderLog>>,
    inputs_in_use: usize,
    lent_inputs: HashMap<usize, Vec<u8>>,
    next_slot: usize,
    pending: HashMap<usize, Vec<u8>>,
    ready: VecDeque<(usize, BufferInfo)>,
    lent_outputs: HashMap<usize, Vec<u8>>,
    lent_without_memory: HashSet<usize>,
    format_changes_left: usize,
    unreadable_left: usize,
    input_ended: bool,
    queue_calls: usize,
}

impl FakeDecoder {
    fn next_slot(&mut self) -> usize {
        self.next_slot += 1;
        self.next_slot
    }

    fn push_output(&mut self, data: Vec<u8>, info: BufferInfo) {
        let slot = self.next_slot();
        self.pending.insert(slot, data);
        self.ready.push_back((slot, info));
    }
}

impl Decoder for FakeDecoder {
    fn configure(&mut self, _format: &TrackFormat) -> Result<()> {
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.log.borrow_mut().started += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.log.borrow_mut().stopped += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(code) = self.behaviour.flush_status {
            return Err(CodecError::Status(code));
        }
        self.log.borrow_mut().flushed += 1;
        self.inputs_in_use = 0;
        self.lent_inputs.clear();
        self.pending.clear();
        self.ready.clear();
        self.lent_outputs.clear();
        self.lent_without_memory.clear();
        self.input_ended = false;
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, timeout: Duration) -> Result<Option<usize>> {
        self.log.borrow_mut().input_waits.push(timeout);
        if self
            .behaviour
            .input_slots
            .is_some_and(|limit| self.inputs_in_use >= limit)
        {
            return Ok(None);
        }
        self.inputs_in_use += 1;
        let slot = self.next_slot();
        self.lent_inputs.insert(slot, vec![0; 64]);
        Ok(Some(slot))
    }

    fn input_buffer(&mut self, slot: usize) -> Option<&mut [u8]> {
        self.lent_inputs.get_mut(&slot).map(Vec::as_mut_slice)
    }

    fn queue_input_buffer(
        &mut self,
        slot: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<()> {
        self.queue_calls += 1;
        if self.behaviour.fail_queue_at == Some(self.queue_calls) {
            return Err(CodecError::Status(-1000));
        }
        let data = self
            .lent_inputs
            .remove(&slot)
            .ok_or(CodecError::InvalidSlot(slot))?;
        if !self.behaviour.stall_inputs {
            self.inputs_in_use -= 1;
        }
        self.log.borrow_mut().queued.push((size, flags));

        if flags.is_end_of_stream() {
            self.input_ended = true;
            if self.behaviour.eos_as_buffer {
                let info = BufferInfo {
                    flags: BufferFlags::END_OF_STREAM,
                    ..BufferInfo::default()
                };
                self.push_output(Vec::new(), info);
            }
            return Ok(());
        }

        let offset = self.behaviour.output_offset;
        let mut out = vec![0xAA; offset];
        out.extend_from_slice(&data[..size]);
        let info = BufferInfo {
            offset,
            size,
            presentation_time_us,
            flags: BufferFlags::NONE,
        };
        self.push_output(out, info);
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<OutputEvent> {
        self.log.borrow_mut().output_waits.push(timeout);
        if self.format_changes_left > 0 && !self.ready.is_empty() {
            self.format_changes_left -= 1;
            return Ok(OutputEvent::FormatChanged);
        }
        let Some((slot, info)) = self.ready.pop_front() else {
            let mut info = BufferInfo::default();
            if self.input_ended && !self.behaviour.eos_as_buffer {
                info.flags = BufferFlags::END_OF_STREAM;
            }
            return Ok(OutputEvent::TryAgainLater { info });
        };
        let data = self.pending.remove(&slot).unwrap_or_default();
        if self.unreadable_left > 0 {
            self.unreadable_left -= 1;
            self.lent_without_memory.insert(slot);
        } else {
            self.lent_outputs.insert(slot, data);
        }
        Ok(OutputEvent::Buffer { slot, info })
    }

    fn output_buffer(&mut self, slot: usize) -> Option<&[u8]> {
        self.lent_outputs.get(&slot).map(Vec::as_slice)
    }

    fn release_output_buffer(&mut self, slot: usize) -> Result<()> {
        if self.lent_outputs.remove(&slot).is_none() && !self.lent_without_memory.remove(&slot) {
            return Err(CodecError::InvalidSlot(slot));
        }
        self.log.borrow_mut().released.push(slot);
        Ok(())
    }
}
