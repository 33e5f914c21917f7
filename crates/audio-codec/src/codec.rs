//! Decoder seam and a Symphonia-backed software decoder.
//!
//! The trait mirrors a buffer-pool codec: the caller borrows free input slots,
//! fills and queues them, then polls for output slots holding decoded PCM and
//! hands each one back once consumed. Slots are plain indices; the decoder owns
//! the memory behind them at all times.

use std::collections::VecDeque;
use std::time::Duration;

use symphonia::core::audio::{AudioBufferRef, SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CodecParameters, Decoder as CodecImpl, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;

use crate::config::EngineConfig;
use crate::error::{CodecError, Result};
use crate::format::{
    BufferFlags, BufferInfo, MIME_AAC, MIME_ALAC, MIME_FLAC, MIME_MPEG, MIME_OPUS, MIME_RAW,
    MIME_VORBIS, TrackFormat,
};

/// Outcome of polling a decoder for output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputEvent {
    /// Slot `slot` holds decoded data described by `info`.
    Buffer { slot: usize, info: BufferInfo },
    /// Nothing ready within the wait bound. `info.flags` carries
    /// `END_OF_STREAM` once the decoder has drained all input.
    TryAgainLater { info: BufferInfo },
    /// The output format changed; informational, poll again.
    FormatChanged,
}

/// Codec-side collaborator of a decode session.
pub trait Decoder {
    fn configure(&mut self, format: &TrackFormat) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;

    /// Drop every queued and lent buffer; all slots return to the decoder.
    fn flush(&mut self) -> Result<()>;

    /// Borrow a free input slot, waiting at most `timeout`. `None` on timeout.
    fn dequeue_input_buffer(&mut self, timeout: Duration) -> Result<Option<usize>>;

    /// Memory of a dequeued input slot.
    fn input_buffer(&mut self, slot: usize) -> Option<&mut [u8]>;

    /// Hand `size` bytes of a dequeued input slot to the decoder.
    ///
    /// `presentation_time_us` is carried through to the output decoded from this input.
    fn queue_input_buffer(
        &mut self,
        slot: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<()>;

    /// Poll for decoded output, waiting at most `timeout`.
    fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<OutputEvent>;

    /// Memory of a dequeued output slot.
    fn output_buffer(&mut self, slot: usize) -> Option<&[u8]>;

    fn release_output_buffer(&mut self, slot: usize) -> Result<()>;
}

/// Creates decoders by MIME type.
pub trait DecoderFactory {
    type Decoder: Decoder;

    fn create_decoder_by_type(&self, mime: &str) -> Result<Self::Decoder>;
}

/// Factory for [`SymphoniaDecoder`]s, covering the codecs enabled in this build.
#[derive(Clone, Debug, Default)]
pub struct SymphoniaCodecs {
    config: EngineConfig,
}

impl SymphoniaCodecs {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

impl DecoderFactory for SymphoniaCodecs {
    type Decoder = SymphoniaDecoder;

    fn create_decoder_by_type(&self, mime: &str) -> Result<SymphoniaDecoder> {
        const SUPPORTED: [&str; 7] = [
            MIME_FLAC,
            MIME_MPEG,
            MIME_AAC,
            MIME_VORBIS,
            MIME_OPUS,
            MIME_ALAC,
            MIME_RAW,
        ];
        if !SUPPORTED.contains(&mime) {
            return Err(CodecError::UnsupportedMime(mime.to_string()));
        }
        Ok(SymphoniaDecoder::new(mime, self.config.clone()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Configured,
    Running,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Free,
    /// Lent to the caller.
    Dequeued,
    /// Owned by the decoder with data waiting (queued input or ready output).
    Pending,
}

struct InputSlot {
    data: Vec<u8>,
    len: usize,
    pts: i64,
    flags: BufferFlags,
    state: SlotState,
}

struct OutputSlot {
    data: Vec<u8>,
    info: BufferInfo,
    state: SlotState,
    announce_format: bool,
}

struct PcmScratch {
    buf: SampleBuffer<i16>,
    frames: usize,
    spec: SignalSpec,
}

/// Software decoder speaking the buffer-pool protocol over a Symphonia codec.
///
/// Output is interleaved signed 16-bit little-endian PCM. Decoding runs inline
/// whenever the caller polls, so no call ever waits for its timeout.
pub struct SymphoniaDecoder {
    mime: String,
    config: EngineConfig,
    lifecycle: Lifecycle,
    params: Option<CodecParameters>,
    codec: Option<Box<dyn CodecImpl>>,
    inputs: Vec<InputSlot>,
    outputs: Vec<OutputSlot>,
    queued_inputs: VecDeque<usize>,
    ready_outputs: VecDeque<usize>,
    input_ended: bool,
    output_spec: Option<SignalSpec>,
    frames_out: u64,
    scratch: Option<PcmScratch>,
}

impl SymphoniaDecoder {
    pub fn new(mime: &str, config: EngineConfig) -> Self {
        Self {
            mime: mime.to_string(),
            config,
            lifecycle: Lifecycle::Created,
            params: None,
            codec: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            queued_inputs: VecDeque::new(),
            ready_outputs: VecDeque::new(),
            input_ended: false,
            output_spec: None,
            frames_out: 0,
            scratch: None,
        }
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// Signal spec of the decoded output, once known.
    pub fn output_spec(&self) -> Option<SignalSpec> {
        self.output_spec
    }

    fn ensure_running(&self) -> Result<()> {
        if self.lifecycle != Lifecycle::Running {
            return Err(CodecError::InvalidState("decoder not started"));
        }
        Ok(())
    }

    fn reset_pools(&mut self) {
        for slot in &mut self.inputs {
            slot.len = 0;
            slot.pts = 0;
            slot.flags = BufferFlags::NONE;
            slot.state = SlotState::Free;
        }
        for slot in &mut self.outputs {
            slot.info = BufferInfo::default();
            slot.state = SlotState::Free;
            slot.announce_format = false;
        }
        self.queued_inputs.clear();
        self.ready_outputs.clear();
        self.input_ended = false;
        self.frames_out = 0;
    }

    /// Decode queued input while there is room for the output it produces.
    fn pump(&mut self) -> Result<()> {
        while let Some(&slot) = self.queued_inputs.front() {
            let Some(out_slot) = self
                .outputs
                .iter()
                .position(|s| s.state == SlotState::Free)
            else {
                break;
            };
            self.queued_inputs.pop_front();

            let input = &mut self.inputs[slot];
            input.state = SlotState::Free;
            if self.input_ended {
                continue;
            }
            if input.flags.is_end_of_stream() {
                tracing::debug!(frames_out = self.frames_out, "decoder consumed end of stream");
                self.input_ended = true;
                continue;
            }
            if input.len == 0 {
                continue;
            }
            let pts = input.pts;
            let packet = Packet::new_from_slice(0, 0, 0, &input.data[..input.len]);

            let codec = self
                .codec
                .as_mut()
                .ok_or(CodecError::InvalidState("decoder not configured"))?;
            let decoded = match codec.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(msg)) => {
                    tracing::warn!("skipping undecodable packet: {msg}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let output = &mut self.outputs[out_slot];
            let Some((frames, spec)) = write_pcm(decoded, &mut self.scratch, &mut output.data)
            else {
                continue;
            };
            output.info = BufferInfo {
                offset: 0,
                size: output.data.len(),
                presentation_time_us: pts,
                flags: BufferFlags::NONE,
            };
            output.state = SlotState::Pending;
            output.announce_format = self.output_spec != Some(spec);
            self.output_spec = Some(spec);
            self.frames_out += frames as u64;
            self.ready_outputs.push_back(out_slot);
        }
        Ok(())
    }
}

/// Convert a decoded buffer to interleaved `i16` bytes in `out`.
///
/// Returns `None` for empty buffers (decoder priming).
fn write_pcm(
    decoded: AudioBufferRef<'_>,
    scratch: &mut Option<PcmScratch>,
    out: &mut Vec<u8>,
) -> Option<(usize, SignalSpec)> {
    let frames = decoded.frames();
    if frames == 0 {
        return None;
    }
    let spec = *decoded.spec();
    let capacity = decoded.capacity();
    let reuse = matches!(scratch, Some(s) if s.spec == spec && s.frames >= capacity);
    if !reuse {
        *scratch = Some(PcmScratch {
            buf: SampleBuffer::<i16>::new(capacity as u64, spec),
            frames: capacity,
            spec,
        });
    }
    let scratch = scratch.as_mut()?;
    scratch.buf.copy_interleaved_ref(decoded);

    out.clear();
    out.reserve(scratch.buf.samples().len() * 2);
    for sample in scratch.buf.samples() {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    Some((frames, spec))
}

impl Decoder for SymphoniaDecoder {
    fn configure(&mut self, format: &TrackFormat) -> Result<()> {
        if self.lifecycle != Lifecycle::Created {
            return Err(CodecError::InvalidState("decoder already configured"));
        }
        let params = format
            .codec_params
            .clone()
            .ok_or(CodecError::MissingCodecParameters)?;
        let codec = symphonia::default::get_codecs().make(&params, &DecoderOptions::default())?;
        self.params = Some(params);
        self.codec = Some(codec);
        self.lifecycle = Lifecycle::Configured;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.lifecycle != Lifecycle::Configured {
            return Err(CodecError::InvalidState("decoder must be configured before start"));
        }
        let capacity = self.config.input_buffer_capacity.max(1);
        self.inputs = (0..self.config.input_buffer_count.max(1))
            .map(|_| InputSlot {
                data: vec![0; capacity],
                len: 0,
                pts: 0,
                flags: BufferFlags::NONE,
                state: SlotState::Free,
            })
            .collect();
        self.outputs = (0..self.config.output_buffer_count.max(1))
            .map(|_| OutputSlot {
                data: Vec::new(),
                info: BufferInfo::default(),
                state: SlotState::Free,
                announce_format: false,
            })
            .collect();
        self.reset_pools();
        self.lifecycle = Lifecycle::Running;
        tracing::debug!(
            mime = %self.mime,
            inputs = self.inputs.len(),
            outputs = self.outputs.len(),
            "decoder started"
        );
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.lifecycle == Lifecycle::Running {
            self.reset_pools();
            self.inputs.clear();
            self.outputs.clear();
            self.lifecycle = Lifecycle::Configured;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_running()?;
        self.reset_pools();
        if let Some(codec) = self.codec.as_mut() {
            codec.reset();
        }
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> Result<Option<usize>> {
        self.ensure_running()?;
        let mut free = self.inputs.iter().position(|s| s.state == SlotState::Free);
        if free.is_none() {
            self.pump()?;
            free = self.inputs.iter().position(|s| s.state == SlotState::Free);
        }
        if let Some(slot) = free {
            self.inputs[slot].state = SlotState::Dequeued;
        }
        Ok(free)
    }

    fn input_buffer(&mut self, slot: usize) -> Option<&mut [u8]> {
        let input = self.inputs.get_mut(slot)?;
        if input.state != SlotState::Dequeued {
            return None;
        }
        Some(&mut input.data[..])
    }

    fn queue_input_buffer(
        &mut self,
        slot: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<()> {
        self.ensure_running()?;
        let input = self
            .inputs
            .get_mut(slot)
            .filter(|s| s.state == SlotState::Dequeued)
            .ok_or(CodecError::InvalidSlot(slot))?;
        if size > input.data.len() {
            return Err(CodecError::Decode(format!(
                "queued {size} bytes into a {} byte input buffer",
                input.data.len()
            )));
        }
        input.len = size;
        input.pts = presentation_time_us;
        input.flags = flags;
        input.state = SlotState::Pending;
        self.queued_inputs.push_back(slot);
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> Result<OutputEvent> {
        self.ensure_running()?;
        self.pump()?;

        if let Some(&slot) = self.ready_outputs.front() {
            let output = &mut self.outputs[slot];
            if output.announce_format {
                output.announce_format = false;
                return Ok(OutputEvent::FormatChanged);
            }
            self.ready_outputs.pop_front();
            output.state = SlotState::Dequeued;
            return Ok(OutputEvent::Buffer {
                slot,
                info: output.info,
            });
        }

        let mut info = BufferInfo::default();
        if self.input_ended && self.queued_inputs.is_empty() {
            info.flags = BufferFlags::END_OF_STREAM;
        }
        Ok(OutputEvent::TryAgainLater { info })
    }

    fn output_buffer(&mut self, slot: usize) -> Option<&[u8]> {
        let output = self.outputs.get(slot)?;
        if output.state != SlotState::Dequeued {
            return None;
        }
        Some(&output.data[..])
    }

    fn release_output_buffer(&mut self, slot: usize) -> Result<()> {
        self.ensure_running()?;
        let output = self
            .outputs
            .get_mut(slot)
            .filter(|s| s.state == SlotState::Dequeued)
            .ok_or(CodecError::InvalidSlot(slot))?;
        output.state = SlotState::Free;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::pcm_s16_track;

    const WAIT: Duration = Duration::from_millis(1);

    fn running_decoder() -> SymphoniaDecoder {
        let codecs = SymphoniaCodecs::new(EngineConfig {
            input_buffer_count: 2,
            output_buffer_count: 1,
            input_buffer_capacity: 64,
            ..EngineConfig::default()
        });
        let mut decoder = codecs.create_decoder_by_type(MIME_RAW).unwrap();
        decoder.configure(&pcm_s16_track(44_100, 2, 44_100)).unwrap();
        decoder.start().unwrap();
        decoder
    }

    fn queue_frames(decoder: &mut SymphoniaDecoder, pts: i64, samples: &[i16]) -> usize {
        let slot = decoder.dequeue_input_buffer(WAIT).unwrap().unwrap();
        let buf = decoder.input_buffer(slot).unwrap();
        let mut n = 0;
        for s in samples {
            buf[n..n + 2].copy_from_slice(&s.to_le_bytes());
            n += 2;
        }
        decoder
            .queue_input_buffer(slot, n, pts, BufferFlags::NONE)
            .unwrap();
        slot
    }

    #[test]
    fn factory_rejects_unknown_mime() {
        let err = SymphoniaCodecs::default()
            .create_decoder_by_type("audio/x-unknown")
            .err()
            .unwrap();
        assert!(matches!(err, CodecError::UnsupportedMime(_)));
    }

    #[test]
    fn configure_requires_codec_parameters() {
        let mut decoder = SymphoniaDecoder::new(MIME_RAW, EngineConfig::default());
        let err = decoder.configure(&TrackFormat::default()).unwrap_err();
        assert!(matches!(err, CodecError::MissingCodecParameters));
    }

    #[test]
    fn dequeue_before_start_is_an_error() {
        let mut decoder = SymphoniaDecoder::new(MIME_RAW, EngineConfig::default());
        assert!(decoder.dequeue_input_buffer(WAIT).is_err());
        assert!(decoder.dequeue_output_buffer(WAIT).is_err());
    }

    #[test]
    fn input_pool_runs_dry_then_recovers_after_decode() {
        let mut decoder = running_decoder();
        queue_frames(&mut decoder, 0, &[1, 2, 3, 4]);
        queue_frames(&mut decoder, 0, &[5, 6, 7, 8]);
        // One output slot: pumping frees exactly one input.
        let slot = decoder.dequeue_input_buffer(WAIT).unwrap();
        assert!(slot.is_some());
        assert!(decoder.dequeue_input_buffer(WAIT).unwrap().is_none());
    }

    #[test]
    fn decodes_pcm_and_announces_format_once() {
        let mut decoder = running_decoder();
        queue_frames(&mut decoder, 1_000, &[1, -1, 2, -2]);

        assert_eq!(
            decoder.dequeue_output_buffer(WAIT).unwrap(),
            OutputEvent::FormatChanged
        );
        let OutputEvent::Buffer { slot, info } = decoder.dequeue_output_buffer(WAIT).unwrap()
        else {
            panic!("expected a buffer");
        };
        assert_eq!(info.size, 8);
        assert_eq!(info.presentation_time_us, 1_000);
        assert!(!info.flags.is_end_of_stream());
        let bytes = decoder.output_buffer(slot).unwrap();
        assert_eq!(&bytes[..4], &[1, 0, 0xff, 0xff]);
        assert_eq!(decoder.output_spec().unwrap().channels.count(), 2);

        decoder.release_output_buffer(slot).unwrap();
        assert!(decoder.output_buffer(slot).is_none());
        assert!(matches!(
            decoder.release_output_buffer(slot),
            Err(CodecError::InvalidSlot(_))
        ));

        queue_frames(&mut decoder, 1_045, &[3, -3]);
        let OutputEvent::Buffer { info, .. } = decoder.dequeue_output_buffer(WAIT).unwrap() else {
            panic!("expected a buffer");
        };
        assert_eq!(info.presentation_time_us, 1_045);
    }

    #[test]
    fn end_of_stream_marker_surfaces_on_empty_poll() {
        let mut decoder = running_decoder();
        let slot = decoder.dequeue_input_buffer(WAIT).unwrap().unwrap();
        decoder
            .queue_input_buffer(slot, 0, 0, BufferFlags::END_OF_STREAM)
            .unwrap();
        for _ in 0..2 {
            let OutputEvent::TryAgainLater { info } = decoder.dequeue_output_buffer(WAIT).unwrap()
            else {
                panic!("expected try-again");
            };
            assert!(info.flags.is_end_of_stream());
        }
    }

    #[test]
    fn flush_reclaims_every_slot() {
        let mut decoder = running_decoder();
        queue_frames(&mut decoder, 0, &[1, 2]);
        decoder.dequeue_output_buffer(WAIT).unwrap();
        let OutputEvent::Buffer { slot, .. } = decoder.dequeue_output_buffer(WAIT).unwrap() else {
            panic!("expected a buffer");
        };
        decoder.flush().unwrap();
        assert!(decoder.output_buffer(slot).is_none());
        assert!(decoder.dequeue_input_buffer(WAIT).unwrap().is_some());
        assert!(decoder.dequeue_input_buffer(WAIT).unwrap().is_some());
        let OutputEvent::TryAgainLater { info } = decoder.dequeue_output_buffer(WAIT).unwrap()
        else {
            panic!("expected try-again");
        };
        assert!(!info.flags.is_end_of_stream());
    }

    #[test]
    fn oversized_queue_is_rejected() {
        let mut decoder = running_decoder();
        let slot = decoder.dequeue_input_buffer(WAIT).unwrap().unwrap();
        assert!(decoder
            .queue_input_buffer(slot, 65, 0, BufferFlags::NONE)
            .is_err());
    }
}
