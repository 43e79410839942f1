//! FFmpeg codecs behind the buffer-queue `Codec` capability
//!
//! FFmpeg codecs are push/pull: packets or frames are sent, then results are
//! received until EAGAIN. `FfmpegCodec` runs its engine when an input buffer
//! is queued and parks the results in numbered output buffers until the
//! pipeline takes them.
//!
//! Raw layouts exchanged with the pipeline:
//! - audio: signed 16-bit interleaved PCM
//! - video: YUV 4:2:0 planar frames with no row padding

use ffmpeg_next as ffmpeg;
use std::collections::VecDeque;

use ffmpeg::format::{Pixel, Sample};
use ffmpeg::software::{resampling, scaling};
use ffmpeg::util::channel_layout::ChannelLayout;
use ffmpeg::util::format::sample::Type as SampleType;

use super::helpers::{context_extradata, parameters_from_format};
use super::{codec_for_mime, MICROSECONDS};
use crate::buffer::{BufferFlags, BufferInfo};
use crate::codec::{Codec, CodecFactory, CodecOutput, POLL_TIMEOUT_US};
use crate::error::{CodecError, Result, TranscodeError};
use crate::media::{MediaFormat, TrackType, MIME_AUDIO_RAW, MIME_VIDEO_RAW};
use crate::video::FrameRenderer;

const INPUT_BUFFER_COUNT: usize = 4;

/// Outputs parked before the codec stops handing out input buffers
const MAX_PENDING_OUTPUTS: usize = 8;

/// Input buffer size for compressed tracks that do not report one
const DEFAULT_COMPRESSED_INPUT_SIZE: usize = 8 << 20;

const AUDIO_ENCODER_INPUT_SIZE: usize = 64 * 1024;

/// Frame size assumed when the AAC encoder does not report one
const AAC_FRAME_SIZE: usize = 1024;

const RAW_SAMPLE_FORMAT: Sample = Sample::I16(SampleType::Packed);
const AAC_SAMPLE_FORMAT: Sample = Sample::F32(SampleType::Planar);

/// Software scaler context.
struct Scaler(scaling::Context);

// SAFETY: the context is owned by one codec or renderer and is only used
// through `&mut self`, so it is never touched by two threads at once.
unsafe impl Send for Scaler {}

/// Software resampler context.
struct Resampler(resampling::Context);

// SAFETY: same exclusive ownership as `Scaler`.
unsafe impl Send for Resampler {}

/// Something an engine produced for the pipeline
enum Produced {
    Format(MediaFormat),
    Sample {
        data: Vec<u8>,
        presentation_time_us: i64,
        flags: BufferFlags,
    },
}

/// The FFmpeg side of a codec
trait Engine: Send {
    fn send(&mut self, data: &[u8], presentation_time_us: i64, out: &mut Vec<Produced>) -> Result<()>;

    /// Flush everything still buffered inside FFmpeg.
    fn finish(&mut self, out: &mut Vec<Produced>) -> Result<()>;
}

enum Event {
    Format(MediaFormat),
    Buffer { index: usize, info: BufferInfo },
}

pub struct FfmpegCodec {
    name: String,
    engine: Box<dyn Engine>,
    inputs: Vec<Vec<u8>>,
    free_inputs: VecDeque<usize>,
    outputs: Vec<Option<Vec<u8>>>,
    events: VecDeque<Event>,
    last_pts_us: i64,
    input_ended: bool,
    released: bool,
}

impl FfmpegCodec {
    fn new(name: &str, engine: Box<dyn Engine>, input_size: usize, initial: Vec<Produced>) -> Self {
        let mut codec = Self {
            name: name.to_string(),
            engine,
            inputs: vec![vec![0; input_size]; INPUT_BUFFER_COUNT],
            free_inputs: (0..INPUT_BUFFER_COUNT).collect(),
            outputs: Vec::new(),
            events: VecDeque::new(),
            last_pts_us: 0,
            input_ended: false,
            released: false,
        };
        codec.collect(initial);
        codec
    }

    fn collect(&mut self, produced: Vec<Produced>) {
        for item in produced {
            match item {
                Produced::Format(format) => self.events.push_back(Event::Format(format)),
                Produced::Sample {
                    data,
                    presentation_time_us,
                    flags,
                } => {
                    self.last_pts_us = self.last_pts_us.max(presentation_time_us);
                    let info = BufferInfo::new(data.len(), presentation_time_us, flags);
                    let index = self.park(data);
                    self.events.push_back(Event::Buffer { index, info });
                }
            }
        }
    }

    fn park(&mut self, data: Vec<u8>) -> usize {
        match self.outputs.iter().position(Option::is_none) {
            Some(index) => {
                self.outputs[index] = Some(data);
                index
            }
            None => {
                self.outputs.push(Some(data));
                self.outputs.len() - 1
            }
        }
    }

    fn end_input(&mut self) -> Result<()> {
        if self.input_ended {
            return Ok(());
        }
        self.input_ended = true;
        let mut produced = Vec::new();
        self.engine.finish(&mut produced)?;
        self.collect(produced);
        let info = BufferInfo::new(0, self.last_pts_us, BufferFlags::END_OF_STREAM);
        let index = self.park(Vec::new());
        self.events.push_back(Event::Buffer { index, info });
        tracing::debug!(codec = %self.name, last_pts_us = self.last_pts_us, "codec drained");
        Ok(())
    }

    fn check_live(&self) -> Result<()> {
        if self.released {
            return Err(TranscodeError::Contract(format!("{} used after release", self.name)));
        }
        Ok(())
    }
}

impl Codec for FfmpegCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn dequeue_input_buffer(&mut self, _timeout_us: i64) -> Result<Option<usize>> {
        self.check_live()?;
        if self.input_ended || self.events.len() >= MAX_PENDING_OUTPUTS {
            return Ok(None);
        }
        Ok(self.free_inputs.pop_front())
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8]> {
        self.inputs
            .get_mut(index)
            .map(Vec::as_mut_slice)
            .ok_or_else(|| CodecError::InvalidBuffer(index).into())
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<()> {
        self.check_live()?;
        let Some(buffer) = self.inputs.get(index) else {
            return Err(CodecError::InvalidBuffer(index).into());
        };
        if size > buffer.len() {
            return Err(CodecError::QueueInput {
                index,
                reason: format!("size {} exceeds capacity {}", size, buffer.len()),
            }
            .into());
        }
        self.free_inputs.push_back(index);

        // Codec config is already carried by the format's codec private data
        if size > 0 && !flags.is_codec_config() {
            let mut produced = Vec::new();
            self.engine
                .send(&self.inputs[index][..size], presentation_time_us, &mut produced)?;
            self.collect(produced);
        }
        if flags.is_end_of_stream() {
            self.end_input()?;
        }
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout_us: i64) -> Result<CodecOutput> {
        self.check_live()?;
        Ok(match self.events.pop_front() {
            None => CodecOutput::TryAgainLater,
            Some(Event::Format(format)) => CodecOutput::FormatChanged(format),
            Some(Event::Buffer { index, info }) => CodecOutput::Buffer { index, info },
        })
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8]> {
        self.outputs
            .get(index)
            .and_then(Option::as_deref)
            .ok_or_else(|| CodecError::InvalidBuffer(index).into())
    }

    fn release_output_buffer(&mut self, index: usize, _render: bool) -> Result<()> {
        match self.outputs.get_mut(index).and_then(Option::take) {
            Some(_) => Ok(()),
            None => Err(CodecError::InvalidBuffer(index).into()),
        }
    }

    fn signal_end_of_input_stream(&mut self) -> Result<()> {
        self.check_live()?;
        self.end_input()
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.events.clear();
        self.outputs.clear();
        tracing::debug!(codec = %self.name, "codec released");
        Ok(())
    }
}

fn is_again(e: &ffmpeg::Error) -> bool {
    matches!(e, ffmpeg::Error::Other { errno } if *errno == ffmpeg::error::EAGAIN)
        || matches!(e, ffmpeg::Error::Eof)
}

fn open_decoder_context(input: &MediaFormat) -> Result<ffmpeg::codec::Context> {
    let params = parameters_from_format(input, codec_for_mime(&input.mime)?)?;
    ffmpeg::codec::Context::from_parameters(params).map_err(|e| {
        CodecError::NotFound(format!("no decoder context for {}: {}", input.mime, e)).into()
    })
}

fn compressed_packet(data: &[u8], presentation_time_us: i64) -> ffmpeg::Packet {
    let mut packet = ffmpeg::Packet::copy(data);
    packet.set_pts(Some(presentation_time_us));
    packet
}

// ── Decoders ────────────────────────────────────────────────────────────────

struct AudioDecoder {
    decoder: ffmpeg::decoder::Audio,
    resampler: Option<(Resampler, (Sample, u64, u32))>,
    /// Rate and channel count of the last announced format
    announced: Option<(u32, u32)>,
    next_pts_us: i64,
}

impl AudioDecoder {
    fn open(input: &MediaFormat) -> Result<Self> {
        let decoder = open_decoder_context(input)?.decoder().audio().map_err(|e| {
            CodecError::NotFound(format!("cannot open audio decoder for {}: {}", input.mime, e))
        })?;
        Ok(Self {
            decoder,
            resampler: None,
            announced: None,
            next_pts_us: 0,
        })
    }

    fn receive(&mut self, out: &mut Vec<Produced>) -> Result<()> {
        loop {
            let mut frame = ffmpeg::util::frame::Audio::empty();
            match self.decoder.receive_frame(&mut frame) {
                Ok(()) => self.emit(&frame, out)?,
                Err(e) if is_again(&e) => return Ok(()),
                Err(e) => return Err(CodecError::Decode(format!("audio receive_frame: {}", e)).into()),
            }
        }
    }

    fn emit(&mut self, frame: &ffmpeg::util::frame::Audio, out: &mut Vec<Produced>) -> Result<()> {
        let channels = frame.channels() as u32;
        let rate = frame.rate();
        if channels == 0 || rate == 0 {
            return Ok(());
        }
        let layout = if frame.channel_layout().bits() == 0 {
            ChannelLayout::default(channels as i32)
        } else {
            frame.channel_layout()
        };
        let key = (frame.format(), layout.bits(), rate);
        if self.resampler.as_ref().map(|(_, k)| *k) != Some(key) {
            let context = resampling::Context::get(frame.format(), layout, rate, RAW_SAMPLE_FORMAT, layout, rate)
                .map_err(|e| CodecError::Configure(format!("audio converter: {}", e)))?;
            self.resampler = Some((Resampler(context), key));
        }
        let Some((resampler, _)) = self.resampler.as_mut() else {
            return Ok(());
        };
        let mut converted = ffmpeg::util::frame::Audio::empty();
        resampler
            .0
            .run(frame, &mut converted)
            .map_err(|e| CodecError::Decode(format!("audio conversion: {}", e)))?;

        if self.announced != Some((rate, channels)) {
            self.announced = Some((rate, channels));
            out.push(Produced::Format(MediaFormat::audio(MIME_AUDIO_RAW, rate, channels)));
        }
        let bytes = converted.samples() * channels as usize * 2;
        let plane = converted.data(0);
        let data = plane[..bytes.min(plane.len())].to_vec();

        let pts = frame.pts().unwrap_or(self.next_pts_us);
        self.next_pts_us = pts + frame.samples() as i64 * 1_000_000 / i64::from(rate);
        out.push(Produced::Sample {
            data,
            presentation_time_us: pts,
            flags: BufferFlags::NONE,
        });
        Ok(())
    }
}

impl Engine for AudioDecoder {
    fn send(&mut self, data: &[u8], presentation_time_us: i64, out: &mut Vec<Produced>) -> Result<()> {
        match self.decoder.send_packet(&compressed_packet(data, presentation_time_us)) {
            Ok(()) => {}
            // Pre-roll packets after a seek
            Err(ffmpeg::Error::InvalidData) => {
                tracing::debug!(presentation_time_us, "audio decoder skipped invalid packet");
            }
            Err(e) => return Err(CodecError::Decode(format!("audio send_packet: {}", e)).into()),
        }
        self.receive(out)
    }

    fn finish(&mut self, out: &mut Vec<Produced>) -> Result<()> {
        match self.decoder.send_eof() {
            Ok(()) => {}
            Err(e) if is_again(&e) => {}
            Err(e) => return Err(CodecError::Decode(format!("audio send_eof: {}", e)).into()),
        }
        self.receive(out)
    }
}

struct VideoDecoder {
    decoder: ffmpeg::decoder::Video,
    /// Frame size handed to the pipeline, the declared track size
    width: u32,
    height: u32,
    scaler: Option<(Scaler, (Pixel, u32, u32))>,
    announced: bool,
}

impl VideoDecoder {
    fn open(input: &MediaFormat) -> Result<Self> {
        let decoder = open_decoder_context(input)?.decoder().video().map_err(|e| {
            CodecError::NotFound(format!("cannot open video decoder for {}: {}", input.mime, e))
        })?;
        Ok(Self {
            width: input.width.unwrap_or(0),
            height: input.height.unwrap_or(0),
            decoder,
            scaler: None,
            announced: false,
        })
    }

    fn receive(&mut self, out: &mut Vec<Produced>) -> Result<()> {
        loop {
            let mut frame = ffmpeg::util::frame::Video::empty();
            match self.decoder.receive_frame(&mut frame) {
                Ok(()) => self.emit(&frame, out)?,
                Err(e) if is_again(&e) => return Ok(()),
                Err(e) => return Err(CodecError::Decode(format!("video receive_frame: {}", e)).into()),
            }
        }
    }

    fn emit(&mut self, frame: &ffmpeg::util::frame::Video, out: &mut Vec<Produced>) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            self.width = frame.width();
            self.height = frame.height();
        }
        if !self.announced {
            self.announced = true;
            out.push(Produced::Format(MediaFormat::video(MIME_VIDEO_RAW, self.width, self.height)));
        }
        let mut data = vec![0; yuv420p_size(self.width, self.height)];
        let same_layout =
            frame.format() == Pixel::YUV420P && frame.width() == self.width && frame.height() == self.height;
        if same_layout {
            pack_yuv420p(frame, &mut data);
        } else {
            let key = (frame.format(), frame.width(), frame.height());
            if self.scaler.as_ref().map(|(_, k)| *k) != Some(key) {
                self.scaler = Some((
                    Scaler(new_scaler(key.0, key.1, key.2, self.width, self.height)?),
                    key,
                ));
            }
            let Some((scaler, _)) = self.scaler.as_mut() else {
                return Ok(());
            };
            let mut scaled = ffmpeg::util::frame::Video::empty();
            scaler
                .0
                .run(frame, &mut scaled)
                .map_err(|e| CodecError::Decode(format!("video conversion: {}", e)))?;
            pack_yuv420p(&scaled, &mut data);
        }
        out.push(Produced::Sample {
            data,
            presentation_time_us: frame.pts().or(frame.timestamp()).unwrap_or(0),
            flags: BufferFlags::NONE,
        });
        Ok(())
    }
}

impl Engine for VideoDecoder {
    fn send(&mut self, data: &[u8], presentation_time_us: i64, out: &mut Vec<Produced>) -> Result<()> {
        match self.decoder.send_packet(&compressed_packet(data, presentation_time_us)) {
            Ok(()) => {}
            Err(ffmpeg::Error::InvalidData) => {
                tracing::debug!(presentation_time_us, "video decoder skipped invalid packet");
            }
            Err(e) => return Err(CodecError::Decode(format!("video send_packet: {}", e)).into()),
        }
        self.receive(out)
    }

    fn finish(&mut self, out: &mut Vec<Produced>) -> Result<()> {
        match self.decoder.send_eof() {
            Ok(()) => {}
            Err(e) if is_again(&e) => {}
            Err(e) => return Err(CodecError::Decode(format!("video send_eof: {}", e)).into()),
        }
        self.receive(out)
    }
}

// ── Encoders ────────────────────────────────────────────────────────────────

/// Collect every packet an encoder has ready
fn drain_packets(
    encoder: &mut ffmpeg::encoder::Encoder,
    to_micros: impl Fn(i64) -> i64,
    out: &mut Vec<Produced>,
) -> Result<()> {
    loop {
        let mut packet = ffmpeg::Packet::empty();
        match encoder.receive_packet(&mut packet) {
            Ok(()) => {
                let flags = if packet.is_key() {
                    BufferFlags::KEY_FRAME
                } else {
                    BufferFlags::NONE
                };
                out.push(Produced::Sample {
                    data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
                    presentation_time_us: to_micros(packet.pts().or(packet.dts()).unwrap_or(0)),
                    flags,
                });
            }
            Err(e) if is_again(&e) => return Ok(()),
            Err(e) => return Err(CodecError::Encode(format!("receive_packet: {}", e)).into()),
        }
    }
}

struct AudioEncoder {
    encoder: ffmpeg::codec::encoder::audio::Encoder,
    converter: Resampler,
    layout: ChannelLayout,
    sample_rate: u32,
    channels: usize,
    frame_size: usize,
    /// Interleaved samples waiting for a full encoder frame
    pending: Vec<i16>,
    /// Timestamp of the first sample, samples are counted from it
    base_us: Option<i64>,
    samples_sent: i64,
}

impl AudioEncoder {
    fn open(output: &MediaFormat) -> Result<(Self, MediaFormat)> {
        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::AAC)
            .ok_or_else(|| CodecError::NotFound("AAC encoder not found in this FFmpeg build".into()))?;
        let sample_rate = output.sample_rate.unwrap_or(44100);
        let channels = output.channel_count.unwrap_or(2);
        let layout = ChannelLayout::default(channels as i32);

        let mut context = ffmpeg::codec::Context::new_with_codec(codec);
        context.set_time_base(ffmpeg::Rational::new(1, sample_rate as i32));
        context.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        let mut audio = context
            .encoder()
            .audio()
            .map_err(|e| CodecError::Configure(format!("cannot get audio encoder handle: {}", e)))?;
        audio.set_rate(sample_rate as i32);
        audio.set_format(AAC_SAMPLE_FORMAT);
        audio.set_channel_layout(layout);
        if let Some(bit_rate) = output.bit_rate {
            audio.set_bit_rate(bit_rate as usize);
        }
        let encoder = audio
            .open_as(codec)
            .map_err(|e| CodecError::Configure(format!("failed to open AAC encoder: {}", e)))?;

        let converter = resampling::Context::get(
            RAW_SAMPLE_FORMAT,
            layout,
            sample_rate,
            AAC_SAMPLE_FORMAT,
            layout,
            sample_rate,
        )
        .map_err(|e| CodecError::Configure(format!("audio converter: {}", e)))?;

        let frame_size = match encoder.frame_size() as usize {
            0 => AAC_FRAME_SIZE,
            n => n,
        };
        let mut format = output.clone();
        format.sample_rate = Some(sample_rate);
        format.channel_count = Some(channels);
        format.codec_private = context_extradata(&encoder);
        tracing::info!(sample_rate, channels, frame_size, "AAC encoder opened");
        Ok((
            Self {
                encoder,
                converter: Resampler(converter),
                layout,
                sample_rate,
                channels: channels as usize,
                frame_size,
                pending: Vec::new(),
                base_us: None,
                samples_sent: 0,
            },
            format,
        ))
    }

    fn drain(&mut self, out: &mut Vec<Produced>) -> Result<()> {
        let (base, rate) = (self.base_us.unwrap_or(0), i64::from(self.sample_rate));
        drain_packets(&mut self.encoder, |samples| base + samples * 1_000_000 / rate, out)
    }

    /// Encode `frames` samples per channel from the front of the pending queue.
    fn encode_frame(&mut self, frames: usize, out: &mut Vec<Produced>) -> Result<()> {
        let mut input = ffmpeg::util::frame::Audio::new(RAW_SAMPLE_FORMAT, frames, self.layout);
        input.set_rate(self.sample_rate);
        let count = frames * self.channels;
        {
            let plane = input.data_mut(0);
            for (dst, src) in plane.chunks_exact_mut(2).zip(self.pending.drain(..count)) {
                dst.copy_from_slice(&src.to_ne_bytes());
            }
        }
        let mut converted = ffmpeg::util::frame::Audio::empty();
        self.converter
            .0
            .run(&input, &mut converted)
            .map_err(|e| CodecError::Encode(format!("audio conversion: {}", e)))?;
        converted.set_pts(Some(self.samples_sent));
        self.samples_sent += frames as i64;
        self.encoder
            .send_frame(&converted)
            .map_err(|e| CodecError::Encode(format!("AAC send_frame: {}", e)))?;
        self.drain(out)
    }
}

impl Engine for AudioEncoder {
    fn send(&mut self, data: &[u8], presentation_time_us: i64, out: &mut Vec<Produced>) -> Result<()> {
        self.base_us.get_or_insert(presentation_time_us);
        self.pending.extend(
            data.chunks_exact(2)
                .map(|b| i16::from_ne_bytes([b[0], b[1]])),
        );
        while self.pending.len() >= self.frame_size * self.channels {
            self.encode_frame(self.frame_size, out)?;
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<Produced>) -> Result<()> {
        let remaining = self.pending.len() / self.channels.max(1);
        if remaining > 0 {
            // FFmpeg pads a short last frame
            self.encode_frame(remaining, out)?;
        }
        match self.encoder.send_eof() {
            Ok(()) => {}
            Err(e) if is_again(&e) => {}
            Err(e) => return Err(CodecError::Encode(format!("AAC send_eof: {}", e)).into()),
        }
        self.drain(out)
    }
}

struct VideoEncoder {
    encoder: ffmpeg::codec::encoder::video::Encoder,
    width: u32,
    height: u32,
}

impl VideoEncoder {
    fn open(output: &MediaFormat) -> Result<(Self, MediaFormat)> {
        let codec = ffmpeg::encoder::find_by_name("libx264")
            .or_else(|| ffmpeg::encoder::find(ffmpeg::codec::Id::H264))
            .ok_or_else(|| CodecError::NotFound("H.264 encoder not found in this FFmpeg build".into()))?;
        let (width, height) = match (output.width, output.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            _ => {
                return Err(CodecError::Configure(format!("video output without a size: {}", output)).into())
            }
        };
        let frame_rate = output.frame_rate.unwrap_or(30).max(1);
        let gop = (frame_rate as f32 * output.key_frame_interval.unwrap_or(1.0)).round().max(1.0) as u32;

        let mut context = ffmpeg::codec::Context::new_with_codec(codec);
        context.set_time_base(MICROSECONDS);
        context.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        let mut video = context
            .encoder()
            .video()
            .map_err(|e| CodecError::Configure(format!("cannot get video encoder handle: {}", e)))?;
        video.set_width(width);
        video.set_height(height);
        video.set_format(Pixel::YUV420P);
        video.set_frame_rate(Some(ffmpeg::Rational::new(frame_rate as i32, 1)));
        video.set_gop(gop);
        // Output timestamps are presentation times only
        video.set_max_b_frames(0);
        if let Some(bit_rate) = output.bit_rate {
            video.set_bit_rate(bit_rate as usize);
        }
        let encoder = video
            .open_as(codec)
            .map_err(|e| CodecError::Configure(format!("failed to open H.264 encoder: {}", e)))?;

        let mut format = output.clone();
        format.codec_private = context_extradata(&encoder);
        tracing::info!(encoder = codec.name(), width, height, frame_rate, gop, "H.264 encoder opened");
        Ok((Self { encoder, width, height }, format))
    }
}

impl Engine for VideoEncoder {
    fn send(&mut self, data: &[u8], presentation_time_us: i64, out: &mut Vec<Produced>) -> Result<()> {
        let mut frame = ffmpeg::util::frame::Video::new(Pixel::YUV420P, self.width, self.height);
        unpack_yuv420p(data, &mut frame)?;
        frame.set_pts(Some(presentation_time_us));
        self.encoder
            .send_frame(&frame)
            .map_err(|e| CodecError::Encode(format!("H.264 send_frame: {}", e)))?;
        drain_packets(&mut self.encoder, |pts| pts, out)
    }

    fn finish(&mut self, out: &mut Vec<Produced>) -> Result<()> {
        match self.encoder.send_eof() {
            Ok(()) => {}
            Err(e) if is_again(&e) => {}
            Err(e) => return Err(CodecError::Encode(format!("H.264 send_eof: {}", e)).into()),
        }
        drain_packets(&mut self.encoder, |pts| pts, out)
    }
}

// ── Raw frame layout ────────────────────────────────────────────────────────

fn plane_sizes(width: u32, height: u32) -> [(usize, usize); 3] {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    [(w, h), (cw, ch), (cw, ch)]
}

/// Bytes of a packed YUV 4:2:0 frame
pub fn yuv420p_size(width: u32, height: u32) -> usize {
    plane_sizes(width, height).iter().map(|(w, h)| w * h).sum()
}

/// Copy a YUV420P frame into `out`, dropping row padding.
fn pack_yuv420p(frame: &ffmpeg::util::frame::Video, out: &mut [u8]) {
    let mut offset = 0;
    for (plane, (w, h)) in plane_sizes(frame.width(), frame.height()).into_iter().enumerate() {
        let stride = frame.stride(plane);
        let data = frame.data(plane);
        for row in 0..h {
            let src = &data[row * stride..row * stride + w];
            out[offset..offset + w].copy_from_slice(src);
            offset += w;
        }
    }
}

/// Fill an allocated YUV420P frame from packed bytes.
fn unpack_yuv420p(data: &[u8], frame: &mut ffmpeg::util::frame::Video) -> Result<()> {
    let expected = yuv420p_size(frame.width(), frame.height());
    if data.len() < expected {
        return Err(CodecError::Encode(format!(
            "frame of {} bytes, expected {}",
            data.len(),
            expected
        ))
        .into());
    }
    let mut offset = 0;
    for (plane, (w, h)) in plane_sizes(frame.width(), frame.height()).into_iter().enumerate() {
        let stride = frame.stride(plane);
        let dst = frame.data_mut(plane);
        for row in 0..h {
            dst[row * stride..row * stride + w].copy_from_slice(&data[offset..offset + w]);
            offset += w;
        }
    }
    Ok(())
}

fn new_scaler(format: Pixel, width: u32, height: u32, out_width: u32, out_height: u32) -> Result<scaling::Context> {
    scaling::Context::get(
        format,
        width,
        height,
        Pixel::YUV420P,
        out_width,
        out_height,
        scaling::Flags::BILINEAR,
    )
    .map_err(|e| CodecError::Configure(format!("scaler {}x{} -> {}x{}: {}", width, height, out_width, out_height, e)).into())
}

// ── Renderer ────────────────────────────────────────────────────────────────

/// Scales decoded frames to the encoder size
pub struct ScalingFrameRenderer {
    scaler: Option<Scaler>,
    input: ffmpeg::util::frame::Video,
    output_size: usize,
}

impl ScalingFrameRenderer {
    pub fn new(input: &MediaFormat, output: &MediaFormat) -> Result<Self> {
        let size = |format: &MediaFormat| match (format.width, format.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Ok((w, h)),
            _ => Err(TranscodeError::Contract(format!("video format without a size: {}", format))),
        };
        let (in_w, in_h) = size(input)?;
        let (out_w, out_h) = size(output)?;
        let scaler = if (in_w, in_h) == (out_w, out_h) {
            None
        } else {
            Some(Scaler(new_scaler(Pixel::YUV420P, in_w, in_h, out_w, out_h)?))
        };
        tracing::debug!(in_w, in_h, out_w, out_h, scaling = scaler.is_some(), "frame renderer created");
        Ok(Self {
            scaler,
            input: ffmpeg::util::frame::Video::new(Pixel::YUV420P, in_w, in_h),
            output_size: yuv420p_size(out_w, out_h),
        })
    }
}

impl FrameRenderer for ScalingFrameRenderer {
    fn render(&mut self, frame: &[u8], presentation_time_us: i64, encoder: &mut dyn Codec) -> Result<bool> {
        let Some(index) = encoder.dequeue_input_buffer(POLL_TIMEOUT_US)? else {
            return Ok(false);
        };
        let buffer = encoder.input_buffer(index)?;
        if buffer.len() < self.output_size {
            return Err(TranscodeError::Contract(format!(
                "frame of {} bytes does not fit encoder input of {} bytes",
                self.output_size,
                buffer.len()
            )));
        }
        match self.scaler.as_mut() {
            None => {
                let size = self.output_size.min(frame.len());
                buffer[..size].copy_from_slice(&frame[..size]);
            }
            Some(scaler) => {
                unpack_yuv420p(frame, &mut self.input)?;
                let mut scaled = ffmpeg::util::frame::Video::empty();
                scaler
                    .0
                    .run(&self.input, &mut scaled)
                    .map_err(|e| CodecError::Encode(format!("frame scaling: {}", e)))?;
                pack_yuv420p(&scaled, &mut buffer[..self.output_size]);
            }
        }
        encoder.queue_input_buffer(index, self.output_size, presentation_time_us, BufferFlags::NONE)?;
        Ok(true)
    }

    fn release(&mut self) -> Result<()> {
        self.scaler = None;
        Ok(())
    }
}

// ── Factory ─────────────────────────────────────────────────────────────────

/// Creates FFmpeg decoders, the AAC and H.264 encoders and scaling renderers
#[derive(Debug, Default, Clone)]
pub struct FfmpegCodecFactory;

impl FfmpegCodecFactory {
    pub fn new() -> Self {
        Self
    }
}

impl CodecFactory for FfmpegCodecFactory {
    fn create_decoder(&self, input: &MediaFormat) -> Result<Box<dyn Codec>> {
        let input_size = input.max_input_size.unwrap_or(DEFAULT_COMPRESSED_INPUT_SIZE);
        let codec = match input.track_type() {
            Some(TrackType::Video) => FfmpegCodec::new(
                "video-decoder",
                Box::new(VideoDecoder::open(input)?),
                input_size,
                Vec::new(),
            ),
            Some(TrackType::Audio) => FfmpegCodec::new(
                "audio-decoder",
                Box::new(AudioDecoder::open(input)?),
                input_size,
                Vec::new(),
            ),
            None => return Err(CodecError::Unsupported(format!("no decoder for {}", input.mime)).into()),
        };
        tracing::debug!(mime = %input.mime, input_size, "decoder created");
        Ok(Box::new(codec))
    }

    fn create_encoder(&self, output: &MediaFormat) -> Result<Box<dyn Codec>> {
        if output.is_avc() {
            let (engine, format) = VideoEncoder::open(output)?;
            let input_size = yuv420p_size(engine.width, engine.height);
            return Ok(Box::new(FfmpegCodec::new(
                "video-encoder",
                Box::new(engine),
                input_size,
                vec![Produced::Format(format)],
            )));
        }
        if output.is_aac() {
            let (engine, format) = AudioEncoder::open(output)?;
            return Ok(Box::new(FfmpegCodec::new(
                "audio-encoder",
                Box::new(engine),
                AUDIO_ENCODER_INPUT_SIZE,
                vec![Produced::Format(format)],
            )));
        }
        Err(CodecError::Unsupported(format!("no encoder for {}", output.mime)).into())
    }

    fn create_renderer(&self, input: &MediaFormat, output: &MediaFormat) -> Result<Box<dyn FrameRenderer>> {
        Ok(Box::new(ScalingFrameRenderer::new(input, output)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MIME_AUDIO_AAC, MIME_VIDEO_AVC};

    fn init() {
        let _ = ffmpeg::init();
    }

    #[test]
    fn test_yuv420p_size() {
        assert_eq!(yuv420p_size(4, 4), 16 + 4 + 4);
        assert_eq!(yuv420p_size(3, 3), 9 + 4 + 4);
        assert_eq!(yuv420p_size(1280, 720), 1280 * 720 * 3 / 2);
    }

    #[test]
    fn test_pack_unpack_frame() {
        init();
        let data: Vec<u8> = (0..yuv420p_size(6, 4)).map(|i| i as u8).collect();
        let mut frame = ffmpeg::util::frame::Video::new(Pixel::YUV420P, 6, 4);
        unpack_yuv420p(&data, &mut frame).unwrap();
        let mut packed = vec![0; data.len()];
        pack_yuv420p(&frame, &mut packed);
        assert_eq!(packed, data);
        assert!(unpack_yuv420p(&data[..10], &mut frame).is_err());
    }

    #[test]
    fn test_unsupported_encoder() {
        let factory = FfmpegCodecFactory::new();
        let format = MediaFormat::video("video/hevc", 320, 240);
        assert!(factory.create_encoder(&format).is_err());
    }

    #[test]
    fn test_aac_encoder_reports_format_first() {
        init();
        if ffmpeg::encoder::find(ffmpeg::codec::Id::AAC).is_none() {
            return;
        }
        let mut output = MediaFormat::audio(MIME_AUDIO_AAC, 44100, 2);
        output.bit_rate = Some(128_000);
        let mut encoder = FfmpegCodecFactory::new().create_encoder(&output).unwrap();
        match encoder.dequeue_output_buffer(0).unwrap() {
            CodecOutput::FormatChanged(format) => {
                assert!(format.is_aac());
                assert!(!format.codec_private.is_empty());
            }
            other => panic!("expected format first, got {:?}", other),
        }

        // 2048 stereo frames of silence, then the end marker
        let index = encoder.dequeue_input_buffer(0).unwrap().unwrap();
        let size = 2048 * 2 * 2;
        encoder.input_buffer(index).unwrap()[..size].fill(0);
        encoder.queue_input_buffer(index, size, 0, BufferFlags::NONE).unwrap();
        let index = encoder.dequeue_input_buffer(0).unwrap().unwrap();
        encoder
            .queue_input_buffer(index, 0, 0, BufferFlags::END_OF_STREAM)
            .unwrap();

        let mut samples = 0;
        loop {
            match encoder.dequeue_output_buffer(0).unwrap() {
                CodecOutput::Buffer { index, info } => {
                    encoder.release_output_buffer(index, false).unwrap();
                    if info.flags.is_end_of_stream() {
                        break;
                    }
                    samples += 1;
                }
                CodecOutput::TryAgainLater => panic!("encoder stalled before end of stream"),
                _ => {}
            }
        }
        assert!(samples >= 2);
        assert!(encoder.dequeue_input_buffer(0).unwrap().is_none());
        encoder.release().unwrap();
    }

    #[test]
    fn test_h264_encoder_round_trip_sizes() {
        init();
        if ffmpeg::encoder::find(ffmpeg::codec::Id::H264).is_none() {
            return;
        }
        let mut output = MediaFormat::video(MIME_VIDEO_AVC, 64, 48);
        output.frame_rate = Some(25);
        output.bit_rate = Some(200_000);
        output.key_frame_interval = Some(1.0);
        let Ok(mut encoder) = FfmpegCodecFactory::new().create_encoder(&output) else {
            return;
        };
        assert!(matches!(
            encoder.dequeue_output_buffer(0).unwrap(),
            CodecOutput::FormatChanged(_)
        ));
        let index = encoder.dequeue_input_buffer(0).unwrap().unwrap();
        assert_eq!(encoder.input_buffer(index).unwrap().len(), yuv420p_size(64, 48));
        encoder.release().unwrap();
        assert!(encoder.dequeue_input_buffer(0).is_err());
    }
}
