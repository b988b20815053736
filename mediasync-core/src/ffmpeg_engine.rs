//! FFmpeg-backed codec engine
//!
//! Demuxing goes through libavformat, decoding through libavcodec. Video
//! leaves here as planar 4:2:0 (scaled with swscale when the codec emits
//! anything else), audio as packed signed 16-bit at the stream's own rate
//! and channel count.

use std::collections::VecDeque;
use std::path::Path;

use ffmpeg_next as ffmpeg;
use ffmpeg::format::{context::Input, Pixel, Sample};
use ffmpeg::software::{resampling, scaling};
use ffmpeg::{codec, decoder, frame, media, ChannelLayout, Rational};

use crate::codec::{
    CodecEngine, CodecError, Container, DecodedFrame, FramePayload, MediaKind, Packet, StreamDecoder,
    StreamDescriptor,
};
use crate::pixel_convert::{Picture, PixelFormat};

const PACKED_S16: Sample = Sample::I16(ffmpeg::format::sample::Type::Packed);

fn ts_to_ms(ts: i64, tb: Rational) -> i64 {
    let num = tb.numerator() as i128;
    let den = tb.denominator() as i128;
    if den == 0 {
        return 0;
    }
    ((ts as i128) * 1000 * num / den) as i64
}

fn ms_to_ts(ms: i64, tb: Rational) -> i64 {
    let num = tb.numerator() as i128;
    let den = tb.denominator() as i128;
    if num == 0 {
        return 0;
    }
    ((ms as i128) * den / (1000 * num)) as i64
}

fn open_context(params: codec::Parameters) -> Result<codec::context::Context, ffmpeg::Error> {
    codec::context::Context::from_parameters(params)
}

// ============================================================================
// Engine
// ============================================================================

pub struct FfmpegEngine;

impl FfmpegEngine {
    pub fn new() -> Result<Self, CodecError> {
        ffmpeg::init().map_err(|e| CodecError::Init(e.to_string()))?;
        Ok(Self)
    }
}

impl CodecEngine for FfmpegEngine {
    fn open(&self, path: &Path) -> Result<Box<dyn Container>, CodecError> {
        let open_err = |reason: String| CodecError::Open {
            path: path.display().to_string(),
            reason,
        };
        let input = ffmpeg::format::input(&path).map_err(|e| open_err(e.to_string()))?;

        let mut streams = Vec::new();
        for stream in input.streams() {
            let params = stream.parameters();
            let codec_name = params.id().name().to_string();
            let language = stream.metadata().get("language").map(str::to_string);
            let index = stream.index();

            let descriptor = match params.medium() {
                media::Type::Video => {
                    let Ok(video) = open_context(params).and_then(|c| c.decoder().video()) else {
                        tracing::warn!("Stream {} ({}): cannot read video parameters", index, codec_name);
                        continue;
                    };
                    let rate = stream.avg_frame_rate();
                    let frame_duration_ms = if rate.numerator() > 0 {
                        1000 * rate.denominator() as i64 / rate.numerator() as i64
                    } else {
                        40
                    };
                    StreamDescriptor::video(index, &codec_name, video.width(), video.height(), frame_duration_ms)
                }
                media::Type::Audio => {
                    let Ok(audio) = open_context(params).and_then(|c| c.decoder().audio()) else {
                        tracing::warn!("Stream {} ({}): cannot read audio parameters", index, codec_name);
                        continue;
                    };
                    let channels = audio.channel_layout().channels().max(1) as u16;
                    StreamDescriptor::audio(index, &codec_name, audio.rate(), channels)
                }
                _ => continue,
            };

            streams.push((
                StreamDescriptor {
                    language,
                    ..descriptor
                },
                stream.time_base(),
            ));
        }

        let duration_ms = if input.duration() > 0 {
            input.duration() / 1000
        } else {
            0
        };

        Ok(Box::new(FfmpegContainer {
            input,
            streams,
            duration_ms,
        }))
    }
}

// ============================================================================
// Container
// ============================================================================

pub struct FfmpegContainer {
    input: Input,
    streams: Vec<(StreamDescriptor, Rational)>,
    duration_ms: i64,
}

// The format context is only ever used by one thread at a time: the opener,
// then the decode worker.
unsafe impl Send for FfmpegContainer {}

impl FfmpegContainer {
    fn time_base(&self, index: usize) -> Option<Rational> {
        self.streams
            .iter()
            .find(|(d, _)| d.index == index)
            .map(|(_, tb)| *tb)
    }
}

impl Container for FfmpegContainer {
    fn streams(&self) -> Vec<StreamDescriptor> {
        self.streams.iter().map(|(d, _)| d.clone()).collect()
    }

    fn duration_ms(&self) -> i64 {
        self.duration_ms
    }

    fn open_decoder(&mut self, stream: &StreamDescriptor) -> Result<Box<dyn StreamDecoder>, CodecError> {
        let no_decoder = || CodecError::NoDecoder {
            index: stream.index,
            codec: stream.codec_name.clone(),
        };
        let time_base = self.time_base(stream.index).ok_or_else(no_decoder)?;
        let params = self
            .input
            .stream(stream.index)
            .ok_or_else(no_decoder)?
            .parameters();
        let context = open_context(params).map_err(|_| no_decoder())?;

        match stream.kind {
            MediaKind::Video => {
                let decoder = context.decoder().video().map_err(|_| no_decoder())?;
                Ok(Box::new(FfmpegVideoDecoder {
                    decoder,
                    time_base,
                    scaler: None,
                    pending: VecDeque::new(),
                }))
            }
            MediaKind::Audio => {
                let decoder = context.decoder().audio().map_err(|_| no_decoder())?;
                Ok(Box::new(FfmpegAudioDecoder {
                    decoder,
                    time_base,
                    resampler: None,
                    channels: stream.channels,
                }))
            }
        }
    }

    fn read_packet(&mut self) -> Result<Option<Packet>, CodecError> {
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(e) => return Err(CodecError::Read(e.to_string())),
            }

            // subtitle and data streams are never routed anywhere
            let index = packet.stream();
            let Some(tb) = self.time_base(index) else {
                continue;
            };

            let data = packet.data().map(|d| d.to_vec()).unwrap_or_default();
            let mut out = Packet::new(index, packet.pts().map(|ts| ts_to_ms(ts, tb)), data);
            out.dts = packet.dts().map(|ts| ts_to_ms(ts, tb));
            out.keyframe = packet.is_key();
            return Ok(Some(out));
        }
    }

    fn seek(&mut self, ms: i64) -> Result<(), CodecError> {
        let ts = ms.saturating_mul(1000);
        self.input.seek(ts, ..ts).map_err(|_| CodecError::SeekFailed(ms))
    }
}

/// Rebuild an FFmpeg packet in the stream's own time base
fn to_ffmpeg_packet(packet: &Packet, tb: Rational) -> ffmpeg::Packet {
    let mut out = ffmpeg::Packet::copy(&packet.data);
    out.set_pts(packet.pts.map(|ms| ms_to_ts(ms, tb)));
    out.set_dts(packet.dts.map(|ms| ms_to_ts(ms, tb)));
    if packet.keyframe {
        out.set_flags(codec::packet::Flags::KEY);
    }
    out
}

// ============================================================================
// Video
// ============================================================================

pub struct FfmpegVideoDecoder {
    decoder: decoder::Video,
    time_base: Rational,
    /// Built on the first frame that is not already 4:2:0
    scaler: Option<scaling::Context>,
    /// Frames the codec released beyond the one returned per packet
    pending: VecDeque<DecodedFrame>,
}

unsafe impl Send for FfmpegVideoDecoder {}

impl FfmpegVideoDecoder {
    fn to_picture(&mut self, decoded: &frame::Video) -> Result<Picture, CodecError> {
        let (width, height) = (decoded.width(), decoded.height());

        let (format, source) = match decoded.format() {
            Pixel::YUV420P | Pixel::YUVJ420P => (PixelFormat::Yuv420p, None),
            Pixel::NV12 => (PixelFormat::Nv12, None),
            other => {
                if self.scaler.is_none() {
                    let scaler = scaling::Context::get(
                        other,
                        width,
                        height,
                        Pixel::YUV420P,
                        width,
                        height,
                        scaling::Flags::BILINEAR,
                    )
                    .map_err(|e| CodecError::DecodeFailed(e.to_string()))?;
                    self.scaler = Some(scaler);
                }
                let mut scaled = frame::Video::empty();
                if let Some(scaler) = self.scaler.as_mut() {
                    scaler
                        .run(decoded, &mut scaled)
                        .map_err(|e| CodecError::DecodeFailed(e.to_string()))?;
                }
                (PixelFormat::Yuv420p, Some(scaled))
            }
        };

        let src = source.as_ref().unwrap_or(decoded);
        let plane_count = match format {
            PixelFormat::Nv12 => 2,
            _ => 3,
        };

        Ok(Picture {
            width: width as usize,
            height: height as usize,
            format,
            planes: (0..plane_count).map(|i| src.data(i).to_vec()).collect(),
            linesize: (0..plane_count).map(|i| src.stride(i)).collect(),
            interlaced: decoded.is_interlaced(),
        })
    }

    fn receive_pending(&mut self) -> Result<(), CodecError> {
        let mut decoded = frame::Video::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let picture = self.to_picture(&decoded)?;
            self.pending.push_back(DecodedFrame {
                pts: decoded.timestamp().map(|ts| ts_to_ms(ts, self.time_base)),
                payload: FramePayload::Video(picture),
            });
        }
        Ok(())
    }
}

impl StreamDecoder for FfmpegVideoDecoder {
    fn decode(&mut self, packet: &Packet, _hurry: bool) -> Result<Option<DecodedFrame>, CodecError> {
        self.decoder
            .send_packet(&to_ffmpeg_packet(packet, self.time_base))
            .map_err(|e| CodecError::DecodeFailed(e.to_string()))?;
        self.receive_pending()?;
        Ok(self.pending.pop_front())
    }

    fn drain(&mut self) -> Vec<DecodedFrame> {
        if let Err(e) = self.decoder.send_eof() {
            tracing::debug!("Video drain refused: {}", e);
        } else if let Err(e) = self.receive_pending() {
            tracing::debug!("Video drain stopped early: {}", e);
        }
        self.pending.drain(..).collect()
    }

    fn flush(&mut self) {
        self.decoder.flush();
        self.pending.clear();
    }
}

// ============================================================================
// Audio
// ============================================================================

pub struct FfmpegAudioDecoder {
    decoder: decoder::Audio,
    time_base: Rational,
    /// Built from the first decoded frame's layout
    resampler: Option<resampling::Context>,
    channels: u16,
}

unsafe impl Send for FfmpegAudioDecoder {}

impl FfmpegAudioDecoder {
    /// Everything the codec has ready, resampled and joined into one block
    fn receive_samples(&mut self) -> Result<Option<DecodedFrame>, CodecError> {
        let mut pts = None;
        let mut samples = Vec::new();
        let mut decoded = frame::Audio::empty();

        while self.decoder.receive_frame(&mut decoded).is_ok() {
            if pts.is_none() {
                pts = decoded.timestamp().map(|ts| ts_to_ms(ts, self.time_base));
            }
            if self.resampler.is_none() {
                let resampler = resampling::Context::get(
                    decoded.format(),
                    decoded.channel_layout(),
                    decoded.rate(),
                    PACKED_S16,
                    ChannelLayout::default(self.channels as i32),
                    decoded.rate(),
                )
                .map_err(|e| CodecError::DecodeFailed(e.to_string()))?;
                self.resampler = Some(resampler);
            }

            let mut converted = frame::Audio::empty();
            if let Some(resampler) = self.resampler.as_mut() {
                resampler
                    .run(&decoded, &mut converted)
                    .map_err(|e| CodecError::DecodeFailed(e.to_string()))?;
            }
            let len = converted.samples() * self.channels as usize * 2;
            let data = converted.data(0);
            samples.extend_from_slice(&data[..len.min(data.len())]);
        }

        if samples.is_empty() {
            return Ok(None);
        }
        Ok(Some(DecodedFrame {
            pts,
            payload: FramePayload::Audio(samples),
        }))
    }
}

impl StreamDecoder for FfmpegAudioDecoder {
    fn decode(&mut self, packet: &Packet, _hurry: bool) -> Result<Option<DecodedFrame>, CodecError> {
        self.decoder
            .send_packet(&to_ffmpeg_packet(packet, self.time_base))
            .map_err(|e| CodecError::DecodeFailed(e.to_string()))?;
        self.receive_samples()
    }

    fn drain(&mut self) -> Vec<DecodedFrame> {
        if let Err(e) = self.decoder.send_eof() {
            tracing::debug!("Audio drain refused: {}", e);
            return Vec::new();
        }
        match self.receive_samples() {
            Ok(frame) => frame.into_iter().collect(),
            Err(e) => {
                tracing::debug!("Audio drain stopped early: {}", e);
                Vec::new()
            }
        }
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}
