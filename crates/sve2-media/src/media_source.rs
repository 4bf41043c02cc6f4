// crates/sve2-media/src/media_source.rs
//
// Owns a demuxer + one decoder per selected stream kind, exposes
// "frame at time T" / "N samples". Two variants: streamed (decode as you
// go) and preloaded (decode everything up front into a texture array / PCM
// buffer). Grounded on media_stream.c (streamed) and audio_pcm.c (preloaded
// audio, "push everything then pull everything").

use std::sync::Arc;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::media::Type as AvMediaKind;
use thiserror::Error;

use sve2_core::texture::VideoTexture;
use sve2_core::{Deadline, MediaKind, StreamIndex, NS_PER_SEC};

use crate::decoder::{AudioDecoder, DecodeResult, VideoDecoder};
use crate::demuxer::{DemuxerError, DemuxerHandle};
use crate::hw_bridge::{self, GpuTextureBackend, HwTexture};
use crate::resampler::{AudioResampler, ResamplerError};

#[derive(Debug, Error)]
pub enum MediaSourceError {
    #[error("stream selection did not resolve against the container")]
    StreamNotFound,
    #[error("decode failed: {0:?}")]
    Decode(DecodeResult),
    #[error(transparent)]
    Demuxer(#[from] DemuxerError),
    #[error(transparent)]
    Resampler(#[from] ResamplerError),
    #[error("failed to open codec: {0}")]
    Codec(String),
    #[error("failed to open container: {0}")]
    Container(String),
}

/// What the caller wants selected out of a container for a streamed source.
/// Either field left `None` opens that source without the corresponding
/// kind.
pub struct StreamSelection {
    pub video: Option<StreamIndex>,
    pub audio: Option<StreamIndex>,
}

/// Everything needed to set up the audio resampler for a streamed source:
/// the context's target format, wired through from `ContextInit`.
pub struct AudioTarget {
    pub sample_rate: u32,
    pub sample_format: ffmpeg::format::Sample,
    pub channel_layout: ffmpeg::ChannelLayout,
    pub stride_bytes: u32,
}

fn media_kind_of(medium: AvMediaKind) -> MediaKind {
    match medium {
        AvMediaKind::Video => MediaKind::Video,
        AvMediaKind::Audio => MediaKind::Audio,
        _ => MediaKind::Subtitle,
    }
}

/// Opens one container, resolves the video/audio selections against it
/// (§2/§3's stream index resolution), and wires up a single shared demuxer
/// feeding a decoder (+resampler for audio) per selected kind — the "owns
/// exactly one demuxer and up to one decoder per selected stream kind"
/// ownership model of §3/§4.6.
pub fn open_streamed(
    path: &str,
    selection: &StreamSelection,
    num_buffered_packets: usize,
    hardware: bool,
    audio_target: &AudioTarget,
) -> Result<(Option<StreamedVideoSource>, Option<StreamedAudioSource>), MediaSourceError> {
    let probe = ffmpeg::format::input(&path).map_err(|e| MediaSourceError::Container(e.to_string()))?;
    let streams: Vec<(i32, MediaKind)> = probe
        .streams()
        .map(|s| (s.index() as i32, media_kind_of(s.parameters().medium())))
        .collect();
    drop(probe);

    let video_abs = match selection.video {
        Some(sel) => Some(sel.resolve(&streams).ok_or(MediaSourceError::StreamNotFound)?),
        None => None,
    };
    let audio_abs = match selection.audio {
        Some(sel) => Some(sel.resolve(&streams).ok_or(MediaSourceError::StreamNotFound)?),
        None => None,
    };

    let mut absolute_indices = Vec::new();
    absolute_indices.extend(video_abs);
    absolute_indices.extend(audio_abs);

    let (demuxer, channels) = DemuxerHandle::open(path, &absolute_indices, num_buffered_packets)?;
    let demuxer = Arc::new(demuxer);
    let mut channels = channels.into_iter();

    // Second container open for decoder params, avoiding a borrow conflict
    // with the demuxer worker's own `Input` on the first open.
    let ictx2 = ffmpeg::format::input(&path).map_err(|e| MediaSourceError::Container(e.to_string()))?;

    let video_source = match video_abs {
        Some(abs) => {
            let stream = ictx2.stream(abs as usize).ok_or(MediaSourceError::StreamNotFound)?;
            let time_base = stream.time_base();
            let dec_ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| MediaSourceError::Codec(e.to_string()))?;
            let decoder = dec_ctx.decoder().video().map_err(|e| MediaSourceError::Codec(e.to_string()))?;
            let channel = channels.next().ok_or(MediaSourceError::StreamNotFound)?;
            let video_decoder = VideoDecoder::open(decoder, channel, time_base, hardware);
            Some(StreamedVideoSource::open(Arc::clone(&demuxer), video_decoder))
        }
        None => None,
    };

    let audio_source = match audio_abs {
        Some(abs) => {
            let stream = ictx2.stream(abs as usize).ok_or(MediaSourceError::StreamNotFound)?;
            let time_base = stream.time_base();
            let dec_ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| MediaSourceError::Codec(e.to_string()))?;
            let decoder = dec_ctx.decoder().audio().map_err(|e| MediaSourceError::Codec(e.to_string()))?;
            let channel = channels.next().ok_or(MediaSourceError::StreamNotFound)?;

            let swr = ffmpeg::software::resampling::Context::get(
                decoder.format(),
                decoder.channel_layout(),
                decoder.rate(),
                audio_target.sample_format,
                audio_target.channel_layout,
                audio_target.sample_rate,
            )
            .map_err(|e| MediaSourceError::Resampler(ResamplerError::Init(e.to_string())))?;
            let resampler = AudioResampler::new(
                swr,
                decoder.rate() as i32,
                audio_target.sample_rate as i32,
                audio_target.stride_bytes,
            );

            let audio_decoder = AudioDecoder::open(decoder, channel, time_base);
            Some(StreamedAudioSource::open(Arc::clone(&demuxer), audio_decoder, resampler))
        }
        None => None,
    };

    Ok((video_source, audio_source))
}

/// The streamed variant: decode lazily, one frame ahead of playback time.
pub struct StreamedVideoSource {
    demuxer: Arc<DemuxerHandle>,
    decoder: VideoDecoder,
    texture: HwTexture,
    /// "Next frame PTS": the timestamp at which the currently exposed
    /// texture becomes stale.
    next_frame_pts: i64,
}

impl StreamedVideoSource {
    pub fn open(demuxer: Arc<DemuxerHandle>, decoder: VideoDecoder) -> Self {
        StreamedVideoSource { demuxer, decoder, texture: HwTexture::null(), next_frame_pts: -1 }
    }

    pub fn next_frame_pts(&self) -> i64 {
        self.next_frame_pts
    }

    /// `get_video_texture(t)`: decode forward while the cached texture is
    /// stale, then remap once if anything changed this call.
    pub fn get_video_texture(
        &mut self,
        t: i64,
        frame: &mut ffmpeg::util::frame::video::Video,
        backend: &mut impl GpuTextureBackend,
        to_layers: impl Fn(&ffmpeg::util::frame::video::Video) -> Vec<crate::hw_bridge::DmaBufLayer>,
    ) -> Result<(), MediaSourceError> {
        let mut updated = false;

        while self.next_frame_pts < t {
            match self.decoder.decode(frame, Deadline::Infinite) {
                DecodeResult::Success => {
                    let duration = self.decoder.rebase_duration(frame.packet().duration);
                    let pts = frame.pts().unwrap_or(self.next_frame_pts);
                    self.next_frame_pts = pts + duration;
                    updated = true;
                }
                DecodeResult::Eof => {
                    // EOF is sticky: keep returning the last texture
                    // indefinitely rather than erroring (§7).
                    break;
                }
                other => return Err(MediaSourceError::Decode(other)),
            }
        }

        if updated {
            hw_bridge::unmap(&mut self.texture, true, backend);
            let layers = to_layers(frame);
            self.texture = hw_bridge::map_decoded_frame(
                self.decoder.sw_format_as_pixel_format(),
                &layers,
                backend,
            )
            .map_err(|_| MediaSourceError::Decode(DecodeResult::Error))?;
        }

        Ok(())
    }

    pub fn current_texture(&self) -> VideoTexture {
        VideoTexture::PlanarPlanes {
            handle: self.texture.plane_texture(0),
            format: self.texture.format().unwrap_or(sve2_core::PixelFormat::Nv12),
        }
    }

    /// Seeks the underlying demuxer/decoder and resets the "next frame pts"
    /// cache so the next `get_video_texture` call re-decodes forward.
    pub fn seek(&mut self, timestamp_ns: i64) {
        let container_ts = timestamp_ns / (NS_PER_SEC / AV_TIME_BASE);
        self.demuxer.cmd_seek(-1, container_ts, true);
        self.decoder.wait_for_seek(Deadline::Infinite);
        self.next_frame_pts = -1;
    }
}

/// Matches `AV_TIME_BASE` (microseconds) used by the reference for the
/// absolute seek command's units.
const AV_TIME_BASE: i64 = 1_000_000;

/// The streamed variant for audio: decode + resample on demand.
pub struct StreamedAudioSource {
    demuxer: Arc<DemuxerHandle>,
    decoder: AudioDecoder,
    resampler: AudioResampler,
}

impl StreamedAudioSource {
    pub fn open(demuxer: Arc<DemuxerHandle>, decoder: AudioDecoder, resampler: AudioResampler) -> Self {
        StreamedAudioSource { demuxer, decoder, resampler }
    }

    /// `get_audio_samples(out, want)`: pull from the resampler, decoding
    /// more input as it runs dry, until `want` samples are written, EOF, or
    /// an error. Returns the actual count written (§7: EOF ⇒ 0 further
    /// samples, not an error).
    pub fn get_audio_samples(
        &mut self,
        out: &mut ffmpeg::util::frame::audio::Audio,
        want: u32,
    ) -> u32 {
        let mut written = 0u32;
        let mut raw = ffmpeg::util::frame::audio::Audio::empty();

        while written < want {
            match self.decoder.decode(&mut raw, Deadline::Infinite) {
                DecodeResult::Success => match self.resampler.convert(&raw, out) {
                    Ok(n) => written += n,
                    Err(_) => break,
                },
                DecodeResult::Eof => break,
                _ => break,
            }
        }
        written
    }

    /// Seeks the demuxer/decoder, then decodes forward until the frame
    /// straddling `ts` (`pts + duration >= ts`), pushes it into the
    /// resampler, and schedules a `drop_output` for the overshoot so the
    /// next `get_audio_samples` call lands exactly on `ts` (§4.6).
    pub fn seek(&mut self, timestamp_ns: i64) {
        let container_ts = timestamp_ns / (NS_PER_SEC / AV_TIME_BASE);
        self.demuxer.cmd_seek(-1, container_ts, true);
        self.decoder.wait_for_seek(Deadline::Infinite);
        self.resampler.flush();

        let mut raw = ffmpeg::util::frame::audio::Audio::empty();
        loop {
            match self.decoder.decode(&mut raw, Deadline::Infinite) {
                DecodeResult::Success => {
                    let duration = self.decoder.rebase_duration(raw.packet().duration);
                    let pts = raw.pts().unwrap_or(0);
                    if pts + duration >= timestamp_ns {
                        if self.resampler.push(&raw).is_ok() {
                            let overshoot_ns = (timestamp_ns - pts).max(0);
                            let out_rate = self.resampler.out_sample_rate() as i64;
                            let drop_samples =
                                ((overshoot_ns as i128 * out_rate as i128) / NS_PER_SEC as i128) as u32;
                            self.resampler.drop_output(drop_samples);
                        }
                        break;
                    }
                }
                DecodeResult::Eof | DecodeResult::Error | DecodeResult::Timeout => break,
            }
        }
    }
}

/// The preloaded variant: every frame decoded up front into a layered
/// texture array with a parallel "next frame pts" timestamp array.
pub struct PreloadedVideoSource {
    array: sve2_core::TextureHandle,
    timestamps: Vec<i64>,
    format: sve2_core::PixelFormat,
}

impl PreloadedVideoSource {
    pub fn new(array: sve2_core::TextureHandle, timestamps: Vec<i64>, format: sve2_core::PixelFormat) -> Self {
        PreloadedVideoSource { array, timestamps, format }
    }

    /// Binary search for the least index with `timestamps[i] > t` (property
    /// 10): the returned layer covers `timestamps[i-1] <= t < timestamps[i]`
    /// with `timestamps[-1] := -inf`.
    pub fn get_video_texture(&self, t: i64) -> VideoTexture {
        let index = preloaded_lookup(&self.timestamps, t);
        VideoTexture::LayeredArray { array: self.array, index: index as u32, format: self.format }
    }
}

/// The least index `i` such that `timestamps[i] > t`, clamped to the last
/// valid layer if `t` is at or past the final timestamp.
pub fn preloaded_lookup(timestamps: &[i64], t: i64) -> usize {
    let idx = timestamps.partition_point(|&ts| ts <= t);
    idx.min(timestamps.len().saturating_sub(1))
}

/// The preloaded audio variant: one contiguous resampled PCM buffer.
pub struct PreloadedAudioSource {
    buffer: Vec<u8>,
    sample_size: u32,
    num_samples: u32,
    cur_index: u32,
    sample_rate: u32,
}

impl PreloadedAudioSource {
    pub fn new(buffer: Vec<u8>, sample_size: u32, sample_rate: u32) -> Self {
        let num_samples = (buffer.len() as u32) / sample_size.max(1);
        PreloadedAudioSource { buffer, sample_size, num_samples, cur_index: 0, sample_rate }
    }

    pub fn seek(&mut self, timestamp_ns: i64) {
        self.cur_index = ((timestamp_ns as i64) * self.sample_rate as i64 / NS_PER_SEC).max(0) as u32;
    }

    /// `min(want, remaining)` memcpy plus a cursor advance.
    pub fn get_audio_samples(&mut self, out: &mut [u8], want: u32) -> u32 {
        let remaining = self.num_samples.saturating_sub(self.cur_index);
        let n = want.min(remaining);
        let start = (self.cur_index * self.sample_size) as usize;
        let len = (n * self.sample_size) as usize;
        out[..len].copy_from_slice(&self.buffer[start..start + len]);
        self.cur_index += n;
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preloaded_lookup_matches_property_10() {
        let timestamps = vec![100, 200, 300, 400];
        assert_eq!(preloaded_lookup(&timestamps, -1), 0);
        assert_eq!(preloaded_lookup(&timestamps, 0), 0);
        assert_eq!(preloaded_lookup(&timestamps, 99), 0);
        assert_eq!(preloaded_lookup(&timestamps, 100), 1);
        assert_eq!(preloaded_lookup(&timestamps, 250), 2);
        assert_eq!(preloaded_lookup(&timestamps, 400), 3); // clamped, last layer
    }

    #[test]
    fn preloaded_audio_reads_and_advances_cursor() {
        let sample_size = 4u32; // stereo s16
        let samples: u32 = 10;
        let buffer = vec![7u8; (sample_size * samples) as usize];
        let mut src = PreloadedAudioSource::new(buffer, sample_size, 48000);

        let mut out = vec![0u8; 64];
        let n = src.get_audio_samples(&mut out, 4);
        assert_eq!(n, 4);
        assert_eq!(src.cur_index, 4);

        let n2 = src.get_audio_samples(&mut out, 100);
        assert_eq!(n2, 6); // only 6 samples remained
        assert_eq!(src.cur_index, 10);

        let n3 = src.get_audio_samples(&mut out, 1);
        assert_eq!(n3, 0);
    }

    #[test]
    fn preloaded_audio_seek_converts_ns_to_sample_index() {
        let mut src = PreloadedAudioSource::new(vec![0u8; 4 * 48000], 4, 48000);
        src.seek(NS_PER_SEC); // exactly 1 second in
        assert_eq!(src.cur_index, 48000);
    }
}
