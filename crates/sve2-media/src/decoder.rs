// crates/sve2-media/src/decoder.rs
//
// Pull-side decoder: consumes a stream's packet channel, feeds the codec,
// and rebases the resulting frame's PTS/duration to ns before it leaves this
// module. Mirrors decoder_decode's EAGAIN/EOF/seek-marker pull loop.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::decoder::Audio as AvAudioDecoder;
use ffmpeg::codec::decoder::Video as AvVideoDecoder;
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::Rational;
use thiserror::Error;

use sve2_core::{rebase_to_ns, Deadline, PacketMessage, RecvOutcome};

use crate::demuxer::StreamChannel;

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("failed to open codec: {0}")]
    Open(String),
    #[error("hardware acceleration was requested but is unavailable")]
    HardwareUnavailable,
}

/// Outcome of a single `decode` call. Transient conditions (not Rust errors)
/// per the error-handling design: EOF/timeout are propagated as variants,
/// not exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeResult {
    Success,
    Timeout,
    Error,
    Eof,
}

/// Backend trait so the pull loop in `pump` is written once and shared
/// between the video and audio decoder specializations below.
trait Codec {
    type Frame;
    fn send_packet(&mut self, packet: &ffmpeg::Packet) -> Result<(), ffmpeg::Error>;
    fn send_eof(&mut self) -> Result<(), ffmpeg::Error>;
    fn receive_frame(&mut self, frame: &mut Self::Frame) -> Result<(), ffmpeg::Error>;
    fn flush(&mut self);
}

struct VideoCodec(AvVideoDecoder);
impl Codec for VideoCodec {
    type Frame = VideoFrame;
    fn send_packet(&mut self, packet: &ffmpeg::Packet) -> Result<(), ffmpeg::Error> {
        self.0.send_packet(packet)
    }
    fn send_eof(&mut self) -> Result<(), ffmpeg::Error> {
        self.0.send_eof()
    }
    fn receive_frame(&mut self, frame: &mut VideoFrame) -> Result<(), ffmpeg::Error> {
        self.0.receive_frame(frame)
    }
    fn flush(&mut self) {
        self.0.flush();
    }
}

struct AudioCodec(AvAudioDecoder);
impl Codec for AudioCodec {
    type Frame = AudioFrame;
    fn send_packet(&mut self, packet: &ffmpeg::Packet) -> Result<(), ffmpeg::Error> {
        self.0.send_packet(packet)
    }
    fn send_eof(&mut self) -> Result<(), ffmpeg::Error> {
        self.0.send_eof()
    }
    fn receive_frame(&mut self, frame: &mut AudioFrame) -> Result<(), ffmpeg::Error> {
        self.0.receive_frame(frame)
    }
    fn flush(&mut self) {
        self.0.flush();
    }
}

/// Rebases a frame's pts/duration in-place from `time_base` to ns, using the
/// 128-bit-safe rational rebase (property 5 / scenario S6).
fn rebase_frame_pts(pts: Option<i64>, duration: i64, time_base: Rational) -> (Option<i64>, i64) {
    let num = time_base.numerator();
    let den = time_base.denominator();
    (
        pts.map(|p| rebase_to_ns(p, num, den)),
        rebase_to_ns(duration, num, den),
    )
}

fn pump<C: Codec>(
    codec: &mut C,
    channel: &StreamChannel,
    frame: &mut C::Frame,
    deadline: Deadline,
) -> DecodeResult {
    loop {
        match codec.receive_frame(frame) {
            Ok(()) => return DecodeResult::Success,
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {}
            Err(ffmpeg::Error::Eof) => return DecodeResult::Eof,
            Err(_) => return DecodeResult::Error,
        }

        let mut msg = None;
        match channel.recv_into(&mut msg, deadline) {
            RecvOutcome::Timeout => return DecodeResult::Timeout,
            RecvOutcome::Closed => return DecodeResult::Eof,
            RecvOutcome::Ok => match msg.unwrap() {
                PacketMessage::Regular(packet) => {
                    if let Err(e) = codec.send_packet(&packet) {
                        log::warn!("decoder rejected packet: {e}");
                        // A corrupt packet warns and continues on the next one.
                    }
                }
                PacketMessage::SeekMarker => {
                    codec.flush();
                    // Loop: wait_for_seek's caller expects us not to return here.
                }
                PacketMessage::Eof => {
                    let _ = codec.send_eof();
                }
                PacketMessage::Error => return DecodeResult::Error,
            },
        }
    }
}

/// Drops packets until a seek marker arrives, flushing the codec's internal
/// buffers. Used by the media source right after issuing a seek.
fn wait_for_seek_generic(channel: &StreamChannel, deadline: Deadline, flush: impl FnOnce()) {
    loop {
        let mut msg = None;
        match channel.recv_into(&mut msg, deadline) {
            RecvOutcome::Ok => {
                if matches!(msg, Some(PacketMessage::SeekMarker)) {
                    flush();
                    return;
                }
            }
            RecvOutcome::Timeout | RecvOutcome::Closed => return,
        }
    }
}

pub struct VideoDecoder {
    inner: VideoCodec,
    channel: StreamChannel,
    time_base: Rational,
    hardware: bool,
}

impl VideoDecoder {
    pub fn open(
        decoder: AvVideoDecoder,
        channel: StreamChannel,
        time_base: Rational,
        hardware: bool,
    ) -> Self {
        VideoDecoder { inner: VideoCodec(decoder), channel, time_base, hardware }
    }

    pub fn decode(&mut self, out: &mut VideoFrame, deadline: Deadline) -> DecodeResult {
        let result = pump(&mut self.inner, &self.channel, out, deadline);
        if result == DecodeResult::Success {
            let (pts, dur) = rebase_frame_pts(out.pts(), out.packet().duration, self.time_base);
            out.set_pts(pts);
            // `duration` on VideoFrame is read-only in some ffmpeg-the-third
            // versions; callers that need the rebased duration should use
            // `self.rebase_duration` directly rather than relying on mutation.
            let _ = dur;
        }
        result
    }

    pub fn rebase_duration(&self, duration: i64) -> i64 {
        rebase_to_ns(duration, self.time_base.numerator(), self.time_base.denominator())
    }

    pub fn wait_for_seek(&mut self, deadline: Deadline) {
        let inner = &mut self.inner;
        wait_for_seek_generic(&self.channel, deadline, || inner.flush());
    }

    /// If hardware decoding is active, the software pixel format backing the
    /// surface; otherwise the codec's own format.
    pub fn sw_format(&self) -> ffmpeg::format::Pixel {
        self.inner.0.format()
    }

    pub fn is_hardware(&self) -> bool {
        self.hardware
    }

    /// Maps the codec's negotiated pixel format onto the format enum the
    /// hardware bridge and texture sum type understand.
    pub fn sw_format_as_pixel_format(&self) -> sve2_core::PixelFormat {
        use ffmpeg::format::Pixel;
        match self.sw_format() {
            Pixel::NV12 => sve2_core::PixelFormat::Nv12,
            Pixel::YUV420P => sve2_core::PixelFormat::Yuv420p,
            Pixel::RGBA => sve2_core::PixelFormat::Rgba,
            Pixel::BGRA => sve2_core::PixelFormat::Bgra,
            _ => sve2_core::PixelFormat::Nv12,
        }
    }
}

pub struct AudioDecoder {
    inner: AudioCodec,
    channel: StreamChannel,
    time_base: Rational,
}

impl AudioDecoder {
    pub fn open(decoder: AvAudioDecoder, channel: StreamChannel, time_base: Rational) -> Self {
        AudioDecoder { inner: AudioCodec(decoder), channel, time_base }
    }

    pub fn decode(&mut self, out: &mut AudioFrame, deadline: Deadline) -> DecodeResult {
        let result = pump(&mut self.inner, &self.channel, out, deadline);
        if result == DecodeResult::Success {
            let (pts, dur) = rebase_frame_pts(out.pts(), out.packet().duration, self.time_base);
            out.set_pts(pts);
            let _ = dur;
        }
        result
    }

    pub fn rebase_duration(&self, duration: i64) -> i64 {
        rebase_to_ns(duration, self.time_base.numerator(), self.time_base.denominator())
    }

    pub fn wait_for_seek(&mut self, deadline: Deadline) {
        let inner = &mut self.inner;
        wait_for_seek_generic(&self.channel, deadline, || inner.flush());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebase_frame_pts_rebases_both_fields() {
        let tb = Rational::new(1, 48000);
        let (pts, dur) = rebase_frame_pts(Some(48000), 1024, tb);
        assert_eq!(pts, Some(sve2_core::NS_PER_SEC));
        assert_eq!(dur, rebase_to_ns(1024, 1, 48000));
    }

    #[test]
    fn rebase_frame_pts_handles_missing_pts() {
        let tb = Rational::new(1, 90000);
        let (pts, _) = rebase_frame_pts(None, 0, tb);
        assert_eq!(pts, None);
    }
}
