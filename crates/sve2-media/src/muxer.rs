// crates/sve2-media/src/muxer.rs
//
// Interleaved writer owning one encoder per output stream. Grounded on
// muxer.c: muxer_new_stream lifts the global-header flag onto the encoder
// before opening it, muxer_submit_frame loops flush/submit/flush so an
// EAGAIN from the encoder can never deadlock against a full packet queue,
// and muxer_end submits a null frame to every stream before writing the
// trailer.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::context::Output;
use ffmpeg::Rational;
use thiserror::Error;

use crate::encoder::{AudioEncoder, EncoderError, VideoEncoder};

#[derive(Debug, Error)]
pub enum MuxerError {
    #[error("failed to allocate output context: {0}")]
    Alloc(String),
    #[error("failed to open output for writing: {0}")]
    OpenOutput(String),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error("failed to write header/trailer: {0}")]
    Io(String),
}

enum Stream {
    Video(VideoEncoder),
    Audio(AudioEncoder),
}

pub struct Muxer {
    octx: Output,
    streams: Vec<Stream>,
    stream_time_bases: Vec<Rational>,
    global_header: bool,
}

impl Muxer {
    pub fn open(path: &str) -> Result<Self, MuxerError> {
        let octx = ffmpeg::format::output(&path).map_err(|e| MuxerError::Alloc(e.to_string()))?;
        let global_header = octx.format().flags().contains(ffmpeg::format::Flags::GLOBAL_HEADER);
        Ok(Muxer { octx, streams: Vec::new(), stream_time_bases: Vec::new(), global_header })
    }

    pub fn add_video_stream(&mut self, encoder: VideoEncoder) -> usize {
        let idx = self.streams.len();
        self.stream_time_bases.push(encoder.time_base());
        self.streams.push(Stream::Video(encoder));
        idx
    }

    pub fn add_audio_stream(&mut self, encoder: AudioEncoder) -> usize {
        let idx = self.streams.len();
        self.stream_time_bases.push(encoder.time_base());
        self.streams.push(Stream::Audio(encoder));
        idx
    }

    pub fn global_header_required(&self) -> bool {
        self.global_header
    }

    pub fn begin(&mut self) -> Result<(), MuxerError> {
        self.octx.write_header().map_err(|e| MuxerError::Io(e.to_string()))
    }

    fn flush(&mut self, idx: usize) {
        loop {
            let packet = match &mut self.streams[idx] {
                Stream::Video(e) => e.receive_packet(),
                Stream::Audio(e) => e.receive_packet(),
            };
            match packet {
                Some(mut pkt) => {
                    pkt.rescale_ts(self.stream_time_bases[idx], self.octx.stream(idx as u32).unwrap().time_base());
                    pkt.set_stream(idx);
                    let _ = pkt.write_interleaved(&mut self.octx);
                }
                None => break,
            }
        }
    }

    /// Drains ready packets, submits `frame`, retries draining on "try
    /// again" — `submit(frame, idx)` in §4.7.
    pub fn submit_video(&mut self, idx: usize, frame: Option<&ffmpeg::util::frame::video::Video>) -> Result<(), MuxerError> {
        self.flush(idx);
        loop {
            let accepted = match &mut self.streams[idx] {
                Stream::Video(e) => e.submit_frame(frame)?,
                Stream::Audio(_) => unreachable!("stream {idx} is not video"),
            };
            self.flush(idx);
            if accepted {
                break;
            }
        }
        Ok(())
    }

    pub fn submit_audio(&mut self, idx: usize, frame: Option<&ffmpeg::util::frame::audio::Audio>) -> Result<(), MuxerError> {
        self.flush(idx);
        loop {
            let accepted = match &mut self.streams[idx] {
                Stream::Audio(e) => e.submit_frame(frame)?,
                Stream::Video(_) => unreachable!("stream {idx} is not audio"),
            };
            self.flush(idx);
            if accepted {
                break;
            }
        }
        Ok(())
    }

    /// `close()`: submit *null* to every stream and drain, write the
    /// trailer, close the sink.
    pub fn close(mut self) -> Result<(), MuxerError> {
        for idx in 0..self.streams.len() {
            match &mut self.streams[idx] {
                Stream::Video(e) => {
                    let _ = e.submit_frame(None);
                }
                Stream::Audio(e) => {
                    let _ = e.submit_frame(None);
                }
            }
            self.flush(idx);
        }
        self.octx.write_trailer().map_err(|e| MuxerError::Io(e.to_string()))
    }
}
