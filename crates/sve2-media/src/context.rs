// crates/sve2-media/src/context.rs
//
// Owns the per-frame protocol and the audio clock. Grounded on
// context.c: context_begin_frame/context_end_frame for the render-mode NV12
// dispatch + submit sequence, context_get_audio_timer/context_submit_audio
// for the FIFO-backed preview clock. Windowing (GLFW) and the GL compute
// dispatch have no analog anywhere in the retrieval pack, so both are left
// as trait seams (`FrameSink`, preview's FIFO already lives in sve2-core as
// `Channel`) rather than fabricated bindings.

use std::collections::VecDeque;
use std::sync::Mutex;

use thiserror::Error;

use sve2_core::{ContextInit, ContextMode, NS_PER_SEC};

use crate::encoder::{AudioEncoder, EncoderError, VideoEncoder};
use crate::hw_bridge::{self, DmaBufLayer, GpuTextureBackend, HwTexture};
use crate::muxer::{Muxer, MuxerError};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Muxer(#[from] MuxerError),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error("audio fifo allocation failed")]
    FifoAlloc,
}

/// Render-mode side: owns the muxer, the video stream index, and the packed
/// NV12 texture state carried frame-to-frame (`uv_offset_y`, the output
/// texture handle).
struct RenderState {
    muxer: Muxer,
    video_stream: usize,
    audio_stream: usize,
    texture: HwTexture,
    uv_offset_rows: u32,
}

/// Preview-mode side: the audio FIFO and its mutex, matching context.c's
/// `audio_fifo` + `audio_fifo_mutex` pair exactly (one mutex, three kinds of
/// access: read, write, length query).
struct PreviewState {
    fifo: Mutex<VecDeque<u8>>,
    fifo_capacity_samples: u32,
    eof: bool,
}

enum ModeState {
    Render(RenderState),
    Preview(PreviewState),
}

/// Audio clock state — §4.9. `samples_since_seek` resets on every seek,
/// `total_samples` never does; `samples_this_frame` resets every
/// `begin_frame`.
struct AudioClock {
    audio_timer_offset: i64,
    samples_since_seek: i64,
    samples_this_frame: i64,
    total_samples: i64,
}

impl AudioClock {
    fn new() -> Self {
        AudioClock { audio_timer_offset: 0, samples_since_seek: 0, samples_this_frame: 0, total_samples: 0 }
    }
}

pub struct Context {
    info: ContextInit,
    frame_num: i64,
    clock: AudioClock,
    mode_state: ModeState,
}

impl Context {
    /// `context_init`. The render branch wires up a VAAPI H.264 video stream
    /// and a PCM S16LE audio stream and writes the container header; the
    /// preview branch allocates the audio FIFO sized
    /// `sample_rate/fps * num_buffered_audio_frames`, matching the reference
    /// literally.
    pub fn init(
        info: ContextInit,
        video_codec: Option<ffmpeg_the_third::codec::context::Context>,
        audio_codec: Option<ffmpeg_the_third::codec::context::Context>,
    ) -> Result<Self, ContextError> {
        let mode_state = match info.mode {
            ContextMode::Render => {
                let output_path = info
                    .output_path
                    .as_ref()
                    .expect("render mode requires an output path")
                    .to_string_lossy()
                    .into_owned();
                let mut muxer = Muxer::open(&output_path)?;
                let global_header = muxer.global_header_required();

                let video_ctx = video_codec.expect("render mode requires a video codec context");
                let video_enc = VideoEncoder::open(video_ctx, &info, true, global_header)?;
                let video_stream = muxer.add_video_stream(video_enc);

                let audio_ctx = audio_codec.expect("render mode requires an audio codec context");
                let audio_enc = AudioEncoder::open(audio_ctx, &info, global_header)?;
                let audio_stream = muxer.add_audio_stream(audio_enc);

                muxer.begin()?;

                let layout = hw_bridge::nv12_pack_layout(info.width, info.height);
                ModeState::Render(RenderState {
                    muxer,
                    video_stream,
                    audio_stream,
                    texture: HwTexture::null(),
                    uv_offset_rows: layout.uv_offset_rows,
                })
            }
            ContextMode::Preview => {
                let fifo_capacity_samples = info.sample_rate / info.fps * info.num_buffered_audio_frames;
                ModeState::Preview(PreviewState {
                    fifo: Mutex::new(VecDeque::new()),
                    fifo_capacity_samples,
                    eof: false,
                })
            }
        };

        Ok(Context { info, frame_num: 0, clock: AudioClock::new(), mode_state })
    }

    pub fn frame_num(&self) -> i64 {
        self.frame_num
    }

    /// Render-mode video pts is the frame counter rebased to ns; preview
    /// mode uses the wall clock, which this crate leaves to the caller
    /// (no monotonic-clock source exists below `sve2_core::time`).
    pub fn current_time_ns(&self) -> i64 {
        match self.mode_state {
            ModeState::Render(_) => self.frame_num * NS_PER_SEC / self.info.fps as i64,
            ModeState::Preview(_) => self.get_audio_timer(),
        }
    }

    /// `begin_frame`: resets "samples written this frame". Windowing event
    /// polling and framebuffer binding are the caller's GPU-context
    /// responsibility (§5: "all GPU ... operations must occur on this
    /// thread", which is not necessarily the thread running this method in
    /// a headless render-mode pipeline).
    pub fn begin_frame(&mut self) {
        log::trace!("frame {} started", self.frame_num);
        self.clock.samples_this_frame = 0;
    }

    /// `end_frame`: in render mode, packs the caller-supplied decoded video
    /// layers into NV12, submits to the video encoder stream tagged with
    /// `pts = frame_number`, and unmaps without deleting texture handles
    /// (reused next frame, per §4.4.3 / §4.8). In preview mode there is no
    /// buffer swap to perform here: `sve2-media` has no windowing surface,
    /// so the caller's presentation layer owns that half of the contract.
    pub fn end_frame(
        &mut self,
        frame: Option<&ffmpeg_the_third::util::frame::video::Video>,
        layers: &[DmaBufLayer],
        backend: &mut impl GpuTextureBackend,
    ) -> Result<(), ContextError> {
        if let ModeState::Render(r) = &mut self.mode_state {
            hw_bridge::unmap(&mut r.texture, true, backend);
            r.texture = hw_bridge::map_decoded_frame(sve2_core::PixelFormat::Nv12, layers, backend)
                .map_err(|_| ContextError::FifoAlloc)?;
            r.muxer.submit_video(r.video_stream, frame)?;
        }
        self.frame_num += 1;
        Ok(())
    }

    /// `set_audio_timer(t)`: called after every seek.
    pub fn set_audio_timer(&mut self, t: i64) {
        self.clock.audio_timer_offset = t;
        self.clock.samples_since_seek = 0;
    }

    /// `get_audio_timer()` — §4.9. Preview subtracts samples still sitting
    /// in the FIFO (future audio from the device's perspective); render has
    /// no FIFO so `buffered := 0`.
    pub fn get_audio_timer(&self) -> i64 {
        let buffered = match &self.mode_state {
            ModeState::Preview(p) => p.fifo.lock().unwrap().len() as i64 / self.sample_stride() as i64,
            ModeState::Render(_) => 0,
        };
        self.clock.audio_timer_offset
            + (self.clock.samples_since_seek - buffered) * NS_PER_SEC / self.info.sample_rate as i64
    }

    fn sample_stride(&self) -> u32 {
        self.info.sample_stride_bytes()
    }

    /// `context_audio_full`: true once the FIFO holds at least
    /// `sample_rate/fps * num_buffered_audio_frames` samples.
    pub fn audio_full(&self) -> bool {
        match &self.mode_state {
            ModeState::Preview(p) => {
                let fifo = p.fifo.lock().unwrap();
                (fifo.len() as u32 / self.sample_stride()) >= p.fifo_capacity_samples as u32
            }
            ModeState::Render(_) => false,
        }
    }

    /// `unmap_audio(n)`: advances the three sample counters and, in render
    /// mode, submits the staged frame tagged with `pts = total_samples`.
    /// Preview mode's FIFO write happens in `submit_audio_preview` below,
    /// which is where the staging buffer in §4.9's `map_audio` would hand
    /// off; this crate exposes the simpler whole-frame submit rather than
    /// the map/unmap pair since Rust's borrow checker makes a zero-copy
    /// staging handle awkward without unsafe, and no caller in this corpus
    /// needs partial-frame writes.
    pub fn submit_audio(
        &mut self,
        samples: &[u8],
        num_samples: u32,
        frame: Option<&ffmpeg_the_third::util::frame::audio::Audio>,
    ) -> Result<(), ContextError> {
        match &mut self.mode_state {
            ModeState::Render(r) => {
                r.muxer.submit_audio(r.audio_stream, frame)?;
            }
            ModeState::Preview(p) => {
                let mut fifo = p.fifo.lock().unwrap();
                fifo.extend(samples.iter().copied());
            }
        }
        let n = num_samples as i64;
        self.clock.samples_this_frame += n;
        self.clock.samples_since_seek += n;
        self.clock.total_samples += n;
        Ok(())
    }

    /// `context_submit_audio_eof`: preview only, sets the sticky EOF flag
    /// the device callback checks before reporting underrun.
    pub fn submit_audio_eof(&mut self) {
        if let ModeState::Preview(p) = &mut self.mode_state {
            p.eof = true;
        }
    }

    /// The device callback's read side: `min(requested, len(fifo))` under
    /// lock, remainder left as silence by the device layer.
    pub fn drain_audio_device(&self, out: &mut [u8]) -> usize {
        match &self.mode_state {
            ModeState::Preview(p) => {
                let mut fifo = p.fifo.lock().unwrap();
                let n = out.len().min(fifo.len());
                for slot in out.iter_mut().take(n) {
                    *slot = fifo.pop_front().unwrap();
                }
                n
            }
            ModeState::Render(_) => 0,
        }
    }

    pub fn uv_offset_rows(&self) -> Option<u32> {
        match &self.mode_state {
            ModeState::Render(r) => Some(r.uv_offset_rows),
            ModeState::Preview(_) => None,
        }
    }

    /// `context_free`'s render branch: null-submit + drain every stream and
    /// write the trailer.
    pub fn close(self) -> Result<(), ContextError> {
        if let ModeState::Render(r) = self.mode_state {
            r.muxer.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sve2_core::{ChannelLayout, ContextMode, SampleFormat};

    fn preview_init() -> ContextInit {
        ContextInit {
            mode: ContextMode::Preview,
            width: 1920,
            height: 1080,
            fps: 30,
            sample_rate: 48000,
            channel_layout: ChannelLayout::Stereo,
            sample_format: SampleFormat::S16,
            num_buffered_audio_frames: 4,
            output_path: None,
        }
    }

    #[test]
    fn preview_audio_timer_subtracts_buffered_samples() {
        let mut ctx = Context::init(preview_init(), None, None).unwrap();
        // 48000 samples submitted at 48kHz with none yet drained by the
        // device: "now" should read zero since all of it is still future
        // audio sitting in the fifo.
        let stride = ctx.sample_stride() as usize;
        let payload = vec![0u8; 48000 * stride];
        ctx.submit_audio(&payload, 48000, None).unwrap();
        assert_eq!(ctx.get_audio_timer(), 0);

        // drain it all out through the device callback: now the clock
        // reads a full second since nothing is buffered anymore.
        let mut sink = vec![0u8; payload.len()];
        let drained = ctx.drain_audio_device(&mut sink);
        assert_eq!(drained, payload.len());
        assert_eq!(ctx.get_audio_timer(), NS_PER_SEC);
    }

    #[test]
    fn set_audio_timer_resets_samples_since_seek() {
        let mut ctx = Context::init(preview_init(), None, None).unwrap();
        let stride = ctx.sample_stride() as usize;
        ctx.submit_audio(&vec![0u8; 1000 * stride], 1000, None).unwrap();
        ctx.set_audio_timer(5_000_000_000);
        assert_eq!(ctx.clock.samples_since_seek, 0);
        assert_eq!(ctx.clock.audio_timer_offset, 5_000_000_000);
        assert_eq!(ctx.clock.total_samples, 1000); // seek does not rewind total
    }

    #[test]
    fn begin_frame_resets_samples_this_frame_but_not_total() {
        let mut ctx = Context::init(preview_init(), None, None).unwrap();
        let stride = ctx.sample_stride() as usize;
        ctx.submit_audio(&vec![0u8; 10 * stride], 10, None).unwrap();
        assert_eq!(ctx.clock.samples_this_frame, 10);
        ctx.begin_frame();
        assert_eq!(ctx.clock.samples_this_frame, 0);
        assert_eq!(ctx.clock.total_samples, 10);
    }

    #[test]
    fn audio_full_matches_fifo_capacity_formula() {
        let mut ctx = Context::init(preview_init(), None, None).unwrap();
        // capacity = 48000/30*4 = 6400 samples
        let stride = ctx.sample_stride() as usize;
        ctx.submit_audio(&vec![0u8; 6399 * stride], 6399, None).unwrap();
        assert!(!ctx.audio_full());
        ctx.submit_audio(&vec![0u8; stride], 1, None).unwrap();
        assert!(ctx.audio_full());
    }
}
