// crates/sve2-core/src/context_types.rs
//
// Pure configuration/data types for the context singleton. No FFmpeg, no GL
// — just the fields a caller supplies at init and the mode distinction that
// everything downstream branches on. Mirrors context_init_t / context_mode_t.

use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    /// On-screen, wall-clock/audio-driven playback.
    Preview,
    /// Off-screen, encodes video + audio to a muxed output file.
    Render,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

impl ChannelLayout {
    pub fn channel_count(&self) -> u32 {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    S16,
    Flt,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> u32 {
        match self {
            SampleFormat::S16 => 2,
            SampleFormat::Flt => 4,
        }
    }
}

/// Everything the caller supplies to bring up a [`Context`](crate) instance.
#[derive(Debug, Clone)]
pub struct ContextInit {
    pub mode: ContextMode,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub sample_rate: u32,
    pub channel_layout: ChannelLayout,
    pub sample_format: SampleFormat,
    /// Preview-mode FIFO sizing hint; ignored in render mode.
    pub num_buffered_audio_frames: u32,
    /// Present only in render mode; selects the muxer's output path.
    pub output_path: Option<PathBuf>,
}

impl ContextInit {
    /// Bytes needed to hold one interleaved sample across every channel.
    pub fn sample_stride_bytes(&self) -> u32 {
        self.sample_format.bytes_per_sample() * self.channel_layout.channel_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_stride_matches_stereo_s16() {
        let init = ContextInit {
            mode: ContextMode::Preview,
            width: 1920,
            height: 1080,
            fps: 60,
            sample_rate: 48000,
            channel_layout: ChannelLayout::Stereo,
            sample_format: SampleFormat::S16,
            num_buffered_audio_frames: 8,
            output_path: None,
        };
        assert_eq!(init.sample_stride_bytes(), 4);
    }
}
