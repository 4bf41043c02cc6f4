// crates/sve2-media/src/lib.rs

pub mod context;
pub mod decoder;
pub mod demuxer;
pub mod encoder;
pub mod hw_bridge;
pub mod media_source;
pub mod muxer;
pub mod resampler;

pub use context::{Context, ContextError};
pub use decoder::{AudioDecoder, DecodeResult, DecoderError, VideoDecoder};
pub use demuxer::{DemuxerError, DemuxerHandle};
pub use encoder::{AudioEncoder, EncoderError, VideoEncoder};
pub use hw_bridge::{GpuTextureBackend, HwBridgeError, HwTexture};
pub use media_source::{
    open_streamed, AudioTarget, MediaSourceError, PreloadedAudioSource, PreloadedVideoSource,
    StreamedAudioSource, StreamedVideoSource, StreamSelection,
};
pub use muxer::{Muxer, MuxerError};
pub use resampler::{AudioResampler, ResamplerError};
