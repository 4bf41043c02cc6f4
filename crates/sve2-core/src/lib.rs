// crates/sve2-core/src/lib.rs
//
// Foundational, FFmpeg-free types shared by every layer of the engine: the
// monotonic clock and deadline type, the bounded MPMC channel, stream index
// resolution, the packet-channel message, and the context/texture data
// model. sve2-media builds the FFmpeg-facing pipeline on top of these.

pub mod channel;
pub mod context_types;
pub mod packet;
pub mod stream_index;
pub mod texture;
pub mod time;

pub use channel::{Channel, GrowPolicy, RecvOutcome};
pub use context_types::{ChannelLayout, ContextInit, ContextMode, SampleFormat};
pub use packet::PacketMessage;
pub use stream_index::{MediaKind, StreamIndex};
pub use texture::{PixelFormat, TextureHandle, VideoTexture};
pub use time::{rebase_to_ns, Deadline, NS_PER_SEC};
