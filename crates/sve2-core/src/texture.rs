// crates/sve2-core/src/texture.rs
//
// The shape a decoded video frame takes once it reaches the renderer: either
// a set of GPU-texture planes bound to a zero-copy import, or an index into
// a preloaded layered array. The reference returns both through one struct
// with an `array_index < 0` sentinel; this is the sum type the redesign note
// asks for so shader selection is a structural match instead of a sentinel
// check.

/// Software pixel format recorded alongside a texture so the shader knows
/// how to sample/convert it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Nv12,
    Yuv420p,
    Rgba,
    Bgra,
}

impl PixelFormat {
    /// log2 chroma subsampling shift (width, height) relative to luma, for
    /// formats that have a chroma plane distinct from luma. `Rgba`/`Bgra`
    /// have no subsampling.
    pub fn chroma_shift(&self) -> (u32, u32) {
        match self {
            PixelFormat::Nv12 | PixelFormat::Yuv420p => (1, 1),
            PixelFormat::Rgba | PixelFormat::Bgra => (0, 0),
        }
    }

    pub fn plane_count(&self) -> usize {
        match self {
            PixelFormat::Nv12 => 2,
            PixelFormat::Yuv420p => 3,
            PixelFormat::Rgba | PixelFormat::Bgra => 1,
        }
    }
}

/// Opaque backend-defined handle (a GL texture name, a layered-array object,
/// ...). sve2-core has no GPU dependency, so the concrete meaning is defined
/// by whichever `GpuTextureBackend` produced it.
pub type TextureHandle = u64;

/// What the renderer actually samples for one video source's current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoTexture {
    /// Multi-plane texture(s) bound to a DMA-BUF import from the decoder's
    /// hardware surface (the streamed media-source variant).
    PlanarPlanes { handle: TextureHandle, format: PixelFormat },
    /// An index into a single layered texture array (the preloaded variant).
    LayeredArray { array: TextureHandle, index: u32, format: PixelFormat },
}

impl VideoTexture {
    pub fn format(&self) -> PixelFormat {
        match self {
            VideoTexture::PlanarPlanes { format, .. } => *format,
            VideoTexture::LayeredArray { format, .. } => *format,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_has_two_planes_and_half_chroma() {
        assert_eq!(PixelFormat::Nv12.plane_count(), 2);
        assert_eq!(PixelFormat::Nv12.chroma_shift(), (1, 1));
    }

    #[test]
    fn rgba_has_no_subsampling() {
        assert_eq!(PixelFormat::Rgba.chroma_shift(), (0, 0));
        assert_eq!(PixelFormat::Rgba.plane_count(), 1);
    }

    #[test]
    fn video_texture_format_is_structural() {
        let planar = VideoTexture::PlanarPlanes { handle: 7, format: PixelFormat::Nv12 };
        let layered = VideoTexture::LayeredArray { array: 3, index: 4, format: PixelFormat::Rgba };
        assert_eq!(planar.format(), PixelFormat::Nv12);
        assert_eq!(layered.format(), PixelFormat::Rgba);
    }
}
