// crates/sve2-media/src/hw_bridge.rs
//
// Zero-copy mapping between a decoded hardware video frame, GPU textures
// usable by compositing shaders, and an encoder-submittable hardware frame,
// via DMA-BUF/DRM-PRIME descriptors. Grounded on hw_texmap.c's
// hw_texmap_to_gl / hw_texmap_from_gl / hw_texmap_unmap and its NV12 packing
// math (hw_align_size: 128-wide, 64-tall).
//
// The concrete EGL/DRM calls (eglCreateImage, glEGLImageTargetTexStorageEXT,
// eglExportDMABUFImageMESA, ...) are FFI to system libraries with no
// corresponding crate in this workspace's dependency stack, so they sit
// behind the `GpuTextureBackend` trait. This keeps the packing/alignment
// arithmetic — the part the testable properties actually pin down — free of
// a live GPU/DRM device, and leaves the backend as the documented plug-in
// point for a non-VAAPI zero-copy path (the spec explicitly allows this).

use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use sve2_core::texture::{PixelFormat, TextureHandle};
use thiserror::Error;

pub const MAX_PLANES: usize = 4;

#[derive(Debug, Error)]
pub enum HwBridgeError {
    #[error("image creation failed for plane {0}")]
    ImageCreation(usize),
    #[error("host/requested-format endianness mismatch")]
    Endianness,
    #[error("too many planes for format {0:?} (max {MAX_PLANES})")]
    TooManyPlanes(PixelFormat),
}

/// One exported DRM-PRIME plane: a dma-buf fd plus the byte offset and
/// stride describing where this plane's data starts within it.
#[derive(Debug, Clone, Copy)]
pub struct DmaBufPlane {
    pub fd: RawFd,
    pub offset: u32,
    pub pitch: u32,
}

/// What `export_to_dmabuf` hands back for one decoded-frame layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaBufLayer {
    pub plane: DmaBufPlane,
    pub drm_format: u32,
    pub width: u32,
    pub height: u32,
}

/// Abstracts the EGL/DRM side: importing a DMA-BUF as a GPU texture, and
/// exporting a GPU texture back out as one. A real implementation talks to
/// `eglCreateImage`/`glEGLImageTargetTexStorageEXT`/
/// `eglExportDMABUFImageMESA`; tests use a recording fake.
pub trait GpuTextureBackend {
    /// Creates a GPU texture backed by `layer`'s DMA-BUF import. Returns the
    /// texture handle and an opaque image handle to release on unmap.
    fn import_layer(&mut self, layer: &DmaBufLayer) -> Result<(TextureHandle, u64), HwBridgeError>;
    /// Exports `texture` as a single-plane DMA-BUF descriptor.
    fn export_texture(&mut self, texture: TextureHandle) -> Result<DmaBufPlane, HwBridgeError>;
    fn destroy_image(&mut self, image: u64);
    fn delete_texture(&mut self, texture: TextureHandle);
}

#[derive(Debug, Clone, Copy, Default)]
struct Plane {
    texture: TextureHandle,
    image: Option<u64>,
    fd: Option<RawFd>,
}

impl Plane {
    fn null() -> Self {
        Plane { texture: 0, image: None, fd: None }
    }
}

/// Up to [`MAX_PLANES`] GPU-texture planes, plus the format they decode. A
/// null texture (`format = None`) has every plane cleared.
pub struct HwTexture {
    format: Option<PixelFormat>,
    planes: [Plane; MAX_PLANES],
}

impl HwTexture {
    pub fn null() -> Self {
        HwTexture { format: None, planes: [Plane::null(); MAX_PLANES] }
    }

    pub fn is_null(&self) -> bool {
        self.format.is_none()
    }

    pub fn format(&self) -> Option<PixelFormat> {
        self.format
    }

    pub fn plane_texture(&self, i: usize) -> TextureHandle {
        self.planes[i].texture
    }
}

/// Rounds `v` up to the next multiple of `to` (`to` a power of two or not;
/// the reference only ever calls this with 128/64).
fn align_up(v: u32, to: u32) -> u32 {
    ((v + to - 1) / to) * to
}

/// §4.4.1 — decoded hardware frame → GPU textures, one per DRM-PRIME layer.
///
/// `layers` is in decode order: for NV12, layer 0 is luma (full resolution),
/// layer 1 is chroma (shifted by the format's chroma log2 factors).
pub fn map_decoded_frame(
    format: PixelFormat,
    layers: &[DmaBufLayer],
    backend: &mut impl GpuTextureBackend,
) -> Result<HwTexture, HwBridgeError> {
    if layers.len() > MAX_PLANES {
        return Err(HwBridgeError::TooManyPlanes(format));
    }

    let mut tex = HwTexture { format: Some(format), planes: [Plane::null(); MAX_PLANES] };
    for (i, layer) in layers.iter().enumerate() {
        let (texture, image) = backend
            .import_layer(layer)
            .map_err(|_| HwBridgeError::ImageCreation(i))?;
        tex.planes[i] = Plane { texture, image: Some(image), fd: Some(layer.plane.fd) };
    }
    Ok(tex)
}

/// §4.4.2 — the NV12 packed single-object layout the encoder expects.
/// `uv_offset` is in rows; `outer_width`/`outer_height` are the dimensions
/// the packing compute shader must render into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nv12PackLayout {
    pub uv_offset_rows: u32,
    pub outer_width: u32,
    pub outer_height: u32,
}

pub fn nv12_pack_layout(width: u32, height: u32) -> Nv12PackLayout {
    let uv_offset_rows = align_up(height, 64);
    let outer_width = align_up(width, 128);
    let outer_height = align_up(uv_offset_rows + height.div_ceil(2), 64);
    Nv12PackLayout { uv_offset_rows, outer_width, outer_height }
}

/// The NV12 packing compute shader's dispatch size for a `width x height`
/// frame (one invocation per chroma-subsampled texel): `(w/2, h/2, 1)`.
pub fn nv12_dispatch_size(width: u32, height: u32) -> (u32, u32, u32) {
    (width / 2, height / 2, 1)
}

/// §4.4.2 — GPU texture (already packed per [`nv12_pack_layout`]) → a
/// two-layer DRM descriptor sharing one underlying buffer object: layer 0 is
/// Y at R8 from offset 0, layer 1 is UV at RG88 from the computed offset.
pub fn synthesize_nv12_encoder_layers(
    layout: Nv12PackLayout,
    stride: u32,
    base: DmaBufPlane,
) -> [DmaBufLayer; 2] {
    let y = DmaBufLayer {
        plane: DmaBufPlane { fd: base.fd, offset: base.offset, pitch: stride },
        drm_format: DRM_FORMAT_R8,
        width: layout.outer_width,
        height: layout.uv_offset_rows,
    };
    let uv = DmaBufLayer {
        plane: DmaBufPlane {
            fd: base.fd,
            offset: base.offset + layout.uv_offset_rows * stride,
            pitch: stride,
        },
        drm_format: DRM_FORMAT_RG88,
        width: layout.outer_width / 2,
        height: layout.outer_height - layout.uv_offset_rows,
    };
    [y, uv]
}

const DRM_FORMAT_R8: u32 = 0x20203852; // 'R8  '
const DRM_FORMAT_RG88: u32 = 0x38384752; // 'RG88'

/// §4.4.3 — releases every held fd/image and optionally deletes the GL
/// textures (`keep_textures` is used when the handles were created outside
/// the bridge and will be reused next frame, e.g. the render-mode NV12
/// staging texture). Idempotent: unmapping an already-null texture is a
/// no-op, and the texture is always left in the null state afterwards.
pub fn unmap(tex: &mut HwTexture, keep_textures: bool, backend: &mut impl GpuTextureBackend) {
    if tex.format.is_none() {
        return;
    }

    for plane in tex.planes.iter_mut() {
        if let Some(image) = plane.image.take() {
            backend.destroy_image(image);
        }
        if let Some(fd) = plane.fd.take() {
            // SAFETY: `fd` was exported to us in `map_decoded_frame` and is
            // not owned/closed anywhere else; dropping the `OwnedFd` closes
            // it exactly once.
            unsafe {
                drop(OwnedFd::from_raw_fd(fd));
            }
        }
        if !keep_textures && plane.texture != 0 {
            backend.delete_texture(plane.texture);
        }
        plane.texture = 0;
    }

    tex.format = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct FakeBackend {
        next_handle: TextureHandle,
        destroyed_images: RefCell<Vec<u64>>,
        deleted_textures: RefCell<Vec<TextureHandle>>,
    }

    impl GpuTextureBackend for FakeBackend {
        fn import_layer(&mut self, layer: &DmaBufLayer) -> Result<(TextureHandle, u64), HwBridgeError> {
            self.next_handle += 1;
            Ok((self.next_handle, layer.plane.fd as u64))
        }
        fn export_texture(&mut self, texture: TextureHandle) -> Result<DmaBufPlane, HwBridgeError> {
            Ok(DmaBufPlane { fd: texture as RawFd, offset: 0, pitch: 1920 })
        }
        fn destroy_image(&mut self, image: u64) {
            self.destroyed_images.borrow_mut().push(image);
        }
        fn delete_texture(&mut self, texture: TextureHandle) {
            self.deleted_textures.borrow_mut().push(texture);
        }
    }

    #[test]
    fn nv12_alignment_matches_scenario_s5() {
        let layout = nv12_pack_layout(1920, 1080);
        assert_eq!(layout.uv_offset_rows, 1088);
        assert_eq!(layout.outer_width, 1920);
        assert!(layout.outer_height >= layout.uv_offset_rows + 540);
        assert_eq!(nv12_dispatch_size(1920, 1080), (960, 540, 1));
    }

    #[test]
    fn nv12_round_trip_offsets_satisfy_property_8() {
        let w = 1920;
        let h = 1080;
        let layout = nv12_pack_layout(w, h);
        let stride = layout.outer_width;
        let base = DmaBufPlane { fd: 42, offset: 0, pitch: stride };
        let [y, uv] = synthesize_nv12_encoder_layers(layout, stride, base);

        assert_eq!(y.plane.offset, 0);
        assert_eq!(uv.plane.offset, layout.uv_offset_rows * stride);
        assert!(layout.outer_height as u64 * stride as u64 >= (uv.plane.offset as u64 + (h / 2) as u64 * stride as u64));
    }

    #[test]
    fn unmap_is_idempotent_and_resets_to_null() {
        let mut backend = FakeBackend::default();
        let layers = [
            DmaBufLayer { plane: DmaBufPlane { fd: 10, offset: 0, pitch: 1920 }, drm_format: DRM_FORMAT_R8, width: 1920, height: 1080 },
            DmaBufLayer { plane: DmaBufPlane { fd: 10, offset: 1088 * 1920, pitch: 1920 }, drm_format: DRM_FORMAT_RG88, width: 960, height: 540 },
        ];
        let mut tex = map_decoded_frame(PixelFormat::Nv12, &layers, &mut backend).unwrap();
        assert!(!tex.is_null());

        unmap(&mut tex, true, &mut backend);
        assert!(tex.is_null());
        for i in 0..MAX_PLANES {
            assert_eq!(tex.plane_texture(i), 0);
        }

        // Second unmap is a no-op: no additional destroy/delete calls.
        let before = backend.destroyed_images.borrow().len();
        unmap(&mut tex, true, &mut backend);
        assert_eq!(backend.destroyed_images.borrow().len(), before);
        assert!(tex.is_null());
    }

    #[test]
    fn unmap_deletes_textures_unless_kept() {
        let mut backend = FakeBackend::default();
        let layers = [DmaBufLayer { plane: DmaBufPlane { fd: 10, offset: 0, pitch: 1920 }, drm_format: DRM_FORMAT_R8, width: 1920, height: 1080 }];
        let mut tex = map_decoded_frame(PixelFormat::Nv12, &layers, &mut backend).unwrap();
        unmap(&mut tex, false, &mut backend);
        assert_eq!(backend.deleted_textures.borrow().len(), 1);
    }

    #[test]
    fn too_many_planes_is_rejected() {
        let mut backend = FakeBackend::default();
        let layer = DmaBufLayer { plane: DmaBufPlane { fd: 1, offset: 0, pitch: 8 }, drm_format: DRM_FORMAT_R8, width: 8, height: 8 };
        let layers = vec![layer; MAX_PLANES + 1];
        assert!(matches!(map_decoded_frame(PixelFormat::Nv12, &layers, &mut backend), Err(HwBridgeError::TooManyPlanes(_))));
    }
}
