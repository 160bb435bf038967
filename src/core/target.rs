//! Offscreen render targets.
//!
//! A [`RenderTarget`] is a framebuffer plus the textures attached to it. It
//! either owns an attachment (allocates, resizes and deletes it) or borrows
//! one produced by another target, which is how passes share a depth buffer
//! or write into a neighbour's colour texture.
//!
//! Resizing re-specifies storage in place: handles survive a resize, so
//! any pass that captured an attachment handle at construction keeps reading
//! the right texture afterwards.

use smallvec::SmallVec;

use crate::errors::{RenderError, Result};

use super::context::GpuContext;
use super::handles::{FramebufferHandle, TextureHandle};
use super::types::{TextureDesc, TextureFormat, Viewport};

/// How one attachment slot is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentDesc {
    /// Allocate a texture of this format, owned by the target.
    New(TextureFormat),
    /// Attach an existing texture without taking ownership.
    Shared(TextureHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Attachment {
    texture: TextureHandle,
    owned: bool,
}

#[derive(Debug)]
pub struct RenderTarget {
    label: String,
    framebuffer: FramebufferHandle,
    colors: SmallVec<[Attachment; 4]>,
    depth: Option<Attachment>,
    width: u32,
    height: u32,
}

impl RenderTarget {
    /// Allocates owned attachments and assembles the framebuffer.
    ///
    /// On failure every texture allocated so far is released again.
    pub fn create(
        gpu: &mut GpuContext,
        label: &str,
        (width, height): (u32, u32),
        colors: &[AttachmentDesc],
        depth: Option<AttachmentDesc>,
    ) -> Result<Self> {
        let mut allocated: SmallVec<[TextureHandle; 5]> = SmallVec::new();
        let result = Self::assemble(gpu, label, (width, height), colors, depth, &mut allocated);
        if result.is_err() {
            for texture in allocated {
                gpu.delete_texture(texture);
            }
        }
        result
    }

    fn assemble(
        gpu: &mut GpuContext,
        label: &str,
        (width, height): (u32, u32),
        colors: &[AttachmentDesc],
        depth: Option<AttachmentDesc>,
        allocated: &mut SmallVec<[TextureHandle; 5]>,
    ) -> Result<Self> {
        let allocation_error = |reason: String| RenderError::FramebufferAllocation {
            label: label.to_owned(),
            width,
            height,
            reason,
        };

        let mut resolve = |gpu: &mut GpuContext, slot: String, desc: AttachmentDesc| -> Result<Attachment> {
            match desc {
                AttachmentDesc::Shared(texture) => Ok(Attachment {
                    texture,
                    owned: false,
                }),
                AttachmentDesc::New(format) => {
                    let texture = gpu
                        .create_texture(&TextureDesc::new_2d(
                            format!("{label}.{slot}"),
                            width,
                            height,
                            format,
                        ))
                        .map_err(|e| allocation_error(e.to_string()))?;
                    allocated.push(texture);
                    Ok(Attachment {
                        texture,
                        owned: true,
                    })
                }
            }
        };

        let colors = colors
            .iter()
            .enumerate()
            .map(|(i, desc)| resolve(gpu, format!("color{i}"), *desc))
            .collect::<Result<SmallVec<[Attachment; 4]>>>()?;
        let depth = depth
            .map(|desc| resolve(gpu, "depth".to_owned(), desc))
            .transpose()?;

        let color_handles: SmallVec<[TextureHandle; 4]> = colors.iter().map(|a| a.texture).collect();
        let framebuffer = gpu
            .create_framebuffer(&color_handles, depth.map(|a| a.texture))
            .map_err(|e| allocation_error(e.to_string()))?;

        log::debug!("Render target '{label}' created at {width}x{height}");
        Ok(Self {
            label: label.to_owned(),
            framebuffer,
            colors,
            depth,
            width,
            height,
        })
    }

    /// Reallocates owned attachments at the new size.
    ///
    /// Borrowed attachments are resized by their owner; callers resize
    /// owners first.
    pub fn resize(&mut self, gpu: &mut GpuContext, width: u32, height: u32) -> Result<()> {
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }
        let allocation_error = |reason: String| RenderError::FramebufferAllocation {
            label: self.label.clone(),
            width,
            height,
            reason,
        };

        let owned: SmallVec<[TextureHandle; 4]> = self
            .colors
            .iter()
            .chain(self.depth.iter())
            .filter(|attachment| attachment.owned)
            .map(|attachment| attachment.texture)
            .collect();

        let mut outcome = Ok(());
        let mut reallocated = 0;
        for &texture in &owned {
            if let Err(e) = gpu.reallocate_texture(texture, width, height) {
                outcome = Err(allocation_error(e.to_string()));
                break;
            }
            reallocated += 1;
        }
        if outcome.is_ok() {
            outcome = gpu.check_framebuffer(self.framebuffer).map_err(allocation_error);
        }

        if let Err(e) = outcome {
            // Storage goes back to the recorded size so the target stays usable.
            for &texture in &owned[..reallocated] {
                if let Err(restore) = gpu.reallocate_texture(texture, self.width, self.height) {
                    log::error!(
                        "Render target '{}' could not restore its attachments: {restore}",
                        self.label
                    );
                }
            }
            return Err(e);
        }

        log::debug!(
            "Render target '{}' resized {}x{} -> {width}x{height}",
            self.label,
            self.width,
            self.height
        );
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Deletes the framebuffer and the owned attachments.
    pub fn destroy(self, gpu: &mut GpuContext) {
        gpu.delete_framebuffer(self.framebuffer);
        for attachment in self.colors.iter().chain(self.depth.iter()) {
            if attachment.owned {
                gpu.delete_texture(attachment.texture);
            }
        }
    }

    /// Binds the framebuffer and sets a viewport covering it.
    pub fn bind(&self, gpu: &mut GpuContext) {
        gpu.bind_framebuffer(Some(self.framebuffer));
        gpu.set_viewport(self.viewport());
    }

    #[inline]
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    #[must_use]
    pub fn framebuffer(&self) -> FramebufferHandle {
        self.framebuffer
    }

    #[inline]
    #[must_use]
    pub fn color(&self, index: usize) -> Option<TextureHandle> {
        self.colors.get(index).map(|a| a.texture)
    }

    #[inline]
    #[must_use]
    pub fn depth(&self) -> Option<TextureHandle> {
        self.depth.map(|a| a.texture)
    }

    #[inline]
    #[must_use]
    pub fn color_count(&self) -> usize {
        self.colors.len()
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    #[must_use]
    pub fn viewport(&self) -> Viewport {
        Viewport::from_size(self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::headless::HeadlessBackend;

    #[test]
    fn resize_keeps_handles_and_updates_storage() {
        let (mut gpu, probe) = HeadlessBackend::context();
        let mut target = RenderTarget::create(
            &mut gpu,
            "scene",
            (800, 600),
            &[AttachmentDesc::New(TextureFormat::Rgba16Float)],
            Some(AttachmentDesc::New(TextureFormat::Depth24Stencil8)),
        )
        .unwrap();
        let color = target.color(0).unwrap();

        target.resize(&mut gpu, 1024, 768).unwrap();

        assert_eq!(target.size(), (1024, 768));
        assert_eq!(target.color(0), Some(color));
        assert_eq!(probe.texture_size(color), Some((1024, 768)));
        assert_eq!(probe.texture_size(target.depth().unwrap()), Some((1024, 768)));
    }

    #[test]
    fn borrowed_attachments_are_not_resized_or_deleted() {
        let (mut gpu, probe) = HeadlessBackend::context();
        let owner = RenderTarget::create(
            &mut gpu,
            "owner",
            (64, 64),
            &[AttachmentDesc::New(TextureFormat::Rgba8)],
            Some(AttachmentDesc::New(TextureFormat::Depth24Stencil8)),
        )
        .unwrap();
        let depth = owner.depth().unwrap();

        let mut borrower = RenderTarget::create(
            &mut gpu,
            "borrower",
            (64, 64),
            &[AttachmentDesc::New(TextureFormat::Rgba8)],
            Some(AttachmentDesc::Shared(depth)),
        )
        .unwrap();
        borrower.resize(&mut gpu, 32, 32).unwrap();
        assert_eq!(probe.texture_size(depth), Some((64, 64)));

        let before = probe.live_textures();
        borrower.destroy(&mut gpu);
        assert_eq!(probe.live_textures(), before - 1);
        assert_eq!(probe.texture_size(depth), Some((64, 64)));
        owner.destroy(&mut gpu);
        assert_eq!(probe.live_textures(), 0);
    }

    #[test]
    fn allocation_failure_names_the_target_and_cleans_up() {
        let (mut gpu, probe) = HeadlessBackend::context();
        probe.set_max_texture_pixels(Some(100 * 100));

        let err = RenderTarget::create(
            &mut gpu,
            "gbuffer",
            (200, 200),
            &[AttachmentDesc::New(TextureFormat::Rgba8)],
            None,
        )
        .unwrap_err();

        match err {
            RenderError::FramebufferAllocation {
                label,
                width,
                height,
                ..
            } => {
                assert_eq!(label, "gbuffer");
                assert_eq!((width, height), (200, 200));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(probe.live_textures(), 0);
    }

    #[test]
    fn resize_failure_reports_requested_size() {
        let (mut gpu, probe) = HeadlessBackend::context();
        let mut target = RenderTarget::create(
            &mut gpu,
            "bloom",
            (64, 64),
            &[AttachmentDesc::New(TextureFormat::Rgba16Float)],
            None,
        )
        .unwrap();
        probe.set_max_texture_pixels(Some(64 * 64));

        let err = target.resize(&mut gpu, 128, 128).unwrap_err();
        assert!(matches!(
            err,
            RenderError::FramebufferAllocation { width: 128, height: 128, .. }
        ));
    }

    #[test]
    fn failed_resize_restores_attachments_already_resized() {
        let (mut gpu, probe) = HeadlessBackend::context();
        let owner = RenderTarget::create(
            &mut gpu,
            "owner",
            (64, 64),
            &[],
            Some(AttachmentDesc::New(TextureFormat::Depth24Stencil8)),
        )
        .unwrap();
        let mut target = RenderTarget::create(
            &mut gpu,
            "lighting",
            (64, 64),
            &[AttachmentDesc::New(TextureFormat::Rgba16Float)],
            Some(AttachmentDesc::Shared(owner.depth().unwrap())),
        )
        .unwrap();
        let color = target.color(0).unwrap();
        owner.destroy(&mut gpu);

        let err = target.resize(&mut gpu, 128, 128).unwrap_err();

        assert!(matches!(err, RenderError::FramebufferAllocation { .. }));
        assert_eq!(target.size(), (64, 64));
        assert_eq!(probe.texture_size(color), Some((64, 64)));
    }
}
