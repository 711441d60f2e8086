use itertools::Itertools;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    hmd::HmdError,
    utils::XrCheck,
    vrapi::{ProjectionView, ReferenceSpace, SwapchainSpec, View, ViewDescriptor, XrRuntime},
};

/// `GL_SRGB8_ALPHA8`
pub const GL_SRGB8_ALPHA8: u32 = 0x8C43;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Pick `preferred` if the runtime offers it, otherwise whatever it lists first.
pub fn select_format(formats: &[u32], preferred: u32) -> Option<u32> {
    if formats.contains(&preferred) {
        return Some(preferred);
    }
    let fallback = *formats.first()?;
    log::warn!(
        "swapchain format {:#x} not supported, falling back to {:#x} (available: {})",
        preferred,
        fallback,
        formats.iter().map(|f| format!("{f:#x}")).join(", ")
    );
    Some(fallback)
}

/// A view's swapchain, as far as we are concerned: the images the runtime gave us.
#[derive(Debug)]
pub struct Swapchain {
    pub spec: SwapchainSpec,
    pub images: Vec<u32>,
}

/// Everything created on top of a session. Indexed by view, sized once.
#[derive(Debug)]
pub struct SessionResources {
    pub reference_space: ReferenceSpace,
    pub resolution: Resolution,
    swapchains: SmallVec<[Swapchain; 2]>,
}

impl SessionResources {
    /// Create the reference space, then one swapchain per view.
    pub fn create<R: XrRuntime>(
        runtime: &mut R,
        views: &[ViewDescriptor],
        reference_space: ReferenceSpace,
        resolution: Resolution,
    ) -> Result<Self, HmdError> {
        runtime
            .create_reference_space(reference_space)
            .check("failed to create play space")?;

        let formats = runtime
            .swapchain_formats()
            .check("failed to enumerate swapchain formats")?;
        let format = select_format(&formats, GL_SRGB8_ALPHA8).ok_or_else(|| {
            log::error!("runtime offers no swapchain formats");
            HmdError::NoSwapchainFormat
        })?;

        let mut swapchains = SmallVec::with_capacity(views.len());
        for (i, view) in views.iter().enumerate() {
            let spec = SwapchainSpec {
                format,
                sample_count: view.recommended_sample_count,
                width: resolution.width,
                height: resolution.height,
            };
            let images = runtime
                .create_swapchain(&spec)
                .check(&format!("failed to create swapchain {i}"))?;
            log::debug!(
                "swapchain {i}: {}x{} format {:#x}, {} images",
                spec.width,
                spec.height,
                spec.format,
                images.len()
            );
            swapchains.push(Swapchain { spec, images });
        }
        Ok(Self {
            reference_space,
            resolution,
            swapchains,
        })
    }

    pub fn view_count(&self) -> usize {
        self.swapchains.len()
    }

    pub fn swapchain(&self, view: usize) -> Option<&Swapchain> {
        self.swapchains.get(view)
    }

    /// Texture handle of image `index` of `view`'s swapchain.
    pub fn image(&self, view: usize, index: u32) -> Option<u32> {
        self.swapchains
            .get(view)?
            .images
            .get(index as usize)
            .copied()
    }

    /// Layer entry for `view`, covering the whole swapchain image.
    pub fn projection_view(&self, view: &View) -> ProjectionView {
        ProjectionView {
            view: *view,
            width: self.resolution.width,
            height: self.resolution.height,
        }
    }
}
