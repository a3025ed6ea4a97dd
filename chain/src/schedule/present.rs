use {
    super::batch::QueueBatchContext,
    crate::{resource::ImageInfo, tag::ResourceUsageTag},
    std::sync::Arc,
    syncval_core::{ImageId, StageAccess, SwapchainId},
};

/// Swapchain image handed to the presentation engine.
#[derive(Clone, Debug)]
pub struct PresentedImage {
    /// Batch of the present operation.
    pub batch: Arc<QueueBatchContext>,

    /// The image.
    pub image: ImageInfo,

    /// Tag of the present write.
    pub tag: ResourceUsageTag,

    /// Swapchain the image belongs to.
    pub swapchain: SwapchainId,

    /// Index of the image in the swapchain.
    pub index: u32,
}

/// Swapchain image given back by the presentation engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquiredImage {
    /// Swapchain the image belongs to.
    pub swapchain: SwapchainId,

    /// Index of the image in the swapchain.
    pub index: u32,

    /// The image.
    pub image: ImageId,

    /// Tag of the last present of the image.
    pub present_tag: Option<ResourceUsageTag>,

    /// Tag of the acquire read.
    pub acquire_tag: ResourceUsageTag,
}

impl AcquiredImage {
    /// Check if the access is part of presenting or acquiring this image.
    pub fn completes(&self, tag: ResourceUsageTag, usage: StageAccess) -> bool {
        (usage == StageAccess::PRESENT_ACQUIRE_READ && tag == self.acquire_tag)
            || (usage == StageAccess::PRESENTED && Some(tag) == self.present_tag)
    }
}
