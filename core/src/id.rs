//! Identities of objects the validator tracks state for.

use {
    crate::hal::queue::QueueFamilyId,
    std::{cmp::Ordering, fmt},
};

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(fmt, concat!($label, "({:#x})"), self.0)
            }
        }
    };
}

object_id!(
    /// Buffer identity.
    BufferId,
    "buffer"
);
object_id!(
    /// Image identity.
    ImageId,
    "image"
);
object_id!(
    /// Command buffer identity.
    CommandBufferId,
    "command_buffer"
);
object_id!(
    /// Semaphore identity.
    SemaphoreId,
    "semaphore"
);
object_id!(
    /// Fence identity.
    FenceId,
    "fence"
);
object_id!(
    /// Event identity.
    EventId,
    "event"
);
object_id!(
    /// Swapchain identity.
    SwapchainId,
    "swapchain"
);
object_id!(
    /// Render pass identity.
    RenderPassId,
    "render_pass"
);

/// Key of the per-resource access state maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKey {
    /// Buffer memory, addressed by byte offset.
    Buffer(BufferId),

    /// Image memory, addressed by linearized subresource offset.
    Image(ImageId),
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Buffer(id) => id.fmt(fmt),
            ResourceKey::Image(id) => id.fmt(fmt),
        }
    }
}

impl From<BufferId> for ResourceKey {
    fn from(id: BufferId) -> Self {
        ResourceKey::Buffer(id)
    }
}

impl From<ImageId> for ResourceKey {
    fn from(id: ImageId) -> Self {
        ResourceKey::Image(id)
    }
}

/// Queue id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueueId {
    /// Family id of the queue.
    pub family: QueueFamilyId,

    /// Index of the queue.
    pub index: usize,
}

impl QueueId {
    /// Create queue id from family id and index.
    pub fn new(family: QueueFamilyId, index: usize) -> Self {
        QueueId { family, index }
    }
}

impl PartialOrd for QueueId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueId {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.family.0, self.index).cmp(&(other.family.0, other.index))
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "queue({}:{})", self.family.0, self.index)
    }
}

/// Any handle a usage record can name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Handle {
    /// Buffer.
    Buffer(BufferId),
    /// Image.
    Image(ImageId),
    /// Event.
    Event(EventId),
    /// Render pass.
    RenderPass(RenderPassId),
    /// Command buffer.
    CommandBuffer(CommandBufferId),
    /// Swapchain.
    Swapchain(SwapchainId),
}

impl fmt::Display for Handle {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Buffer(id) => id.fmt(fmt),
            Handle::Image(id) => id.fmt(fmt),
            Handle::Event(id) => id.fmt(fmt),
            Handle::RenderPass(id) => id.fmt(fmt),
            Handle::CommandBuffer(id) => id.fmt(fmt),
            Handle::Swapchain(id) => id.fmt(fmt),
        }
    }
}

impl From<ResourceKey> for Handle {
    fn from(key: ResourceKey) -> Self {
        match key {
            ResourceKey::Buffer(id) => Handle::Buffer(id),
            ResourceKey::Image(id) => Handle::Image(id),
        }
    }
}

/// Handle with the role it played in a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NamedHandle {
    /// Role of the handle, e.g. `"dstBuffer"`.
    pub name: &'static str,

    /// The handle.
    pub handle: Handle,

    /// Index within an array parameter.
    pub index: Option<u32>,
}

impl NamedHandle {
    /// Create named handle.
    pub fn new(name: &'static str, handle: impl Into<Handle>) -> Self {
        NamedHandle {
            name,
            handle: handle.into(),
            index: None,
        }
    }

    /// Create named handle of an array element.
    pub fn indexed(name: &'static str, index: u32, handle: impl Into<Handle>) -> Self {
        NamedHandle {
            name,
            handle: handle.into(),
            index: Some(index),
        }
    }
}

impl fmt::Display for NamedHandle {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(fmt, "{}[{}]: {}", self.name, index, self.handle),
            None => write!(fmt, "{}: {}", self.name, self.handle),
        }
    }
}

macro_rules! into_handle {
    ($($id:ident => $variant:ident),*) => {
        $(
            impl From<$id> for Handle {
                fn from(id: $id) -> Self {
                    Handle::$variant(id)
                }
            }
        )*
    };
}

into_handle!(
    BufferId => Buffer,
    ImageId => Image,
    EventId => Event,
    RenderPassId => RenderPass,
    CommandBufferId => CommandBuffer,
    SwapchainId => Swapchain
);
