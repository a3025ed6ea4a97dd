//! Vocabulary shared by the synchronization validation crates:
//! pipeline stages, access flags, access scopes, barriers and object identities.

#![warn(
    missing_debug_implementations,
    missing_copy_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications
)]

#[doc(inline)]
pub use gfx_hal as hal;

mod access;
mod id;
mod scope;
mod slow;
mod stage;

pub use crate::{
    access::AccessFlags,
    id::{
        BufferId, CommandBufferId, EventId, FenceId, Handle, ImageId, NamedHandle, QueueId,
        RenderPassId, ResourceKey, SemaphoreId, SwapchainId,
    },
    scope::{AccessScope, OrderingBarrier, StageAccess, SyncBarrier, SyncExecScope, SyncOrdering},
    stage::{
        all_device_stages, ComputePipelineStage, GraphicsPipelineStage, PipelineStageFlags,
        TransferPipelineStage,
    },
};
