//! This crate detects synchronization hazards in recorded command buffers
//! and in the order queue operations execute them.
//!
//! Command buffers are recorded into `CommandBufferAccessContext`s. Each access is
//! checked against prior accesses of the command buffer, and synchronization commands
//! are kept as `SyncOp`s to be replayed once the state the command buffer executes
//! on top of is known. `SyncValidator` replays submitted command buffers batch by batch
//! across queues, semaphores, fences and presentation.

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

mod access;
mod command;
mod config;
mod context;
mod error;
mod events;
mod op;
mod range_map;
mod render_pass;
mod replay;
mod resource;
mod schedule;
mod tag;
mod validator;

#[cfg(test)]
mod test;

pub use crate::{
    access::{
        BarrierScope, FirstAccess, ReadState, ResourceAccessState, SemaphoreScope, StateHazard,
        WriteState,
    },
    command::{CommandBufferAccessContext, RecordedSyncOp, ResourceAccess},
    config::SyncConfig,
    context::{
        AccessContext, AccessStateMap, AsyncContext, AsyncReference, BarrierAction, ContextArena,
        ContextHandle, FirstUseHazard, TrackBack,
    },
    error::{BatchLocation, HazardKind, Report, ReportKind, SyncError},
    events::{EventCommand, EventMisuse, EventScope, IgnoreReason, SyncEventState, SyncEventsContext},
    op::{BarrierSet, BeginRenderPass, BufferBarrier, ImageBarrier, SyncBarriers, SyncOp},
    range_map::RangeMapExt,
    render_pass::{
        AttachmentAccess, AttachmentView, DrawAttachments, RecordMode, RenderPassAccessContext,
        RenderPassInfo, RenderingAttachment, RenderingInfo, SubpassDependencies, SubpassInfo,
        Transition,
    },
    replay::{ExecutionContext, ReplayState},
    resource::{BufferInfo, ImageInfo, ImageRegion, ImageSubresourceRange, Ranges},
    schedule::{
        AcquiredImage, FenceSyncState, PresentedImage, QueueBatch, QueueBatchContext,
        QueueSyncState, SemaphoreOverlay, Signal, SignaledSemaphores,
    },
    tag::{
        AccessLog, BatchAccessLog, BatchRecord, ResourceUsageRecord, ResourceUsageTag,
        StampedTag, SubcommandType, TagAllocator, TagRange, UsageFormatter,
    },
    validator::{
        PresentImage, PresentInfo, SemaphoreSignal, SemaphoreWait, SubmitBatch, SubmitInfo,
        SyncValidator,
    },
};

pub use syncval_core::*;
