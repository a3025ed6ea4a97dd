//!
//! This module defines the queue side of validation.
//!
//! `QueueBatchContext` is the resolved access state after one batch of a submission.
//! `QueueSyncState` holds the last batch of a queue. Semaphore signals waiting
//! to be consumed are kept in `SignaledSemaphores`, fences in `FenceSyncState`
//! and images handed to the presentation engine in `PresentedImage`.
//!

mod batch;
mod fence;
mod present;
mod queue;
mod semaphore;

pub use self::{
    batch::{QueueBatch, QueueBatchContext},
    fence::FenceSyncState,
    present::{AcquiredImage, PresentedImage},
    queue::QueueSyncState,
    semaphore::{SemaphoreOverlay, Signal, SignaledSemaphores},
};
