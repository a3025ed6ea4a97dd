use {
    crate::{
        access::StateHazard,
        events::EventMisuse,
        tag::{ResourceUsageTag, UsageFormatter},
    },
    std::{fmt, ops::Range},
    syncval_core::{BufferId, EventId, ImageId, QueueId, StageAccess},
};

/// Errors returned by the validator.
///
/// Malformed input only skips the offending update. `TagsExhausted` ends the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncError {
    /// Buffer range is empty or out of the buffer bounds.
    InvalidBufferRange {
        /// Buffer.
        buffer: BufferId,
        /// Requested range.
        range: Range<u64>,
        /// Buffer size.
        size: u64,
    },
    /// Subresource range is empty or out of the image bounds.
    InvalidSubresource {
        /// Image.
        image: ImageId,
    },
    /// Image facts describe no addressable layout: no texel size, too many levels,
    /// or more bytes than fit in `u64`.
    InvalidImage {
        /// Image.
        image: ImageId,
    },
    /// Texel region is out of the subresource bounds.
    InvalidImageRegion {
        /// Image.
        image: ImageId,
    },
    /// Attachment or subpass index is out of the render pass bounds.
    InvalidRenderPass {
        /// What was wrong.
        reason: &'static str,
    },
    /// Context handle outlived its context.
    StaleContext,
    /// Tag sequence cannot fit the reservation.
    TagsExhausted {
        /// Number of tags requested.
        requested: u64,
        /// Next free tag.
        next: u64,
    },
    /// Tags were exhausted earlier, nothing is validated anymore.
    SessionLost,
    /// Command requires an active render pass.
    RenderPassNotActive,
    /// Command requires no active render pass.
    RenderPassActive,
    /// Queue was never registered.
    UnknownQueue(QueueId),
}

impl fmt::Display for SyncError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::InvalidBufferRange {
                buffer,
                range,
                size,
            } => write!(
                fmt,
                "Range [{}, {}) is not within {} of size {}",
                range.start, range.end, buffer, size
            ),
            SyncError::InvalidSubresource { image } => {
                write!(fmt, "Subresource range is not within {}", image)
            }
            SyncError::InvalidImage { image } => {
                write!(fmt, "{} has no addressable layout", image)
            }
            SyncError::InvalidImageRegion { image } => {
                write!(fmt, "Image region is not within subresource of {}", image)
            }
            SyncError::InvalidRenderPass { reason } => {
                write!(fmt, "Invalid render pass: {}", reason)
            }
            SyncError::StaleContext => write!(fmt, "Access context handle is stale"),
            SyncError::TagsExhausted { requested, next } => write!(
                fmt,
                "Cannot reserve {} tags starting from {}, tag sequence exhausted",
                requested, next
            ),
            SyncError::SessionLost => write!(
                fmt,
                "Synchronization validation stopped after tag exhaustion"
            ),
            SyncError::RenderPassNotActive => write!(fmt, "No render pass instance is active"),
            SyncError::RenderPassActive => write!(fmt, "A render pass instance is active"),
            SyncError::UnknownQueue(queue) => write!(fmt, "Unknown {}", queue),
        }
    }
}

impl std::error::Error for SyncError {}

/// Kind of conflict between two accesses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HazardKind {
    /// Read of memory written without ordering or visibility.
    ReadAfterWrite,
    /// Write of memory read without ordering.
    WriteAfterRead,
    /// Write of memory written without ordering or visibility.
    WriteAfterWrite,
    /// Read concurrent with a write of an async scope.
    ReadRacingWrite,
    /// Write concurrent with a write of an async scope.
    WriteRacingWrite,
    /// Write concurrent with a read of an async scope.
    WriteRacingRead,
    /// Write of an image still owned by the presentation engine.
    WriteAfterPresent,
    /// Read of an image still owned by the presentation engine.
    ReadAfterPresent,
    /// Presentation of an image with an unordered read.
    PresentAfterRead,
    /// Presentation of an image with an unordered write.
    PresentAfterWrite,
}

impl HazardKind {
    /// Name used in reports.
    pub fn name(&self) -> &'static str {
        match self {
            HazardKind::ReadAfterWrite => "READ_AFTER_WRITE",
            HazardKind::WriteAfterRead => "WRITE_AFTER_READ",
            HazardKind::WriteAfterWrite => "WRITE_AFTER_WRITE",
            HazardKind::ReadRacingWrite => "READ_RACING_WRITE",
            HazardKind::WriteRacingWrite => "WRITE_RACING_WRITE",
            HazardKind::WriteRacingRead => "WRITE_RACING_READ",
            HazardKind::WriteAfterPresent => "WRITE_AFTER_PRESENT",
            HazardKind::ReadAfterPresent => "READ_AFTER_PRESENT",
            HazardKind::PresentAfterRead => "PRESENT_AFTER_READ",
            HazardKind::PresentAfterWrite => "PRESENT_AFTER_WRITE",
        }
    }

    /// Check if this is a race against an async scope.
    pub fn is_race(&self) -> bool {
        match self {
            HazardKind::ReadRacingWrite
            | HazardKind::WriteRacingWrite
            | HazardKind::WriteRacingRead => true,
            _ => false,
        }
    }
}

impl fmt::Display for HazardKind {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.name())
    }
}

/// What a report is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportKind {
    /// Memory hazard.
    Hazard(HazardKind),
    /// Event used inconsistently.
    Event(EventMisuse),
}

/// Where in the queue timeline a replay report was raised.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchLocation {
    /// Submitting queue.
    pub queue: Option<QueueId>,
    /// Index of the submission on its queue.
    pub submit_index: u64,
    /// Index of the batch within the submission.
    pub batch_index: u32,
    /// Index of the command buffer within the batch.
    pub cb_index: Option<u32>,
}

/// Non-fatal validation finding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    /// What was found.
    pub kind: ReportKind,

    /// Command that triggered the check.
    pub command: &'static str,

    /// Full description with usage traces.
    pub message: String,

    /// Tag of the prior access, for hazards.
    pub prior_tag: Option<ResourceUsageTag>,

    /// Set when raised while replaying a submission.
    pub batch: Option<BatchLocation>,
}

impl Report {
    /// Report a hazard of `usage` on `subject`.
    pub fn from_hazard(
        command: &'static str,
        subject: impl fmt::Display,
        usage: StageAccess,
        hazard: &StateHazard,
        formatter: &dyn UsageFormatter,
    ) -> Self {
        Report {
            kind: ReportKind::Hazard(hazard.kind),
            command,
            message: format!(
                "Hazard {} for {}. Access info (usage: {}, prior_usage: {}, {})",
                hazard.kind,
                subject,
                usage,
                hazard.prior,
                formatter.format_usage(hazard.tag)
            ),
            prior_tag: Some(hazard.tag),
            batch: None,
        }
    }

    /// Report inconsistent use of an event.
    pub fn from_event(
        command: &'static str,
        event: EventId,
        misuse: EventMisuse,
        prior_tag: Option<ResourceUsageTag>,
    ) -> Self {
        Report {
            kind: ReportKind::Event(misuse),
            command,
            message: format!("{}: {}", event, misuse),
            prior_tag,
            batch: None,
        }
    }

    /// Attach the queue timeline location.
    pub fn at(mut self, batch: BatchLocation) -> Self {
        self.batch = Some(batch);
        self
    }

    /// Hazard kind if this is a hazard report.
    pub fn hazard(&self) -> Option<HazardKind> {
        match self.kind {
            ReportKind::Hazard(kind) => Some(kind),
            ReportKind::Event(_) => None,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(batch) = &self.batch {
            match batch.queue {
                Some(queue) => write!(fmt, "[{}", queue)?,
                None => write!(fmt, "[present_engine")?,
            }
            write!(
                fmt,
                " submit {} batch {}",
                batch.submit_index, batch.batch_index
            )?;
            if let Some(cb_index) = batch.cb_index {
                write!(fmt, " command buffer {}", cb_index)?;
            }
            write!(fmt, "] ")?;
        }
        write!(fmt, "{}: {}", self.command, self.message)
    }
}
