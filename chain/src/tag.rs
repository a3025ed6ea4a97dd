//! Causal tags and the usage records they resolve to.

use {
    smallvec::SmallVec,
    std::{
        collections::BTreeMap,
        fmt,
        ops::Range,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
    },
    syncval_core::{CommandBufferId, NamedHandle, QueueId},
};

use crate::error::SyncError;

/// Position of an access event in the causal order.
///
/// Within a command buffer tags are indices into its access log.
/// After submission they are offset into the global sequence, which starts at 1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceUsageTag(pub u64);

impl ResourceUsageTag {
    /// Reserved invalid tag of the global sequence.
    pub const INVALID: ResourceUsageTag = ResourceUsageTag(0);

    /// Tag moved by `bias`.
    pub fn offset(self, bias: u64) -> Self {
        ResourceUsageTag(self.0 + bias)
    }

    /// Next tag.
    pub fn next(self) -> Self {
        ResourceUsageTag(self.0 + 1)
    }
}

impl fmt::Display for ResourceUsageTag {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

/// Half-open range of tags.
pub type TagRange = Range<ResourceUsageTag>;

/// Allocator of the global tag sequence.
///
/// Cloning shares the sequence. Each validator owns one and hands it to submissions,
/// tests create their own for deterministic numbering.
#[derive(Clone, Debug)]
pub struct TagAllocator {
    next: Arc<AtomicU64>,
    limit: u64,
}

impl Default for TagAllocator {
    fn default() -> Self {
        TagAllocator::new(u64::MAX)
    }
}

impl TagAllocator {
    /// Create new sequence that never allocates past `limit`.
    pub fn new(limit: u64) -> Self {
        TagAllocator {
            next: Arc::new(AtomicU64::new(1)),
            limit,
        }
    }

    /// Reserve `count` consecutive tags.
    pub fn reserve(&self, count: u64) -> Result<TagRange, SyncError> {
        let limit = self.limit;
        let start = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |start| {
                start.checked_add(count).filter(|&end| end <= limit)
            })
            .map_err(|start| SyncError::TagsExhausted {
                requested: count,
                next: start,
            })?;
        Ok(ResourceUsageTag(start)..ResourceUsageTag(start + count))
    }

    /// First tag the next reservation will get.
    pub fn peek(&self) -> ResourceUsageTag {
        ResourceUsageTag(self.next.load(Ordering::Acquire))
    }
}

/// Part of a command an access belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubcommandType {
    /// The command itself.
    None,
    /// Layout transitions between subpasses.
    SubpassTransition,
    /// Attachment load operations.
    LoadOp,
    /// Attachment store operations.
    StoreOp,
    /// Multisample resolve operations.
    ResolveOp,
    /// Element of an array parameter.
    Index,
}

impl fmt::Display for SubcommandType {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubcommandType::None => "none",
            SubcommandType::SubpassTransition => "subpass_transition",
            SubcommandType::LoadOp => "load_op",
            SubcommandType::StoreOp => "store_op",
            SubcommandType::ResolveOp => "resolve_op",
            SubcommandType::Index => "index",
        };
        fmt.write_str(name)
    }
}

/// Diagnostic payload of one tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceUsageRecord {
    /// Command name, e.g. `"vkCmdCopyBuffer"`.
    pub command: &'static str,

    /// Sequence number of the command within its command buffer.
    pub seq_num: u32,

    /// Part of the command.
    pub sub_command_type: SubcommandType,

    /// Index of the part within the command.
    pub sub_command: u32,

    /// Command buffer the command was recorded into.
    pub command_buffer: Option<CommandBufferId>,

    /// Reset generation of that command buffer.
    pub reset_count: u32,

    /// Handles the command touched.
    pub handles: SmallVec<[NamedHandle; 2]>,
}

impl ResourceUsageRecord {
    /// Record of a command that is not part of any command buffer, like presentation.
    pub fn queue_operation(command: &'static str, handles: &[NamedHandle]) -> Self {
        ResourceUsageRecord {
            command,
            seq_num: 0,
            sub_command_type: SubcommandType::None,
            sub_command: 0,
            command_buffer: None,
            reset_count: 0,
            handles: handles.iter().cloned().collect(),
        }
    }
}

impl fmt::Display for ResourceUsageRecord {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "command: {}", self.command)?;
        if let Some(command_buffer) = self.command_buffer {
            write!(
                fmt,
                ", seq_no: {}, reset_no: {}, {}",
                self.seq_num, self.reset_count, command_buffer
            )?;
        }
        if self.sub_command_type != SubcommandType::None {
            write!(
                fmt,
                ", subcmd: {} {}",
                self.sub_command_type, self.sub_command
            )?;
        }
        for handle in &self.handles {
            write!(fmt, ", {}", handle)?;
        }
        Ok(())
    }
}

/// Tag together with the reset generation of the log that issued it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StampedTag {
    /// Command buffer local tag.
    pub tag: ResourceUsageTag,

    /// Reset generation of the command buffer when the tag was issued.
    pub generation: u32,
}

/// Append-only usage log of one command buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessLog {
    records: Vec<ResourceUsageRecord>,
}

impl AccessLog {
    /// Create empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append record and get its tag.
    pub fn append(&mut self, record: ResourceUsageRecord) -> ResourceUsageTag {
        self.records.push(record);
        ResourceUsageTag(self.records.len() as u64 - 1)
    }

    /// Append every record of another log.
    /// Returns the offset of its tags in this log.
    pub fn import(&mut self, other: &AccessLog) -> u64 {
        let bias = self.records.len() as u64;
        self.records.extend(other.records.iter().cloned());
        bias
    }

    /// Get record by tag.
    pub fn get(&self, tag: ResourceUsageTag) -> Option<&ResourceUsageRecord> {
        self.records.get(tag.0 as usize)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Tag the next appended record will get.
    pub fn next_tag(&self) -> ResourceUsageTag {
        ResourceUsageTag(self.records.len() as u64)
    }
}

/// Something that can describe a tag for a report.
pub trait UsageFormatter {
    /// Human readable trace of the access event.
    fn format_usage(&self, tag: ResourceUsageTag) -> String;
}

impl UsageFormatter for AccessLog {
    fn format_usage(&self, tag: ResourceUsageTag) -> String {
        match self.get(tag) {
            Some(record) => format!("tag: {}, {}", tag, record),
            None => format!("tag: {}, no usage record", tag),
        }
    }
}

/// Where a spliced command buffer log sits in the queue timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchRecord {
    /// Submitting queue. `None` for the presentation engine.
    pub queue: Option<QueueId>,

    /// Index of the submission on its queue.
    pub submit_index: u64,

    /// Index of the batch within the submission.
    pub batch_index: u32,

    /// Index of the command buffer within the batch.
    pub cb_index: u32,

    /// Tag of the first record.
    pub bias: u64,
}

#[derive(Clone, Debug)]
struct SubmitLog {
    batch: BatchRecord,
    end: u64,
    log: Arc<AccessLog>,
}

/// Usage log of queue batches: command buffer logs spliced at their tag offsets.
#[derive(Clone, Debug, Default)]
pub struct BatchAccessLog {
    logs: BTreeMap<u64, SubmitLog>,
}

impl BatchAccessLog {
    /// Create empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Splice a command buffer log at `batch.bias`.
    pub fn insert(&mut self, batch: BatchRecord, log: Arc<AccessLog>) {
        let end = batch.bias + log.len() as u64;
        if end > batch.bias {
            self.logs.insert(batch.bias, SubmitLog { batch, end, log });
        }
    }

    /// Import every spliced log of another batch log.
    pub fn import(&mut self, other: &BatchAccessLog) {
        for (start, entry) in &other.logs {
            self.logs.entry(*start).or_insert_with(|| entry.clone());
        }
    }

    /// Find record of a global tag.
    pub fn get(&self, tag: ResourceUsageTag) -> Option<(&BatchRecord, &ResourceUsageRecord)> {
        let (start, entry) = self.logs.range(..=tag.0).next_back()?;
        if tag.0 >= entry.end {
            return None;
        }
        entry
            .log
            .get(ResourceUsageTag(tag.0 - start))
            .map(|record| (&entry.batch, record))
    }

    /// Drop logs none of the `used` tags point into. `used` must be sorted.
    pub fn trim(&mut self, used: &[ResourceUsageTag]) {
        let mut used = used.iter().peekable();
        self.logs.retain(|&start, entry| {
            while used.peek().map_or(false, |tag| tag.0 < start) {
                used.next();
            }
            used.peek().map_or(false, |tag| tag.0 < entry.end)
        });
    }

    /// Number of spliced logs.
    pub fn len(&self) -> usize {
        self.logs.len()
    }

    /// Check if nothing is spliced.
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

impl UsageFormatter for BatchAccessLog {
    fn format_usage(&self, tag: ResourceUsageTag) -> String {
        match self.get(tag) {
            Some((batch, record)) => {
                let queue = match batch.queue {
                    Some(queue) => queue.to_string(),
                    None => "present_engine".to_owned(),
                };
                format!(
                    "batch_tag: {}, {}, submit: {}, batch: {}, batch_cb: {}, {}",
                    tag, queue, batch.submit_index, batch.batch_index, batch.cb_index, record
                )
            }
            None => format!("batch_tag: {}, no usage record", tag),
        }
    }
}
