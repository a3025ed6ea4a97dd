use {
    super::*,
    crate::{
        context::{AccessContext, BarrierAction},
        error::{HazardKind, ReportKind},
        events::EventMisuse,
        op::{BarrierSet, BufferBarrier, SyncOp},
        tag::ResourceUsageTag,
    },
    syncval_core::{CommandBufferId, EventId, ResourceKey, SyncOrdering},
};

fn barrier(stages: std::ops::Range<PipelineStageFlags>, accesses: std::ops::Range<AccessFlags>) -> BarrierSet {
    BarrierSet {
        stages,
        memory: vec![accesses],
        buffers: Vec::new(),
        images: Vec::new(),
    }
}

#[test]
fn write_after_write_without_barrier() {
    init_logger();
    let mut cb = CommandBufferAccessContext::new(CommandBufferId(1));
    assert_eq!(write_buffer(&mut cb, &buffer(1), 0, 64), 0);

    let access = ResourceAccess::buffer("dstBuffer", &buffer(1), 32, Some(64), TRANSFER_WRITE).unwrap();
    let reports = cb.record_command("vkCmdFillBuffer", &[access]).unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].kind, ReportKind::Hazard(HazardKind::WriteAfterWrite));
    assert_eq!(reports[0].prior_tag, Some(ResourceUsageTag(0)));
    assert!(reports[0].message.contains("vkCmdFillBuffer"));
}

#[test]
fn barrier_suppresses_hazard() {
    init_logger();
    let mut cb = CommandBufferAccessContext::new(CommandBufferId(1));
    write_buffer(&mut cb, &buffer(1), 0, 64);

    let set = barrier(
        PipelineStageFlags::TRANSFER..PipelineStageFlags::TRANSFER,
        AccessFlags::TRANSFER_WRITE..AccessFlags::TRANSFER_WRITE,
    );
    assert!(cb.record_sync_op(SyncOp::pipeline_barrier(&set).unwrap()).unwrap().is_empty());
    assert_eq!(write_buffer(&mut cb, &buffer(1), 0, 64), 0);

    // the barrier does not make the write visible to compute reads
    let read = ResourceAccess::buffer("buffer", &buffer(1), 0, Some(16), COMPUTE_READ).unwrap();
    let reports = cb.record_command("vkCmdDispatch", &[read]).unwrap();
    assert_eq!(reports[0].hazard(), Some(HazardKind::ReadAfterWrite));
}

#[test]
fn buffer_barrier_covers_only_its_range() {
    let mut cb = CommandBufferAccessContext::new(CommandBufferId(1));
    write_buffer(&mut cb, &buffer(1), 0, 128);

    let set = BarrierSet {
        stages: PipelineStageFlags::TRANSFER..PipelineStageFlags::COMPUTE_SHADER,
        memory: Vec::new(),
        buffers: vec![BufferBarrier {
            buffer: buffer(1),
            offset: 0,
            size: Some(64),
            accesses: AccessFlags::TRANSFER_WRITE..AccessFlags::SHADER_READ,
        }],
        images: Vec::new(),
    };
    cb.record_sync_op(SyncOp::pipeline_barrier(&set).unwrap()).unwrap();

    let covered = ResourceAccess::buffer("buffer", &buffer(1), 0, Some(64), COMPUTE_READ).unwrap();
    assert!(cb.record_command("vkCmdDispatch", &[covered]).unwrap().is_empty());
    let uncovered = ResourceAccess::buffer("buffer", &buffer(1), 64, Some(64), COMPUTE_READ).unwrap();
    assert_eq!(cb.record_command("vkCmdDispatch", &[uncovered]).unwrap().len(), 1);
}

#[test]
fn partial_overlap_reports_prior_tag() {
    init_logger();
    let mut cb = CommandBufferAccessContext::new(CommandBufferId(1));
    for index in 0..5 {
        write_buffer(&mut cb, &buffer(2), index * 16, 16);
    }

    write_buffer(&mut cb, &buffer(1), 0, 64);
    let read = ResourceAccess::buffer("srcBuffer", &buffer(1), 32, Some(64), TRANSFER_READ).unwrap();
    let reports = cb.record_command("vkCmdCopyBuffer", &[read]).unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].hazard(), Some(HazardKind::ReadAfterWrite));
    assert_eq!(reports[0].prior_tag, Some(ResourceUsageTag(5)));
    let record = cb.usage_record(cb.stamp(ResourceUsageTag(6))).unwrap();
    assert_eq!(record.command, "vkCmdCopyBuffer");
}

#[test]
fn event_wait_covers_accesses_before_set() {
    init_logger();
    let event = EventId(1);
    let mut cb = CommandBufferAccessContext::new(CommandBufferId(1));
    write_buffer(&mut cb, &buffer(1), 0, 64);
    cb.record_sync_op(SyncOp::set_event(event, PipelineStageFlags::TRANSFER))
        .unwrap();
    write_buffer(&mut cb, &buffer(1), 64, 64);

    let set = barrier(
        PipelineStageFlags::TRANSFER..PipelineStageFlags::COMPUTE_SHADER,
        AccessFlags::TRANSFER_WRITE..AccessFlags::SHADER_READ,
    );
    let reports = cb.record_sync_op(SyncOp::wait_events(&[event], &set).unwrap()).unwrap();
    assert!(reports.is_empty());

    let before = ResourceAccess::buffer("buffer", &buffer(1), 0, Some(64), COMPUTE_READ).unwrap();
    assert!(cb.record_command("vkCmdDispatch", &[before]).unwrap().is_empty());
    let after = ResourceAccess::buffer("buffer", &buffer(1), 64, Some(64), COMPUTE_READ).unwrap();
    let reports = cb.record_command("vkCmdDispatch", &[after]).unwrap();
    assert_eq!(reports[0].hazard(), Some(HazardKind::ReadAfterWrite));
}

#[test]
fn event_set_twice_is_reported() {
    let event = EventId(2);
    let mut cb = CommandBufferAccessContext::new(CommandBufferId(1));
    cb.record_sync_op(SyncOp::set_event(event, PipelineStageFlags::TRANSFER))
        .unwrap();
    let reports = cb
        .record_sync_op(SyncOp::set_event(event, PipelineStageFlags::TRANSFER))
        .unwrap();
    assert_eq!(reports.len(), 1);
    match reports[0].kind {
        ReportKind::Event(EventMisuse::MissingBarrier { .. }) => {}
        ref other => panic!("unexpected report {:?}", other),
    }
}

#[test]
fn resolving_twice_changes_nothing() {
    let key = ResourceKey::Buffer(BufferId(1));
    let mut source = AccessContext::new();
    source.update_access(key, 0..64, TRANSFER_WRITE, SyncOrdering::None, ResourceUsageTag(3), None);
    source.update_access(key, 32..96, COMPUTE_READ, SyncOrdering::None, ResourceUsageTag(4), None);

    let mut once = AccessContext::new();
    once.resolve_from_context(&source, &BarrierAction::none());
    let mut twice = once.clone();
    twice.resolve_from_context(&source, &BarrierAction::none());

    let states = |context: &AccessContext| -> Vec<_> {
        context
            .map(key)
            .unwrap()
            .iter()
            .map(|(range, state)| (range.clone(), state.clone()))
            .collect()
    };
    assert_eq!(states(&once), states(&twice));
}

#[test]
fn tags_are_fresh_after_reset() {
    let mut cb = CommandBufferAccessContext::new(CommandBufferId(1));
    write_buffer(&mut cb, &buffer(1), 0, 64);
    let before = cb.stamp(ResourceUsageTag(0));

    cb.reset();
    write_buffer(&mut cb, &buffer(1), 0, 64);
    let after = cb.stamp(ResourceUsageTag(0));

    assert_eq!(before.tag, after.tag);
    assert_ne!(before, after);
    assert!(cb.usage_record(before).is_none());
    assert!(cb.usage_record(after).is_some());
}
