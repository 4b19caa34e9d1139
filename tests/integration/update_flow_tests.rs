//! End-to-end firmware update against the scripted tag.

use taglink::{UpdateError, WriterError};
use taglink::adapters::log_sink::LogSink;
use taglink::app::events::LinkEvent;
use taglink::app::session::TagSession;
use taglink::config::SdkConfig;
use taglink::dfu::plan::UpdateInfo;
use taglink::dfu::update::UpdateState;
use taglink::protocol::dfu::ModuleDescriptor;
use taglink::protocol::message::Opcode;

use crate::mock_device::{MockTag, StateLog, TAG_PRODUCT, TAG_VENDOR, pump};

const GEAR_VENDOR: u32 = 0x20;
const GEAR_PRODUCT: u32 = 0x07;
const GEAR_COMPONENT: u32 = 1;

fn image(len: usize, salt: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31) ^ salt).collect()
}

fn setup() -> (TagSession<MockTag>, MockTag, StateLog) {
    let tag = MockTag::new(64);
    let (mut session, _) = TagSession::new(tag.clone(), SdkConfig::default()).unwrap();
    let log = StateLog::default();
    session.dispatch(LinkEvent::SubscribeUpdates(Box::new(LogSink::new("tag"))));
    session.dispatch(LinkEvent::SubscribeUpdates(Box::new(log.clone())));
    (session, tag, log)
}

fn apply(session: &mut TagSession<MockTag>, tag: &MockTag, updates: Vec<UpdateInfo>) {
    session.dispatch(LinkEvent::ApplyUpdates {
        updates,
        auto_execute: None,
    });
    pump(session, tag);
}

fn execute(session: &mut TagSession<MockTag>, tag: &MockTag) {
    session.dispatch(LinkEvent::ExecuteUpdates);
    pump(session, tag);
}

fn gear_and_tag() -> Vec<UpdateInfo> {
    // Deliberately listed tag-first; the plan reorders.
    vec![
        UpdateInfo::tag(TAG_VENDOR, TAG_PRODUCT, image(300, 0x5A)),
        UpdateInfo::gear(GEAR_VENDOR, GEAR_PRODUCT, GEAR_COMPONENT, image(500, 0xA5)),
    ]
}

#[test]
fn gear_and_tag_end_to_end() {
    let (mut session, tag, log) = setup();
    apply(&mut session, &tag, gear_and_tag());
    assert_eq!(session.update_state(), UpdateState::Transferred);

    execute(&mut session, &tag);
    assert_eq!(session.update_state(), UpdateState::Completed);

    // Lifecycle, collapsing the progress ticks.
    let mut phases: Vec<UpdateState> = Vec::new();
    for s in log.states() {
        let tick = matches!(s, UpdateState::Transferring(_));
        if !(tick && matches!(phases.last(), Some(UpdateState::Transferring(_)))) {
            phases.push(s);
        }
    }
    assert_eq!(
        phases,
        vec![
            UpdateState::Idle,
            UpdateState::PreparingForTransfer,
            UpdateState::Transferring(0.0),
            UpdateState::Transferred,
            UpdateState::Executing,
            UpdateState::Completed,
        ]
    );

    let progress = log.progress();
    assert_eq!(progress.first().copied(), Some(0.0));
    assert_eq!(progress.last().copied(), Some(100.0));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));

    // All 500 gear bytes go out before any of the 300 tag bytes.
    let writes = tag.with(|t| t.writes.clone());
    let gear_bytes: usize = writes
        .iter()
        .take_while(|w| w.component.2 == GEAR_COMPONENT)
        .map(|w| w.len)
        .sum();
    let tag_bytes: usize = writes
        .iter()
        .skip_while(|w| w.component.2 == GEAR_COMPONENT)
        .map(|w| w.len)
        .sum();
    assert_eq!((gear_bytes, tag_bytes), (500, 300));
    assert!(writes.iter().all(|w| w.len <= 128));

    // Gear executes before the tag.
    assert_eq!(
        tag.with(|t| t.executed.clone()),
        vec![(GEAR_VENDOR, GEAR_PRODUCT), (TAG_VENDOR, TAG_PRODUCT)]
    );
    assert!(session.next_deadline().is_none());
}

#[test]
fn low_battery_writes_nothing() {
    let (mut session, tag, log) = setup();
    tag.with(|t| t.battery = 5);
    apply(&mut session, &tag, gear_and_tag());

    assert_eq!(log.last(), Some(UpdateState::Error(UpdateError::LowBattery)));
    assert!(tag.with(|t| t.writes.is_empty()));
    assert_eq!(tag.with(|t| t.opcodes()), vec![Opcode::BatteryStatus]);
}

#[test]
fn partial_image_resumes_at_device_offset() {
    let (mut session, tag, _) = setup();
    let img = image(300, 0x11);
    tag.with(|t| t.preload((TAG_VENDOR, TAG_PRODUCT, 0), &img, 200));
    apply(
        &mut session,
        &tag,
        vec![UpdateInfo::tag(TAG_VENDOR, TAG_PRODUCT, img.clone())],
    );

    let writes = tag.with(|t| t.writes.clone());
    assert_eq!(writes.first().map(|w| w.offset), Some(200));
    assert!(!tag.with(|t| t.opcodes()).contains(&Opcode::DfuPrepare));
    assert_eq!(
        tag.with(|t| t.components[&(TAG_VENDOR, TAG_PRODUCT, 0)].data.clone()),
        img
    );
}

#[test]
fn module_only_plan_skips_execution() {
    let (mut session, tag, log) = setup();
    tag.with(|t| {
        t.modules = vec![
            ModuleDescriptor {
                vendor_id: 0x30,
                product_id: 0x01,
                module_id: 5,
                is_enabled: true,
            },
            ModuleDescriptor {
                vendor_id: 0x30,
                product_id: 0x02,
                module_id: 6,
                is_enabled: true,
            },
        ];
    });
    apply(
        &mut session,
        &tag,
        vec![UpdateInfo::module(0x30, 0x01, 5, image(40, 1))],
    );

    assert_eq!(log.last(), Some(UpdateState::Completed));
    assert!(!log.states().contains(&UpdateState::Transferred));
    // Only the planned, enabled module is deactivated.
    assert_eq!(tag.with(|t| t.deactivated.clone()), vec![5]);
    assert!(tag.with(|t| t.executed.is_empty()));
    let ops = tag.with(|t| t.opcodes());
    assert_eq!(
        &ops[..3],
        &[Opcode::BatteryStatus, Opcode::ListModules, Opcode::DeactivateModule]
    );
}

#[test]
fn early_gear_confirmation_is_honoured() {
    let (mut session, tag, _) = setup();
    tag.with(|t| t.notify_before_ack = true);
    apply(
        &mut session,
        &tag,
        vec![UpdateInfo::gear(GEAR_VENDOR, GEAR_PRODUCT, GEAR_COMPONENT, image(64, 3))],
    );
    execute(&mut session, &tag);
    assert_eq!(session.update_state(), UpdateState::Completed);
}

#[test]
fn tag_reboot_before_ack_still_completes() {
    let (mut session, tag, _) = setup();
    tag.with(|t| t.reboot_without_ack = true);
    apply(
        &mut session,
        &tag,
        vec![UpdateInfo::tag(TAG_VENDOR, TAG_PRODUCT, image(90, 4))],
    );
    execute(&mut session, &tag);
    assert_eq!(session.update_state(), UpdateState::Completed);
}

#[test]
fn unconfirmed_gear_times_out() {
    let (mut session, tag, log) = setup();
    tag.with(|t| t.gear_never_confirms = true);
    apply(
        &mut session,
        &tag,
        vec![UpdateInfo::gear(GEAR_VENDOR, GEAR_PRODUCT, GEAR_COMPONENT, image(10, 9))],
    );
    execute(&mut session, &tag);
    assert_eq!(session.update_state(), UpdateState::Executing);

    let deadline = session.next_deadline().unwrap();
    session.poll_timers(deadline);
    assert_eq!(
        log.last(),
        Some(UpdateState::Error(UpdateError::InternalError(
            "execution timeout"
        )))
    );
}

#[test]
fn auto_execute_runs_straight_through() {
    let (mut session, tag, log) = setup();
    session.dispatch(LinkEvent::ApplyUpdates {
        updates: gear_and_tag(),
        auto_execute: Some(true),
    });
    pump(&mut session, &tag);
    assert_eq!(session.update_state(), UpdateState::Completed);
    assert!(!log.states().contains(&UpdateState::Transferred));
}

#[test]
fn stop_then_restart_ignores_stale_reply() {
    let (mut session, tag, log) = setup();
    session.dispatch(LinkEvent::ApplyUpdates {
        updates: gear_and_tag(),
        auto_execute: None,
    });
    // Battery reply is still sitting in the outbox.
    session.dispatch(LinkEvent::StopUpdates);
    assert_eq!(log.last(), Some(UpdateState::Stopped));

    tag.with(|t| t.battery = 3);
    session.dispatch(LinkEvent::ApplyUpdates {
        updates: gear_and_tag(),
        auto_execute: None,
    });
    pump(&mut session, &tag);
    // The 80% reply belonged to the stopped run; the 3% one fails this run.
    assert_eq!(log.last(), Some(UpdateState::Error(UpdateError::LowBattery)));
}

#[test]
fn corrupted_write_ack_ends_the_run() {
    let (mut session, tag, log) = setup();
    tag.with(|t| t.corrupt_ack_crc = true);
    apply(
        &mut session,
        &tag,
        vec![UpdateInfo::tag(TAG_VENDOR, TAG_PRODUCT, image(500, 0x42))],
    );

    assert_eq!(
        log.last(),
        Some(UpdateState::Error(UpdateError::Transfer(
            WriterError::CrcMismatch
        )))
    );
    // The first ack (offset 128) is rejected; nothing is written after it.
    assert_eq!(tag.with(|t| t.writes.len()), 1);
    assert_eq!(tag.with(|t| t.opcodes()).last(), Some(&Opcode::DfuWrite));
    assert!(session.next_deadline().is_none());
}

#[test]
fn mixed_plan_writes_gear_then_tag_then_module() {
    let (mut session, tag, log) = setup();
    tag.with(|t| {
        t.modules = vec![ModuleDescriptor {
            vendor_id: 0x30,
            product_id: 0x01,
            module_id: 5,
            is_enabled: true,
        }];
    });
    apply(
        &mut session,
        &tag,
        vec![
            UpdateInfo::module(0x30, 0x01, 5, image(150, 7)),
            UpdateInfo::tag(TAG_VENDOR, TAG_PRODUCT, image(300, 0x5A)),
            UpdateInfo::gear(GEAR_VENDOR, GEAR_PRODUCT, GEAR_COMPONENT, image(200, 0xA5)),
        ],
    );
    assert_eq!(session.update_state(), UpdateState::Transferred);

    let mut components: Vec<_> = tag.with(|t| t.writes.iter().map(|w| w.component).collect());
    components.dedup();
    assert_eq!(
        components,
        vec![
            (GEAR_VENDOR, GEAR_PRODUCT, GEAR_COMPONENT),
            (TAG_VENDOR, TAG_PRODUCT, 0),
            (0x30, 0x01, 0),
        ]
    );
    assert_eq!(tag.with(|t| t.deactivated.clone()), vec![5]);

    execute(&mut session, &tag);
    assert_eq!(log.last(), Some(UpdateState::Completed));
    // Modules are never executed.
    assert_eq!(
        tag.with(|t| t.executed.clone()),
        vec![(GEAR_VENDOR, GEAR_PRODUCT), (TAG_VENDOR, TAG_PRODUCT)]
    );
}
