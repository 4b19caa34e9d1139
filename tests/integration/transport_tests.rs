//! Transport engine through a session: FIFO commands, notification cache,
//! raw-data acknowledgement, disconnect handling.

use std::sync::{Arc, Mutex};

use taglink::TransportError;
use taglink::app::events::LinkEvent;
use taglink::app::session::TagSession;
use taglink::config::SdkConfig;
use taglink::dfu::update::ConnectionStatus;
use taglink::protocol::dfu::{BatteryStatusResponse, battery_status_request};
use taglink::protocol::message::{Domain, Notification, Opcode, Request, Response};
use taglink::transport::Characteristic;
use taglink::transport::engine::{Completion, RAW_ACK};

use crate::mock_device::{MockTag, NotificationLog, RawLog, pump};

type Outcomes = Arc<Mutex<Vec<(&'static str, Result<Response, TransportError>)>>>;

fn record(tag: &'static str, outcomes: &Outcomes) -> Completion {
    let outcomes = Arc::clone(outcomes);
    Box::new(move |r| outcomes.lock().unwrap().push((tag, r)))
}

fn setup() -> (TagSession<MockTag>, MockTag) {
    let tag = MockTag::new(64);
    let (session, _) = TagSession::new(tag.clone(), SdkConfig::default()).unwrap();
    (session, tag)
}

fn send(session: &mut TagSession<MockTag>, request: Request, completion: Completion) {
    session.dispatch(LinkEvent::SendCommand {
        request,
        completion,
    });
}

#[test]
fn second_command_waits_for_first() {
    let (mut session, tag) = setup();
    let outcomes: Outcomes = Arc::default();

    send(&mut session, battery_status_request(), record("a", &outcomes));
    send(&mut session, battery_status_request(), record("b", &outcomes));

    // Only A has reached the tag so far.
    assert_eq!(tag.with(|t| t.requests.len()), 1);
    assert_eq!(session.pending_commands(), 2);

    pump(&mut session, &tag);
    let done = outcomes.lock().unwrap();
    assert_eq!(done.iter().map(|(t, _)| *t).collect::<Vec<_>>(), vec!["a", "b"]);
    let battery = BatteryStatusResponse::decode(&done[0].1.as_ref().unwrap().payload).unwrap();
    assert_eq!(battery.battery_level, 80);

    let ids: Vec<u8> = tag.with(|t| t.requests.iter().map(|(id, _)| id.0).collect());
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn unsupported_command_surfaces_device_status() {
    let (mut session, tag) = setup();
    let outcomes: Outcomes = Arc::default();
    send(
        &mut session,
        Request::bare(Domain::Ble, Opcode::Other(99)),
        record("x", &outcomes),
    );
    pump(&mut session, &tag);
    assert!(matches!(
        outcomes.lock().unwrap()[0].1,
        Err(TransportError::Device(taglink::protocol::message::Status::Unsupported))
    ));
}

#[test]
fn disconnect_fails_queued_commands() {
    let (mut session, tag) = setup();
    tag.with(|t| t.silent = true);
    let outcomes: Outcomes = Arc::default();
    send(&mut session, battery_status_request(), record("a", &outcomes));
    send(&mut session, battery_status_request(), record("b", &outcomes));

    session.dispatch(LinkEvent::ConnectionChanged(ConnectionStatus::NotConnected));
    let done = outcomes.lock().unwrap();
    assert_eq!(done.len(), 2);
    assert!(done.iter().all(|(_, r)| *r == Err(TransportError::Disconnected)));
    assert!(session.next_deadline().is_none());
}

#[test]
fn early_notifications_replay_to_first_subscriber_only() {
    let (mut session, tag) = setup();
    let early: Vec<Notification> = (0..3u8)
        .map(|i| Notification::new(Domain::Gear, Opcode::Other(40), vec![i]))
        .collect();
    tag.with(|t| early.iter().for_each(|n| t.notify(n)));
    pump(&mut session, &tag);

    let first = NotificationLog::default();
    session.dispatch(LinkEvent::SubscribeNotifications(Box::new(first.clone())));
    assert_eq!(*first.0.lock().unwrap(), early);

    let live = Notification::new(Domain::Gear, Opcode::Other(40), vec![9]);
    let second = NotificationLog::default();
    session.dispatch(LinkEvent::SubscribeNotifications(Box::new(second.clone())));
    tag.with(|t| t.notify(&live));
    pump(&mut session, &tag);

    assert_eq!(first.0.lock().unwrap().len(), 4);
    assert_eq!(*second.0.lock().unwrap(), vec![live]);
}

#[test]
fn stop_caching_drops_backlog() {
    let (mut session, tag) = setup();
    let n = |b| Notification::new(Domain::Base, Opcode::Other(7), vec![b]);
    tag.with(|t| t.notify(&n(1)));
    pump(&mut session, &tag);
    session.dispatch(LinkEvent::StopCachingNotifications);
    tag.with(|t| t.notify(&n(2)));
    pump(&mut session, &tag);

    let hub = session.notifications();
    assert!(!hub.is_caching());
    assert_eq!(hub.cached_len(), 0);
}

#[test]
fn raw_data_reaches_subscribers_and_is_acked() {
    let (mut session, tag) = setup();
    let log = RawLog::default();
    session.dispatch(LinkEvent::SubscribeRawData(Box::new(log.clone())));
    for seq in [3u8, 4] {
        session.dispatch(LinkEvent::CharacteristicUpdate {
            characteristic: Characteristic::RawData,
            result: Ok(vec![seq, 0x10, 0x20]),
        });
    }
    assert_eq!(
        *log.0.lock().unwrap(),
        vec![(3, vec![0x10, 0x20]), (4, vec![0x10, 0x20])]
    );
    assert_eq!(
        tag.with(|t| t.raw_acks.clone()),
        vec![vec![3, RAW_ACK], vec![4, RAW_ACK]]
    );
}
