//! The async `run` loop with real timers.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use futures_lite::future;
use taglink::app::events::{EVENT_DEPTH, LinkEvent};
use taglink::app::session::TagSession;
use taglink::config::SdkConfig;
use taglink::dfu::update::ConnectionStatus;
use taglink::protocol::dfu::battery_status_request;
use taglink::protocol::message::{Domain, Notification, Opcode};
use taglink::transport::Characteristic;
use taglink::transport::fragmenter::Fragmenter;
use taglink::{LinkError, TransportError};

use crate::mock_device::{MockTag, NotificationLog};

fn fast_config() -> SdkConfig {
    let mut config = SdkConfig::default();
    config.link.command_timeout_ms = 30;
    config
}

#[test]
fn silent_tag_times_out_under_run() {
    let tag = MockTag::new(64);
    tag.with(|t| t.silent = true);
    let (mut session, handle) = TagSession::new(tag.clone(), fast_config()).unwrap();

    let outcome = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&outcome);
    let stopper = handle.clone();
    let started = Instant::now();
    handle
        .try_post(LinkEvent::SendCommand {
            request: battery_status_request(),
            completion: Box::new(move |r| {
                *seen.lock().unwrap() = Some(r);
                let _ = stopper.try_post(LinkEvent::Shutdown);
            }),
        })
        .unwrap();

    future::block_on(session.run());

    assert_eq!(*outcome.lock().unwrap(), Some(Err(TransportError::Timeout)));
    assert!(started.elapsed() >= Duration::from_millis(30));
    // Sent once, never retried.
    assert_eq!(tag.with(|t| t.requests.len()), 1);
}

#[test]
fn events_from_another_thread_are_processed() {
    let tag = MockTag::new(64);
    let (mut session, handle) = TagSession::new(tag.clone(), SdkConfig::default()).unwrap();

    let producer = thread::spawn(move || {
        future::block_on(async {
            handle.post(LinkEvent::ReadRssi).await;
            handle.rssi_updated(-72);
            handle.shutdown().await;
        });
    });

    future::block_on(session.run());
    producer.join().unwrap();

    assert_eq!(tag.with(|t| t.rssi_reads), 1);
    assert_eq!(session.last_rssi(), Some(-72));
}

#[test]
fn handle_callbacks_reach_the_session() {
    let (mut session, _) = TagSession::new(MockTag::new(64), SdkConfig::default()).unwrap();
    let handle = session.handle();
    let log = NotificationLog::default();
    session.dispatch(LinkEvent::SubscribeNotifications(Box::new(log.clone())));
    assert_eq!(session.notifications().subscriber_count(), 1);

    let note = Notification::new(Domain::Gear, Opcode::Other(40), vec![1, 2, 3]);
    for frag in Fragmenter::new(64).fragments(&note.encode()) {
        handle.characteristic_updated(Characteristic::Notification, &frag);
    }
    handle.characteristic_failed(Characteristic::Response, LinkError::NotConnected);
    handle.connection_changed(ConnectionStatus::NotConnected);
    handle.rssi_updated(-40);
    handle.try_post(LinkEvent::Shutdown).unwrap();

    future::block_on(session.run());

    assert_eq!(*log.0.lock().unwrap(), vec![note]);
    assert_eq!(session.last_rssi(), Some(-40));
    let tag = session.into_peripheral();
    assert!(tag.with(|t| t.requests.is_empty()));
}

#[test]
fn callbacks_beyond_channel_depth_are_all_cached() {
    let (mut session, handle) = TagSession::new(MockTag::new(64), SdkConfig::default()).unwrap();
    let sent: Vec<Notification> = (0..EVENT_DEPTH as u8 + 8)
        .map(|i| Notification::new(Domain::Gear, Opcode::Other(40), vec![i]))
        .collect();
    for note in &sent {
        for frag in Fragmenter::new(64).fragments(&note.encode()) {
            handle.characteristic_updated(Characteristic::Notification, &frag);
        }
    }
    assert!(handle.pending_callbacks() > EVENT_DEPTH);

    let log = NotificationLog::default();
    let subscriber = log.clone();
    let producer = handle.clone();
    future::block_on(future::zip(session.run(), async move {
        producer
            .post(LinkEvent::SubscribeNotifications(Box::new(subscriber)))
            .await;
        producer.shutdown().await;
    }));

    assert_eq!(*log.0.lock().unwrap(), sent);
    assert_eq!(handle.pending_callbacks(), 0);
}
