//! Inbound session events.
//!
//! Everything that reaches a [`TagSession`](super::session::TagSession)
//! travels as a [`LinkEvent`]. BLE callbacks land in an unbounded inbox
//! and are never dropped; application requests go over a bounded channel
//! and wait for room. The session consumes events one at a time, so no
//! engine state is ever touched concurrently.
//!
//! ```text
//!  BLE stack ──▶ LinkHandle ──▶ [ inbox (unbounded) ] ──┐
//!                                                       ├─▶ TagSession::run
//!  app code  ──▶ LinkHandle ──▶ [ channel (bounded) ] ──┘
//! ```

use core::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;

use crate::dfu::plan::UpdateInfo;
use crate::dfu::update::ConnectionStatus;
use crate::error::LinkError;
use crate::protocol::message::Request;
use crate::transport::Characteristic;
use crate::transport::engine::Completion;

use super::ports::{NotificationSink, RawDataSink, UpdateSink};

/// Channel depth for application requests. BLE callbacks bypass it.
pub const EVENT_DEPTH: usize = 32;

pub type EventChannel = Channel<CriticalSectionRawMutex, LinkEvent, EVENT_DEPTH>;

/// Unbounded FIFO for BLE callbacks, with a wakeup for the session.
pub(crate) struct Inbox {
    events: Mutex<CriticalSectionRawMutex, RefCell<VecDeque<LinkEvent>>>,
    ready: Signal<CriticalSectionRawMutex, ()>,
}

impl Inbox {
    fn new() -> Self {
        Self {
            events: Mutex::new(RefCell::new(VecDeque::new())),
            ready: Signal::new(),
        }
    }

    fn push(&self, event: LinkEvent) {
        self.events.lock(|q| q.borrow_mut().push_back(event));
        self.ready.signal(());
    }

    pub(crate) fn pop(&self) -> Option<LinkEvent> {
        self.events.lock(|q| q.borrow_mut().pop_front())
    }

    pub(crate) fn len(&self) -> usize {
        self.events.lock(|q| q.borrow().len())
    }

    /// Resolves once something was pushed since the last wait.
    pub(crate) async fn wait(&self) {
        self.ready.wait().await;
    }
}

/// Both inbound queues of one session.
pub(crate) struct EventQueues {
    pub(crate) inbox: Inbox,
    pub(crate) requests: EventChannel,
}

impl EventQueues {
    pub(crate) fn new() -> Self {
        Self {
            inbox: Inbox::new(),
            requests: EventChannel::new(),
        }
    }
}

pub enum LinkEvent {
    // ── From the BLE collaborator ──
    /// Notify callback for one characteristic.
    CharacteristicUpdate {
        characteristic: Characteristic,
        result: Result<Vec<u8>, LinkError>,
    },
    ConnectionChanged(ConnectionStatus),
    /// Reply to a `ReadRssi` request, in dBm.
    RssiUpdate(i16),

    // ── From the application ──
    SendCommand {
        request: Request,
        completion: Completion,
    },
    /// `auto_execute: None` uses the configured default.
    ApplyUpdates {
        updates: Vec<UpdateInfo>,
        auto_execute: Option<bool>,
    },
    ExecuteUpdates,
    StopUpdates,
    SubscribeNotifications(Box<dyn NotificationSink + Send>),
    StopCachingNotifications,
    SubscribeRawData(Box<dyn RawDataSink + Send>),
    SubscribeUpdates(Box<dyn UpdateSink + Send>),
    ReadRssi,
    Shutdown,
}

impl core::fmt::Debug for LinkEvent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::CharacteristicUpdate {
                characteristic,
                result,
            } => match result {
                Ok(data) => write!(f, "CharacteristicUpdate({characteristic:?}, {} bytes)", data.len()),
                Err(e) => write!(f, "CharacteristicUpdate({characteristic:?}, {e})"),
            },
            Self::ConnectionChanged(s) => write!(f, "ConnectionChanged({s:?})"),
            Self::RssiUpdate(rssi) => write!(f, "RssiUpdate({rssi})"),
            Self::SendCommand { request, .. } => {
                write!(f, "SendCommand({:?}/{:?})", request.domain, request.opcode)
            }
            Self::ApplyUpdates { updates, .. } => write!(f, "ApplyUpdates({} images)", updates.len()),
            Self::ExecuteUpdates => write!(f, "ExecuteUpdates"),
            Self::StopUpdates => write!(f, "StopUpdates"),
            Self::SubscribeNotifications(_) => write!(f, "SubscribeNotifications"),
            Self::StopCachingNotifications => write!(f, "StopCachingNotifications"),
            Self::SubscribeRawData(_) => write!(f, "SubscribeRawData"),
            Self::SubscribeUpdates(_) => write!(f, "SubscribeUpdates"),
            Self::ReadRssi => write!(f, "ReadRssi"),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Cloneable producer side of a session's event queues.
#[derive(Clone)]
pub struct LinkHandle {
    queues: Arc<EventQueues>,
}

impl LinkHandle {
    pub(crate) fn new(queues: Arc<EventQueues>) -> Self {
        Self { queues }
    }

    /// Queue an application request, waiting for room.
    pub async fn post(&self, event: LinkEvent) {
        self.queues.requests.send(event).await;
    }

    /// Queue an application request without waiting.
    /// Returns the event back if the request channel is full.
    pub fn try_post(&self, event: LinkEvent) -> Result<(), LinkEvent> {
        self.queues.requests.try_send(event).map_err(|e| match e {
            embassy_sync::channel::TrySendError::Full(event) => event,
        })
    }

    // ── BLE callbacks: never block, never drop ──

    pub fn characteristic_updated(&self, characteristic: Characteristic, data: &[u8]) {
        self.queues.inbox.push(LinkEvent::CharacteristicUpdate {
            characteristic,
            result: Ok(data.to_vec()),
        });
    }

    pub fn characteristic_failed(&self, characteristic: Characteristic, error: LinkError) {
        self.queues.inbox.push(LinkEvent::CharacteristicUpdate {
            characteristic,
            result: Err(error),
        });
    }

    pub fn connection_changed(&self, status: ConnectionStatus) {
        self.queues.inbox.push(LinkEvent::ConnectionChanged(status));
    }

    pub fn rssi_updated(&self, rssi: i16) {
        self.queues.inbox.push(LinkEvent::RssiUpdate(rssi));
    }

    pub async fn send_command(&self, request: Request, completion: Completion) {
        self.post(LinkEvent::SendCommand {
            request,
            completion,
        })
        .await;
    }

    pub async fn apply_updates(&self, updates: Vec<UpdateInfo>, auto_execute: Option<bool>) {
        self.post(LinkEvent::ApplyUpdates {
            updates,
            auto_execute,
        })
        .await;
    }

    pub async fn shutdown(&self) {
        self.post(LinkEvent::Shutdown).await;
    }

    /// BLE callbacks not yet consumed by the session.
    pub fn pending_callbacks(&self) -> usize {
        self.queues.inbox.len()
    }
}
