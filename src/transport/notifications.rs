//! Notification cache and fan-out.
//!
//! The tag may push events before the application has subscribed. Until
//! the first subscriber attaches, every notification is buffered in
//! arrival order; the first subscriber receives that backlog followed by
//! the live stream, later subscribers only see live events.
//!
//! [`NotificationHub::stop_caching`] does not flip the flag immediately:
//! the next delivery is used as the synchronisation point where buffering
//! stops and the buffer is cleared, so a notification racing the call is
//! neither duplicated nor lost.
//!
//! This is the only shared-memory structure in the crate. BLE delivery and
//! application subscription can happen on different contexts, so state
//! sits behind an `embassy-sync` blocking mutex.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::debug;

use crate::app::ports::NotificationSink;
use crate::protocol::message::Notification;

struct HubState {
    caching: bool,
    stop_requested: bool,
    replayed: bool,
    cached: Vec<Notification>,
    subscribers: Vec<Box<dyn NotificationSink + Send>>,
}

pub struct NotificationHub {
    state: Mutex<CriticalSectionRawMutex, RefCell<HubState>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(HubState {
                caching: true,
                stop_requested: false,
                replayed: false,
                cached: Vec::new(),
                subscribers: Vec::new(),
            })),
        }
    }

    /// Attach a subscriber. The first one ever attached receives the backlog.
    pub fn subscribe(&self, mut sink: Box<dyn NotificationSink + Send>) {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            if !state.replayed {
                state.replayed = true;
                let backlog = core::mem::take(&mut state.cached);
                debug!("notifications: replaying {} cached", backlog.len());
                for notification in &backlog {
                    sink.on_notification(notification);
                }
            }
            state.subscribers.push(sink);
        });
    }

    /// Deliver one decoded notification from the tag.
    pub fn deliver(&self, notification: &Notification) {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            if state.stop_requested {
                state.stop_requested = false;
                state.caching = false;
                state.cached.clear();
                debug!("notifications: caching stopped");
            }
            if state.caching && !state.replayed {
                state.cached.push(notification.clone());
            }
            for sink in &mut state.subscribers {
                sink.on_notification(notification);
            }
        });
    }

    /// Stop buffering at the next delivery.
    pub fn stop_caching(&self) {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            if state.caching {
                state.stop_requested = true;
            }
        });
    }

    pub fn is_caching(&self) -> bool {
        self.state.lock(|cell| cell.borrow().caching)
    }

    pub fn cached_len(&self) -> usize {
        self.state.lock(|cell| cell.borrow().cached.len())
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock(|cell| cell.borrow().subscribers.len())
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}
