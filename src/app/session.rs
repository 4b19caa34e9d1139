//! Async session driver: owns one tag's transport engine and update
//! orchestrator and marshals every event onto a single future.
//!
//! ```text
//!  ┌───────────────────────────────────────────────────────────────┐
//!  │  TagSession::run                                              │
//!  │                                                               │
//!  │   ┌──────────────┐   or   ┌────────────────────────────────┐  │
//!  │   │ channel recv │◀──────▶│ Timer (earliest of command and │  │
//!  │   │ (LinkEvent)  │        │ execution deadlines)           │  │
//!  │   └──────┬───────┘        └───────────────┬────────────────┘  │
//!  │          ▼                                ▼                   │
//!  │   TransportEngine ──completions──▶ Mailbox ──▶ UpdateOrchestrator
//!  └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engines are sans-IO; this is the only place that knows about time
//! and the event queues. Completions of commands issued by the update
//! orchestrator land in a mailbox and are drained, in order, after
//! every event.

use core::cell::RefCell;
use core::time::Duration;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use async_io_mini::Timer;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use futures_lite::future;
use log::{debug, info, warn};

use crate::config::SdkConfig;
use crate::dfu::update::{ConnectionStatus, UpdateOrchestrator, UpdateState};
use crate::error::{LinkError, Result, TransportError};
use crate::protocol::message::{Request, Response};
use crate::transport::engine::{RequestOptions, TransportEngine};
use crate::transport::notifications::NotificationHub;
use crate::transport::{Characteristic, WriteMode};

use super::events::{EventQueues, LinkEvent, LinkHandle};
use super::ports::{CommandPort, DfuPort, Peripheral, TimerToken, TransportPort, UpdateSink};

// ── Mailbox ──────────────────────────────────────────────────

type CommandResult = core::result::Result<Response, TransportError>;

/// FIFO of command results owed to the update orchestrator.
struct Mailbox {
    results: Mutex<CriticalSectionRawMutex, RefCell<VecDeque<CommandResult>>>,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            results: Mutex::new(RefCell::new(VecDeque::new())),
        }
    }

    fn push(&self, result: CommandResult) {
        self.results.lock(|q| q.borrow_mut().push_back(result));
    }

    fn pop(&self) -> Option<CommandResult> {
        self.results.lock(|q| q.borrow_mut().pop_front())
    }
}

// ── Ports handed to the engines ──────────────────────────────

struct LinkPort<'a, P> {
    peripheral: &'a mut P,
    command_deadline: &'a mut Option<(TimerToken, Instant)>,
}

impl<P: Peripheral> TransportPort for LinkPort<'_, P> {
    fn write_value(
        &mut self,
        data: &[u8],
        characteristic: Characteristic,
        mode: WriteMode,
    ) -> core::result::Result<(), LinkError> {
        self.peripheral.write_value(data, characteristic, mode)
    }

    fn arm_timeout(&mut self, token: TimerToken, after: Duration) {
        *self.command_deadline = Some((token, Instant::now() + after));
    }

    fn cancel_timeout(&mut self) {
        *self.command_deadline = None;
    }
}

struct SessionDfuPort<'a, P> {
    engine: &'a mut TransportEngine,
    link: LinkPort<'a, P>,
    options: RequestOptions,
    mailbox: &'a Arc<Mailbox>,
    exec_deadline: &'a mut Option<Instant>,
    sinks: &'a mut Vec<Box<dyn UpdateSink + Send>>,
}

impl<P: Peripheral> CommandPort for SessionDfuPort<'_, P> {
    fn send_command(&mut self, request: Request) {
        let mailbox = Arc::clone(self.mailbox);
        self.engine.enqueue(
            request,
            self.options,
            Box::new(move |result| mailbox.push(result)),
            &mut self.link,
        );
    }
}

impl<P: Peripheral> DfuPort for SessionDfuPort<'_, P> {
    fn arm_execution_timer(&mut self, after: Duration) {
        *self.exec_deadline = Some(Instant::now() + after);
    }

    fn cancel_execution_timer(&mut self) {
        *self.exec_deadline = None;
    }

    fn publish(&mut self, state: &UpdateState) {
        for sink in self.sinks.iter_mut() {
            sink.on_update_state(state);
        }
    }
}

// ── Session ──────────────────────────────────────────────────

enum Wake {
    Callbacks,
    Request(LinkEvent),
    Deadline,
}

/// One connected tag.
pub struct TagSession<P: Peripheral> {
    peripheral: P,
    config: SdkConfig,
    queues: Arc<EventQueues>,
    engine: TransportEngine,
    dfu: UpdateOrchestrator,
    mailbox: Arc<Mailbox>,
    command_deadline: Option<(TimerToken, Instant)>,
    exec_deadline: Option<Instant>,
    update_sinks: Vec<Box<dyn UpdateSink + Send>>,
    last_rssi: Option<i16>,
}

impl<P: Peripheral> TagSession<P> {
    /// Build a session for an already connected, service-discovered tag.
    pub fn new(peripheral: P, config: SdkConfig) -> Result<(Self, LinkHandle)> {
        config.validate()?;
        let queues = Arc::new(EventQueues::new());
        let session = Self {
            peripheral,
            engine: TransportEngine::new(config.link.mtu()),
            dfu: UpdateOrchestrator::new(config.dfu.clone()),
            config,
            queues: Arc::clone(&queues),
            mailbox: Arc::new(Mailbox::new()),
            command_deadline: None,
            exec_deadline: None,
            update_sinks: Vec::new(),
            last_rssi: None,
        };
        Ok((session, LinkHandle::new(queues)))
    }

    /// Another producer handle for the same session.
    pub fn handle(&self) -> LinkHandle {
        LinkHandle::new(Arc::clone(&self.queues))
    }

    pub fn update_state(&self) -> UpdateState {
        self.dfu.state()
    }

    pub fn last_rssi(&self) -> Option<i16> {
        self.last_rssi
    }

    pub fn pending_commands(&self) -> usize {
        self.engine.pending_len()
    }

    pub fn notifications(&self) -> Arc<NotificationHub> {
        self.engine.notifications()
    }

    pub fn peripheral(&self) -> &P {
        &self.peripheral
    }

    /// Hand the peripheral back once the session is done.
    pub fn into_peripheral(self) -> P {
        self.peripheral
    }

    /// Process events until [`LinkEvent::Shutdown`].
    ///
    /// Queued BLE callbacks always go first, so a request never overtakes
    /// a response or notification the tag sent before it was posted.
    pub async fn run(&mut self) {
        info!("session: started (mtu {})", self.engine.mtu());
        let queues = Arc::clone(&self.queues);
        loop {
            self.drain_callbacks(&queues);
            let deadline = self.next_deadline();
            let wake = future::or(
                async {
                    queues.inbox.wait().await;
                    Wake::Callbacks
                },
                future::or(async { Wake::Request(queues.requests.receive().await) }, async {
                    match deadline {
                        Some(at) => {
                            Timer::after(at.saturating_duration_since(Instant::now())).await;
                        }
                        None => future::pending::<()>().await,
                    }
                    Wake::Deadline
                }),
            )
            .await;
            match wake {
                Wake::Callbacks => {}
                Wake::Request(LinkEvent::Shutdown) => {
                    self.drain_callbacks(&queues);
                    break;
                }
                Wake::Request(event) => self.dispatch(event),
                Wake::Deadline => self.poll_timers(Instant::now()),
            }
        }
        info!("session: stopped");
    }

    fn drain_callbacks(&mut self, queues: &EventQueues) {
        while let Some(event) = queues.inbox.pop() {
            self.dispatch(event);
        }
    }

    /// Handle one event and everything it settles. `Shutdown` is ignored
    /// here; [`run`](Self::run) returns on it.
    pub fn dispatch(&mut self, event: LinkEvent) {
        self.handle_event(event);
        self.drain_mailbox();
    }

    /// Fire every deadline at or before `now`.
    pub fn poll_timers(&mut self, now: Instant) {
        self.fire_deadlines(now);
        self.drain_mailbox();
    }

    /// Earliest armed deadline (command or execution timeout).
    pub fn next_deadline(&self) -> Option<Instant> {
        let command = self.command_deadline.map(|(_, at)| at);
        match (command, self.exec_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn fire_deadlines(&mut self, now: Instant) {
        if let Some((token, at)) = self.command_deadline {
            if at <= now {
                self.command_deadline = None;
                self.with_link(|engine, port| engine.on_timeout(token, port));
            }
        }
        if let Some(at) = self.exec_deadline {
            if at <= now {
                self.exec_deadline = None;
                self.with_dfu(|dfu, port| dfu.on_execution_timeout(port));
            }
        }
    }

    fn handle_event(&mut self, event: LinkEvent) {
        debug!("session: {:?}", event);
        match event {
            LinkEvent::CharacteristicUpdate {
                characteristic,
                result,
            } => match result {
                Ok(data) => {
                    let notification = self.with_link(|engine, port| {
                        engine.on_characteristic_update(characteristic, &data, port)
                    });
                    if let Some(n) = notification {
                        self.with_dfu(|dfu, port| dfu.on_notification(&n, port));
                    }
                }
                Err(e) => warn!("session: {:?} update failed: {e}", characteristic),
            },
            LinkEvent::ConnectionChanged(status) => {
                self.with_dfu(|dfu, port| dfu.on_connection_status(status, port));
                if status == ConnectionStatus::NotConnected {
                    self.with_link(|engine, port| engine.reset(port));
                }
            }
            LinkEvent::RssiUpdate(rssi) => self.last_rssi = Some(rssi),
            LinkEvent::SendCommand {
                request,
                completion,
            } => {
                let options = RequestOptions::from_config(&self.config.link);
                self.with_link(|engine, port| engine.enqueue(request, options, completion, port));
            }
            LinkEvent::ApplyUpdates {
                updates,
                auto_execute,
            } => {
                let auto = auto_execute.unwrap_or(self.config.dfu.auto_execute);
                if let Err(e) = self.with_dfu(|dfu, port| dfu.apply_updates(updates, auto, port)) {
                    warn!("session: apply updates rejected: {e}");
                }
            }
            LinkEvent::ExecuteUpdates => {
                if let Err(e) = self.with_dfu(|dfu, port| dfu.execute_updates(port)) {
                    warn!("session: execute rejected: {e}");
                }
            }
            LinkEvent::StopUpdates => {
                if let Err(e) = self.with_dfu(|dfu, port| dfu.stop_updates(port)) {
                    warn!("session: stop rejected: {e}");
                }
            }
            LinkEvent::SubscribeNotifications(sink) => self.engine.subscribe_notifications(sink),
            LinkEvent::StopCachingNotifications => self.engine.stop_caching_notifications(),
            LinkEvent::SubscribeRawData(sink) => self.engine.subscribe_raw_data(sink),
            LinkEvent::SubscribeUpdates(mut sink) => {
                sink.on_update_state(&self.dfu.state());
                self.update_sinks.push(sink);
            }
            LinkEvent::ReadRssi => {
                if let Err(e) = self.peripheral.read_rssi() {
                    warn!("session: RSSI read failed: {e}");
                }
            }
            LinkEvent::Shutdown => {}
        }
    }

    /// Feed queued command results to the update orchestrator.
    fn drain_mailbox(&mut self) {
        while let Some(result) = self.mailbox.pop() {
            self.with_dfu(|dfu, port| dfu.on_command_result(result, port));
        }
    }

    fn with_link<R>(
        &mut self,
        f: impl FnOnce(&mut TransportEngine, &mut LinkPort<'_, P>) -> R,
    ) -> R {
        let mut port = LinkPort {
            peripheral: &mut self.peripheral,
            command_deadline: &mut self.command_deadline,
        };
        f(&mut self.engine, &mut port)
    }

    fn with_dfu<R>(
        &mut self,
        f: impl FnOnce(&mut UpdateOrchestrator, &mut SessionDfuPort<'_, P>) -> R,
    ) -> R {
        let mut port = SessionDfuPort {
            engine: &mut self.engine,
            link: LinkPort {
                peripheral: &mut self.peripheral,
                command_deadline: &mut self.command_deadline,
            },
            options: RequestOptions::from_config(&self.config.link),
            mailbox: &self.mailbox,
            exec_deadline: &mut self.exec_deadline,
            sinks: &mut self.update_sinks,
        };
        f(&mut self.dfu, &mut port)
    }
}
