//! Transport engine: a reliable command channel over the command/response
//! characteristics plus the notification and raw-data streams.
//!
//! Sans-IO like the rest of the core. The engine never blocks and never
//! owns a timer; the host (normally [`TagSession`](crate::app::session::TagSession))
//! feeds it characteristic updates and timer firings, and supplies a
//! [`TransportPort`] for writes and timer arming.
//!
//! ```text
//!  enqueue ──▶ [ A | B | C ]        head only is ever in flight
//!               │
//!               ▼ fresh RequestId, encode, fragment, write, arm timer
//!          ┌──────────┐  response(id)   ┌───────────────┐
//!          │ in flight│────────────────▶│ complete head │──▶ next
//!          └──────────┘  timeout(token) └───────────────┘
//! ```
//!
//! Retries are consumed only when the request cannot be encoded or written
//! locally. A device that stays silent gets exactly one timeout per request.

use core::time::Duration;
use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::app::ports::{NotificationSink, RawDataSink, TimerToken, TransportPort};
use crate::config::LinkConfig;
use crate::error::TransportError;
use crate::protocol::message::{Notification, Request, RequestId, Response};

use super::fragmenter::Fragmenter;
use super::notifications::NotificationHub;
use super::{Characteristic, WriteMode};

/// Second byte of every raw-data acknowledgement.
pub const RAW_ACK: u8 = 0x41;

/// Invoked exactly once per enqueued request.
pub type Completion = Box<dyn FnOnce(Result<Response, TransportError>) + Send>;

/// Per-request delivery settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    pub mode: WriteMode,
    pub retries: u8,
    pub timeout: Duration,
}

impl RequestOptions {
    pub fn from_config(config: &LinkConfig) -> Self {
        Self {
            mode: config.command_write_mode,
            retries: config.command_retries,
            timeout: config.command_timeout(),
        }
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::from_config(&LinkConfig::default())
    }
}

struct PendingRequest {
    request: Request,
    options: RequestOptions,
    retries_left: u8,
    completion: Completion,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    id: RequestId,
    token: TimerToken,
}

pub struct TransportEngine {
    queue: VecDeque<PendingRequest>,
    in_flight: Option<InFlight>,
    last_id: RequestId,
    next_token: u32,
    outbound: Fragmenter,
    responses: Fragmenter,
    notification_rx: Fragmenter,
    hub: Arc<NotificationHub>,
    raw_sinks: Vec<Box<dyn RawDataSink + Send>>,
}

impl TransportEngine {
    pub fn new(mtu: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            in_flight: None,
            // First id handed out is RequestId::FIRST.
            last_id: RequestId::LAST,
            next_token: 0,
            outbound: Fragmenter::new(mtu),
            responses: Fragmenter::new(mtu),
            notification_rx: Fragmenter::new(mtu),
            hub: Arc::new(NotificationHub::new()),
            raw_sinks: Vec::new(),
        }
    }

    pub fn mtu(&self) -> usize {
        self.outbound.mtu()
    }

    /// Number of requests not yet completed, including the one in flight.
    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    // ── Commands ─────────────────────────────────────────────

    /// Append a request; sending starts immediately if nothing is in flight.
    pub fn enqueue(
        &mut self,
        request: Request,
        options: RequestOptions,
        completion: Completion,
        port: &mut impl TransportPort,
    ) {
        debug!(
            "transport: enqueue {:?}/{:?} ({} queued)",
            request.domain,
            request.opcode,
            self.queue.len()
        );
        self.queue.push_back(PendingRequest {
            request,
            options,
            retries_left: options.retries,
            completion,
        });
        self.send_head(port);
    }

    fn send_head(&mut self, port: &mut impl TransportPort) {
        while self.in_flight.is_none() {
            let Some(head) = self.queue.front_mut() else {
                return;
            };
            let id = self.last_id.next();
            self.last_id = id;

            let sent = head
                .request
                .encode(id)
                .map_err(TransportError::Encode)
                .and_then(|bytes| {
                    for fragment in self.outbound.fragments(&bytes) {
                        port.write_value(&fragment, Characteristic::Command, head.options.mode)
                            .map_err(TransportError::Link)?;
                    }
                    Ok(())
                });

            match sent {
                Ok(()) => {
                    self.next_token = self.next_token.wrapping_add(1);
                    let token = TimerToken(self.next_token);
                    port.arm_timeout(token, head.options.timeout);
                    self.in_flight = Some(InFlight { id, token });
                    debug!("transport: sent id {}", id.0);
                }
                Err(e) if head.retries_left > 0 => {
                    head.retries_left -= 1;
                    warn!(
                        "transport: send of id {} failed ({e}), {} retries left",
                        id.0, head.retries_left
                    );
                }
                Err(e) => {
                    warn!("transport: send of id {} failed ({e}), giving up", id.0);
                    if let Some(failed) = self.queue.pop_front() {
                        (failed.completion)(Err(e));
                    }
                }
            }
        }
    }

    fn complete_head(
        &mut self,
        result: Result<Response, TransportError>,
        port: &mut impl TransportPort,
    ) {
        self.in_flight = None;
        if let Some(done) = self.queue.pop_front() {
            (done.completion)(result);
        }
        self.send_head(port);
    }

    /// A command timer fired. Tokens from earlier sends are ignored.
    pub fn on_timeout(&mut self, token: TimerToken, port: &mut impl TransportPort) {
        match self.in_flight {
            Some(flight) if flight.token == token => {
                warn!("transport: id {} timed out", flight.id.0);
                self.complete_head(Err(TransportError::Timeout), port);
            }
            _ => debug!("transport: stale timer {}", token.0),
        }
    }

    // ── Inbound ──────────────────────────────────────────────

    /// Feed one characteristic update from the BLE collaborator.
    ///
    /// Returns a decoded notification so the host can route it to the
    /// update orchestration without going through the subscriber hub.
    pub fn on_characteristic_update(
        &mut self,
        characteristic: Characteristic,
        data: &[u8],
        port: &mut impl TransportPort,
    ) -> Option<Notification> {
        match characteristic {
            Characteristic::Response => {
                if let Some(packet) = self.responses.packet(data) {
                    self.handle_response(&packet, port);
                }
                None
            }
            Characteristic::Notification => {
                let packet = self.notification_rx.packet(data)?;
                match Notification::decode(&packet) {
                    Ok(notification) => {
                        self.hub.deliver(&notification);
                        Some(notification)
                    }
                    Err(e) => {
                        warn!("transport: undecodable notification: {e}");
                        None
                    }
                }
            }
            Characteristic::RawData => {
                self.handle_raw(data, port);
                None
            }
            Characteristic::Command => {
                debug!("transport: ignoring update on write-only characteristic");
                None
            }
        }
    }

    fn handle_response(&mut self, packet: &[u8], port: &mut impl TransportPort) {
        let response = match Response::decode(packet) {
            Ok(r) => r,
            Err(e) => {
                warn!("transport: undecodable response: {e}");
                return;
            }
        };
        let Some(flight) = self.in_flight else {
            warn!("transport: response id {} with nothing in flight", response.id.0);
            return;
        };
        if flight.id != response.id {
            warn!(
                "transport: response id {} does not match in-flight id {}",
                response.id.0, flight.id.0
            );
            return;
        }
        port.cancel_timeout();
        let result = if response.status.is_ok() {
            Ok(response)
        } else {
            Err(TransportError::Device(response.status))
        };
        self.complete_head(result, port);
    }

    fn handle_raw(&mut self, data: &[u8], port: &mut impl TransportPort) {
        let Some((&sequence, payload)) = data.split_first() else {
            warn!("transport: empty raw-data fragment");
            return;
        };
        for sink in &mut self.raw_sinks {
            sink.on_raw_data(sequence, payload);
        }
        if let Err(e) = port.write_value(
            &[sequence, RAW_ACK],
            Characteristic::RawData,
            WriteMode::WithoutResponse,
        ) {
            warn!("transport: raw-data ack {} failed: {e}", sequence);
        }
    }

    /// Link lost: fail everything queued and drop partial packets.
    pub fn reset(&mut self, port: &mut impl TransportPort) {
        if self.in_flight.take().is_some() {
            port.cancel_timeout();
        }
        if !self.queue.is_empty() {
            info!("transport: failing {} queued requests on disconnect", self.queue.len());
        }
        while let Some(pending) = self.queue.pop_front() {
            (pending.completion)(Err(TransportError::Disconnected));
        }
        self.outbound.reset();
        self.responses.reset();
        self.notification_rx.reset();
    }

    // ── Subscriptions ────────────────────────────────────────

    pub fn subscribe_notifications(&self, sink: Box<dyn NotificationSink + Send>) {
        self.hub.subscribe(sink);
    }

    /// Shared handle to the notification cache, for subscribers on other
    /// contexts.
    pub fn notifications(&self) -> Arc<NotificationHub> {
        Arc::clone(&self.hub)
    }

    pub fn stop_caching_notifications(&self) {
        self.hub.stop_caching();
    }

    pub fn subscribe_raw_data(&mut self, sink: Box<dyn RawDataSink + Send>) {
        self.raw_sinks.push(sink);
    }
}
