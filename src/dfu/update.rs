//! Update orchestration: sequences image writers across a whole plan and
//! drives execution of the transferred images.
//!
//! ```text
//! Idle ─▶ PreparingForTransfer ─▶ Transferring(p) ─▶ Transferred ─▶ Executing ─▶ Completed
//!              │ battery, modules      │ writers, one       │ execute        │ gear: notification
//!              │                       │ at a time          │ (or auto)      │ tag: reconnect
//!              └──────────┬────────────┴────────┬───────────┴────────────────┘
//!                         ▼                     ▼
//!                      Stopped            Error(UpdateError)
//! ```
//!
//! The orchestrator is sans-IO. Every command it issues through the
//! [`DfuPort`] produces exactly one result, fed back in FIFO order through
//! [`UpdateOrchestrator::on_command_result`]. Results for commands that were
//! still queued when a run ended are counted and discarded, so a new run
//! never consumes a stale reply.

use std::collections::VecDeque;

use log::{debug, info, warn};

use crate::app::ports::DfuPort;
use crate::config::DfuConfig;
use crate::error::{DecodeError, TransportError, UpdateError};
use crate::protocol::dfu::{
    BatteryStatusResponse, DfuExecuteNotification, DfuExecuteRequest, ListModulesResponse,
    ModuleRequest, battery_status_request, list_modules_request,
};
use crate::protocol::message::{Notification, Request, Response};

use super::plan::{self, UpdateInfo, UpdateTarget};
use super::writer::{ImageTransferContext, ImageWriter, WriterState};

/// Tag connection as reported by the connection collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    NotConnected,
    /// Link is up with only the services needed for an update.
    PartiallyConnectedForUpdate,
    Connected,
}

/// Observable state of an update run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateState {
    Idle,
    PreparingForTransfer,
    /// Percent of all planned bytes acknowledged, never decreasing.
    Transferring(f32),
    Transferred,
    Executing,
    Completed,
    Stopped,
    Error(UpdateError),
}

impl UpdateState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Error(_))
    }

    fn is_running(self) -> bool {
        !self.is_terminal() && self != Self::Idle
    }
}

/// Which command result the orchestrator is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    None,
    BatteryBeforeTransfer,
    ListModules,
    DeactivateModule,
    Writing,
    BatteryBeforeExecute,
    Execute,
    AwaitingConfirmation,
}

#[derive(Debug, Clone, Copy)]
struct ExecTarget {
    target: UpdateTarget,
    vendor_id: u32,
    product_id: u32,
}

pub struct UpdateOrchestrator {
    config: DfuConfig,
    state: UpdateState,
    step: Step,
    connection: ConnectionStatus,
    auto_execute: bool,

    plan: Vec<UpdateInfo>,
    next_transfer: usize,
    writer: Option<ImageWriter>,
    bytes_done: usize,
    total_bytes: usize,
    progress: f32,
    to_deactivate: VecDeque<ModuleRequest>,

    execute_queue: VecDeque<ExecTarget>,
    executing: Option<ExecTarget>,
    early_confirmation: bool,
    tag_execute_in_progress: bool,
    tag_went_away: bool,
    timer_armed: bool,

    outstanding: usize,
    discard: usize,
}

impl UpdateOrchestrator {
    pub fn new(config: DfuConfig) -> Self {
        Self {
            config,
            state: UpdateState::Idle,
            step: Step::None,
            connection: ConnectionStatus::Connected,
            auto_execute: false,
            plan: Vec::new(),
            next_transfer: 0,
            writer: None,
            bytes_done: 0,
            total_bytes: 0,
            progress: 0.0,
            to_deactivate: VecDeque::new(),
            execute_queue: VecDeque::new(),
            executing: None,
            early_confirmation: false,
            tag_execute_in_progress: false,
            tag_went_away: false,
            timer_armed: false,
            outstanding: 0,
            discard: 0,
        }
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub fn connection(&self) -> ConnectionStatus {
        self.connection
    }

    /// Command results still owed to this orchestrator, including ones that
    /// will be discarded.
    pub fn awaiting_results(&self) -> usize {
        self.outstanding + self.discard
    }

    // ── Public operations ────────────────────────────────────

    /// Start transferring `updates`. Accepted from `Idle` or a terminal state.
    pub fn apply_updates(
        &mut self,
        updates: Vec<UpdateInfo>,
        auto_execute: bool,
        port: &mut impl DfuPort,
    ) -> Result<(), UpdateError> {
        if self.state.is_running() {
            warn!("update: apply requested while {:?}", self.state);
            return Err(UpdateError::InvalidState("update already in progress"));
        }
        self.teardown(port);
        self.plan = plan::order(updates);
        self.auto_execute = auto_execute;
        self.next_transfer = 0;
        self.bytes_done = 0;
        self.progress = 0.0;
        self.execute_queue.clear();

        if self.plan.is_empty() {
            return self.fail(UpdateError::InvalidState("no updates to apply"), port);
        }
        if self.connection == ConnectionStatus::NotConnected {
            return self.fail(UpdateError::TagDisconnected, port);
        }
        if self.plan.iter().any(|u| u.image.is_none()) {
            return self.fail(UpdateError::DataUnavailable, port);
        }
        self.total_bytes = self.plan.iter().map(UpdateInfo::image_len).sum();

        self.transition(UpdateState::PreparingForTransfer, port);
        self.step = Step::BatteryBeforeTransfer;
        self.send(battery_status_request(), port);
        Ok(())
    }

    /// Execute every transferred non-module image, in plan order.
    pub fn execute_updates(&mut self, port: &mut impl DfuPort) -> Result<(), UpdateError> {
        if self.state != UpdateState::Transferred {
            warn!("update: execute requested while {:?}", self.state);
            return Err(UpdateError::InvalidState("nothing transferred to execute"));
        }
        self.begin_execution(port)
    }

    /// Cancel the run. Only legal before execution starts.
    pub fn stop_updates(&mut self, port: &mut impl DfuPort) -> Result<(), UpdateError> {
        match self.state {
            UpdateState::PreparingForTransfer
            | UpdateState::Transferring(_)
            | UpdateState::Transferred => {
                if let Some(writer) = self.writer.as_mut() {
                    if let Err(e) = writer.stop() {
                        debug!("update: writer not stoppable ({e}), dropping it");
                    }
                }
                self.teardown(port);
                self.transition(UpdateState::Stopped, port);
                Ok(())
            }
            other => {
                warn!("update: stop requested while {:?}", other);
                Err(UpdateError::InvalidState("no stoppable update"))
            }
        }
    }

    // ── Inbound events ───────────────────────────────────────

    /// Result of the oldest command this orchestrator issued.
    pub fn on_command_result(
        &mut self,
        result: Result<Response, TransportError>,
        port: &mut impl DfuPort,
    ) {
        if self.discard > 0 {
            self.discard -= 1;
            debug!("update: discarding stale result ({} left)", self.discard);
            return;
        }
        if self.outstanding == 0 {
            warn!("update: unexpected command result");
            return;
        }
        self.outstanding -= 1;

        match self.step {
            Step::BatteryBeforeTransfer | Step::BatteryBeforeExecute => {
                self.on_battery(result, port);
            }
            Step::ListModules => match Self::payload(result, ListModulesResponse::decode) {
                Ok(list) => {
                    self.to_deactivate = list
                        .modules
                        .iter()
                        .filter(|m| m.is_enabled)
                        .filter(|m| {
                            self.plan.iter().any(|u| {
                                u.module_id() == Some(m.module_id)
                                    && u.vendor_id == m.vendor_id
                                    && u.product_id == m.product_id
                            })
                        })
                        .map(|m| ModuleRequest {
                            vendor_id: m.vendor_id,
                            product_id: m.product_id,
                            module_id: m.module_id,
                        })
                        .collect();
                    self.next_deactivation(port);
                }
                Err(e) => {
                    let _ = self.fail(UpdateError::Execution(e), port);
                }
            },
            Step::DeactivateModule => match result {
                Ok(_) => self.next_deactivation(port),
                Err(e) => {
                    let _ = self.fail(UpdateError::Execution(e), port);
                }
            },
            Step::Writing => self.on_writer_result(result, port),
            Step::Execute => self.on_execute_ack(result, port),
            Step::None | Step::AwaitingConfirmation => {
                debug!("update: result with no command pending");
            }
        }
    }

    /// Any notification from the tag; only execute confirmations matter.
    pub fn on_notification(&mut self, notification: &Notification, port: &mut impl DfuPort) {
        let Some(decoded) = DfuExecuteNotification::from_notification(notification) else {
            return;
        };
        let note = match decoded {
            Ok(n) => n,
            Err(e) => {
                warn!("update: bad execute notification: {e}");
                return;
            }
        };
        let Some(current) = self.executing else {
            debug!("update: execute notification with nothing executing");
            return;
        };
        if !current.target.confirms_by_notification()
            || current.vendor_id != note.vendor_id
            || current.product_id != note.product_id
        {
            debug!(
                "update: execute notification for {}:{} ignored",
                note.vendor_id, note.product_id
            );
            return;
        }
        if !note.status.is_ok() {
            let _ = self.fail(
                UpdateError::Execution(TransportError::Device(note.status)),
                port,
            );
            return;
        }
        match self.step {
            Step::Execute => {
                debug!("update: execute confirmed before its acknowledgement");
                self.early_confirmation = true;
            }
            Step::AwaitingConfirmation => self.confirm_execution(port),
            _ => {}
        }
    }

    pub fn on_connection_status(&mut self, status: ConnectionStatus, port: &mut impl DfuPort) {
        debug!("update: connection {:?} -> {:?}", self.connection, status);
        self.connection = status;
        match status {
            ConnectionStatus::NotConnected => {
                if self.tag_execute_in_progress {
                    info!("update: tag rebooting to apply image");
                    self.tag_went_away = true;
                } else if self.state.is_running() {
                    let _ = self.fail(UpdateError::TagDisconnected, port);
                }
            }
            ConnectionStatus::Connected => {
                if self.tag_execute_in_progress && self.tag_went_away {
                    info!("update: tag reconnected after execute");
                    self.tag_execute_in_progress = false;
                    self.tag_went_away = false;
                    self.confirm_execution(port);
                }
            }
            ConnectionStatus::PartiallyConnectedForUpdate => {}
        }
    }

    /// The execution timer armed through the port fired.
    pub fn on_execution_timeout(&mut self, port: &mut impl DfuPort) {
        if !self.timer_armed {
            debug!("update: stale execution timer");
            return;
        }
        self.timer_armed = false;
        let _ = self.fail(UpdateError::InternalError("execution timeout"), port);
    }

    // ── Preconditions ────────────────────────────────────────

    fn on_battery(&mut self, result: Result<Response, TransportError>, port: &mut impl DfuPort) {
        let battery = match Self::payload(result, BatteryStatusResponse::decode) {
            Ok(b) => b,
            Err(e) => {
                let _ = self.fail(UpdateError::Execution(e), port);
                return;
            }
        };
        if battery.battery_level <= self.config.min_battery_percent {
            warn!(
                "update: battery {}% not above {}%",
                battery.battery_level, self.config.min_battery_percent
            );
            let _ = self.fail(UpdateError::LowBattery, port);
            return;
        }
        if self.connection == ConnectionStatus::NotConnected {
            let _ = self.fail(UpdateError::TagDisconnected, port);
            return;
        }

        if self.step == Step::BatteryBeforeExecute {
            self.execute_next(port);
        } else if self.plan.iter().any(|u| u.target.is_module()) {
            self.step = Step::ListModules;
            self.send(list_modules_request(), port);
        } else {
            self.start_transfer(port);
        }
    }

    fn next_deactivation(&mut self, port: &mut impl DfuPort) {
        if let Some(module) = self.to_deactivate.pop_front() {
            info!("update: deactivating module {}", module.module_id);
            self.step = Step::DeactivateModule;
            self.send(module.deactivate(), port);
        } else {
            self.start_transfer(port);
        }
    }

    // ── Transfer ─────────────────────────────────────────────

    fn start_transfer(&mut self, port: &mut impl DfuPort) {
        info!(
            "update: transferring {} images, {} bytes",
            self.plan.len(),
            self.total_bytes
        );
        self.transition(UpdateState::Transferring(0.0), port);
        self.start_next_writer(port);
    }

    fn start_next_writer(&mut self, port: &mut impl DfuPort) {
        let Some(info) = self.plan.get(self.next_transfer) else {
            self.transfer_finished(port);
            return;
        };
        let Some(image) = info.image.clone() else {
            let _ = self.fail(UpdateError::DataUnavailable, port);
            return;
        };
        let ctx = ImageTransferContext::new(image, info.vendor_id, info.product_id, info.component_id);
        let mut writer = ImageWriter::new(ctx, self.config.max_write_chunk);
        self.step = Step::Writing;
        // The writer sends exactly one command per step.
        self.outstanding += 1;
        writer.start(port);
        self.writer = Some(writer);
    }

    fn on_writer_result(&mut self, result: Result<Response, TransportError>, port: &mut impl DfuPort) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let state = writer.on_command_result(result, port);
        if !state.is_terminal() {
            self.outstanding += 1;
        }
        match state {
            WriterState::Complete => {
                self.bytes_done += writer.image_len();
                self.writer = None;
                self.next_transfer += 1;
                self.report_progress(port);
                self.start_next_writer(port);
            }
            WriterState::Error(e) => {
                let _ = self.fail(UpdateError::Transfer(e), port);
            }
            WriterState::Stopped | WriterState::Idle => {}
            _ => self.report_progress(port),
        }
    }

    fn report_progress(&mut self, port: &mut impl DfuPort) {
        let in_writer = self.writer.as_ref().map_or(0, ImageWriter::total_bytes_written);
        let percent = if self.total_bytes == 0 {
            100.0
        } else {
            (self.bytes_done + in_writer) as f32 / self.total_bytes as f32 * 100.0
        };
        if percent > self.progress {
            self.progress = percent;
            self.transition(UpdateState::Transferring(percent), port);
        }
    }

    fn transfer_finished(&mut self, port: &mut impl DfuPort) {
        self.step = Step::None;
        if self.plan.iter().all(|u| u.target.is_module()) {
            info!("update: module-only plan, nothing to execute");
            self.transition(UpdateState::Completed, port);
            self.teardown(port);
        } else if self.auto_execute {
            let _ = self.begin_execution(port);
        } else {
            self.transition(UpdateState::Transferred, port);
        }
    }

    // ── Execution ────────────────────────────────────────────

    fn begin_execution(&mut self, port: &mut impl DfuPort) -> Result<(), UpdateError> {
        self.execute_queue = self
            .plan
            .iter()
            .filter(|u| !u.target.is_module())
            .map(|u| ExecTarget {
                target: u.target,
                vendor_id: u.vendor_id,
                product_id: u.product_id,
            })
            .collect();
        self.transition(UpdateState::Executing, port);
        if self.connection == ConnectionStatus::NotConnected {
            return self.fail(UpdateError::TagDisconnected, port);
        }
        self.step = Step::BatteryBeforeExecute;
        self.send(battery_status_request(), port);
        Ok(())
    }

    fn execute_next(&mut self, port: &mut impl DfuPort) {
        let Some(next) = self.execute_queue.pop_front() else {
            self.executing = None;
            self.step = Step::None;
            self.transition(UpdateState::Completed, port);
            self.teardown(port);
            return;
        };
        info!(
            "update: executing {:?} {}:{}",
            next.target, next.vendor_id, next.product_id
        );
        self.executing = Some(next);
        self.early_confirmation = false;
        self.tag_execute_in_progress = next.target == UpdateTarget::Tag;
        self.tag_went_away = false;
        self.step = Step::Execute;
        self.send(
            DfuExecuteRequest {
                vendor_id: next.vendor_id,
                product_id: next.product_id,
            }
            .into_request(),
            port,
        );
        port.arm_execution_timer(self.config.execution_timeout());
        self.timer_armed = true;
    }

    fn on_execute_ack(&mut self, result: Result<Response, TransportError>, port: &mut impl DfuPort) {
        match result {
            Ok(_) => {
                self.step = Step::AwaitingConfirmation;
                if self.early_confirmation {
                    self.confirm_execution(port);
                }
            }
            // The tag may drop the link before acknowledging its own execute.
            Err(TransportError::Disconnected | TransportError::Timeout)
                if self.tag_execute_in_progress =>
            {
                debug!("update: tag execute unacknowledged, waiting for reconnect");
                self.step = Step::AwaitingConfirmation;
            }
            Err(e) => {
                let _ = self.fail(UpdateError::Execution(e), port);
            }
        }
    }

    fn confirm_execution(&mut self, port: &mut impl DfuPort) {
        if self.step == Step::Execute && self.outstanding > 0 {
            // The execute acknowledgement is still queued; it belongs to
            // this target, not the next one.
            self.outstanding -= 1;
            self.discard += 1;
        }
        if self.timer_armed {
            port.cancel_execution_timer();
            self.timer_armed = false;
        }
        self.executing = None;
        self.early_confirmation = false;
        self.execute_next(port);
    }

    // ── Plumbing ─────────────────────────────────────────────

    fn payload<T>(
        result: Result<Response, TransportError>,
        decode: fn(&[u8]) -> Result<T, DecodeError>,
    ) -> Result<T, TransportError> {
        let response = result?;
        Ok(decode(&response.payload)?)
    }

    fn send(&mut self, request: Request, port: &mut impl DfuPort) {
        self.outstanding += 1;
        port.send_command(request);
    }

    fn fail(&mut self, err: UpdateError, port: &mut impl DfuPort) -> Result<(), UpdateError> {
        warn!("update: failed: {err}");
        self.teardown(port);
        self.transition(UpdateState::Error(err), port);
        Err(err)
    }

    /// Release everything held by the current run.
    fn teardown(&mut self, port: &mut impl DfuPort) {
        if self.timer_armed {
            port.cancel_execution_timer();
            self.timer_armed = false;
        }
        self.discard += self.outstanding;
        self.outstanding = 0;
        self.writer = None;
        self.step = Step::None;
        self.to_deactivate.clear();
        self.executing = None;
        self.early_confirmation = false;
        self.tag_execute_in_progress = false;
        self.tag_went_away = false;
    }

    fn transition(&mut self, next: UpdateState, port: &mut impl DfuPort) {
        info!("update: {:?} -> {:?}", self.state, next);
        self.state = next;
        port.publish(&next);
    }
}
