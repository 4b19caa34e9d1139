//! Scripted tag for integration tests.
//!
//! Implements [`Peripheral`] by reassembling command writes, answering them
//! the way a tag would, and queueing the resulting BLE callbacks in an
//! outbox. [`pump`] feeds the outbox back into the session until the
//! conversation settles.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use taglink::LinkError;
use taglink::app::events::LinkEvent;
use taglink::app::ports::{NotificationSink, Peripheral, RawDataSink, UpdateSink};
use taglink::app::session::TagSession;
use taglink::codec::crc16;
use taglink::dfu::update::{ConnectionStatus, UpdateState};
use taglink::protocol::dfu::{
    BatteryStatusResponse, DfuExecuteNotification, DfuExecuteRequest, DfuPrepareRequest,
    DfuStatusRequest, DfuStatusResponse, DfuWriteRequest, DfuWriteResponse, ListModulesResponse,
    ModuleDescriptor, ModuleRequest,
};
use taglink::protocol::message::{Notification, Opcode, Request, RequestId, Response, Status};
use taglink::transport::fragmenter::Fragmenter;
use taglink::transport::{Characteristic, WriteMode};

/// `(vendor_id, product_id, component_id)`
pub type ComponentKey = (u32, u32, u32);

pub const TAG_VENDOR: u32 = 0x0A;
pub const TAG_PRODUCT: u32 = 0x01;

#[derive(Debug, Clone, Default)]
pub struct StoredImage {
    pub data: Vec<u8>,
    pub final_size: u32,
    pub final_crc: u32,
}

/// One DFU write as seen by the tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub component: ComponentKey,
    pub offset: u32,
    pub len: usize,
}

pub struct TagState {
    pub mtu: usize,
    pub battery: u8,
    pub silent: bool,
    pub components: HashMap<ComponentKey, StoredImage>,
    pub modules: Vec<ModuleDescriptor>,
    pub deactivated: Vec<u32>,
    pub requests: Vec<(RequestId, Request)>,
    pub writes: Vec<WriteRecord>,
    pub executed: Vec<(u32, u32)>,
    pub raw_acks: Vec<Vec<u8>>,
    pub rssi_reads: usize,
    /// Gear execute notification is pushed ahead of the command response.
    pub notify_before_ack: bool,
    /// Gear never confirms execution.
    pub gear_never_confirms: bool,
    /// Tag drops the link instead of acknowledging its execute.
    pub reboot_without_ack: bool,
    /// Write acknowledgements report a wrong prefix CRC.
    pub corrupt_ack_crc: bool,
    pub outbox: VecDeque<LinkEvent>,
    rx: Fragmenter,
    current: Option<ComponentKey>,
}

impl TagState {
    fn new(mtu: usize) -> Self {
        Self {
            mtu,
            battery: 80,
            silent: false,
            components: HashMap::new(),
            modules: Vec::new(),
            deactivated: Vec::new(),
            requests: Vec::new(),
            writes: Vec::new(),
            executed: Vec::new(),
            raw_acks: Vec::new(),
            rssi_reads: 0,
            notify_before_ack: false,
            gear_never_confirms: false,
            reboot_without_ack: false,
            corrupt_ack_crc: false,
            outbox: VecDeque::new(),
            rx: Fragmenter::new(mtu),
            current: None,
        }
    }

    pub fn opcodes(&self) -> Vec<Opcode> {
        self.requests.iter().map(|(_, r)| r.opcode).collect()
    }

    /// Pretend the tag already holds `prefix` of `image` for `key`.
    pub fn preload(&mut self, key: ComponentKey, image: &[u8], prefix: usize) {
        self.components.insert(
            key,
            StoredImage {
                data: image[..prefix].to_vec(),
                final_size: image.len() as u32,
                final_crc: crc16::compute(image, 0).into(),
            },
        );
    }

    fn queue_packet(&mut self, characteristic: Characteristic, packet: &[u8]) {
        for frag in Fragmenter::new(self.mtu).fragments(packet) {
            self.outbox.push_back(LinkEvent::CharacteristicUpdate {
                characteristic,
                result: Ok(frag.to_vec()),
            });
        }
    }

    fn reply(&mut self, id: RequestId, status: Status, payload: Vec<u8>) {
        let resp = Response {
            id,
            status,
            payload,
        };
        self.queue_packet(Characteristic::Response, &resp.encode());
    }

    pub fn notify(&mut self, notification: &Notification) {
        self.queue_packet(Characteristic::Notification, &notification.encode());
    }

    fn on_request(&mut self, id: RequestId, request: Request) {
        self.requests.push((id, request.clone()));
        if self.silent {
            return;
        }
        match request.opcode {
            Opcode::BatteryStatus => {
                let payload = BatteryStatusResponse {
                    battery_level: self.battery,
                    charging: false,
                }
                .encode();
                self.reply(id, Status::Ok, payload);
            }
            Opcode::ListModules => {
                let payload = ListModulesResponse {
                    modules: self.modules.clone(),
                }
                .encode();
                self.reply(id, Status::Ok, payload);
            }
            Opcode::DeactivateModule => {
                let m = ModuleRequest::decode(&request.payload).unwrap();
                self.deactivated.push(m.module_id);
                for module in &mut self.modules {
                    if module.module_id == m.module_id {
                        module.is_enabled = false;
                    }
                }
                self.reply(id, Status::Ok, vec![]);
            }
            Opcode::DfuStatus => {
                let s = DfuStatusRequest::decode(&request.payload).unwrap();
                let key = (s.vendor_id, s.product_id, s.component_id);
                self.current = Some(key);
                let stored = self.components.get(&key).cloned().unwrap_or_default();
                let payload = DfuStatusResponse {
                    current_size: stored.data.len() as u32,
                    current_crc: crc16::compute(&stored.data, 0).into(),
                    final_size: stored.final_size,
                    final_crc: stored.final_crc,
                }
                .encode();
                self.reply(id, Status::Ok, payload);
            }
            Opcode::DfuPrepare => {
                let p = DfuPrepareRequest::decode(&request.payload).unwrap();
                let key = (p.vendor_id, p.product_id, p.component_id);
                self.current = Some(key);
                self.components.insert(
                    key,
                    StoredImage {
                        data: Vec::new(),
                        final_size: p.final_size,
                        final_crc: p.final_crc,
                    },
                );
                self.reply(id, Status::Ok, vec![]);
            }
            Opcode::DfuWrite => {
                let w = DfuWriteRequest::decode(&request.payload).unwrap();
                let Some(key) = self.current else {
                    self.reply(id, Status::InvalidState, vec![]);
                    return;
                };
                self.writes.push(WriteRecord {
                    component: key,
                    offset: w.offset,
                    len: w.data.len(),
                });
                let stored = self.components.entry(key).or_default();
                stored.data.truncate(w.offset as usize);
                stored.data.extend_from_slice(&w.data);
                let mut crc = u32::from(crc16::compute(&stored.data, 0));
                if self.corrupt_ack_crc {
                    crc ^= 0xFFFF;
                }
                let payload = DfuWriteResponse {
                    offset: stored.data.len() as u32,
                    crc,
                }
                .encode();
                self.reply(id, Status::Ok, payload);
            }
            Opcode::DfuExecute => {
                let e = DfuExecuteRequest::decode(&request.payload).unwrap();
                self.executed.push((e.vendor_id, e.product_id));
                let is_tag = (e.vendor_id, e.product_id) == (TAG_VENDOR, TAG_PRODUCT);
                if is_tag {
                    if !self.reboot_without_ack {
                        self.reply(id, Status::Ok, vec![]);
                    }
                    self.outbox
                        .push_back(LinkEvent::ConnectionChanged(ConnectionStatus::NotConnected));
                    self.outbox
                        .push_back(LinkEvent::ConnectionChanged(ConnectionStatus::Connected));
                    return;
                }
                let confirmation = DfuExecuteNotification {
                    vendor_id: e.vendor_id,
                    product_id: e.product_id,
                    status: Status::Ok,
                }
                .into_notification();
                if self.gear_never_confirms {
                    self.reply(id, Status::Ok, vec![]);
                } else if self.notify_before_ack {
                    self.notify(&confirmation);
                    self.reply(id, Status::Ok, vec![]);
                } else {
                    self.reply(id, Status::Ok, vec![]);
                    self.notify(&confirmation);
                }
            }
            _ => self.reply(id, Status::Unsupported, vec![]),
        }
    }
}

/// Peripheral handle; clones share one tag.
#[derive(Clone)]
pub struct MockTag {
    pub state: Arc<Mutex<TagState>>,
}

impl MockTag {
    pub fn new(mtu: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(TagState::new(mtu))),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut TagState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}

impl Peripheral for MockTag {
    fn write_value(
        &mut self,
        data: &[u8],
        characteristic: Characteristic,
        _mode: WriteMode,
    ) -> Result<(), LinkError> {
        let mut tag = self.state.lock().unwrap();
        match characteristic {
            Characteristic::Command => {
                if let Some(packet) = tag.rx.packet(data) {
                    let (id, request) = Request::decode(&packet).unwrap();
                    tag.on_request(id, request);
                }
                Ok(())
            }
            Characteristic::RawData => {
                tag.raw_acks.push(data.to_vec());
                Ok(())
            }
            _ => Err(LinkError::CharacteristicUnavailable),
        }
    }

    fn read_rssi(&mut self) -> Result<(), LinkError> {
        let mut tag = self.state.lock().unwrap();
        tag.rssi_reads += 1;
        tag.outbox.push_back(LinkEvent::RssiUpdate(-58));
        Ok(())
    }
}

/// Feed the tag's outbox into the session until it is empty.
pub fn pump(session: &mut TagSession<MockTag>, tag: &MockTag) {
    loop {
        let next = tag.state.lock().unwrap().outbox.pop_front();
        match next {
            Some(event) => session.dispatch(event),
            None => break,
        }
    }
}

// ── Recording sinks ───────────────────────────────────────────

#[derive(Clone, Default)]
pub struct StateLog(pub Arc<Mutex<Vec<UpdateState>>>);

#[allow(dead_code)]
impl StateLog {
    pub fn states(&self) -> Vec<UpdateState> {
        self.0.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<UpdateState> {
        self.0.lock().unwrap().last().copied()
    }

    pub fn progress(&self) -> Vec<f32> {
        self.states()
            .into_iter()
            .filter_map(|s| match s {
                UpdateState::Transferring(p) => Some(p),
                _ => None,
            })
            .collect()
    }
}

impl UpdateSink for StateLog {
    fn on_update_state(&mut self, state: &UpdateState) {
        self.0.lock().unwrap().push(*state);
    }
}

#[derive(Clone, Default)]
pub struct NotificationLog(pub Arc<Mutex<Vec<Notification>>>);

impl NotificationSink for NotificationLog {
    fn on_notification(&mut self, notification: &Notification) {
        self.0.lock().unwrap().push(notification.clone());
    }
}

#[derive(Clone, Default)]
pub struct RawLog(pub Arc<Mutex<Vec<(u8, Vec<u8>)>>>);

impl RawDataSink for RawLog {
    fn on_raw_data(&mut self, sequence: u8, payload: &[u8]) {
        self.0.lock().unwrap().push((sequence, payload.to_vec()));
    }
}
