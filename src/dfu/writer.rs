//! Image writer: transfers one firmware image to one device component.
//!
//! ```text
//! Idle ──start──▶ CheckingStatus ──┬── reset ─────▶ PreparingForWrite ──▶ Writing(0)
//!                                  ├── partial ───▶ Writing(current_size)
//!                                  └── complete ──▶ Complete
//! Writing(n) ──ack(n')──▶ Writing(n') | Complete | Error(CrcMismatch | DataCorruption)
//! PreparingForWrite | Writing ──stop──▶ Stopped
//! ```
//!
//! Every write acknowledgement short of the end is checked against the
//! CRC16 (seed 0) of the image prefix the device claims to hold. A mismatch
//! is terminal; recovery means starting a fresh writer, which re-reads the
//! device status.

use log::{debug, info, warn};

use crate::app::ports::CommandPort;
use crate::codec::crc16;
use crate::config::MAX_WRITE_CHUNK;
use crate::error::{TransportError, WriterError};
use crate::protocol::dfu::{
    DfuPrepareRequest, DfuStatusRequest, DfuStatusResponse, DfuWriteRequest, DfuWriteResponse,
};
use crate::protocol::message::Response;

/// Image plus its addressing. The image CRC is computed once here.
#[derive(Debug, Clone)]
pub struct ImageTransferContext {
    image: Vec<u8>,
    vendor_id: u32,
    product_id: u32,
    component_id: u32,
    image_crc: u16,
}

impl ImageTransferContext {
    pub fn new(image: Vec<u8>, vendor_id: u32, product_id: u32, component_id: u32) -> Self {
        let image_crc = crc16::compute(&image, crc16::IMAGE_SEED);
        Self {
            image,
            vendor_id,
            product_id,
            component_id,
            image_crc,
        }
    }

    pub fn image_len(&self) -> usize {
        self.image.len()
    }

    pub fn image_crc(&self) -> u16 {
        self.image_crc
    }

    fn prefix_crc(&self, len: usize) -> u16 {
        crc16::compute(&self.image[..len], crc16::IMAGE_SEED)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Idle,
    CheckingStatus,
    PreparingForWrite,
    /// Next chunk goes out at this offset.
    Writing(usize),
    Complete,
    Stopped,
    Error(WriterError),
}

impl WriterState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Stopped | Self::Error(_))
    }
}

pub struct ImageWriter {
    ctx: ImageTransferContext,
    state: WriterState,
    chunk_size: usize,
    total_bytes_written: usize,
}

impl ImageWriter {
    pub fn new(ctx: ImageTransferContext, chunk_size: usize) -> Self {
        Self {
            ctx,
            state: WriterState::Idle,
            chunk_size: chunk_size.clamp(1, MAX_WRITE_CHUNK),
            total_bytes_written: 0,
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Bytes the device has acknowledged so far.
    pub fn total_bytes_written(&self) -> usize {
        self.total_bytes_written
    }

    pub fn image_len(&self) -> usize {
        self.ctx.image_len()
    }

    /// Ask the device for its current progress on this component.
    pub fn start(&mut self, port: &mut impl CommandPort) -> WriterState {
        if self.state != WriterState::Idle {
            return self.fail(WriterError::InternalError("writer already started"));
        }
        self.set_state(WriterState::CheckingStatus);
        port.send_command(
            DfuStatusRequest {
                vendor_id: self.ctx.vendor_id,
                product_id: self.ctx.product_id,
                component_id: self.ctx.component_id,
            }
            .into_request(),
        );
        self.state
    }

    /// Cancel an active transfer. Only legal while preparing or writing.
    pub fn stop(&mut self) -> Result<(), WriterError> {
        match self.state {
            WriterState::PreparingForWrite | WriterState::Writing(_) => {
                self.set_state(WriterState::Stopped);
                Ok(())
            }
            other => {
                let err = WriterError::InternalError("stop outside an active transfer");
                warn!("writer: stop requested in {:?}", other);
                if !other.is_terminal() {
                    self.set_state(WriterState::Error(err));
                }
                Err(err)
            }
        }
    }

    /// Feed the result of the command this writer last sent.
    pub fn on_command_result(
        &mut self,
        result: Result<Response, TransportError>,
        port: &mut impl CommandPort,
    ) -> WriterState {
        if self.state.is_terminal() {
            debug!("writer: result after {:?} ignored", self.state);
            return self.state;
        }
        let response = match result {
            Ok(r) => r,
            Err(e) => return self.fail(e.into()),
        };
        match self.state {
            WriterState::CheckingStatus => match DfuStatusResponse::decode(&response.payload) {
                Ok(status) => self.on_status(status, port),
                Err(e) => self.fail(TransportError::from(e).into()),
            },
            WriterState::PreparingForWrite => {
                self.total_bytes_written = 0;
                self.write_at(0, port)
            }
            WriterState::Writing(_) => match DfuWriteResponse::decode(&response.payload) {
                Ok(ack) => self.on_write_ack(ack, port),
                Err(e) => self.fail(TransportError::from(e).into()),
            },
            _ => self.fail(WriterError::InternalError("unexpected command result")),
        }
    }

    fn on_status(&mut self, status: DfuStatusResponse, port: &mut impl CommandPort) -> WriterState {
        let len = self.ctx.image_len();
        let current = status.current_size as usize;
        let same_image = status.final_size as usize == len
            && status.final_crc == u32::from(self.ctx.image_crc());
        let prefix_ok =
            current <= len && status.current_crc == u32::from(self.ctx.prefix_crc(current));

        if !same_image || !prefix_ok {
            info!(
                "writer: component {} needs a fresh transfer ({} bytes)",
                self.ctx.component_id, len
            );
            self.set_state(WriterState::PreparingForWrite);
            port.send_command(
                DfuPrepareRequest {
                    vendor_id: self.ctx.vendor_id,
                    product_id: self.ctx.product_id,
                    component_id: self.ctx.component_id,
                    final_size: len as u32,
                    final_crc: u32::from(self.ctx.image_crc()),
                }
                .into_request(),
            );
            return self.state;
        }

        self.total_bytes_written = current;
        if current == len {
            info!("writer: component {} already up to date", self.ctx.component_id);
            self.set_state(WriterState::Complete);
            return self.state;
        }
        info!("writer: resuming component {} at {}", self.ctx.component_id, current);
        self.write_at(current, port)
    }

    fn on_write_ack(&mut self, ack: DfuWriteResponse, port: &mut impl CommandPort) -> WriterState {
        let len = self.ctx.image_len();
        let offset = ack.offset as usize;
        if offset > len {
            warn!("writer: device acknowledged offset {} past image end {}", offset, len);
            return self.fail(WriterError::DataCorruption);
        }
        if offset == len {
            self.total_bytes_written = len;
            self.set_state(WriterState::Complete);
            return self.state;
        }
        if ack.crc != u32::from(self.ctx.prefix_crc(offset)) {
            warn!("writer: CRC mismatch at offset {}", offset);
            return self.fail(WriterError::CrcMismatch);
        }
        self.total_bytes_written = offset;
        self.write_at(offset, port)
    }

    fn write_at(&mut self, offset: usize, port: &mut impl CommandPort) -> WriterState {
        let end = (offset + self.chunk_size).min(self.ctx.image_len());
        self.state = WriterState::Writing(offset);
        port.send_command(
            DfuWriteRequest {
                offset: offset as u32,
                data: self.ctx.image[offset..end].to_vec(),
            }
            .into_request(),
        );
        self.state
    }

    fn fail(&mut self, err: WriterError) -> WriterState {
        self.set_state(WriterState::Error(err));
        self.state
    }

    fn set_state(&mut self, next: WriterState) {
        debug!("writer: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
