//! Fuzz target: envelope and DFU payload decoders
//!
//! Arbitrary device bytes must never panic any decoder, and a response
//! that decodes must survive re-encoding.
//!
//! cargo fuzz run fuzz_envelope_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use taglink::protocol::dfu::{
    BatteryStatusResponse, DfuExecuteNotification, DfuStatusResponse, DfuWriteResponse,
    ListModulesResponse,
};
use taglink::protocol::message::{Notification, Request, Response};

fuzz_target!(|data: &[u8]| {
    if let Ok(resp) = Response::decode(data) {
        assert_eq!(Response::decode(&resp.encode()), Ok(resp));
    }
    if let Ok(n) = Notification::decode(data) {
        let _ = DfuExecuteNotification::from_notification(&n);
    }
    let _ = Request::decode(data);
    let _ = DfuStatusResponse::decode(data);
    let _ = DfuWriteResponse::decode(data);
    let _ = BatteryStatusResponse::decode(data);
    let _ = ListModulesResponse::decode(data);
});
