//! C ABI for linking rblb-core as a static library from C/C++ firmware.
//! The firmware injects its UART transmit routine, millisecond tick and packet callback
//! as plain function pointers sharing one opaque context pointer.

use std::ffi::c_void;
use std::os::raw::c_int;
use std::slice;

use crate::core::{BusCore, BusEvent, Clock, PacketHandler, Transport};
use crate::identity::Uid;
use crate::protocol::{Header, PROTOCOL_VERSION};
use crate::reader::DropReason;

pub type TransmitFn = extern "C" fn(ctx: *mut c_void, bytes: *const u8, len: usize);
pub type MillisFn = extern "C" fn(ctx: *mut c_void) -> u32;
pub type PacketFn =
    extern "C" fn(ctx: *mut c_void, command: u8, address: u64, payload: *const u8, len: u16);

/// `rblb_handle_byte` result codes.
pub const RBLB_EVENT_NONE: c_int = 0;
pub const RBLB_EVENT_DELIVERED: c_int = 1;
pub const RBLB_EVENT_NOT_ADDRESSED: c_int = 2;
pub const RBLB_EVENT_DISCOVERY: c_int = 3;
pub const RBLB_EVENT_BAD_CHECKSUM: c_int = -2;
pub const RBLB_EVENT_OVERSIZED: c_int = -3;

struct FfiTransport {
    ctx: *mut c_void,
    f: TransmitFn,
}

impl Transport for FfiTransport {
    fn transmit(&mut self, bytes: &[u8]) {
        (self.f)(self.ctx, bytes.as_ptr(), bytes.len());
    }
}

struct FfiClock {
    ctx: *mut c_void,
    f: MillisFn,
}

impl Clock for FfiClock {
    fn now_ms(&self) -> u32 {
        (self.f)(self.ctx)
    }
}

struct FfiHandler {
    ctx: *mut c_void,
    f: PacketFn,
}

impl PacketHandler for FfiHandler {
    fn on_packet(&mut self, header: &Header, payload: &[u8]) {
        (self.f)(
            self.ctx,
            header.command,
            header.address.0,
            payload.as_ptr(),
            header.length,
        );
    }
}

type FfiBus = BusCore<FfiTransport, FfiClock, FfiHandler>;

/// Returns the protocol version. Also keeps the staticlib exporting a C symbol.
#[no_mangle]
pub extern "C" fn rblb_version() -> u8 {
    PROTOCOL_VERSION
}

/// Create a bus participant. `uid == 0` is the host. Returns opaque handle, or null if any
/// function pointer is null.
#[no_mangle]
pub extern "C" fn rblb_create(
    uid: u64,
    ctx: *mut c_void,
    transmit: Option<TransmitFn>,
    millis: Option<MillisFn>,
    on_packet: Option<PacketFn>,
) -> *mut c_void {
    let (Some(transmit), Some(millis), Some(on_packet)) = (transmit, millis, on_packet) else {
        return std::ptr::null_mut();
    };
    let bus: FfiBus = BusCore::new(
        Uid(uid),
        FfiTransport { ctx, f: transmit },
        FfiClock { ctx, f: millis },
        FfiHandler { ctx, f: on_packet },
    );
    Box::into_raw(Box::new(bus)) as *mut c_void
}

/// Destroy a participant. No-op if h is null.
#[no_mangle]
pub extern "C" fn rblb_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut FfiBus) };
}

/// Feed one received byte (e.g. from the UART RX interrupt). Returns an RBLB_EVENT_* code,
/// or -1 if h is null.
#[no_mangle]
pub extern "C" fn rblb_handle_byte(h: *mut c_void, byte: u8) -> c_int {
    if h.is_null() {
        return -1;
    }
    let bus = unsafe { &mut *(h as *mut FfiBus) };
    match bus.handle_byte(byte) {
        BusEvent::Idle | BusEvent::Pending => RBLB_EVENT_NONE,
        BusEvent::Delivered(_) => RBLB_EVENT_DELIVERED,
        BusEvent::NotAddressed(_) => RBLB_EVENT_NOT_ADDRESSED,
        BusEvent::Discovery(_) => RBLB_EVENT_DISCOVERY,
        BusEvent::Dropped(DropReason::ChecksumMismatch { .. }) => RBLB_EVENT_BAD_CHECKSUM,
        BusEvent::Dropped(DropReason::Oversized { .. }) => RBLB_EVENT_OVERSIZED,
    }
}

/// Build and transmit a packet. A null payload is only accepted with size 0.
/// Returns total bytes handed to transmit, or -1 on error (nothing transmitted).
#[no_mangle]
pub extern "C" fn rblb_send_packet(
    h: *mut c_void,
    command: u8,
    dst_uid: u64,
    payload: *const u8,
    payload_size: usize,
) -> c_int {
    if h.is_null() || (payload.is_null() && payload_size > 0) {
        return -1;
    }
    let bus = unsafe { &mut *(h as *mut FfiBus) };
    let payload = if payload_size == 0 {
        &[][..]
    } else {
        unsafe { slice::from_raw_parts(payload, payload_size) }
    };
    match bus.send_packet(command, Uid(dst_uid), payload) {
        Ok(n) => n as c_int,
        Err(_) => -1,
    }
}

/// 1 if this node has been confirmed present by a discovery round, 0 if not, -1 if h null.
#[no_mangle]
pub extern "C" fn rblb_is_discovered(h: *mut c_void) -> c_int {
    if h.is_null() {
        return -1;
    }
    let bus = unsafe { &*(h as *const FfiBus) };
    bus.is_discovered() as c_int
}
