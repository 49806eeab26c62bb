//! Host-driven API: BusCore receives bytes from the host, reports what each byte caused,
//! and calls out through injected transport, clock and packet handler.

use std::time::Instant;

use tracing::{debug, trace};

use crate::config::{Config, ConfigError};
use crate::identity::{Role, Uid};
use crate::integrity::{Checksum, Crc16};
use crate::protocol::{Command, Header};
use crate::reader::{DropReason, FrameReader, ReadOutcome, ReaderStats};
use crate::router::{BurstScheduler, DiscoveryEvent, Route, Router};
use crate::wire::{self, PacketEncodeError};

/// Byte sink onto the physical bus. Fire-and-forget.
pub trait Transport {
    fn transmit(&mut self, bytes: &[u8]);
}

impl<F: FnMut(&[u8])> Transport for F {
    fn transmit(&mut self, bytes: &[u8]) {
        self(bytes)
    }
}

/// Monotonic millisecond clock. Wraps at `u32::MAX`.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

impl<F: Fn() -> u32> Clock for F {
    fn now_ms(&self) -> u32 {
        self()
    }
}

/// Clock based on `std::time::Instant`, counting from construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u32 {
        // Truncation is the intended wrap.
        self.start.elapsed().as_millis() as u32
    }
}

/// Application callback. Invoked at most once per deliverable frame, from inside `handle_byte`.
pub trait PacketHandler {
    fn on_packet(&mut self, header: &Header, payload: &[u8]);
}

impl<F: FnMut(&Header, &[u8])> PacketHandler for F {
    fn on_packet(&mut self, header: &Header, payload: &[u8]) {
        self(header, payload)
    }
}

/// What one received byte caused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// Raw stream byte outside a frame.
    Idle,
    /// Frame in progress.
    Pending,
    /// Valid frame handed to the packet handler.
    Delivered(Header),
    /// Valid frame for another node; ignored.
    NotAddressed(Header),
    /// Valid discovery frame consumed internally.
    Discovery(DiscoveryEvent),
    /// Complete frame discarded.
    Dropped(DropReason),
}

/// One bus participant: frame reader, router and sender sharing the injected collaborators.
pub struct BusCore<T, K, H, C = Crc16> {
    reader: FrameReader<C>,
    router: Router,
    transport: T,
    clock: K,
    handler: H,
    max_payload: usize,
}

impl<T: Transport, K: Clock, H: PacketHandler> BusCore<T, K, H, Crc16> {
    /// Participant with default configuration. `Uid::HOST` makes this the host.
    pub fn new(uid: Uid, transport: T, clock: K, handler: H) -> Self {
        let config = Config::default();
        Self {
            reader: FrameReader::new(),
            router: Router::new(uid),
            transport,
            clock,
            handler,
            max_payload: config.max_payload,
        }
    }

    pub fn with_config(
        uid: Uid,
        config: Config,
        transport: T,
        clock: K,
        handler: H,
    ) -> Result<Self, ConfigError> {
        Self::with_checksum(uid, config, transport, clock, handler, Crc16)
    }
}

impl<T: Transport, K: Clock, H: PacketHandler, C: Checksum> BusCore<T, K, H, C> {
    pub fn with_checksum(
        uid: Uid,
        config: Config,
        transport: T,
        clock: K,
        handler: H,
        checksum: C,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            reader: FrameReader::with_checksum(config, checksum)?,
            router: Router::new(uid),
            transport,
            clock,
            handler,
            max_payload: config.max_payload,
        })
    }

    pub fn set_burst_scheduler(&mut self, scheduler: Box<dyn BurstScheduler + Send>) {
        self.router.set_burst_scheduler(scheduler);
    }

    /// Feed one received byte. Call in arrival order from a single context.
    pub fn handle_byte(&mut self, byte: u8) -> BusEvent {
        let now = self.clock.now_ms();
        match self.reader.handle_byte(byte, now) {
            ReadOutcome::Raw => BusEvent::Idle,
            ReadOutcome::Pending => BusEvent::Pending,
            ReadOutcome::Dropped(reason) => BusEvent::Dropped(reason),
            ReadOutcome::Packet(packet) => {
                let header = packet.header;
                match self.router.route(&header, &packet.payload) {
                    Route::NotAddressed => {
                        trace!(address = %header.address, "frame for another node");
                        BusEvent::NotAddressed(header)
                    }
                    Route::Discovery(event) => BusEvent::Discovery(event),
                    Route::Deliver => {
                        self.handler.on_packet(&header, &packet.payload);
                        BusEvent::Delivered(header)
                    }
                }
            }
        }
    }

    /// Feed a run of bytes. Returns how many frames reached the packet handler.
    pub fn handle_bytes(&mut self, bytes: &[u8]) -> usize {
        bytes
            .iter()
            .filter(|&&b| matches!(self.handle_byte(b), BusEvent::Delivered(_)))
            .count()
    }

    /// Build a frame and hand it to the transport in one call. Returns total bytes written.
    pub fn send_packet(
        &mut self,
        command: u8,
        dst: Uid,
        payload: &[u8],
    ) -> Result<usize, SendError> {
        if payload.len() > self.max_payload {
            return Err(SendError::PayloadTooLarge {
                len: payload.len(),
                max: self.max_payload,
            });
        }
        if !crate::protocol::is_addressed_command(command) {
            return Err(SendError::RawCommand(command));
        }
        let frame = wire::encode_packet(self.reader.checksum(), command, dst, payload)?;
        debug!(
            command,
            dst = %dst,
            len = payload.len(),
            "sending packet"
        );
        self.transport.transmit(&frame);
        Ok(frame.len())
    }

    /// Host convenience: broadcast one discovery command.
    pub fn send_discovery(&mut self, command: Command, payload: &[u8]) -> Result<usize, SendError> {
        if !command.is_discovery() {
            return Err(SendError::NotDiscovery(command.as_byte()));
        }
        self.send_packet(command.as_byte(), Uid::BROADCAST, payload)
    }

    pub fn uid(&self) -> Uid {
        self.router.uid()
    }

    pub fn role(&self) -> Role {
        self.router.role()
    }

    pub fn is_discovered(&self) -> bool {
        self.router.is_discovered()
    }

    pub fn reader_stats(&self) -> ReaderStats {
        self.reader.stats()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

/// Error sending a packet. Nothing was transmitted.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SendError {
    #[error("payload of {len} bytes exceeds maximum {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("command {0:#04x} is not an addressed command")]
    RawCommand(u8),
    #[error("command {0:#04x} is not a discovery command")]
    NotDiscovery(u8),
    #[error(transparent)]
    Encode(#[from] PacketEncodeError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        DEFAULT_MAX_PAYLOAD, DISCOVERY_INIT, DISCOVERY_SILENCE, HEADER_SIZE, PACKET_TIMEOUT_MS,
    };
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    type Received = Rc<RefCell<Vec<(Header, Vec<u8>)>>>;
    type Wire = Rc<RefCell<Vec<u8>>>;

    /// A test participant whose transport appends to `wire` and whose clock is `now`.
    #[allow(clippy::type_complexity)]
    fn participant(
        uid: Uid,
        wire: &Wire,
        now: &Rc<Cell<u32>>,
        received: &Received,
    ) -> BusCore<impl FnMut(&[u8]), impl Fn() -> u32, impl FnMut(&Header, &[u8])> {
        let wire = wire.clone();
        let now = now.clone();
        let received = received.clone();
        BusCore::new(
            uid,
            move |b: &[u8]| wire.borrow_mut().extend_from_slice(b),
            move || now.get(),
            move |h: &Header, p: &[u8]| received.borrow_mut().push((*h, p.to_vec())),
        )
    }

    struct Harness {
        wire: Wire,
        now: Rc<Cell<u32>>,
        received: Received,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                wire: Rc::new(RefCell::new(Vec::new())),
                now: Rc::new(Cell::new(1_000)),
                received: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn take_wire(&self) -> Vec<u8> {
            std::mem::take(&mut *self.wire.borrow_mut())
        }

        fn advance(&self, ms: u32) {
            self.now.set(self.now.get().wrapping_add(ms));
        }
    }

    #[test]
    fn roundtrip_random_payloads() {
        let h = Harness::new();
        let mut sender = participant(Uid(1), &h.wire, &h.now, &h.received);
        let mut host = participant(Uid::HOST, &h.wire, &h.now, &h.received);
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for len in [0usize, 1, 2, 17, 128, DEFAULT_MAX_PAYLOAD] {
            let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let cmd: u8 = rng.gen_range(0x83..=0xFF);
            let dst = Uid(rng.gen());
            let n = sender.send_packet(cmd, dst, &payload).unwrap();
            let bytes = h.take_wire();
            assert_eq!(n, bytes.len());
            assert_eq!(host.handle_bytes(&bytes), 1);
            let got = h.received.borrow_mut().pop().unwrap();
            assert_eq!(got.0.command, cmd);
            assert_eq!(got.0.address, dst);
            assert_eq!(got.0.length as usize, len);
            assert_eq!(got.1, payload);
        }
        assert!(h.received.borrow().is_empty());
    }

    #[test]
    fn single_bit_flips_never_deliver() {
        let h = Harness::new();
        let mut node = participant(Uid(9), &h.wire, &h.now, &h.received);
        let good = wire::encode_packet(&Crc16, 0x90, Uid(9), b"bit flip target").unwrap();
        let covered = good.len() - 2;

        for bit in 0..covered * 8 {
            let mut bad = good.clone();
            bad[bit / 8] ^= 1 << (bit % 8);
            node.handle_bytes(&bad);
            assert!(h.received.borrow().is_empty(), "bit {} delivered", bit);

            // Line goes quiet, then a well-formed frame still gets through.
            h.advance(PACKET_TIMEOUT_MS);
            assert_eq!(node.handle_bytes(&good), 1);
            h.received.borrow_mut().clear();
            h.advance(PACKET_TIMEOUT_MS);
        }
    }

    #[test]
    fn payload_corruption_resyncs_without_gap() {
        let h = Harness::new();
        let mut node = participant(Uid(9), &h.wire, &h.now, &h.received);
        let good = wire::encode_packet(&Crc16, 0x90, Uid(9), b"payload").unwrap();
        let mut bad = good.clone();
        bad[HEADER_SIZE + 3] ^= 0x08;
        let mut events = Vec::new();
        for &b in &bad {
            events.push(node.handle_byte(b));
        }
        assert!(matches!(
            events.last(),
            Some(BusEvent::Dropped(DropReason::ChecksumMismatch { .. }))
        ));
        assert_eq!(node.handle_bytes(&good), 1);
    }

    #[test]
    fn timeout_then_valid_frame() {
        let h = Harness::new();
        let mut node = participant(Uid(9), &h.wire, &h.now, &h.received);
        let first = wire::encode_packet(&Crc16, 0x90, Uid(9), b"first").unwrap();
        let second = wire::encode_packet(&Crc16, 0x91, Uid(9), b"second").unwrap();
        node.handle_bytes(&first[..7]);
        h.advance(PACKET_TIMEOUT_MS);
        assert_eq!(node.handle_bytes(&second), 1);
        let got = h.received.borrow();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].1, b"second");
        assert_eq!(node.reader_stats().timeouts, 1);
    }

    #[test]
    fn oversized_then_valid_frame() {
        let h = Harness::new();
        let mut node = participant(Uid(9), &h.wire, &h.now, &h.received);
        let declared = (DEFAULT_MAX_PAYLOAD * 2) as u16;
        let mut bad = vec![0x90];
        bad.extend_from_slice(&Uid(9).to_le_bytes());
        bad.extend_from_slice(&declared.to_le_bytes());
        bad.extend(std::iter::repeat(0x42).take(declared as usize + 2));
        assert_eq!(node.handle_bytes(&bad), 0);
        let good = wire::encode_packet(&Crc16, 0x90, Uid(9), b"ok").unwrap();
        assert_eq!(node.handle_bytes(&good), 1);
        assert_eq!(node.reader_stats().oversized, 1);
    }

    #[test]
    fn node_addressing_filter() {
        let h = Harness::new();
        let me = Uid(0x1234);
        let mut node = participant(me, &h.wire, &h.now, &h.received);
        let other = wire::encode_packet(&Crc16, 0x90, Uid(0x9999), b"x").unwrap();
        let mine = wire::encode_packet(&Crc16, 0x90, me, b"x").unwrap();
        let all = wire::encode_packet(&Crc16, 0x90, Uid::BROADCAST, b"x").unwrap();

        assert_eq!(node.handle_bytes(&other), 0);
        assert!(h.received.borrow().is_empty());
        assert_eq!(node.handle_bytes(&mine), 1);
        assert_eq!(node.handle_bytes(&all), 1);
        assert_eq!(h.received.borrow().len(), 2);
    }

    #[test]
    fn not_addressed_event_reported() {
        let h = Harness::new();
        let mut node = participant(Uid(1), &h.wire, &h.now, &h.received);
        let other = wire::encode_packet(&Crc16, 0x90, Uid(2), &[]).unwrap();
        let last = other.iter().map(|&b| node.handle_byte(b)).last().unwrap();
        assert!(matches!(last, BusEvent::NotAddressed(hd) if hd.address == Uid(2)));
    }

    #[test]
    fn discovery_round_from_host() {
        let h = Harness::new();
        let mut host = participant(Uid::HOST, &h.wire, &h.now, &h.received);
        let node_received: Received = Rc::new(RefCell::new(Vec::new()));
        let mut node = participant(Uid(77), &h.wire, &h.now, &node_received);

        host.send_discovery(Command::DiscoverySilence, &[]).unwrap();
        node.handle_bytes(&h.take_wire());
        assert!(node.is_discovered());

        host.send_discovery(Command::DiscoveryInit, &[]).unwrap();
        let events: Vec<BusEvent> = h.take_wire().iter().map(|&b| node.handle_byte(b)).collect();
        assert_eq!(
            events.last(),
            Some(&BusEvent::Discovery(DiscoveryEvent::Init))
        );
        assert!(!node.is_discovered());

        host.send_discovery(Command::DiscoveryBurst, &[]).unwrap();
        node.handle_bytes(&h.take_wire());
        assert!(!node.is_discovered());

        host.send_discovery(Command::DiscoverySilence, &[]).unwrap();
        node.handle_bytes(&h.take_wire());
        assert!(node.is_discovered());

        assert!(node_received.borrow().is_empty());
    }

    #[test]
    fn host_forwards_any_address() {
        let h = Harness::new();
        let mut host = participant(Uid::HOST, &h.wire, &h.now, &h.received);
        for addr in [Uid(1), Uid(2), Uid::BROADCAST, Uid::HOST] {
            let f = wire::encode_packet(&Crc16, 0xA5, addr, b"reply").unwrap();
            assert_eq!(host.handle_bytes(&f), 1);
        }
        // Discovery commands are forwarded on the host too.
        let f = wire::encode_packet(&Crc16, DISCOVERY_INIT, Uid(5), &[]).unwrap();
        assert_eq!(host.handle_bytes(&f), 1);
        assert_eq!(h.received.borrow().len(), 5);
        assert_eq!(host.role(), Role::Host);
    }

    #[test]
    fn raw_stream_bytes_are_idle() {
        let h = Harness::new();
        let mut node = participant(Uid(3), &h.wire, &h.now, &h.received);
        for b in 0u8..DISCOVERY_INIT {
            assert_eq!(node.handle_byte(b), BusEvent::Idle);
        }
        let f = wire::encode_packet(&Crc16, DISCOVERY_SILENCE, Uid(3), &[]).unwrap();
        node.handle_bytes(&f);
        assert!(node.is_discovered());
        assert!(h.received.borrow().is_empty());
    }

    #[test]
    fn send_rejects_oversized_and_raw_commands() {
        let h = Harness::new();
        let mut node = participant(Uid(3), &h.wire, &h.now, &h.received);
        let big = vec![0u8; DEFAULT_MAX_PAYLOAD + 1];
        assert_eq!(
            node.send_packet(0x90, Uid::HOST, &big),
            Err(SendError::PayloadTooLarge {
                len: DEFAULT_MAX_PAYLOAD + 1,
                max: DEFAULT_MAX_PAYLOAD
            })
        );
        assert_eq!(
            node.send_packet(0x10, Uid::HOST, b"raw"),
            Err(SendError::RawCommand(0x10))
        );
        assert_eq!(
            node.send_discovery(Command::App(0x90), &[]),
            Err(SendError::NotDiscovery(0x90))
        );
        assert!(h.take_wire().is_empty());
    }

    #[test]
    fn send_writes_once_and_returns_size() {
        let calls = Rc::new(Cell::new(0usize));
        let calls_tx = calls.clone();
        let mut node = BusCore::new(
            Uid(3),
            move |_: &[u8]| calls_tx.set(calls_tx.get() + 1),
            || 0u32,
            |_: &Header, _: &[u8]| {},
        );
        assert_eq!(node.send_packet(0x90, Uid::HOST, b"abc").unwrap(), 16);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn custom_checksum_must_match_on_both_ends() {
        let xor = |b: &[u8]| b.iter().fold(0u16, |a, &x| a ^ x as u16);
        let h = Harness::new();
        let wire_tx = h.wire.clone();
        let received = h.received.clone();
        let mut a = BusCore::with_checksum(
            Uid::HOST,
            Config::default(),
            move |b: &[u8]| wire_tx.borrow_mut().extend_from_slice(b),
            || 0u32,
            move |hd: &Header, p: &[u8]| received.borrow_mut().push((*hd, p.to_vec())),
            xor,
        )
        .unwrap();
        a.send_packet(0x90, Uid(1), b"xor").unwrap();
        let bytes = h.take_wire();
        assert_eq!(a.handle_bytes(&bytes), 1);

        let mut crc_host = participant(Uid::HOST, &h.wire, &h.now, &h.received);
        assert_eq!(crc_host.handle_bytes(&bytes), 0);
    }
}
