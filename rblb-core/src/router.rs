//! Discovery and dispatch: decides what a checksum-valid packet means for this participant.

use tracing::debug;

use crate::identity::{Role, Uid};
use crate::protocol::{Command, Header};

/// Extension point for timeslot-staggered discovery-burst replies.
///
/// Implementations compute when (relative to the burst command) this node should answer,
/// e.g. from its uid, the baud rate and burst parameters carried in the payload.
/// Returning `None` means no reply is scheduled.
pub trait BurstScheduler {
    fn reply_delay_ms(&mut self, uid: Uid, burst_payload: &[u8]) -> Option<u32>;
}

/// Default scheduler: never replies.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBurstReply;

impl BurstScheduler for NoBurstReply {
    fn reply_delay_ms(&mut self, _uid: Uid, _burst_payload: &[u8]) -> Option<u32> {
        None
    }
}

/// Discovery command consumed by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// New round: this node is no longer considered discovered.
    Init,
    /// Reply window opened. `reply_delay_ms` comes from the burst scheduler.
    Burst { reply_delay_ms: Option<u32> },
    /// Round concluded: this node is confirmed present.
    Silence,
}

/// Routing decision for one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Node role only: addressed to someone else.
    NotAddressed,
    /// Consumed internally; never reaches the packet handler.
    Discovery(DiscoveryEvent),
    /// Hand to the application.
    Deliver,
}

pub struct Router {
    uid: Uid,
    role: Role,
    discovered: bool,
    burst: Box<dyn BurstScheduler + Send>,
}

impl Router {
    pub fn new(uid: Uid) -> Self {
        Self {
            uid,
            role: Role::for_uid(uid),
            discovered: false,
            burst: Box::new(NoBurstReply),
        }
    }

    pub fn set_burst_scheduler(&mut self, scheduler: Box<dyn BurstScheduler + Send>) {
        self.burst = scheduler;
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_discovered(&self) -> bool {
        self.discovered
    }

    /// True if a node with this uid should look at a packet sent to `address`.
    pub fn accepts(&self, address: Uid) -> bool {
        match self.role {
            Role::Host => true,
            Role::Node => address == self.uid || address.is_broadcast(),
        }
    }

    pub fn route(&mut self, header: &Header, payload: &[u8]) -> Route {
        match self.role {
            Role::Node => self.route_node(header, payload),
            // The host sees every frame; nodes answer the host using their own uid as address.
            // Host-side discovery bookkeeping is up to the application.
            Role::Host => Route::Deliver,
        }
    }

    fn route_node(&mut self, header: &Header, payload: &[u8]) -> Route {
        if !self.accepts(header.address) {
            return Route::NotAddressed;
        }
        match header.kind() {
            Command::DiscoveryInit => {
                debug!(uid = %self.uid, "discovery round started");
                self.discovered = false;
                Route::Discovery(DiscoveryEvent::Init)
            }
            Command::DiscoveryBurst => {
                let reply_delay_ms = self.burst.reply_delay_ms(self.uid, payload);
                Route::Discovery(DiscoveryEvent::Burst { reply_delay_ms })
            }
            Command::DiscoverySilence => {
                debug!(uid = %self.uid, "discovered");
                self.discovered = true;
                Route::Discovery(DiscoveryEvent::Silence)
            }
            Command::App(_) | Command::Raw(_) => Route::Deliver,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DISCOVERY_BURST, DISCOVERY_INIT, DISCOVERY_SILENCE};

    const ME: Uid = Uid(0xABCD);

    fn header(command: u8, address: Uid) -> Header {
        Header {
            command,
            address,
            length: 0,
        }
    }

    #[test]
    fn node_filters_by_address() {
        let mut r = Router::new(ME);
        assert_eq!(r.role(), Role::Node);
        assert_eq!(r.route(&header(0x90, Uid(1)), &[]), Route::NotAddressed);
        assert_eq!(r.route(&header(0x90, ME), &[]), Route::Deliver);
        assert_eq!(r.route(&header(0x90, Uid::BROADCAST), &[]), Route::Deliver);
        assert_eq!(r.route(&header(0x90, Uid::HOST), &[]), Route::NotAddressed);
    }

    #[test]
    fn discovery_state_machine() {
        let mut r = Router::new(ME);
        assert!(!r.is_discovered());
        assert_eq!(
            r.route(&header(DISCOVERY_SILENCE, ME), &[]),
            Route::Discovery(DiscoveryEvent::Silence)
        );
        assert!(r.is_discovered());
        assert_eq!(
            r.route(&header(DISCOVERY_INIT, Uid::BROADCAST), &[]),
            Route::Discovery(DiscoveryEvent::Init)
        );
        assert!(!r.is_discovered());
        assert_eq!(
            r.route(&header(DISCOVERY_BURST, Uid::BROADCAST), &[]),
            Route::Discovery(DiscoveryEvent::Burst {
                reply_delay_ms: None
            })
        );
        assert!(!r.is_discovered());
        r.route(&header(DISCOVERY_SILENCE, Uid::BROADCAST), &[]);
        assert!(r.is_discovered());
    }

    #[test]
    fn discovery_for_other_node_ignored() {
        let mut r = Router::new(ME);
        r.route(&header(DISCOVERY_SILENCE, ME), &[]);
        assert_eq!(
            r.route(&header(DISCOVERY_INIT, Uid(7)), &[]),
            Route::NotAddressed
        );
        assert!(r.is_discovered());
    }

    #[test]
    fn host_accepts_everything() {
        let mut r = Router::new(Uid::HOST);
        assert_eq!(r.role(), Role::Host);
        assert_eq!(r.route(&header(0x90, Uid(1)), &[]), Route::Deliver);
        assert_eq!(r.route(&header(0x90, Uid(2)), &[]), Route::Deliver);
        assert_eq!(r.route(&header(DISCOVERY_INIT, Uid(2)), &[]), Route::Deliver);
        assert_eq!(r.route(&header(DISCOVERY_SILENCE, Uid(2)), &[]), Route::Deliver);
        assert!(!r.is_discovered());
    }

    struct FixedSlot(u32);

    impl BurstScheduler for FixedSlot {
        fn reply_delay_ms(&mut self, uid: Uid, _burst_payload: &[u8]) -> Option<u32> {
            Some(self.0 * (uid.0 as u32 % 8))
        }
    }

    #[test]
    fn burst_uses_scheduler() {
        let mut r = Router::new(Uid(3));
        r.set_burst_scheduler(Box::new(FixedSlot(2)));
        assert_eq!(
            r.route(&header(DISCOVERY_BURST, Uid::BROADCAST), &[]),
            Route::Discovery(DiscoveryEvent::Burst {
                reply_delay_ms: Some(6)
            })
        );
    }
}
