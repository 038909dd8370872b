//! The abstract onion path seen by the registry.
//!
//! Path construction and hop negotiation happen elsewhere; the registry
//! only needs status, role support, endpoint identity, expiry, and the
//! introduction token a path advertises for reverse contact.

use std::sync::Arc;

use crate::types::{PathId, RouterContext, RouterId};

/// How long before expiry a path counts as "expiring soon".
pub const EXPIRES_SOON_WINDOW_MS: u64 = 5_000;

/// Lifecycle state of a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathStatus {
    Building,
    Established,
    Expired,
    Ignore,
}

/// Capability bits a path may support, used to filter selection.
pub type PathRole = u8;

/// Matches every path regardless of its role bits.
pub const ROLE_ANY: PathRole = 0;
pub const ROLE_OUTBOUND_HS: PathRole = 1 << 0;
pub const ROLE_INBOUND_HS: PathRole = 1 << 1;
pub const ROLE_EXIT: PathRole = 1 << 2;
pub const ROLE_SERVICE: PathRole = 1 << 3;
pub const ROLE_DHT: PathRole = 1 << 4;

/// Short-lived token advertised to remote services for reverse contact.
///
/// Ordered by expiry first so a set of introductions iterates oldest to
/// newest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Introduction {
    pub expires_at: u64,
    pub latency: u64,
    pub router: RouterId,
    pub path_id: PathId,
}

impl Introduction {
    pub fn clear(&mut self) {
        *self = Introduction::default();
    }
}

/// An onion path as the registry sees it.
///
/// Implementations own their hop state and must keep `tick` non-blocking;
/// long work belongs on the host's queue, not under the registry lock.
pub trait Path: Send + Sync {
    /// First-hop router the path is pinned to.
    fn upstream(&self) -> RouterId;

    /// Receive-side path identifier at the first hop.
    fn rxid(&self) -> PathId;

    /// Terminal router of the path.
    fn endpoint(&self) -> RouterId;

    fn status(&self) -> PathStatus;

    /// Supported role bits.
    fn roles(&self) -> PathRole;

    /// Current introduction token.
    fn intro(&self) -> Introduction;

    /// True iff this path terminates at `ep` with transmit-side id `id`.
    fn is_endpoint(&self, ep: RouterId, id: PathId) -> bool;

    /// Periodic upkeep, driven by the registry tick.
    fn tick(&self, now: u64, router: &dyn RouterContext);

    /// Human-readable hop summary for diagnostics.
    fn hops_string(&self) -> String;

    fn supports_any_roles(&self, roles: PathRole) -> bool {
        roles == ROLE_ANY || (self.roles() & roles) != 0
    }

    fn expired(&self, now: u64) -> bool {
        self.status() == PathStatus::Expired || now >= self.intro().expires_at
    }

    fn expires_soon(&self, now: u64) -> bool {
        self.expired(now + EXPIRES_SOON_WINDOW_MS)
    }

    /// Ready paths are established and have a measured latency.
    fn is_ready(&self) -> bool {
        self.intro().latency > 0 && self.status() == PathStatus::Established
    }
}

/// Shared handle to a registered path. The registry owns the path while
/// it is mapped; selectors hand out clones so callers can keep using a
/// path after the lock is dropped without racing removal.
pub type PathRef = Arc<dyn Path>;
