//! Concurrent registry of onion paths.
//!
//! Paths are keyed by `(upstream router, receive-side path id)` and
//! selected by role, endpoint, freshness, or XOR distance. The
//! surrounding router's event loop is single-threaded, but tick
//! callbacks and inbound handlers reach this registry from separate
//! contexts, so every public method holds the registry mutex for its
//! whole duration. Lock regions stay short and never call out, except
//! the introduction filter predicate, which must be pure and
//! non-blocking.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::crypto::Crypto;
use crate::path::{Introduction, Path, PathRef, PathRole, PathStatus};
use crate::types::{PathId, RouterContext, RouterId};

type PathKey = (RouterId, PathId);
type PathMap = BTreeMap<PathKey, PathRef>;

type MinRequiredHook = Arc<dyn Fn(PathRole) -> usize + Send + Sync>;
type BuildTimeoutHook = Arc<dyn Fn(&PathRef) + Send + Sync>;

/// Registry of in-flight and established paths with selection and
/// lifecycle operations.
///
/// `num_paths` is a soft target: the capacity policy deliberately admits
/// one path over the target in each of the Building and Established
/// states, matching the surrounding builder's long-standing behavior.
///
/// Iteration follows the `BTreeMap` key order, so every "first match
/// wins" tie-break below deterministically favors the lowest
/// `(upstream, rxid)` key.
pub struct PathSet {
    name: String,
    num_paths: usize,
    paths: Mutex<PathMap>,
    min_required: Option<MinRequiredHook>,
    on_build_timeout: Option<BuildTimeoutHook>,
}

impl PathSet {
    pub fn new(num_paths: usize) -> Self {
        Self {
            name: "paths".to_string(),
            num_paths,
            paths: Mutex::new(BTreeMap::new()),
            min_required: None,
            on_build_timeout: None,
        }
    }

    /// Label used in diagnostics.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Override the per-role minimum path requirement (defaults to 0).
    pub fn with_min_required(
        mut self,
        f: impl Fn(PathRole) -> usize + Send + Sync + 'static,
    ) -> Self {
        self.min_required = Some(Arc::new(f));
        self
    }

    /// Hook invoked after a path build timeout is logged.
    pub fn with_build_timeout_hook(
        mut self,
        f: impl Fn(&PathRef) + Send + Sync + 'static,
    ) -> Self {
        self.on_build_timeout = Some(Arc::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn locked(&self) -> MutexGuard<'_, PathMap> {
        self.paths.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -----------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------

    /// Register a path under `(upstream, rxid)`. If the key is already
    /// mapped the existing entry wins and `false` is returned; callers
    /// that care must check before building a replacement.
    pub fn add_path(&self, path: PathRef) -> bool {
        let key = (path.upstream(), path.rxid());
        match self.locked().entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(path);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Erase the entry keyed by this path's `(upstream, rxid)`.
    pub fn remove_path(&self, path: &dyn Path) {
        self.locked().remove(&(path.upstream(), path.rxid()));
    }

    /// Drive each path's own upkeep.
    pub fn tick_paths(&self, now: u64, router: &dyn RouterContext) {
        let paths = self.locked();
        for path in paths.values() {
            path.tick(now, router);
        }
    }

    /// Drop every path that has expired as of `now`.
    pub fn expire_paths(&self, now: u64) {
        let mut paths = self.locked();
        if paths.is_empty() {
            return;
        }
        paths.retain(|_, path| !path.expired(now));
    }

    /// A build deadline passed without the path establishing. Logs at
    /// warn; removal is the caller's decision.
    pub fn handle_path_build_timeout(&self, path: &PathRef) {
        tracing::warn!("{} path build {} timed out", self.name, path.hops_string());
        if let Some(hook) = &self.on_build_timeout {
            hook(path);
        }
    }

    // -----------------------------------------------------------------
    // Capacity policy
    // -----------------------------------------------------------------

    /// Minimum number of live paths required for `roles`. Base policy
    /// requires none.
    pub fn min_required_for_roles(&self, roles: PathRole) -> usize {
        match &self.min_required {
            Some(f) => f(roles),
            None => 0,
        }
    }

    /// Whether the builder should start another path. Admits one over
    /// the target on both counts; preserve the bias.
    pub fn should_build_more(&self, _now: u64) -> bool {
        let building = self.num_in_status(PathStatus::Building);
        if building > self.num_paths {
            return false;
        }
        let established = self.num_in_status(PathStatus::Established);
        established <= self.num_paths
    }

    /// Whether `roles` is under-served: fewer role-supporting paths that
    /// are not about to expire than the per-role minimum.
    pub fn should_build_more_for_roles(&self, now: u64, roles: PathRole) -> bool {
        let required = self.min_required_for_roles(roles);
        let paths = self.locked();
        let has = paths
            .values()
            .filter(|p| p.supports_any_roles(roles) && !p.expires_soon(now))
            .count();
        has < required
    }

    // -----------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------

    /// Ready, role-supporting path whose endpoint minimizes the XOR
    /// metric to `id`. First match in key order wins ties.
    pub fn get_established_path_closest_to(
        &self,
        id: RouterId,
        roles: PathRole,
    ) -> Option<PathRef> {
        let paths = self.locked();
        let mut best: Option<&PathRef> = None;
        let mut dist = RouterId::max_distance();
        for path in paths.values() {
            if !path.is_ready() || !path.supports_any_roles(roles) {
                continue;
            }
            let local = path.endpoint() ^ id;
            if local < dist {
                dist = local;
                best = Some(path);
            }
        }
        best.cloned()
    }

    /// Ready, role-supporting path to `id` with the latest-expiring
    /// introduction.
    pub fn get_newest_path_by_router(&self, id: RouterId, roles: PathRole) -> Option<PathRef> {
        let paths = self.locked();
        let mut chosen: Option<&PathRef> = None;
        for path in paths.values() {
            if !path.is_ready() || !path.supports_any_roles(roles) {
                continue;
            }
            if path.endpoint() != id {
                continue;
            }
            match chosen {
                Some(best) if best.intro().expires_at >= path.intro().expires_at => {}
                _ => chosen = Some(path),
            }
        }
        chosen.cloned()
    }

    /// Ready, role-supporting path to `id` with the lowest measured
    /// latency.
    pub fn get_path_by_router(&self, id: RouterId, roles: PathRole) -> Option<PathRef> {
        let paths = self.locked();
        let mut chosen: Option<&PathRef> = None;
        for path in paths.values() {
            if !path.is_ready() || !path.supports_any_roles(roles) {
                continue;
            }
            if path.endpoint() != id {
                continue;
            }
            match chosen {
                Some(best) if best.intro().latency <= path.intro().latency => {}
                _ => chosen = Some(path),
            }
        }
        chosen.cloned()
    }

    /// First path terminating at `ep` with transmit-side id `id`. No
    /// readiness or role filter.
    pub fn get_by_endpoint_with_id(&self, ep: RouterId, id: PathId) -> Option<PathRef> {
        let paths = self.locked();
        paths
            .values()
            .find(|p| p.is_endpoint(ep, id))
            .cloned()
    }

    /// First path whose receive-side id equals `id`. No filter.
    pub fn get_path_by_id(&self, id: PathId) -> Option<PathRef> {
        let paths = self.locked();
        paths.values().find(|p| p.rxid() == id).cloned()
    }

    /// Exact key lookup.
    pub fn get_by_upstream(&self, remote: RouterId, rxid: PathId) -> Option<PathRef> {
        self.locked().get(&(remote, rxid)).cloned()
    }

    /// Count of established, role-supporting paths.
    pub fn available_paths(&self, roles: PathRole) -> usize {
        let paths = self.locked();
        paths
            .values()
            .filter(|p| p.status() == PathStatus::Established && p.supports_any_roles(roles))
            .count()
    }

    pub fn num_in_status(&self, status: PathStatus) -> usize {
        let paths = self.locked();
        paths.values().filter(|p| p.status() == status).count()
    }

    /// Count of ready paths still alive at `future`.
    pub fn num_paths_existing_at(&self, future: u64) -> usize {
        let paths = self.locked();
        paths
            .values()
            .filter(|p| p.is_ready() && !p.expired(future))
            .count()
    }

    /// Uniform random pick over ready, role-supporting paths.
    pub fn pick_random_established_path(&self, roles: PathRole) -> Option<PathRef> {
        let paths = self.locked();
        let established: Vec<&PathRef> = paths
            .values()
            .filter(|p| p.is_ready() && p.supports_any_roles(roles))
            .collect();
        if established.is_empty() {
            return None;
        }
        let idx = (Crypto::randint() % established.len() as u64) as usize;
        Some(established[idx].clone())
    }

    // -----------------------------------------------------------------
    // Introductions
    // -----------------------------------------------------------------

    /// Replace `intros` with the introductions of every ready path.
    /// Returns true iff any were inserted.
    pub fn current_introductions(&self, intros: &mut BTreeSet<Introduction>) -> bool {
        self.current_introductions_with_filter(intros, |_| true)
    }

    /// As `current_introductions`, keeping only introductions accepted
    /// by `filter`. The predicate runs under the registry lock.
    pub fn current_introductions_with_filter(
        &self,
        intros: &mut BTreeSet<Introduction>,
        filter: impl Fn(&Introduction) -> bool,
    ) -> bool {
        intros.clear();
        let mut count = 0;
        let paths = self.locked();
        for path in paths.values() {
            if !path.is_ready() {
                continue;
            }
            let intro = path.intro();
            if filter(&intro) {
                intros.insert(intro);
                count += 1;
            }
        }
        count > 0
    }

    /// Set `intro` to the latest-expiring ready introduction. Leaves it
    /// cleared and returns false when nothing is ready.
    pub fn newest_intro(&self, intro: &mut Introduction) -> bool {
        intro.clear();
        let mut found = false;
        let paths = self.locked();
        for path in paths.values() {
            if path.is_ready() && path.intro().expires_at > intro.expires_at {
                *intro = path.intro();
                found = true;
            }
        }
        found
    }
}
