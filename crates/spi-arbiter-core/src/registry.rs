//! Resource registry
//!
//! The registry is the one piece of shared mutable state: it maps bus labels
//! to their backends and to the claims currently held on them. Every resource
//! handle owns exactly one [`ClaimToken`] obtained here.
//!
//! Claim rules per bus label:
//! - `ExclusiveBus` and `Peripheral` claims exclude every other claim.
//! - `ExclusiveCs` claims exclude claims on the same chip select only, so
//!   several controllers can share a bus on different chip selects.
//!
//! Controllers sharing a bus still share one set of wires. Each [`BusLine`]
//! therefore carries a transfer lock that a resource holds for the whole
//! select → transfer → deselect span.
//!
//! Claim ids are never reused, so a token whose id is no longer in the table
//! has been invalidated for good.
//!
//! When a claim dies (release or invalidation) the registry takes back what it
//! held on its line: a chip select it left asserted is driven inactive, then
//! the transfer lock is freed.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::backend::SpiBackend;
use crate::error::{Result, SpiError};
use crate::policy::{AccessPolicy, AllowAll};

/// Unique claim identifier
pub type ClaimId = u64;

/// Kind of ownership requested
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClaimMode {
    /// Whole bus, no chip select management (Bus resource)
    ExclusiveBus,
    /// One chip select on a possibly shared bus (Controller resource)
    ExclusiveCs,
    /// Whole bus in peripheral mode (Peripheral resource)
    Peripheral,
}

/// What a claim is keyed on
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClaimKey {
    /// Bus label
    pub bus: String,
    /// Chip select label, only for `ExclusiveCs`
    pub cs: Option<String>,
}

impl ClaimKey {
    /// Key for a whole bus
    pub fn bus(bus: impl Into<String>) -> Self {
        Self {
            bus: bus.into(),
            cs: None,
        }
    }

    /// Key for one chip select on a bus
    pub fn chip_select(bus: impl Into<String>, cs: impl Into<String>) -> Self {
        Self {
            bus: bus.into(),
            cs: Some(cs.into()),
        }
    }
}

impl fmt::Display for ClaimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cs {
            Some(cs) => write!(f, "{}/{}", self.bus, cs),
            None => write!(f, "{}", self.bus),
        }
    }
}

/// Proof of a granted claim
///
/// Not `Clone`: one claim, one owner. [`Registry::release`] consumes it.
#[derive(Debug)]
pub struct ClaimToken {
    id: ClaimId,
    key: ClaimKey,
    mode: ClaimMode,
}

impl ClaimToken {
    /// Claim identifier
    pub fn id(&self) -> ClaimId {
        self.id
    }

    /// Claimed key
    pub fn key(&self) -> &ClaimKey {
        &self.key
    }

    /// Claimed mode
    pub fn mode(&self) -> ClaimMode {
        self.mode
    }
}

/// Snapshot of a live claim, for diagnostics
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimInfo {
    /// Claim identifier
    pub id: ClaimId,
    /// Bus label
    pub bus: String,
    /// Chip select label (controllers only)
    pub cs: Option<String>,
    /// Claim mode
    pub mode: ClaimMode,
}

/// Claims held on one bus label
#[derive(Debug)]
enum BusClaims {
    Exclusive(ClaimId),
    Peripheral(ClaimId),
    ChipSelects(HashMap<String, ClaimId>),
}

impl BusClaims {
    fn contains(&self, id: ClaimId) -> bool {
        match self {
            Self::Exclusive(held) | Self::Peripheral(held) => *held == id,
            Self::ChipSelects(map) => map.values().any(|held| *held == id),
        }
    }

    fn ids(&self) -> Vec<ClaimId> {
        match self {
            Self::Exclusive(held) | Self::Peripheral(held) => vec![*held],
            Self::ChipSelects(map) => map.values().copied().collect(),
        }
    }
}

struct State {
    next_id: ClaimId,
    torn_down: bool,
    lines: HashMap<String, Arc<BusLine>>,
    claims: HashMap<String, BusClaims>,
}

impl State {
    fn is_live(&self, token: &ClaimToken) -> bool {
        self.claims
            .get(&token.key.bus)
            .is_some_and(|claims| claims.contains(token.id))
    }

    /// Remove a claim; returns false if it was not live
    fn remove(&mut self, token: &ClaimToken) -> bool {
        let bus = &token.key.bus;
        let Some(claims) = self.claims.get_mut(bus) else {
            return false;
        };
        let removed = match claims {
            BusClaims::Exclusive(held) | BusClaims::Peripheral(held) => *held == token.id,
            BusClaims::ChipSelects(map) => match token.key.cs.as_deref() {
                Some(cs) if map.get(cs) == Some(&token.id) => {
                    map.remove(cs);
                    true
                }
                _ => false,
            },
        };
        let now_empty = match claims {
            BusClaims::ChipSelects(map) => map.is_empty(),
            _ => removed,
        };
        if removed && now_empty {
            self.claims.remove(bus);
        }
        removed
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Who is using the wires of a bus right now
#[derive(Debug, Default)]
struct WireState {
    /// Transfer lock holder
    holder: Option<ClaimId>,
    /// Chip select left asserted, and the claim that asserted it
    asserted: Option<(ClaimId, String)>,
}

/// One physical bus: its backend plus the transfer lock
pub struct BusLine {
    label: String,
    backend: Mutex<Box<dyn SpiBackend>>,
    wire: Mutex<WireState>,
    wire_free: Condvar,
}

impl BusLine {
    fn new(label: String, backend: Box<dyn SpiBackend>) -> Self {
        Self {
            label,
            backend: Mutex::new(backend),
            wire: Mutex::new(WireState::default()),
            wire_free: Condvar::new(),
        }
    }

    /// Bus label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Lock the backend for one call
    pub(crate) fn backend(&self) -> MutexGuard<'_, Box<dyn SpiBackend>> {
        lock(&self.backend)
    }

    /// Take the transfer lock for `owner`, blocking while another claim holds it
    ///
    /// Returns false if `owner` already held it.
    pub(crate) fn lock_wire(&self, owner: ClaimId) -> bool {
        let mut wire = lock(&self.wire);
        loop {
            match wire.holder {
                Some(current) if current == owner => return false,
                Some(_) => {
                    wire = self
                        .wire_free
                        .wait(wire)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                None => {
                    wire.holder = Some(owner);
                    return true;
                }
            }
        }
    }

    /// Give the transfer lock back if `owner` holds it
    pub(crate) fn unlock_wire(&self, owner: ClaimId) {
        let mut wire = lock(&self.wire);
        if wire.holder == Some(owner) {
            wire.holder = None;
            self.wire_free.notify_all();
        }
    }

    /// Current transfer lock holder
    pub fn wire_holder(&self) -> Option<ClaimId> {
        lock(&self.wire).holder
    }

    /// Chip select currently asserted through this line, if any
    pub fn asserted_cs(&self) -> Option<String> {
        lock(&self.wire).asserted.as_ref().map(|(_, cs)| cs.clone())
    }

    /// Record a chip select edge driven by `owner`
    ///
    /// Call with the backend locked, right after the edge was driven.
    pub(crate) fn note_cs(&self, owner: ClaimId, cs: &str, active: bool) {
        let mut wire = lock(&self.wire);
        if active {
            wire.asserted = Some((owner, cs.to_string()));
        } else if wire.asserted.as_ref().is_some_and(|(id, _)| *id == owner) {
            wire.asserted = None;
        }
    }

    /// Take back everything a dead claim still holds on the wires
    ///
    /// A chip select it left asserted is deasserted before the transfer lock
    /// is released, so the next holder never shares the wires with it.
    fn reclaim(&self, owner: ClaimId) {
        let mut backend = self.backend();
        let owed = {
            let mut wire = lock(&self.wire);
            match &wire.asserted {
                Some((id, _)) if *id == owner => wire.asserted.take().map(|(_, cs)| cs),
                _ => None,
            }
        };
        if let Some(cs) = owed {
            match backend.set_cs(&cs, false) {
                Ok(()) => log::debug!("{}: released chip select {} of claim {}", self.label, cs, owner),
                Err(e) => log::warn!(
                    "{}: failed to release chip select {} of claim {}: {}",
                    self.label,
                    cs,
                    owner,
                    e
                ),
            }
        }
        drop(backend);
        self.unlock_wire(owner);
    }

    /// Take the transfer lock for the lifetime of the returned guard
    pub(crate) fn wire_span(&self, owner: ClaimId) -> WireSpan<'_> {
        let acquired = self.lock_wire(owner);
        WireSpan {
            line: self,
            owner,
            acquired,
        }
    }
}

/// Scoped transfer lock; unlocks on drop unless the owner already held it
pub(crate) struct WireSpan<'a> {
    line: &'a BusLine,
    owner: ClaimId,
    acquired: bool,
}

impl Drop for WireSpan<'_> {
    fn drop(&mut self) {
        if self.acquired {
            self.line.unlock_wire(self.owner);
        }
    }
}

/// Process-wide claim table
///
/// Create one registry, attach a backend for every bus label, then hand
/// `Arc<Registry>` to whatever constructs resources. Call
/// [`teardown`](Registry::teardown) once the clients are gone.
pub struct Registry {
    policy: Box<dyn AccessPolicy>,
    state: Mutex<State>,
}

impl Registry {
    /// Create a registry that consults `policy` before granting claims
    pub fn new(policy: impl AccessPolicy + 'static) -> Arc<Self> {
        Arc::new(Self {
            policy: Box::new(policy),
            state: Mutex::new(State {
                next_id: 1,
                torn_down: false,
                lines: HashMap::new(),
                claims: HashMap::new(),
            }),
        })
    }

    /// Create a registry that permits every bus/chip select combination
    pub fn permissive() -> Arc<Self> {
        Self::new(AllowAll)
    }

    /// Attach the backend driving bus `label`
    ///
    /// Fails with `AlreadyInUse` if the label already has a backend.
    pub fn attach_bus(&self, label: impl Into<String>, backend: impl SpiBackend + 'static) -> Result<()> {
        let label = label.into();
        let mut state = lock(&self.state);
        if state.torn_down {
            return Err(SpiError::NotEnabled);
        }
        if state.lines.contains_key(&label) {
            return Err(SpiError::AlreadyInUse);
        }
        log::debug!("registry: attached bus {}", label);
        let line = Arc::new(BusLine::new(label.clone(), Box::new(backend)));
        state.lines.insert(label, line);
        Ok(())
    }

    /// Labels of all attached buses
    pub fn buses(&self) -> Vec<String> {
        let mut labels: Vec<String> = lock(&self.state).lines.keys().cloned().collect();
        labels.sort();
        labels
    }

    /// Look up the line for an attached bus
    pub fn line(&self, bus: &str) -> Result<Arc<BusLine>> {
        lock(&self.state)
            .lines
            .get(bus)
            .cloned()
            .ok_or(SpiError::NotEnabled)
    }

    /// Claim a bus or chip select
    ///
    /// Checks, in order: the key matches the mode (`OperationNotSupported`),
    /// the bus is attached (`NotEnabled`), the policy permits it
    /// (`NotAllowed`), and nothing incompatible is held (`AlreadyInUse`).
    pub fn claim(&self, key: ClaimKey, mode: ClaimMode) -> Result<ClaimToken> {
        let cs_required = mode == ClaimMode::ExclusiveCs;
        if key.cs.is_some() != cs_required {
            return Err(SpiError::OperationNotSupported);
        }

        let mut guard = lock(&self.state);
        let state = &mut *guard;
        if state.torn_down || !state.lines.contains_key(&key.bus) {
            return Err(SpiError::NotEnabled);
        }
        if !self.policy.permits(&key.bus, key.cs.as_deref(), mode) {
            log::debug!("registry: policy denied {:?} on {}", mode, key);
            return Err(SpiError::NotAllowed);
        }

        let id = state.next_id;
        let granted = match state.claims.get_mut(&key.bus) {
            Some(BusClaims::ChipSelects(map)) => match key.cs.as_deref() {
                Some(cs) if mode == ClaimMode::ExclusiveCs && !map.contains_key(cs) => {
                    map.insert(cs.to_string(), id);
                    true
                }
                _ => false,
            },
            Some(_) => false,
            None => {
                let claims = match mode {
                    ClaimMode::ExclusiveBus => BusClaims::Exclusive(id),
                    ClaimMode::Peripheral => BusClaims::Peripheral(id),
                    ClaimMode::ExclusiveCs => BusClaims::ChipSelects(
                        key.cs.iter().map(|cs| (cs.clone(), id)).collect(),
                    ),
                };
                state.claims.insert(key.bus.clone(), claims);
                true
            }
        };
        if !granted {
            log::debug!("registry: {:?} on {} already in use", mode, key);
            return Err(SpiError::AlreadyInUse);
        }
        state.next_id += 1;

        log::debug!("registry: granted claim {} ({:?} on {})", id, mode, key);
        Ok(ClaimToken { id, key, mode })
    }

    /// Release a claim
    ///
    /// Fails with `ResourceInvalidated` if the claim was already invalidated.
    pub fn release(&self, token: ClaimToken) -> Result<()> {
        let line = {
            let mut state = lock(&self.state);
            if !state.remove(&token) {
                return Err(SpiError::ResourceInvalidated);
            }
            state.lines.get(&token.key.bus).cloned()
        };
        if let Some(line) = line {
            line.reclaim(token.id);
        }
        log::debug!("registry: released claim {}", token.id);
        Ok(())
    }

    /// Returns true while the claim has not been released or invalidated
    pub fn is_live(&self, token: &ClaimToken) -> bool {
        lock(&self.state).is_live(token)
    }

    /// Invalidate one claim, leaving its handle permanently unusable
    pub fn invalidate(&self, token: &ClaimToken) {
        let line = {
            let mut state = lock(&self.state);
            if !state.remove(token) {
                return;
            }
            state.lines.get(&token.key.bus).cloned()
        };
        if let Some(line) = line {
            line.reclaim(token.id);
        }
        log::warn!("registry: invalidated claim {} on {}", token.id, token.key);
    }

    /// Invalidate every claim on a bus
    pub fn invalidate_bus(&self, bus: &str) {
        let (ids, line) = {
            let mut state = lock(&self.state);
            let ids = state
                .claims
                .remove(bus)
                .map(|claims| claims.ids())
                .unwrap_or_default();
            (ids, state.lines.get(bus).cloned())
        };
        if let Some(line) = line {
            for id in &ids {
                line.reclaim(*id);
            }
        }
        if !ids.is_empty() {
            log::warn!("registry: invalidated {} claim(s) on {}", ids.len(), bus);
        }
    }

    /// Invalidate every claim and refuse new ones
    pub fn teardown(&self) {
        let buses: Vec<String> = {
            let mut state = lock(&self.state);
            state.torn_down = true;
            state.claims.keys().cloned().collect()
        };
        for bus in buses {
            self.invalidate_bus(&bus);
        }
        log::debug!("registry: torn down");
    }

    /// Snapshot of all live claims, ordered by id
    pub fn claims(&self) -> Vec<ClaimInfo> {
        let state = lock(&self.state);
        let mut out = Vec::new();
        for (bus, claims) in &state.claims {
            match claims {
                BusClaims::Exclusive(id) => out.push(ClaimInfo {
                    id: *id,
                    bus: bus.clone(),
                    cs: None,
                    mode: ClaimMode::ExclusiveBus,
                }),
                BusClaims::Peripheral(id) => out.push(ClaimInfo {
                    id: *id,
                    bus: bus.clone(),
                    cs: None,
                    mode: ClaimMode::Peripheral,
                }),
                BusClaims::ChipSelects(map) => {
                    out.extend(map.iter().map(|(cs, id)| ClaimInfo {
                        id: *id,
                        bus: bus.clone(),
                        cs: Some(cs.clone()),
                        mode: ClaimMode::ExclusiveCs,
                    }))
                }
            }
        }
        out.sort_by_key(|info| info.id);
        out
    }
}
