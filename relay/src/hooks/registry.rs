use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::error;

use super::event::{Authorization, AuthorizerEvent, CommitDecision, CommitEvent, RollbackEvent, UpdateEvent};
use super::{AuthorizerCallback, CommitCallback, HookKind, Observer, RollbackCallback, UpdateCallback};

/// Per-connection observer registry
///
/// One mutex guards the four per-kind maps and the flags recording which native trampolines are
/// registered. Ids are allocated monotonically, so map order is registration order.
pub(crate) struct HookState {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct Registry {
    update: BTreeMap<u64, UpdateCallback>,
    commit: BTreeMap<u64, CommitCallback>,
    rollback: BTreeMap<u64, RollbackCallback>,
    authorizer: BTreeMap<u64, AuthorizerCallback>,
    installed: [bool; 4],
    closed: bool,
}

impl Registry {
    fn len(&self, kind: HookKind) -> usize {
        match kind {
            HookKind::Update => self.update.len(),
            HookKind::Commit => self.commit.len(),
            HookKind::Rollback => self.rollback.len(),
            HookKind::Authorizer => self.authorizer.len(),
        }
    }
}

/// A native registration change the connection must apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transition {
    pub kind: HookKind,
    pub install: bool,
}

impl HookState {
    pub(crate) fn new() -> Self { Self { registry: Mutex::new(Registry::default()), next_id: AtomicU64::new(1) } }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // Observers never run under this lock, so poisoning can only come from our own code
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add an observer; None once the connection has closed
    pub(crate) fn insert(&self, observer: Observer) -> Option<(HookKind, u64)> {
        let mut registry = self.lock();
        if registry.closed {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let kind = observer.kind();
        match observer {
            Observer::Update(cb) => {
                registry.update.insert(id, cb);
            }
            Observer::Commit(cb) => {
                registry.commit.insert(id, cb);
            }
            Observer::Rollback(cb) => {
                registry.rollback.insert(id, cb);
            }
            Observer::Authorizer(cb) => {
                registry.authorizer.insert(id, cb);
            }
        }
        Some((kind, id))
    }

    /// False if the id was already removed, never existed, or the connection closed
    pub(crate) fn remove(&self, kind: HookKind, id: u64) -> bool {
        let mut registry = self.lock();
        match kind {
            HookKind::Update => registry.update.remove(&id).is_some(),
            HookKind::Commit => registry.commit.remove(&id).is_some(),
            HookKind::Rollback => registry.rollback.remove(&id).is_some(),
            HookKind::Authorizer => registry.authorizer.remove(&id).is_some(),
        }
    }

    pub(crate) fn count(&self, kind: HookKind) -> usize { self.lock().len(kind) }

    pub(crate) fn is_installed(&self, kind: HookKind) -> bool { self.lock().installed[kind.index()] }

    pub(crate) fn is_closed(&self) -> bool { self.lock().closed }

    /// Compute install/uninstall transitions and mark them applied
    ///
    /// The caller must apply every returned transition to the native handle before releasing the
    /// connection.
    pub(crate) fn reconcile(&self) -> Vec<Transition> {
        let mut registry = self.lock();
        let mut transitions = Vec::new();
        for kind in HookKind::ALL {
            let wanted = !registry.closed && registry.len(kind) > 0;
            if registry.installed[kind.index()] != wanted {
                registry.installed[kind.index()] = wanted;
                transitions.push(Transition { kind, install: wanted });
            }
        }
        transitions
    }

    /// Drop every observer and refuse new ones
    pub(crate) fn close(&self) {
        let mut registry = self.lock();
        registry.closed = true;
        registry.update.clear();
        registry.commit.clear();
        registry.rollback.clear();
        registry.authorizer.clear();
    }

    // Dispatch: snapshot under the lock, release it, then invoke. Observers may register or remove
    // observers (including themselves) without deadlocking.

    pub(crate) fn dispatch_update(&self, event: &UpdateEvent) {
        let observers: Vec<UpdateCallback> = self.lock().update.values().cloned().collect();
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(event))).is_err() {
                error!("update observer panicked on {:?} {}.{} rowid {}", event.operation, event.database, event.table, event.rowid);
            }
        }
    }

    /// Every observer runs; any Deny vetoes
    pub(crate) fn dispatch_commit(&self, event: &CommitEvent) -> CommitDecision {
        let observers: Vec<CommitCallback> = self.lock().commit.values().cloned().collect();
        let mut decision = CommitDecision::Allow;
        for observer in observers {
            let vote = catch_unwind(AssertUnwindSafe(|| observer(event))).unwrap_or_else(|_| {
                error!("commit observer panicked; vetoing commit");
                CommitDecision::Deny
            });
            if vote == CommitDecision::Deny {
                decision = CommitDecision::Deny;
            }
        }
        decision
    }

    pub(crate) fn dispatch_rollback(&self, event: &RollbackEvent) {
        let observers: Vec<RollbackCallback> = self.lock().rollback.values().cloned().collect();
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(event))).is_err() {
                error!("rollback observer panicked");
            }
        }
    }

    /// Deny short-circuits; otherwise any Ignore wins over Allow
    pub(crate) fn dispatch_authorizer(&self, event: &AuthorizerEvent) -> Authorization {
        let observers: Vec<AuthorizerCallback> = self.lock().authorizer.values().cloned().collect();
        let mut result = Authorization::Allow;
        for observer in observers {
            let answer = catch_unwind(AssertUnwindSafe(|| observer(event))).unwrap_or_else(|_| {
                error!("authorizer observer panicked on {:?}; denying", event.action);
                Authorization::Deny
            });
            match answer {
                Authorization::Deny => return Authorization::Deny,
                Authorization::Ignore => result = Authorization::Ignore,
                Authorization::Allow => {}
            }
        }
        result
    }
}
