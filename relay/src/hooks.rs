//! Update, commit, rollback and authorizer observers
//!
//! Any number of observers may be registered per kind. The connection registers one native
//! trampoline per kind while at least one observer of that kind exists, and removes it again once
//! the last observer is gone. Observers run synchronously on the thread executing the statement and
//! must not block or issue queries on the same connection; they may register or remove observers.
//!
//! Two lifetimes are available:
//! - [`Hooks::register`] returns a [`HookToken`] that unregisters on drop or [`HookToken::cancel`]
//! - [`Hooks::install`] returns an [`ObserverId`] that stays registered until [`Hooks::remove`] or close

pub mod event;
pub(crate) mod native;
pub(crate) mod registry;

use std::sync::{Arc, Weak};

use tracing::debug;

pub use event::{
    Authorization, AuthorizerAction, AuthorizerEvent, CommitDecision, CommitEvent, RollbackEvent, UpdateEvent, UpdateOperation,
};
use registry::HookState;

pub type UpdateCallback = Arc<dyn Fn(&UpdateEvent) + Send + Sync + 'static>;
pub type CommitCallback = Arc<dyn Fn(&CommitEvent) -> CommitDecision + Send + Sync + 'static>;
pub type RollbackCallback = Arc<dyn Fn(&RollbackEvent) + Send + Sync + 'static>;
pub type AuthorizerCallback = Arc<dyn Fn(&AuthorizerEvent) -> Authorization + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookKind {
    Update,
    Commit,
    Rollback,
    Authorizer,
}

impl HookKind {
    pub const ALL: [HookKind; 4] = [HookKind::Update, HookKind::Commit, HookKind::Rollback, HookKind::Authorizer];

    pub(crate) fn index(&self) -> usize {
        match self {
            HookKind::Update => 0,
            HookKind::Commit => 1,
            HookKind::Rollback => 2,
            HookKind::Authorizer => 3,
        }
    }
}

/// An observer callback tagged with its hook kind
#[derive(Clone)]
pub enum Observer {
    Update(UpdateCallback),
    Commit(CommitCallback),
    Rollback(RollbackCallback),
    Authorizer(AuthorizerCallback),
}

impl Observer {
    pub fn update<F>(f: F) -> Self
    where F: Fn(&UpdateEvent) + Send + Sync + 'static {
        Observer::Update(Arc::new(f))
    }

    pub fn commit<F>(f: F) -> Self
    where F: Fn(&CommitEvent) -> CommitDecision + Send + Sync + 'static {
        Observer::Commit(Arc::new(f))
    }

    pub fn rollback<F>(f: F) -> Self
    where F: Fn(&RollbackEvent) + Send + Sync + 'static {
        Observer::Rollback(Arc::new(f))
    }

    pub fn authorizer<F>(f: F) -> Self
    where F: Fn(&AuthorizerEvent) -> Authorization + Send + Sync + 'static {
        Observer::Authorizer(Arc::new(f))
    }

    pub fn kind(&self) -> HookKind {
        match self {
            Observer::Update(_) => HookKind::Update,
            Observer::Commit(_) => HookKind::Commit,
            Observer::Rollback(_) => HookKind::Rollback,
            Observer::Authorizer(_) => HookKind::Authorizer,
        }
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "Observer({:?})", self.kind()) }
}

/// Persistent observer handle; dropping it has no effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId {
    kind: HookKind,
    id: u64,
}

impl ObserverId {
    pub fn kind(&self) -> HookKind { self.kind }
}

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{:?}#{}", self.kind, self.id) }
}

/// Scope-bound observer registration
///
/// Unregisters when dropped or cancelled. A token that is never stored is dropped at the end of
/// the statement, before any event can reach it.
#[must_use = "dropping a HookToken unregisters its observer"]
pub struct HookToken {
    state: Weak<HookState>,
    id: ObserverId,
    active: bool,
}

impl HookToken {
    pub fn id(&self) -> ObserverId { self.id }

    /// Unregister now; false if it was already gone (for example after close)
    pub fn cancel(mut self) -> bool { self.release() }

    /// Keep the observer registered past the token's lifetime
    pub fn detach(mut self) -> ObserverId {
        self.active = false;
        self.id
    }

    fn release(&mut self) -> bool {
        if !std::mem::replace(&mut self.active, false) {
            return false;
        }
        match self.state.upgrade() {
            Some(state) => state.remove(self.id.kind, self.id.id),
            None => false,
        }
    }
}

impl Drop for HookToken {
    fn drop(&mut self) {
        if self.active {
            debug!("Dropping HookToken {}", self.id);
            self.release();
        }
    }
}

impl std::fmt::Debug for HookToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "HookToken({})", self.id) }
}

/// Synchronous handle to a connection's observer registry
///
/// Cloneable and safe to capture inside observers. Registration through this handle takes effect
/// natively at the start of the connection's next operation; use the async methods on
/// [`Connection`](crate::Connection) to have it applied before returning.
#[derive(Clone)]
pub struct Hooks {
    state: Arc<HookState>,
}

impl Hooks {
    pub(crate) fn new(state: Arc<HookState>) -> Self { Self { state } }

    /// None once the connection has closed
    pub fn register(&self, observer: Observer) -> Option<HookToken> {
        let (kind, id) = self.state.insert(observer)?;
        Some(HookToken { state: Arc::downgrade(&self.state), id: ObserverId { kind, id }, active: true })
    }

    /// None once the connection has closed
    pub fn install(&self, observer: Observer) -> Option<ObserverId> {
        let (kind, id) = self.state.insert(observer)?;
        Some(ObserverId { kind, id })
    }

    /// Idempotent: true only for the call that actually removed the observer
    pub fn remove(&self, id: ObserverId) -> bool { self.state.remove(id.kind, id.id) }

    pub fn count(&self, kind: HookKind) -> usize { self.state.count(kind) }

    /// Whether the native trampoline for `kind` is currently registered
    pub fn is_installed(&self, kind: HookKind) -> bool { self.state.is_installed(kind) }

    pub fn is_closed(&self) -> bool { self.state.is_closed() }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Hooks");
        for kind in HookKind::ALL {
            s.field(&format!("{:?}", kind).to_lowercase(), &self.count(kind));
        }
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn hooks() -> Hooks { Hooks::new(Arc::new(HookState::new())) }

    #[test]
    fn test_token_unregisters_on_drop() {
        let hooks = hooks();
        let token = hooks.register(Observer::update(|_: &UpdateEvent| {})).unwrap();
        assert_eq!(hooks.count(HookKind::Update), 1);
        drop(token);
        assert_eq!(hooks.count(HookKind::Update), 0);

        let _ = hooks.register(Observer::update(|_: &UpdateEvent| {}));
        assert_eq!(hooks.count(HookKind::Update), 0);
    }

    #[test]
    fn test_cancel_and_detach() {
        let hooks = hooks();
        let token = hooks.register(Observer::commit(|_: &CommitEvent| CommitDecision::Allow)).unwrap();
        assert!(token.cancel());
        assert_eq!(hooks.count(HookKind::Commit), 0);

        let token = hooks.register(Observer::commit(|_: &CommitEvent| CommitDecision::Allow)).unwrap();
        let id = token.detach();
        assert_eq!(hooks.count(HookKind::Commit), 1);
        assert!(hooks.remove(id));
        assert!(!hooks.remove(id));
    }

    #[test]
    fn test_installed_id_survives_being_dropped() {
        let hooks = hooks();
        let seen = Arc::new(Mutex::new(0));
        {
            let seen = seen.clone();
            let _id = hooks.install(Observer::rollback(move |_: &RollbackEvent| *seen.lock().unwrap() += 1));
        }
        assert_eq!(hooks.count(HookKind::Rollback), 1);
    }

    #[test]
    fn test_token_after_close() {
        let hooks = hooks();
        let token = hooks.register(Observer::update(|_: &UpdateEvent| {})).unwrap();
        hooks.state.close();
        assert!(!token.cancel());
        assert!(hooks.register(Observer::update(|_: &UpdateEvent| {})).is_none());
        assert!(hooks.install(Observer::update(|_: &UpdateEvent| {})).is_none());
    }
}
