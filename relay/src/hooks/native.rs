//! Native hook trampolines
//!
//! SQLite accepts one callback per hook kind per connection. Each trampoline below receives the
//! connection's `HookState` as its opaque user-data pointer and fans out to the registered observers.
//! The pointer is borrowed, never owned: trampolines are only registered while the session holds an
//! `Arc<HookState>`, and the session unregisters all of them before it closes the native handle.

use std::ffi::{c_char, c_int, c_void, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use chrono::Utc;
use rusqlite::ffi;
use tracing::{error, trace};

use super::event::{Authorization, AuthorizerAction, AuthorizerEvent, CommitDecision, CommitEvent, RollbackEvent, UpdateEvent, UpdateOperation};
use super::registry::{HookState, Transition};
use super::HookKind;

/// Register or unregister one trampoline
///
/// # Safety
/// `db` must be a live handle and `state` must stay alive until the trampoline is unregistered.
pub(crate) unsafe fn apply(db: *mut ffi::sqlite3, state: *const HookState, transition: Transition) {
    let user_data = if transition.install { state as *mut c_void } else { ptr::null_mut() };
    trace!("{} native {:?} hook", if transition.install { "installing" } else { "removing" }, transition.kind);
    match (transition.kind, transition.install) {
        (HookKind::Update, true) => {
            ffi::sqlite3_update_hook(db, Some(update_trampoline), user_data);
        }
        (HookKind::Update, false) => {
            ffi::sqlite3_update_hook(db, None, ptr::null_mut());
        }
        (HookKind::Commit, true) => {
            ffi::sqlite3_commit_hook(db, Some(commit_trampoline), user_data);
        }
        (HookKind::Commit, false) => {
            ffi::sqlite3_commit_hook(db, None, ptr::null_mut());
        }
        (HookKind::Rollback, true) => {
            ffi::sqlite3_rollback_hook(db, Some(rollback_trampoline), user_data);
        }
        (HookKind::Rollback, false) => {
            ffi::sqlite3_rollback_hook(db, None, ptr::null_mut());
        }
        (HookKind::Authorizer, true) => {
            ffi::sqlite3_set_authorizer(db, Some(authorizer_trampoline), user_data);
        }
        (HookKind::Authorizer, false) => {
            ffi::sqlite3_set_authorizer(db, None, ptr::null_mut());
        }
    }
}

unsafe fn state<'a>(user_data: *mut c_void) -> &'a HookState { &*(user_data as *const HookState) }

unsafe fn text(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

unsafe extern "C" fn update_trampoline(user_data: *mut c_void, op: c_int, database: *const c_char, table: *const c_char, rowid: ffi::sqlite3_int64) {
    let Some(operation) = UpdateOperation::from_code(op) else {
        return;
    };
    let event = UpdateEvent { operation, database: text(database).unwrap_or_default(), table: text(table).unwrap_or_default(), rowid };
    let state = state(user_data);
    if catch_unwind(AssertUnwindSafe(|| state.dispatch_update(&event))).is_err() {
        error!("update hook dispatch panicked");
    }
}

/// Non-zero turns the commit into a rollback
unsafe extern "C" fn commit_trampoline(user_data: *mut c_void) -> c_int {
    let state = state(user_data);
    let event = CommitEvent { at: Utc::now() };
    match catch_unwind(AssertUnwindSafe(|| state.dispatch_commit(&event))) {
        Ok(CommitDecision::Allow) => 0,
        Ok(CommitDecision::Deny) => 1,
        Err(_) => {
            error!("commit hook dispatch panicked; vetoing commit");
            1
        }
    }
}

unsafe extern "C" fn rollback_trampoline(user_data: *mut c_void) {
    let state = state(user_data);
    let event = RollbackEvent { at: Utc::now() };
    if catch_unwind(AssertUnwindSafe(|| state.dispatch_rollback(&event))).is_err() {
        error!("rollback hook dispatch panicked");
    }
}

unsafe extern "C" fn authorizer_trampoline(
    user_data: *mut c_void,
    action: c_int,
    parameter1: *const c_char,
    parameter2: *const c_char,
    database: *const c_char,
    accessor: *const c_char,
) -> c_int {
    let event = AuthorizerEvent {
        action: AuthorizerAction::from_code(action),
        parameter1: text(parameter1),
        parameter2: text(parameter2),
        database: text(database),
        accessor: text(accessor),
    };
    let state = state(user_data);
    match catch_unwind(AssertUnwindSafe(|| state.dispatch_authorizer(&event))) {
        Ok(answer) => answer.code(),
        Err(_) => {
            error!("authorizer dispatch panicked; denying");
            Authorization::Deny.code()
        }
    }
}
