use std::ffi::c_int;

use chrono::{DateTime, Utc};
use rusqlite::ffi;

/// Row-level change kind reported by the update hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateOperation {
    Insert,
    Update,
    Delete,
}

impl UpdateOperation {
    pub(crate) fn from_code(code: c_int) -> Option<Self> {
        match code {
            ffi::SQLITE_INSERT => Some(UpdateOperation::Insert),
            ffi::SQLITE_UPDATE => Some(UpdateOperation::Update),
            ffi::SQLITE_DELETE => Some(UpdateOperation::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEvent {
    pub operation: UpdateOperation,
    pub database: String,
    pub table: String,
    pub rowid: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitEvent {
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollbackEvent {
    pub at: DateTime<Utc>,
}

/// A commit observer's vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitDecision {
    #[default]
    Allow,
    /// Abort the commit; the transaction rolls back
    Deny,
}

impl From<bool> for CommitDecision {
    /// `true` allows the commit
    fn from(allow: bool) -> Self {
        if allow {
            CommitDecision::Allow
        } else {
            CommitDecision::Deny
        }
    }
}

/// An authorizer observer's answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Authorization {
    #[default]
    Allow,
    /// Fail the prepare with an authorization error
    Deny,
    /// Disallow silently; column reads become NULL
    Ignore,
}

impl Authorization {
    pub(crate) fn code(&self) -> c_int {
        match self {
            Authorization::Allow => ffi::SQLITE_OK,
            Authorization::Deny => ffi::SQLITE_DENY,
            Authorization::Ignore => ffi::SQLITE_IGNORE,
        }
    }
}

/// One object access being authorized during prepare
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizerEvent {
    pub action: AuthorizerAction,
    pub parameter1: Option<String>,
    pub parameter2: Option<String>,
    pub database: Option<String>,
    /// Innermost trigger or view responsible for the access
    pub accessor: Option<String>,
}

impl AuthorizerEvent {
    /// True for a read of `table.column`
    pub fn is_read_of(&self, table: &str, column: &str) -> bool {
        self.action == AuthorizerAction::Read && self.parameter1.as_deref() == Some(table) && self.parameter2.as_deref() == Some(column)
    }
}

macro_rules! authorizer_actions {
    ($($name:ident = $code:literal,)*) => {
        /// Authorizer action codes; parameter meaning depends on the action
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum AuthorizerAction {
            $($name,)*
            Unknown(i32),
        }

        impl AuthorizerAction {
            pub fn from_code(code: c_int) -> Self {
                match code {
                    $($code => AuthorizerAction::$name,)*
                    other => AuthorizerAction::Unknown(other),
                }
            }

            pub fn code(&self) -> c_int {
                match self {
                    $(AuthorizerAction::$name => $code,)*
                    AuthorizerAction::Unknown(code) => *code,
                }
            }
        }
    };
}

authorizer_actions! {
    Copy = 0,
    CreateIndex = 1,
    CreateTable = 2,
    CreateTempIndex = 3,
    CreateTempTable = 4,
    CreateTempTrigger = 5,
    CreateTempView = 6,
    CreateTrigger = 7,
    CreateView = 8,
    Delete = 9,
    DropIndex = 10,
    DropTable = 11,
    DropTempIndex = 12,
    DropTempTable = 13,
    DropTempTrigger = 14,
    DropTempView = 15,
    DropTrigger = 16,
    DropView = 17,
    Insert = 18,
    Pragma = 19,
    Read = 20,
    Select = 21,
    Transaction = 22,
    Update = 23,
    Attach = 24,
    Detach = 25,
    AlterTable = 26,
    Reindex = 27,
    Analyze = 28,
    CreateVirtualTable = 29,
    DropVirtualTable = 30,
    Function = 31,
    Savepoint = 32,
    Recursive = 33,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_codes() {
        assert_eq!(AuthorizerAction::from_code(20), AuthorizerAction::Read);
        assert_eq!(AuthorizerAction::Read.code(), 20);
        assert_eq!(AuthorizerAction::from_code(ffi::SQLITE_INSERT), AuthorizerAction::Insert);
        assert_eq!(AuthorizerAction::from_code(99), AuthorizerAction::Unknown(99));
    }

    #[test]
    fn test_update_operations() {
        assert_eq!(UpdateOperation::from_code(ffi::SQLITE_DELETE), Some(UpdateOperation::Delete));
        assert_eq!(UpdateOperation::from_code(0), None);
    }
}
