//! Account types.
//!
//! An account is a user's point balance holder. The cached `balance` is
//! owned by the ledger: it is only ever mutated through credit/debit and
//! must equal the fold of the account's ledger entries at all times.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of an account within a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Creates task definitions, reviews submissions, grants awards.
    Guardian,
    /// Completes tasks and earns points.
    Dependent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guardian => "guardian",
            Role::Dependent => "dependent",
        }
    }
}

/// A user's point balance holder. One per user, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Opaque stable identifier supplied by the auth layer.
    pub id: String,
    pub display_name: String,
    pub role: Role,
    pub family_id: String,
    /// Cached point balance. Non-negative by invariant.
    pub balance: i64,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with a zero balance.
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        role: Role,
        family_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Account {
            id: id.into(),
            display_name: display_name.into(),
            role,
            family_id: family_id.into(),
            balance: 0,
            created_at,
        }
    }
}
