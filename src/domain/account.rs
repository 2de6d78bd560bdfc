//! Ledger Account
//!
//! Balance-holding row owned exclusively by the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::amount::Balance;

/// Account as stored by the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account ID, immutable after creation
    pub id: Uuid,

    /// Owner display name
    pub owner_name: String,

    /// Owner email, used as the notification recipient
    pub email: String,

    /// Committed balance, never negative
    pub balance: Balance,

    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Open a new account with a zero balance
    pub fn open(id: Uuid, owner_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            owner_name: owner_name.into(),
            email: email.into(),
            balance: Balance::zero(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_account_open() {
        let id = Uuid::new_v4();
        let account = Account::open(id, "Alice", "alice@example.com");

        assert_eq!(account.id, id);
        assert_eq!(account.owner_name, "Alice");
        assert_eq!(account.balance.value(), Decimal::ZERO);
    }
}
