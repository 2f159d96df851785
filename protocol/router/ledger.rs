// Asset Ledger - Fungible asset collaborator consumed by sender and composer
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{Address, U256};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient balance for {holder:?}: required {required}, available {available}")]
    InsufficientBalance {
        holder: Address,
        required: U256,
        available: U256,
    },

    #[error("Insufficient allowance for {spender:?} on {owner:?}: required {required}, approved {approved}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        required: U256,
        approved: U256,
    },

    #[error("Transfer to {0:?} rejected")]
    RecipientRejected(Address),

    #[error("Balance overflow for {0:?}")]
    Overflow(Address),
}

/// Balance/transfer/approve surface of a fungible asset. `owner` / `spender`
/// name the identity on whose behalf the call is made.
#[async_trait]
pub trait AssetLedger: Send + Sync {
    async fn balance_of(&self, holder: Address) -> Result<U256, LedgerError>;

    async fn transfer(&self, owner: Address, to: Address, amount: U256) -> Result<(), LedgerError>;

    async fn transfer_from(
        &self,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), LedgerError>;

    async fn approve(&self, owner: Address, spender: Address, amount: U256) -> Result<(), LedgerError>;

    async fn allowance(&self, owner: Address, spender: Address) -> Result<U256, LedgerError>;
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
    rejected_recipients: HashSet<Address>,
}

impl LedgerState {
    fn balance(&self, holder: &Address) -> U256 {
        self.balances.get(holder).copied().unwrap_or_default()
    }

    fn move_funds(&mut self, from: Address, to: Address, amount: U256) -> Result<(), LedgerError> {
        if self.rejected_recipients.contains(&to) {
            return Err(LedgerError::RecipientRejected(to));
        }

        let available = self.balance(&from);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                holder: from,
                required: amount,
                available,
            });
        }
        if from == to {
            return Ok(());
        }

        let credited = self
            .balance(&to)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow(to))?;
        self.balances.insert(from, available - amount);
        self.balances.insert(to, credited);
        Ok(())
    }
}

// In-memory ledger for testing and local simulation
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mint(&self, to: Address, amount: U256) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;
        let credited = state
            .balance(&to)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow(to))?;
        state.balances.insert(to, credited);
        Ok(())
    }

    /// Make every future transfer to `holder` fail.
    pub async fn reject_transfers_to(&self, holder: Address) {
        let mut state = self.state.write().await;
        state.rejected_recipients.insert(holder);
    }

    pub async fn total_supply(&self) -> U256 {
        let state = self.state.read().await;
        state
            .balances
            .values()
            .fold(U256::zero(), |acc, b| acc.saturating_add(*b))
    }
}

#[async_trait]
impl AssetLedger for InMemoryLedger {
    async fn balance_of(&self, holder: Address) -> Result<U256, LedgerError> {
        let state = self.state.read().await;
        Ok(state.balance(&holder))
    }

    async fn transfer(&self, owner: Address, to: Address, amount: U256) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;
        state.move_funds(owner, to, amount)
    }

    async fn transfer_from(
        &self,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;

        let approved = state
            .allowances
            .get(&(from, spender))
            .copied()
            .unwrap_or_default();
        if approved < amount {
            return Err(LedgerError::InsufficientAllowance {
                owner: from,
                spender,
                required: amount,
                approved,
            });
        }

        state.move_funds(from, to, amount)?;
        state.allowances.insert((from, spender), approved - amount);
        Ok(())
    }

    async fn approve(&self, owner: Address, spender: Address, amount: U256) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;
        state.allowances.insert((owner, spender), amount);
        Ok(())
    }

    async fn allowance(&self, owner: Address, spender: Address) -> Result<U256, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default())
    }
}
