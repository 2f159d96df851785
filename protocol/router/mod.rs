// Compose Bridge - Router
// Shared types, error taxonomy, execution lock and audit log used by the
// sender and composer sides.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub use ethereum_types::{Address, H256, U256};

pub use super::codec::{CodecError, MessageType};
pub use super::config::ConfigError;
pub use super::options::OptionsError;
pub use composer::{Collaborators, ComposeState, Composer, DispatchReport, InboundCompose};
pub use ledger::{AssetLedger, InMemoryLedger, LedgerError};
pub use registry::RouteRegistry;
pub use sender::{BridgeOutcome, BridgeRequest, BridgeSender, ExecutionConfig};
pub use transport::{DeliveryReceipt, MessagingFee, SendDescriptor, Transport, TransportError};

/// Numeric network identifier within the transport's namespace.
pub type ChainId = u32;

/// Basis-point denominator for slippage.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Identity and attached native value of the party invoking an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub caller: Address,
    pub value: U256,
}

impl CallContext {
    pub fn new(caller: Address) -> Self {
        Self {
            caller,
            value: U256::zero(),
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    Validation,
    Format,
    Resource,
    Configuration,
    Authorization,
    External,
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Destination {0} is this chain")]
    InvalidDestination(ChainId),

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("No route configured for destination {0}")]
    RouteNotSet(ChainId),

    #[error("Insufficient fee: required {required}, paid {paid}")]
    InsufficientFee { required: U256, paid: U256 },

    #[error("Caller {0:?} is not the trusted transport endpoint")]
    InvalidCaller(Address),

    #[error("Origin {origin:?} is not trusted for source chain {source_chain}")]
    InvalidSource { source_chain: ChainId, origin: Address },

    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] CodecError),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: U256, available: U256 },

    #[error("Unsupported operation type {0}")]
    UnsupportedOperation(u8),

    #[error("Caller {0:?} is not the administrator")]
    Unauthorized(Address),

    #[error("Re-entrant call rejected")]
    Reentrancy,

    #[error("Message {0:?} was already processed")]
    DuplicateMessage(H256),

    #[error("Invalid options: {0}")]
    InvalidOptions(#[from] OptionsError),

    #[error("Ledger failure: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Send failed ({transport}) and the escrow could not be returned: {ledger}")]
    EscrowNotReturned {
        transport: TransportError,
        ledger: LedgerError,
    },

    #[error("Transfer failed ({transfer}) and the granted allowance could not be restored: {restore}")]
    AllowanceNotRestored {
        transfer: LedgerError,
        restore: LedgerError,
    },
}

impl BridgeError {
    /// Stable reason code reported to callers.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::InvalidDestination(_) => "INVALID_DESTINATION",
            BridgeError::InvalidAmount => "INVALID_AMOUNT",
            BridgeError::RouteNotSet(_) => "ROUTE_NOT_SET",
            BridgeError::InsufficientFee { .. } => "INSUFFICIENT_FEE",
            BridgeError::InvalidCaller(_) => "INVALID_CALLER",
            BridgeError::InvalidSource { .. } => "INVALID_SOURCE",
            BridgeError::MalformedMessage(_) => "MALFORMED_MESSAGE",
            BridgeError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            BridgeError::UnsupportedOperation(_) => "UNSUPPORTED_OPERATION",
            BridgeError::Unauthorized(_) => "UNAUTHORIZED",
            BridgeError::Reentrancy => "REENTRANT_CALL",
            BridgeError::DuplicateMessage(_) => "DUPLICATE_MESSAGE",
            BridgeError::InvalidOptions(_) => "INVALID_OPTIONS",
            BridgeError::Ledger(_) => "LEDGER_FAILURE",
            BridgeError::Transport(_) => "TRANSPORT_FAILURE",
            BridgeError::Config(_) => "INVALID_CONFIG",
            BridgeError::EscrowNotReturned { .. } => "ESCROW_NOT_RETURNED",
            BridgeError::AllowanceNotRestored { .. } => "ALLOWANCE_NOT_RESTORED",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            BridgeError::InvalidCaller(_)
            | BridgeError::InvalidSource { .. }
            | BridgeError::InvalidDestination(_)
            | BridgeError::InvalidAmount
            | BridgeError::DuplicateMessage(_) => ErrorCategory::Validation,
            BridgeError::MalformedMessage(_) | BridgeError::InvalidOptions(_) => ErrorCategory::Format,
            BridgeError::InsufficientBalance { .. } | BridgeError::InsufficientFee { .. } => {
                ErrorCategory::Resource
            }
            BridgeError::RouteNotSet(_)
            | BridgeError::UnsupportedOperation(_)
            | BridgeError::Config(_) => ErrorCategory::Configuration,
            BridgeError::Unauthorized(_) | BridgeError::Reentrancy => ErrorCategory::Authorization,
            BridgeError::Ledger(_)
            | BridgeError::Transport(_)
            | BridgeError::EscrowNotReturned { .. }
            | BridgeError::AllowanceNotRestored { .. } => ErrorCategory::External,
        }
    }
}

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    /// Ids of the execution locks held by the current task.
    static HELD_LOCKS: Vec<u64>;
}

/// Serializes operations on one component. Independent callers queue behind
/// the mutex; a call made from inside a running operation on the same lock
/// fails with `Reentrancy` instead of deadlocking.
#[derive(Debug)]
pub struct ExecutionLock {
    id: u64,
    running: Mutex<()>,
}

impl Default for ExecutionLock {
    fn default() -> Self {
        Self {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
            running: Mutex::new(()),
        }
    }
}

impl ExecutionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the current task is inside an operation guarded by this lock.
    pub fn is_held_by_current_task(&self) -> bool {
        HELD_LOCKS
            .try_with(|held| held.contains(&self.id))
            .unwrap_or(false)
    }

    pub fn is_locked(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Run `operation` to completion while holding the lock.
    pub async fn run<F, T>(&self, operation: F) -> Result<T, BridgeError>
    where
        F: Future<Output = Result<T, BridgeError>>,
    {
        let mut held = HELD_LOCKS.try_with(|held| held.clone()).unwrap_or_default();
        if held.contains(&self.id) {
            return Err(BridgeError::Reentrancy);
        }

        let _running = self.running.lock().await;
        held.push(self.id);
        HELD_LOCKS.scope(held, operation).await
    }
}

/// Audit record emitted on every successful state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BridgeEvent {
    BridgeInitiated {
        sender: Address,
        recipient: Address,
        destination: ChainId,
        message_type: MessageType,
        amount: U256,
        message_id: H256,
        sequence: u64,
        fee: U256,
    },
    RouteUpdated {
        destination: ChainId,
        receiver: Address,
    },
    TrustedRemoteUpdated {
        chain: ChainId,
        remote: Address,
    },
    CollaboratorsConfigured {
        vault: Option<Address>,
        protocol: Option<Address>,
    },
    ExecutionConfigUpdated {
        slippage_bp: u16,
        receive_gas: u128,
        compose_gas: u128,
        ordered_execution: bool,
    },
    TransferDelivered {
        message_id: H256,
        source_chain: ChainId,
        recipient: Address,
        amount: U256,
    },
    TreasurySaleSettled {
        message_id: H256,
        source_chain: ChainId,
        recipient: Address,
        delivered_to: Address,
        amount: U256,
        sale_metadata: Vec<u8>,
    },
    VaultDepositDelivered {
        message_id: H256,
        source_chain: ChainId,
        beneficiary: Address,
        amount: U256,
        protocol: Option<Address>,
        deposit_params: Vec<u8>,
    },
    AssetRecovered {
        to: Address,
        amount: U256,
    },
    AdminTransferred {
        previous: Address,
        next: Address,
    },
}

/// Append-only, shareable audit log.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<RwLock<Vec<BridgeEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callers log the transition themselves; the record is traced at debug.
    pub async fn emit(&self, event: BridgeEvent) {
        tracing::debug!(?event, "bridge event");
        let mut events = self.events.write().await;
        events.push(event);
    }

    pub async fn events(&self) -> Vec<BridgeEvent> {
        self.events.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}
