// Transport - Outbound interface to the external messaging / liquidity bridge
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Address, ChainId, H256, U256};

/// Everything the transport needs to carry one composed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendDescriptor {
    pub destination: ChainId,
    /// Trusted receiver on the destination chain.
    pub receiver: Address,
    pub amount: U256,
    pub min_amount: U256,
    pub options: Vec<u8>,
    pub compose_payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagingFee {
    pub native_fee: U256,
    pub alt_fee: U256,
}

impl MessagingFee {
    pub fn native(native_fee: U256) -> Self {
        Self {
            native_fee,
            alt_fee: U256::zero(),
        }
    }
}

/// Proof that the transport accepted a message. Says nothing about
/// destination execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: H256,
    pub sequence: u64,
    pub fee: MessagingFee,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Destination {0} is not reachable")]
    Unreachable(ChainId),

    #[error("Fee below quote: required {required}, paid {paid}")]
    FeeTooLow { required: U256, paid: U256 },

    #[error("Message rejected: {0}")]
    Rejected(String),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown message {0:?}")]
    UnknownMessage(H256),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Fee for carrying exactly this descriptor.
    async fn quote(&self, descriptor: &SendDescriptor) -> Result<MessagingFee, TransportError>;

    /// Accept the descriptor for delivery. `sender` is the submitting bridge
    /// component and becomes the declared origin on the destination side.
    async fn send(
        &self,
        sender: Address,
        descriptor: SendDescriptor,
        fee: MessagingFee,
        refund_address: Address,
    ) -> Result<DeliveryReceipt, TransportError>;
}
