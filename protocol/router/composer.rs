// Composer - Validates and dispatches composed messages delivered by the transport
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::super::codec::{self, ComposedMessage, InnerPayload, MessageType};
use super::{
    Address, AssetLedger, BridgeError, BridgeEvent, ChainId, EventLog, ExecutionLock,
    RouteRegistry, H256, U256,
};

/// Downstream targets. `None` means deliver directly to the recipient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collaborators {
    pub vault: Option<Address>,
    pub protocol: Option<Address>,
}

/// One inbound invocation from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCompose {
    /// Identity making the call; must be the trusted endpoint.
    pub caller: Address,
    /// Declared origin: the bridge component that composed the message.
    pub origin: Address,
    pub message_id: H256,
    pub message: Vec<u8>,
    pub executor: Address,
    pub extra: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeState {
    Unvalidated,
    Validated,
    Dispatched,
    Rejected,
}

/// Summary of an applied dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub message_type: MessageType,
    pub source_chain: ChainId,
    pub amount: U256,
    pub delivered_to: Address,
}

pub struct Composer {
    address: Address,
    endpoint: Address,
    registry: RouteRegistry,
    ledger: Arc<dyn AssetLedger>,
    collaborators: RwLock<Collaborators>,
    counters: RwLock<HashMap<MessageType, u64>>,
    processed: RwLock<HashSet<H256>>,
    lock: ExecutionLock,
    events: EventLog,
}

impl Composer {
    pub fn new(
        address: Address,
        endpoint: Address,
        registry: RouteRegistry,
        ledger: Arc<dyn AssetLedger>,
    ) -> Self {
        let events = registry.events();
        Self {
            address,
            endpoint,
            registry,
            ledger,
            collaborators: RwLock::new(Collaborators::default()),
            counters: RwLock::new(HashMap::new()),
            processed: RwLock::new(HashSet::new()),
            lock: ExecutionLock::new(),
            events,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn endpoint(&self) -> Address {
        self.endpoint
    }

    pub fn registry(&self) -> &RouteRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub async fn collaborators(&self) -> Collaborators {
        *self.collaborators.read().await
    }

    pub async fn operation_count(&self, message_type: MessageType) -> u64 {
        self.counters
            .read()
            .await
            .get(&message_type)
            .copied()
            .unwrap_or(0)
    }

    pub async fn is_processed(&self, message_id: H256) -> bool {
        self.processed.read().await.contains(&message_id)
    }

    pub async fn handle_composed_message(
        &self,
        call: InboundCompose,
    ) -> Result<DispatchReport, BridgeError> {
        let result = self.lock.run(self.process(&call)).await;
        if let Err(err) = &result {
            tracing::warn!(
                message_id = ?call.message_id,
                code = err.code(),
                state = ?ComposeState::Rejected,
                error = %err,
                "composed message rejected"
            );
        }
        result
    }

    async fn process(&self, call: &InboundCompose) -> Result<DispatchReport, BridgeError> {
        tracing::debug!(message_id = ?call.message_id, state = ?ComposeState::Unvalidated, "composed message received");
        let source_chain = self.validate(call).await?;
        tracing::debug!(message_id = ?call.message_id, state = ?ComposeState::Validated, source_chain, "composed message validated");

        let message = codec::decode(&call.message)?;
        let message_type = message
            .message_type()
            .ok_or(BridgeError::UnsupportedOperation(message.tag))?;
        let inner = InnerPayload::decode(&message.inner_payload)?;

        let report = match message_type {
            MessageType::SimpleTransfer => {
                self.deliver_transfer(call.message_id, &message, inner).await?
            }
            MessageType::TreasurySale => {
                self.settle_treasury_sale(call.message_id, &message, inner).await?
            }
            MessageType::VaultDeposit => {
                self.deliver_vault_deposit(call.message_id, &message, inner).await?
            }
        };

        self.processed.write().await.insert(call.message_id);
        *self.counters.write().await.entry(message_type).or_insert(0) += 1;

        tracing::info!(
            message_id = ?call.message_id,
            state = ?ComposeState::Dispatched,
            message_type = %message_type,
            amount = %report.amount,
            delivered_to = ?report.delivered_to,
            "composed message dispatched"
        );
        Ok(report)
    }

    /// Caller identity, then declared origin, then replay. Returns the source chain.
    async fn validate(&self, call: &InboundCompose) -> Result<ChainId, BridgeError> {
        if call.caller != self.endpoint {
            return Err(BridgeError::InvalidCaller(call.caller));
        }

        let source_chain = codec::decode_source_chain(&call.message)?;
        if !self.registry.is_trusted_origin(source_chain, call.origin).await {
            return Err(BridgeError::InvalidSource {
                source_chain,
                origin: call.origin,
            });
        }

        if self.is_processed(call.message_id).await {
            return Err(BridgeError::DuplicateMessage(call.message_id));
        }
        Ok(source_chain)
    }

    async fn ensure_balance(&self, amount: U256) -> Result<(), BridgeError> {
        let available = self.ledger.balance_of(self.address).await?;
        if available < amount {
            return Err(BridgeError::InsufficientBalance {
                required: amount,
                available,
            });
        }
        Ok(())
    }

    async fn deliver_transfer(
        &self,
        message_id: H256,
        message: &ComposedMessage,
        inner: InnerPayload,
    ) -> Result<DispatchReport, BridgeError> {
        self.ensure_balance(message.amount).await?;
        self.ledger
            .transfer(self.address, inner.account, message.amount)
            .await?;

        self.events
            .emit(BridgeEvent::TransferDelivered {
                message_id,
                source_chain: message.source_chain,
                recipient: inner.account,
                amount: message.amount,
            })
            .await;

        Ok(DispatchReport {
            message_type: MessageType::SimpleTransfer,
            source_chain: message.source_chain,
            amount: message.amount,
            delivered_to: inner.account,
        })
    }

    async fn settle_treasury_sale(
        &self,
        message_id: H256,
        message: &ComposedMessage,
        inner: InnerPayload,
    ) -> Result<DispatchReport, BridgeError> {
        self.ensure_balance(message.amount).await?;

        let vault = self.collaborators.read().await.vault;
        let delivered_to = vault.unwrap_or(inner.account);
        self.ledger
            .transfer(self.address, delivered_to, message.amount)
            .await?;

        self.events
            .emit(BridgeEvent::TreasurySaleSettled {
                message_id,
                source_chain: message.source_chain,
                recipient: inner.account,
                delivered_to,
                amount: message.amount,
                sale_metadata: inner.extension,
            })
            .await;

        Ok(DispatchReport {
            message_type: MessageType::TreasurySale,
            source_chain: message.source_chain,
            amount: message.amount,
            delivered_to,
        })
    }

    async fn deliver_vault_deposit(
        &self,
        message_id: H256,
        message: &ComposedMessage,
        inner: InnerPayload,
    ) -> Result<DispatchReport, BridgeError> {
        self.ensure_balance(message.amount).await?;

        let protocol = self.collaborators.read().await.protocol;
        let previous_allowance = match protocol {
            Some(protocol) => {
                let previous = self.ledger.allowance(self.address, protocol).await?;
                self.ledger
                    .approve(self.address, protocol, message.amount)
                    .await?;
                Some((protocol, previous))
            }
            None => None,
        };

        if let Err(transfer) = self
            .ledger
            .transfer(self.address, inner.account, message.amount)
            .await
        {
            if let Some((protocol, previous)) = previous_allowance {
                if let Err(restore) = self.ledger.approve(self.address, protocol, previous).await {
                    tracing::error!(?protocol, error = %restore, "failed to restore protocol allowance");
                    return Err(BridgeError::AllowanceNotRestored { transfer, restore });
                }
            }
            return Err(transfer.into());
        }

        self.events
            .emit(BridgeEvent::VaultDepositDelivered {
                message_id,
                source_chain: message.source_chain,
                beneficiary: inner.account,
                amount: message.amount,
                protocol,
                deposit_params: inner.extension,
            })
            .await;

        Ok(DispatchReport {
            message_type: MessageType::VaultDeposit,
            source_chain: message.source_chain,
            amount: message.amount,
            delivered_to: inner.account,
        })
    }

    pub async fn set_trusted_remote(
        &self,
        caller: Address,
        chain: ChainId,
        remote: Address,
    ) -> Result<(), BridgeError> {
        self.lock
            .run(self.registry.set_trusted_remote(caller, chain, remote))
            .await
    }

    pub async fn configure_collaborators(
        &self,
        caller: Address,
        vault: Option<Address>,
        protocol: Option<Address>,
    ) -> Result<(), BridgeError> {
        self.lock
            .run(async {
                self.registry.ensure_admin(caller).await?;

                *self.collaborators.write().await = Collaborators { vault, protocol };
                tracing::info!(?vault, ?protocol, "collaborators configured");
                self.events
                    .emit(BridgeEvent::CollaboratorsConfigured { vault, protocol })
                    .await;
                Ok(())
            })
            .await
    }

    /// Administrator-only removal of stuck funds held by the composer.
    pub async fn recover_asset(
        &self,
        caller: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), BridgeError> {
        self.lock
            .run(async {
                self.registry.ensure_admin(caller).await?;

                self.ledger.transfer(self.address, to, amount).await?;
                tracing::warn!(?to, %amount, "asset recovered from composer");
                self.events
                    .emit(BridgeEvent::AssetRecovered { to, amount })
                    .await;
                Ok(())
            })
            .await
    }
}
