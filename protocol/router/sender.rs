// Bridge Sender - Escrows the asset, builds the composed message and pays the transport
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::super::codec::{self, InnerPayload, MessageType};
use super::super::config::{BridgeConfig, ConfigError};
use super::super::options::OptionsBuilder;
use super::{
    Address, AssetLedger, BridgeError, BridgeEvent, CallContext, ChainId, DeliveryReceipt,
    EventLog, ExecutionLock, MessagingFee, RouteRegistry, SendDescriptor, Transport, TransportError,
    BPS_DENOMINATOR, U256,
};

/// Gas, value and slippage parameters applied to every outbound send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub slippage_bp: u16,
    pub receive_gas: u128,
    pub receive_value: u128,
    pub compose_gas: u128,
    pub compose_value: u128,
    pub ordered_execution: bool,
}

impl ExecutionConfig {
    pub fn options(&self) -> Vec<u8> {
        let builder = OptionsBuilder::new()
            .receive_gas(self.receive_gas, self.receive_value)
            .compose_gas(0, self.compose_gas, self.compose_value);
        if self.ordered_execution {
            builder.ordered_execution().build()
        } else {
            builder.build()
        }
    }

    /// `amount × (1 − slippage)`, rounded down, without intermediate overflow.
    pub fn min_amount(&self, amount: U256) -> U256 {
        let denominator = U256::from(BPS_DENOMINATOR);
        let keep = U256::from(BPS_DENOMINATOR.saturating_sub(u64::from(self.slippage_bp)));
        let (quotient, remainder) = amount.div_mod(denominator);
        quotient * keep + remainder * keep / denominator
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if u64::from(self.slippage_bp) > BPS_DENOMINATOR {
            return Err(ConfigError::Invalid(format!(
                "slippage_bp {} exceeds {}",
                self.slippage_bp, BPS_DENOMINATOR
            )));
        }
        if self.receive_gas == 0 {
            return Err(ConfigError::Invalid("receive_gas must be non-zero".to_string()));
        }
        if self.compose_gas == 0 {
            return Err(ConfigError::Invalid("compose_gas must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// One outbound transfer. `extension` is sale metadata or deposit parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRequest {
    pub destination: ChainId,
    pub amount: U256,
    pub recipient: Address,
    pub message_type: MessageType,
    pub extension: Vec<u8>,
}

impl BridgeRequest {
    pub fn new(destination: ChainId, amount: U256, recipient: Address) -> Self {
        Self {
            destination,
            amount,
            recipient,
            message_type: MessageType::SimpleTransfer,
            extension: Vec::new(),
        }
    }

    pub fn with_message(mut self, message_type: MessageType, extension: Vec<u8>) -> Self {
        self.message_type = message_type;
        self.extension = extension;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeOutcome {
    pub receipt: DeliveryReceipt,
    /// Native value returned to the caller: paid minus the fee charged.
    pub refund: U256,
}

pub struct BridgeSender {
    address: Address,
    chain_id: ChainId,
    registry: RouteRegistry,
    ledger: Arc<dyn AssetLedger>,
    transport: Arc<dyn Transport>,
    config: RwLock<ExecutionConfig>,
    lock: ExecutionLock,
    events: EventLog,
}

impl BridgeSender {
    pub fn new(
        address: Address,
        config: &BridgeConfig,
        registry: RouteRegistry,
        ledger: Arc<dyn AssetLedger>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, BridgeError> {
        config.validate()?;
        let events = registry.events();
        Ok(Self {
            address,
            chain_id: config.chain_id,
            registry,
            ledger,
            transport,
            config: RwLock::new(config.execution()),
            lock: ExecutionLock::new(),
            events,
        })
    }

    /// Custody address holding escrowed funds.
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn registry(&self) -> &RouteRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub async fn execution_config(&self) -> ExecutionConfig {
        *self.config.read().await
    }

    pub async fn escrowed_balance(&self) -> Result<U256, BridgeError> {
        Ok(self.ledger.balance_of(self.address).await?)
    }

    /// Validates the request and builds the exact descriptor both quote and send use.
    async fn build_descriptor(&self, request: &BridgeRequest) -> Result<SendDescriptor, BridgeError> {
        if request.destination == self.chain_id {
            return Err(BridgeError::InvalidDestination(request.destination));
        }
        if request.amount.is_zero() {
            return Err(BridgeError::InvalidAmount);
        }
        let receiver = self.registry.require_route(request.destination).await?;

        let config = self.execution_config().await;
        let inner = InnerPayload::new(request.recipient, request.extension.clone()).encode();

        Ok(SendDescriptor {
            destination: request.destination,
            receiver,
            amount: request.amount,
            min_amount: config.min_amount(request.amount),
            options: config.options(),
            compose_payload: codec::encode(request.message_type, request.amount, &inner),
        })
    }

    pub async fn quote_bridge(
        &self,
        destination: ChainId,
        amount: U256,
        recipient: Address,
    ) -> Result<MessagingFee, BridgeError> {
        self.quote_bridge_with(&BridgeRequest::new(destination, amount, recipient))
            .await
    }

    pub async fn quote_bridge_with(&self, request: &BridgeRequest) -> Result<MessagingFee, BridgeError> {
        let descriptor = self.build_descriptor(request).await?;
        let fee = self.transport.quote(&descriptor).await?;
        tracing::debug!(
            destination = request.destination,
            native_fee = %fee.native_fee,
            "quoted bridge fee"
        );
        Ok(fee)
    }

    pub async fn initiate_bridge(
        &self,
        ctx: CallContext,
        destination: ChainId,
        amount: U256,
        recipient: Address,
    ) -> Result<BridgeOutcome, BridgeError> {
        self.initiate_bridge_with(ctx, BridgeRequest::new(destination, amount, recipient))
            .await
    }

    pub async fn initiate_bridge_with(
        &self,
        ctx: CallContext,
        request: BridgeRequest,
    ) -> Result<BridgeOutcome, BridgeError> {
        self.lock.run(self.execute_bridge(ctx, request)).await
    }

    async fn execute_bridge(
        &self,
        ctx: CallContext,
        request: BridgeRequest,
    ) -> Result<BridgeOutcome, BridgeError> {
        let descriptor = self.build_descriptor(&request).await?;
        let quote = self.transport.quote(&descriptor).await?;
        if ctx.value < quote.native_fee {
            tracing::warn!(
                caller = ?ctx.caller,
                required = %quote.native_fee,
                paid = %ctx.value,
                "bridge rejected: insufficient fee"
            );
            return Err(BridgeError::InsufficientFee {
                required: quote.native_fee,
                paid: ctx.value,
            });
        }

        // Nothing has moved yet; from here on a failure must return the escrow.
        self.ledger
            .transfer_from(self.address, ctx.caller, self.address, request.amount)
            .await?;

        let fee = MessagingFee::native(quote.native_fee);
        let sent = self
            .transport
            .send(self.address, descriptor, fee, ctx.caller)
            .await
            .and_then(|receipt| check_charge(receipt, fee));
        let receipt = match sent {
            Ok(receipt) => receipt,
            Err(err) => {
                tracing::warn!(caller = ?ctx.caller, error = %err, "transport refused message");
                return Err(self.release_escrow(ctx.caller, request.amount, err).await);
            }
        };
        let refund = ctx.value.saturating_sub(receipt.fee.native_fee);

        tracing::info!(
            sender = ?ctx.caller,
            destination = request.destination,
            amount = %request.amount,
            message_id = ?receipt.message_id,
            "bridge initiated"
        );
        self.events
            .emit(BridgeEvent::BridgeInitiated {
                sender: ctx.caller,
                recipient: request.recipient,
                destination: request.destination,
                message_type: request.message_type,
                amount: request.amount,
                message_id: receipt.message_id,
                sequence: receipt.sequence,
                fee: receipt.fee.native_fee,
            })
            .await;

        Ok(BridgeOutcome { receipt, refund })
    }

    /// Return the escrow after a failed send. Reports the transport error, or
    /// both errors when the escrow is stuck in custody.
    async fn release_escrow(&self, to: Address, amount: U256, cause: TransportError) -> BridgeError {
        match self.ledger.transfer(self.address, to, amount).await {
            Ok(()) => cause.into(),
            Err(ledger) => {
                tracing::error!(?to, %amount, error = %ledger, "failed to return escrow");
                BridgeError::EscrowNotReturned {
                    transport: cause,
                    ledger,
                }
            }
        }
    }

    pub async fn set_route(
        &self,
        caller: Address,
        destination: ChainId,
        receiver: Address,
    ) -> Result<(), BridgeError> {
        self.lock
            .run(self.registry.set_route(caller, destination, receiver))
            .await
    }

    pub async fn set_execution_config(
        &self,
        caller: Address,
        config: ExecutionConfig,
    ) -> Result<(), BridgeError> {
        self.lock
            .run(async {
                self.registry.ensure_admin(caller).await?;
                config.validate()?;

                *self.config.write().await = config;
                tracing::info!(
                    slippage_bp = config.slippage_bp,
                    ordered = config.ordered_execution,
                    "execution config updated"
                );
                self.events
                    .emit(BridgeEvent::ExecutionConfigUpdated {
                        slippage_bp: config.slippage_bp,
                        receive_gas: config.receive_gas,
                        compose_gas: config.compose_gas,
                        ordered_execution: config.ordered_execution,
                    })
                    .await;
                Ok(())
            })
            .await
    }

    /// Administrator-only removal of stuck funds from custody.
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
                tracing::warn!(?to, %amount, "asset recovered from sender custody");
                self.events
                    .emit(BridgeEvent::AssetRecovered { to, amount })
                    .await;
                Ok(())
            })
            .await
    }
}

/// A transport must never keep more than the fee it was handed.
fn check_charge(receipt: DeliveryReceipt, forwarded: MessagingFee) -> Result<DeliveryReceipt, TransportError> {
    if receipt.fee.native_fee > forwarded.native_fee {
        return Err(TransportError::Rejected(format!(
            "charged {} above forwarded fee {}",
            receipt.fee.native_fee, forwarded.native_fee
        )));
    }
    Ok(receipt)
}
