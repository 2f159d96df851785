// Compose Bridge - Local Network
// In-process transport and liquidity bridge for one source chain. Accepted
// packets sit in flight until a delivery method hands them to the
// destination composer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::protocol::codec;
use crate::protocol::options::{parse_options, ExecutionOption};
use crate::protocol::router::{
    Address, BridgeError, ChainId, Composer, DeliveryReceipt, DispatchReport, InMemoryLedger,
    InboundCompose, MessagingFee, SendDescriptor, Transport, TransportError, H256, U256,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub base_fee: U256,
    pub per_byte_fee: U256,
    pub gas_price: U256,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            base_fee: U256::from(10_000u64),
            per_byte_fee: U256::from(16u64),
            gas_price: U256::one(),
        }
    }
}

/// A message accepted by the network and not yet (or already) delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub message_id: H256,
    pub source_chain: ChainId,
    pub destination: ChainId,
    pub sequence: u64,
    /// Bridge component that submitted the packet.
    pub origin: Address,
    pub receiver: Address,
    pub amount: U256,
    pub ordered: bool,
    pub compose_payload: Vec<u8>,
}

/// Outcome of handing one packet to its destination composer.
#[derive(Debug)]
pub struct Delivery {
    pub packet: Packet,
    pub result: Result<DispatchReport, BridgeError>,
}

struct Lane {
    composer: Arc<Composer>,
    ledger: InMemoryLedger,
    next_sequence: u64,
}

#[derive(Default)]
struct NetworkState {
    lanes: HashMap<ChainId, Lane>,
    in_flight: VecDeque<Packet>,
    delivered: HashMap<H256, Packet>,
    credited: HashSet<H256>,
    collected_fees: U256,
}

#[derive(Clone)]
pub struct LocalNetwork {
    source_chain: ChainId,
    endpoint: Address,
    fees: FeeSchedule,
    state: Arc<RwLock<NetworkState>>,
}

impl LocalNetwork {
    /// `endpoint` is the identity the network presents to destination composers.
    pub fn new(source_chain: ChainId, endpoint: Address, fees: FeeSchedule) -> Self {
        Self {
            source_chain,
            endpoint,
            fees,
            state: Arc::new(RwLock::new(NetworkState::default())),
        }
    }

    pub fn source_chain(&self) -> ChainId {
        self.source_chain
    }

    pub fn endpoint(&self) -> Address {
        self.endpoint
    }

    /// Make `destination` reachable. Bridged amounts are minted on `ledger`.
    pub async fn connect(&self, destination: ChainId, composer: Arc<Composer>, ledger: InMemoryLedger) {
        let mut state = self.state.write().await;
        state.lanes.insert(
            destination,
            Lane {
                composer,
                ledger,
                next_sequence: 0,
            },
        );
        tracing::info!(source = self.source_chain, destination, "lane connected");
    }

    pub async fn pending(&self) -> usize {
        self.state.read().await.in_flight.len()
    }

    pub async fn pending_packets(&self) -> Vec<Packet> {
        self.state.read().await.in_flight.iter().cloned().collect()
    }

    pub async fn collected_fees(&self) -> U256 {
        self.state.read().await.collected_fees
    }

    fn fee_for(&self, descriptor: &SendDescriptor) -> Result<U256, TransportError> {
        let options = parse_options(&descriptor.options)
            .map_err(|e| TransportError::Rejected(format!("invalid options: {e}")))?;

        let total_gas = options.iter().fold(U256::zero(), |acc, option| match option {
            ExecutionOption::ReceiveGas { gas, .. } | ExecutionOption::ComposeGas { gas, .. } => {
                acc.saturating_add(U256::from(*gas))
            }
            ExecutionOption::OrderedExecution => acc,
        });

        let payload_len = U256::from(descriptor.compose_payload.len());
        Ok(self
            .fees
            .base_fee
            .saturating_add(self.fees.per_byte_fee.saturating_mul(payload_len))
            .saturating_add(self.fees.gas_price.saturating_mul(total_gas)))
    }

    fn message_id(&self, destination: ChainId, sequence: u64, receiver: Address, payload: &[u8]) -> H256 {
        let mut hasher = Keccak256::new();
        hasher.update(self.source_chain.to_be_bytes());
        hasher.update(destination.to_be_bytes());
        hasher.update(sequence.to_be_bytes());
        hasher.update(receiver.as_bytes());
        hasher.update(payload);
        H256::from_slice(&hasher.finalize())
    }

    /// Deliver the oldest packet in flight.
    pub async fn deliver_next(&self) -> Option<Delivery> {
        let packet = self.state.write().await.in_flight.pop_front()?;
        Some(self.deliver_packet(packet).await)
    }

    pub async fn deliver_all(&self) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        while let Some(delivery) = self.deliver_next().await {
            deliveries.push(delivery);
        }
        deliveries
    }

    /// Deliver the newest packet that may jump the queue. Ordered packets
    /// wait for every earlier packet on their lane.
    pub async fn deliver_latest_first(&self) -> Option<Delivery> {
        let packet = {
            let mut state = self.state.write().await;
            let index = (0..state.in_flight.len()).rev().find(|&i| {
                let candidate = &state.in_flight[i];
                !candidate.ordered
                    || !state
                        .in_flight
                        .iter()
                        .take(i)
                        .any(|earlier| earlier.destination == candidate.destination)
            })?;
            state.in_flight.remove(index)?
        };
        Some(self.deliver_packet(packet).await)
    }

    /// Replay an already delivered packet, as an at-least-once channel may.
    pub async fn redeliver(&self, message_id: H256) -> Result<Delivery, TransportError> {
        let packet = self
            .state
            .read()
            .await
            .delivered
            .get(&message_id)
            .cloned()
            .ok_or(TransportError::UnknownMessage(message_id))?;
        Ok(self.deliver_packet(packet).await)
    }

    async fn deliver_packet(&self, packet: Packet) -> Delivery {
        let result = self.execute(&packet).await;
        match &result {
            Ok(report) => tracing::info!(
                message_id = %hex::encode(packet.message_id),
                destination = packet.destination,
                message_type = %report.message_type,
                "packet delivered"
            ),
            Err(err) => tracing::warn!(
                message_id = %hex::encode(packet.message_id),
                destination = packet.destination,
                code = err.code(),
                "packet compose failed"
            ),
        }

        self.state
            .write()
            .await
            .delivered
            .insert(packet.message_id, packet.clone());
        Delivery { packet, result }
    }

    async fn execute(&self, packet: &Packet) -> Result<DispatchReport, BridgeError> {
        let (composer, ledger, first_delivery) = {
            let state = self.state.read().await;
            let lane = state
                .lanes
                .get(&packet.destination)
                .ok_or(TransportError::Unreachable(packet.destination))?;
            let (composer, ledger) = (lane.composer.clone(), lane.ledger.clone());
            (composer, ledger, !state.credited.contains(&packet.message_id))
        };

        // The liquidity leg settles once; replays only repeat the compose call.
        if first_delivery {
            ledger.mint(packet.receiver, packet.amount).await?;
            self.state.write().await.credited.insert(packet.message_id);
        }

        let message =
            codec::stamp_transport_fields(&packet.compose_payload, packet.sequence, packet.source_chain)?;
        composer
            .handle_composed_message(InboundCompose {
                caller: self.endpoint,
                origin: packet.origin,
                message_id: packet.message_id,
                message,
                executor: self.endpoint,
                extra: Vec::new(),
            })
            .await
    }
}

#[async_trait]
impl Transport for LocalNetwork {
    async fn quote(&self, descriptor: &SendDescriptor) -> Result<MessagingFee, TransportError> {
        if !self.state.read().await.lanes.contains_key(&descriptor.destination) {
            return Err(TransportError::Unreachable(descriptor.destination));
        }
        Ok(MessagingFee::native(self.fee_for(descriptor)?))
    }

    async fn send(
        &self,
        sender: Address,
        descriptor: SendDescriptor,
        fee: MessagingFee,
        refund_address: Address,
    ) -> Result<DeliveryReceipt, TransportError> {
        let required = self.fee_for(&descriptor)?;
        if fee.native_fee < required {
            return Err(TransportError::FeeTooLow {
                required,
                paid: fee.native_fee,
            });
        }
        let ordered = parse_options(&descriptor.options)
            .map_err(|e| TransportError::Rejected(format!("invalid options: {e}")))?
            .contains(&ExecutionOption::OrderedExecution);

        let mut state = self.state.write().await;
        let lane = state
            .lanes
            .get_mut(&descriptor.destination)
            .ok_or(TransportError::Unreachable(descriptor.destination))?;
        lane.next_sequence += 1;
        let sequence = lane.next_sequence;

        let message_id = self.message_id(
            descriptor.destination,
            sequence,
            descriptor.receiver,
            &descriptor.compose_payload,
        );
        state.collected_fees = state.collected_fees.saturating_add(required);
        state.in_flight.push_back(Packet {
            message_id,
            source_chain: self.source_chain,
            destination: descriptor.destination,
            sequence,
            origin: sender,
            receiver: descriptor.receiver,
            amount: descriptor.amount,
            ordered,
            compose_payload: descriptor.compose_payload,
        });

        tracing::debug!(
            message_id = %hex::encode(message_id),
            destination = descriptor.destination,
            sequence,
            ?refund_address,
            "packet accepted"
        );
        Ok(DeliveryReceipt {
            message_id,
            sequence,
            fee: MessagingFee::native(required),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::{InnerPayload, MessageType};
    use crate::protocol::options::OptionsBuilder;
    use crate::protocol::router::{AssetLedger, EventLog, RouteRegistry};

    const SOURCE: ChainId = 101;
    const DEST: ChainId = 202;

    fn endpoint() -> Address {
        Address::repeat_byte(0xe0)
    }

    fn origin() -> Address {
        Address::repeat_byte(0x5e)
    }

    fn composer_addr() -> Address {
        Address::repeat_byte(0xc0)
    }

    fn descriptor(amount: u64, recipient: Address, ordered: bool) -> SendDescriptor {
        let mut options = OptionsBuilder::new().receive_gas(100, 0).compose_gas(0, 400, 0);
        if ordered {
            options = options.ordered_execution();
        }
        let inner = InnerPayload::new(recipient, vec![]).encode();
        SendDescriptor {
            destination: DEST,
            receiver: composer_addr(),
            amount: U256::from(amount),
            min_amount: U256::from(amount),
            options: options.build(),
            compose_payload: codec::encode(MessageType::SimpleTransfer, U256::from(amount), &inner),
        }
    }

    async fn network() -> (LocalNetwork, Arc<Composer>, InMemoryLedger) {
        let admin = Address::repeat_byte(0xad);
        let ledger = InMemoryLedger::new();
        let registry = RouteRegistry::new(admin, EventLog::new());
        let composer = Arc::new(Composer::new(
            composer_addr(),
            endpoint(),
            registry,
            Arc::new(ledger.clone()),
        ));
        composer.set_trusted_remote(admin, SOURCE, origin()).await.unwrap();

        let network = LocalNetwork::new(SOURCE, endpoint(), FeeSchedule::default());
        network.connect(DEST, composer.clone(), ledger.clone()).await;
        (network, composer, ledger)
    }

    async fn send(network: &LocalNetwork, descriptor: SendDescriptor) -> DeliveryReceipt {
        let fee = network.quote(&descriptor).await.unwrap();
        network
            .send(origin(), descriptor, fee, Address::zero())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_quote_is_deterministic() {
        let (network, _, _) = network().await;
        let descriptor = descriptor(10, Address::repeat_byte(1), false);

        let fee = network.quote(&descriptor).await.unwrap();
        let expected = 10_000 + 16 * descriptor.compose_payload.len() as u64 + 500;
        assert_eq!(fee.native_fee, U256::from(expected));
        assert_eq!(network.quote(&descriptor).await.unwrap(), fee);
    }

    #[tokio::test]
    async fn test_unknown_destination_unreachable() {
        let (network, _, _) = network().await;
        let mut descriptor = descriptor(10, Address::repeat_byte(1), false);
        descriptor.destination = 999;

        let result = network.quote(&descriptor).await;
        assert_eq!(result, Err(TransportError::Unreachable(999)));
    }

    #[tokio::test]
    async fn test_underpaid_send_rejected() {
        let (network, _, _) = network().await;
        let descriptor = descriptor(10, Address::repeat_byte(1), false);

        let result = network
            .send(origin(), descriptor, MessagingFee::native(U256::one()), Address::zero())
            .await;
        assert!(matches!(result, Err(TransportError::FeeTooLow { .. })));
        assert_eq!(network.pending().await, 0);
    }

    #[tokio::test]
    async fn test_sequences_and_ids_are_distinct() {
        let (network, _, _) = network().await;
        let first = send(&network, descriptor(10, Address::repeat_byte(1), false)).await;
        let second = send(&network, descriptor(10, Address::repeat_byte(1), false)).await;

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_ne!(first.message_id, second.message_id);
        assert_eq!(network.pending().await, 2);
    }

    #[tokio::test]
    async fn test_delivery_mints_and_composes() {
        let (network, composer, ledger) = network().await;
        let bob = Address::repeat_byte(0xb0);
        let receipt = send(&network, descriptor(75, bob, false)).await;

        let delivery = network.deliver_next().await.unwrap();
        assert!(delivery.result.is_ok());
        assert_eq!(delivery.packet.message_id, receipt.message_id);
        assert_eq!(ledger.balance_of(bob).await.unwrap(), U256::from(75u64));
        assert!(ledger.balance_of(composer_addr()).await.unwrap().is_zero());
        assert_eq!(composer.operation_count(MessageType::SimpleTransfer).await, 1);
        assert!(network.deliver_next().await.is_none());
    }

    #[tokio::test]
    async fn test_latest_first_reorders_unordered_packets() {
        let (network, _, ledger) = network().await;
        let alice = Address::repeat_byte(0xa1);
        let bob = Address::repeat_byte(0xb0);
        send(&network, descriptor(1, alice, false)).await;
        let last = send(&network, descriptor(2, bob, false)).await;

        let delivery = network.deliver_latest_first().await.unwrap();
        assert_eq!(delivery.packet.message_id, last.message_id);
        assert_eq!(ledger.balance_of(bob).await.unwrap(), U256::from(2u64));
        assert!(ledger.balance_of(alice).await.unwrap().is_zero());
    }

    #[tokio::test]
    async fn test_ordered_packets_never_jump_the_lane() {
        let (network, _, _) = network().await;
        let first = send(&network, descriptor(1, Address::repeat_byte(1), true)).await;
        let second = send(&network, descriptor(2, Address::repeat_byte(2), true)).await;

        let delivery = network.deliver_latest_first().await.unwrap();
        assert_eq!(delivery.packet.message_id, first.message_id);
        let delivery = network.deliver_latest_first().await.unwrap();
        assert_eq!(delivery.packet.message_id, second.message_id);
    }

    #[tokio::test]
    async fn test_failed_mint_is_retried_on_redelivery() {
        let (network, composer, ledger) = network().await;
        let bob = Address::repeat_byte(0xb0);
        let sink = Address::repeat_byte(0x51);
        ledger.mint(composer_addr(), U256::MAX).await.unwrap();
        let receipt = send(&network, descriptor(25, bob, false)).await;

        let delivery = network.deliver_next().await.unwrap();
        assert_eq!(delivery.result.unwrap_err().code(), "LEDGER_FAILURE");

        ledger.transfer(composer_addr(), sink, U256::MAX).await.unwrap();
        let retry = network.redeliver(receipt.message_id).await.unwrap();

        assert!(retry.result.is_ok());
        assert_eq!(ledger.balance_of(bob).await.unwrap(), U256::from(25u64));
        assert_eq!(composer.operation_count(MessageType::SimpleTransfer).await, 1);
    }

    #[tokio::test]
    async fn test_redelivery_is_rejected_without_second_mint() {
        let (network, _, ledger) = network().await;
        let bob = Address::repeat_byte(0xb0);
        let receipt = send(&network, descriptor(40, bob, false)).await;
        network.deliver_all().await;

        let replay = network.redeliver(receipt.message_id).await.unwrap();
        let err = replay.result.unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_MESSAGE");
        assert_eq!(ledger.total_supply().await, U256::from(40u64));

        let unknown = network.redeliver(H256::repeat_byte(9)).await;
        assert!(matches!(unknown, Err(TransportError::UnknownMessage(_))));
    }
}
