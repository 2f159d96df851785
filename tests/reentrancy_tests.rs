// Re-entrant calls from collaborators must be refused while an operation is in flight
use async_trait::async_trait;
use compose_bridge::protocol::router::{
    DeliveryReceipt, LedgerError, MessagingFee, SendDescriptor, TransportError,
};
use compose_bridge::{
    Address, AssetLedger, BridgeConfig, BridgeError, BridgeSender, CallContext, Composer, EventLog,
    InMemoryLedger, InboundCompose, MessageType, RouteRegistry, Transport, H256, U256,
};
use std::sync::{Arc, Mutex};

const SOURCE: u32 = 1;
const DEST: u32 = 2;

fn admin() -> Address {
    Address::repeat_byte(0xad)
}

fn alice() -> Address {
    Address::repeat_byte(0xa1)
}

/// Transport that calls back into the sender from inside `send`.
struct CallbackTransport {
    sender: Mutex<Option<Arc<BridgeSender>>>,
    nested: Mutex<Option<Result<(), String>>>,
}

#[async_trait]
impl Transport for CallbackTransport {
    async fn quote(&self, _descriptor: &SendDescriptor) -> Result<MessagingFee, TransportError> {
        Ok(MessagingFee::native(U256::from(10u64)))
    }

    async fn send(
        &self,
        _sender: Address,
        _descriptor: SendDescriptor,
        fee: MessagingFee,
        _refund_address: Address,
    ) -> Result<DeliveryReceipt, TransportError> {
        let sender = self.sender.lock().unwrap().clone();
        if let Some(sender) = sender {
            let nested = sender
                .initiate_bridge(
                    CallContext::new(alice()).with_value(U256::from(10u64)),
                    DEST,
                    U256::from(1u64),
                    alice(),
                )
                .await
                .map(|_| ())
                .map_err(|e| e.code().to_string());
            *self.nested.lock().unwrap() = Some(nested);
        }
        Ok(DeliveryReceipt {
            message_id: H256::repeat_byte(1),
            sequence: 1,
            fee,
        })
    }
}

#[tokio::test]
async fn test_sender_refuses_nested_initiate() {
    let ledger = InMemoryLedger::new();
    ledger.mint(alice(), U256::from(100u64)).await.unwrap();
    let sender_addr = Address::repeat_byte(0x5e);
    ledger.approve(alice(), sender_addr, U256::from(100u64)).await.unwrap();

    let transport = Arc::new(CallbackTransport {
        sender: Mutex::new(None),
        nested: Mutex::new(None),
    });
    let sender = Arc::new(
        BridgeSender::new(
            sender_addr,
            &BridgeConfig::new(SOURCE),
            RouteRegistry::new(admin(), EventLog::new()),
            Arc::new(ledger.clone()),
            transport.clone(),
        )
        .unwrap(),
    );
    sender.set_route(admin(), DEST, Address::repeat_byte(0xc0)).await.unwrap();
    *transport.sender.lock().unwrap() = Some(sender.clone());

    let outcome = sender
        .initiate_bridge(
            CallContext::new(alice()).with_value(U256::from(10u64)),
            DEST,
            U256::from(50u64),
            alice(),
        )
        .await;
    assert!(outcome.is_ok());

    let nested = transport.nested.lock().unwrap().clone();
    assert_eq!(nested, Some(Err("REENTRANT_CALL".to_string())));
    assert_eq!(sender.escrowed_balance().await.unwrap(), U256::from(50u64));

    // Break the Arc cycle.
    transport.sender.lock().unwrap().take();
}

/// Ledger whose transfers call back into the composer with a replayed message.
struct HostileLedger {
    inner: InMemoryLedger,
    composer: Mutex<Option<Arc<Composer>>>,
    replay: Mutex<Option<InboundCompose>>,
    nested: Mutex<Option<String>>,
}

#[async_trait]
impl AssetLedger for HostileLedger {
    async fn balance_of(&self, holder: Address) -> Result<U256, LedgerError> {
        self.inner.balance_of(holder).await
    }

    async fn transfer(&self, owner: Address, to: Address, amount: U256) -> Result<(), LedgerError> {
        let composer = self.composer.lock().unwrap().clone();
        let replay = self.replay.lock().unwrap().clone();
        if let (Some(composer), Some(replay)) = (composer, replay) {
            if let Err(err) = composer.handle_composed_message(replay).await {
                *self.nested.lock().unwrap() = Some(err.code().to_string());
            }
        }
        self.inner.transfer(owner, to, amount).await
    }

    async fn transfer_from(
        &self,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        self.inner.transfer_from(spender, from, to, amount).await
    }

    async fn approve(&self, owner: Address, spender: Address, amount: U256) -> Result<(), LedgerError> {
        self.inner.approve(owner, spender, amount).await
    }

    async fn allowance(&self, owner: Address, spender: Address) -> Result<U256, LedgerError> {
        self.inner.allowance(owner, spender).await
    }
}

#[tokio::test]
async fn test_composer_refuses_nested_dispatch() {
    let composer_addr = Address::repeat_byte(0xc0);
    let endpoint = Address::repeat_byte(0xe0);
    let origin = Address::repeat_byte(0x5e);
    let bob = Address::repeat_byte(0xb0);

    let inner = InMemoryLedger::new();
    inner.mint(composer_addr, U256::from(200u64)).await.unwrap();
    let ledger = Arc::new(HostileLedger {
        inner: inner.clone(),
        composer: Mutex::new(None),
        replay: Mutex::new(None),
        nested: Mutex::new(None),
    });

    let composer = Arc::new(Composer::new(
        composer_addr,
        endpoint,
        RouteRegistry::new(admin(), EventLog::new()),
        ledger.clone(),
    ));
    composer.set_trusted_remote(admin(), SOURCE, origin).await.unwrap();

    let payload = compose_bridge::InnerPayload::new(bob, vec![]).encode();
    let raw = compose_bridge::protocol::codec::encode(MessageType::SimpleTransfer, U256::from(100u64), &payload);
    let message = compose_bridge::protocol::codec::stamp_transport_fields(&raw, 1, SOURCE).unwrap();
    let call = InboundCompose {
        caller: endpoint,
        origin,
        message_id: H256::repeat_byte(7),
        message,
        executor: endpoint,
        extra: vec![],
    };

    *ledger.composer.lock().unwrap() = Some(composer.clone());
    *ledger.replay.lock().unwrap() = Some(call.clone());

    let result = composer.handle_composed_message(call).await;
    assert!(result.is_ok());
    assert_eq!(
        ledger.nested.lock().unwrap().clone(),
        Some("REENTRANT_CALL".to_string())
    );
    assert_eq!(inner.balance_of(bob).await.unwrap(), U256::from(100u64));
    assert_eq!(composer.operation_count(MessageType::SimpleTransfer).await, 1);

    ledger.composer.lock().unwrap().take();
}

#[test]
fn test_lock_released_after_failure() {
    tokio_test::block_on(async {
        let ledger = InMemoryLedger::new();
        let composer = Composer::new(
            Address::repeat_byte(0xc0),
            Address::repeat_byte(0xe0),
            RouteRegistry::new(admin(), EventLog::new()),
            Arc::new(ledger),
        );

        let call = InboundCompose {
            caller: Address::repeat_byte(0x66),
            origin: Address::zero(),
            message_id: H256::zero(),
            message: vec![],
            executor: Address::zero(),
            extra: vec![],
        };
        for _ in 0..2 {
            let err = composer.handle_composed_message(call.clone()).await.unwrap_err();
            assert!(matches!(err, BridgeError::InvalidCaller(_)));
        }
    });
}
