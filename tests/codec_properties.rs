// Property tests for the message codec and option parser
use compose_bridge::protocol::codec::{self, CodecError, HEADER_LEN};
use compose_bridge::protocol::options::{parse_options, ExecutionOption, OptionsBuilder};
use compose_bridge::{Address, InnerPayload, MessageType, U256};
use proptest::prelude::*;

fn message_type() -> impl Strategy<Value = MessageType> {
    prop::sample::select(MessageType::ALL.to_vec())
}

fn amount() -> impl Strategy<Value = U256> {
    any::<[u8; 32]>().prop_map(|bytes| U256::from_big_endian(&bytes))
}

proptest! {
    #[test]
    fn decode_reproduces_encoded_fields(
        message_type in message_type(),
        amount in amount(),
        payload in prop::collection::vec(any::<u8>(), 1..256),
    ) {
        let encoded = codec::encode(message_type, amount, &payload);
        prop_assert_eq!(encoded.len(), HEADER_LEN + payload.len());

        let decoded = codec::decode(&encoded).unwrap();
        prop_assert_eq!(decoded.message_type(), Some(message_type));
        prop_assert_eq!(decoded.amount, amount);
        prop_assert_eq!(decoded.inner_payload, payload);
    }

    #[test]
    fn short_input_never_decodes(bytes in prop::collection::vec(any::<u8>(), 0..HEADER_LEN + 1)) {
        let len = bytes.len();
        prop_assert_eq!(codec::decode_type(&bytes).is_err(), len < 1);
        prop_assert_eq!(codec::decode_source_chain(&bytes).is_err(), len < 13);
        prop_assert_eq!(codec::decode_amount(&bytes).is_err(), len < 45);
        prop_assert!(codec::decode_inner_payload(&bytes).is_err());

        let is_truncated = matches!(codec::decode(&bytes), Err(CodecError::Truncated { .. }));
        prop_assert!(is_truncated);
    }

    #[test]
    fn stamping_only_touches_transport_fields(
        amount in amount(),
        sequence in any::<u64>(),
        source_chain in any::<u32>(),
        extension in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let inner = InnerPayload::new(Address::repeat_byte(0x42), extension.clone()).encode();
        let encoded = codec::encode(MessageType::VaultDeposit, amount, &inner);
        let stamped = codec::stamp_transport_fields(&encoded, sequence, source_chain).unwrap();

        let decoded = codec::decode(&stamped).unwrap();
        prop_assert_eq!(decoded.sequence, sequence);
        prop_assert_eq!(decoded.source_chain, source_chain);
        prop_assert_eq!(decoded.amount, amount);

        let payload = InnerPayload::decode(&decoded.inner_payload).unwrap();
        prop_assert_eq!(payload.account, Address::repeat_byte(0x42));
        prop_assert_eq!(payload.extension, extension);
    }

    #[test]
    fn builder_records_parse_in_append_order(
        receive_gas in any::<u128>(),
        compose_gas in any::<u128>(),
        index in any::<u16>(),
        ordered in any::<bool>(),
    ) {
        let mut builder = OptionsBuilder::new()
            .receive_gas(receive_gas, 0)
            .compose_gas(index, compose_gas, 1);
        if ordered {
            builder = builder.ordered_execution();
        }

        let parsed = parse_options(&builder.build()).unwrap();
        prop_assert_eq!(parsed.len(), if ordered { 3 } else { 2 });
        prop_assert_eq!(parsed[0], ExecutionOption::ReceiveGas { gas: receive_gas, value: 0 });
        prop_assert_eq!(parsed[1], ExecutionOption::ComposeGas { index, gas: compose_gas, value: 1 });
    }
}
