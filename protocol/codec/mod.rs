// Message Codec - Canonical byte layout of a composed cross-chain message
//
// | offset | size | field                                   |
// |--------|------|-----------------------------------------|
// | 0      | 1    | message type                            |
// | 1      | 8    | sequence (filled by transport)          |
// | 9      | 4    | source chain id (filled by transport)   |
// | 13     | 32   | amount, unsigned big-endian             |
// | 45     | var  | inner payload: abi(address, bytes)      |
use ethabi::{ParamType, Token};
use ethereum_types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::ops::Range;

pub const TYPE_OFFSET: usize = 0;
pub const SEQUENCE_OFFSET: usize = 1;
pub const SOURCE_CHAIN_OFFSET: usize = 9;
pub const AMOUNT_OFFSET: usize = 13;
pub const PAYLOAD_OFFSET: usize = 45;

/// Length of the fixed header preceding the inner payload.
pub const HEADER_LEN: usize = PAYLOAD_OFFSET;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    SimpleTransfer = 1,
    TreasurySale = 2,
    VaultDeposit = 3,
}

impl MessageType {
    pub const ALL: [MessageType; 3] = [
        MessageType::SimpleTransfer,
        MessageType::TreasurySale,
        MessageType::VaultDeposit,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(MessageType::SimpleTransfer),
            2 => Some(MessageType::TreasurySale),
            3 => Some(MessageType::VaultDeposit),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::SimpleTransfer => "SIMPLE_TRANSFER",
            MessageType::TreasurySale => "TREASURY_SALE",
            MessageType::VaultDeposit => "VAULT_DEPOSIT",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("message too short for {field}: need {required} bytes, got {actual}")]
    Truncated {
        field: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("invalid inner payload: {0}")]
    InvalidPayload(String),
}

/// A fully decoded composed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposedMessage {
    /// Raw type tag. Unknown tags decode fine and are rejected at dispatch.
    pub tag: u8,
    pub sequence: u64,
    pub source_chain: u32,
    pub amount: U256,
    pub inner_payload: Vec<u8>,
}

impl ComposedMessage {
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_tag(self.tag)
    }
}

/// Recipient (or beneficiary) plus opaque extension bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerPayload {
    pub account: Address,
    pub extension: Vec<u8>,
}

impl InnerPayload {
    pub fn new(account: Address, extension: Vec<u8>) -> Self {
        Self { account, extension }
    }

    pub fn encode(&self) -> Vec<u8> {
        ethabi::encode(&[
            Token::Address(self.account),
            Token::Bytes(self.extension.clone()),
        ])
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let tokens = ethabi::decode(&[ParamType::Address, ParamType::Bytes], data)
            .map_err(|e| CodecError::InvalidPayload(e.to_string()))?;

        match tokens.as_slice() {
            [Token::Address(account), Token::Bytes(extension)] => Ok(Self {
                account: *account,
                extension: extension.clone(),
            }),
            _ => Err(CodecError::InvalidPayload(
                "expected (address, bytes)".to_string(),
            )),
        }
    }
}

/// Encode a composed message. Sequence and source chain are zeroed placeholders.
pub fn encode(message_type: MessageType, amount: U256, inner_payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + inner_payload.len());
    out.push(message_type.tag());
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&[0u8; 4]);

    let mut amount_bytes = [0u8; 32];
    amount.to_big_endian(&mut amount_bytes);
    out.extend_from_slice(&amount_bytes);

    out.extend_from_slice(inner_payload);
    out
}

fn field<'a>(
    message: &'a [u8],
    name: &'static str,
    range: Range<usize>,
) -> Result<&'a [u8], CodecError> {
    let required = range.end;
    message.get(range).ok_or(CodecError::Truncated {
        field: name,
        required,
        actual: message.len(),
    })
}

pub fn decode_type(message: &[u8]) -> Result<u8, CodecError> {
    let bytes = field(message, "message type", TYPE_OFFSET..SEQUENCE_OFFSET)?;
    Ok(bytes[0])
}

pub fn decode_sequence(message: &[u8]) -> Result<u64, CodecError> {
    let bytes = field(message, "sequence", SEQUENCE_OFFSET..SOURCE_CHAIN_OFFSET)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(buf))
}

pub fn decode_source_chain(message: &[u8]) -> Result<u32, CodecError> {
    let bytes = field(message, "source chain", SOURCE_CHAIN_OFFSET..AMOUNT_OFFSET)?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    Ok(u32::from_be_bytes(buf))
}

pub fn decode_amount(message: &[u8]) -> Result<U256, CodecError> {
    let bytes = field(message, "amount", AMOUNT_OFFSET..PAYLOAD_OFFSET)?;
    Ok(U256::from_big_endian(bytes))
}

/// The inner payload must carry at least one byte.
pub fn decode_inner_payload(message: &[u8]) -> Result<&[u8], CodecError> {
    field(message, "inner payload", PAYLOAD_OFFSET..PAYLOAD_OFFSET + 1)?;
    Ok(&message[PAYLOAD_OFFSET..])
}

pub fn decode(message: &[u8]) -> Result<ComposedMessage, CodecError> {
    Ok(ComposedMessage {
        tag: decode_type(message)?,
        sequence: decode_sequence(message)?,
        source_chain: decode_source_chain(message)?,
        amount: decode_amount(message)?,
        inner_payload: decode_inner_payload(message)?.to_vec(),
    })
}

/// Fill the transport-owned placeholders of an encoded message.
pub fn stamp_transport_fields(
    message: &[u8],
    sequence: u64,
    source_chain: u32,
) -> Result<Vec<u8>, CodecError> {
    field(message, "transport header", TYPE_OFFSET..AMOUNT_OFFSET)?;

    let mut stamped = message.to_vec();
    stamped[SEQUENCE_OFFSET..SOURCE_CHAIN_OFFSET].copy_from_slice(&sequence.to_be_bytes());
    stamped[SOURCE_CHAIN_OFFSET..AMOUNT_OFFSET].copy_from_slice(&source_chain.to_be_bytes());
    Ok(stamped)
}
