// Option Builder - Execution hints consumed by the transport
//
// Layout: 2-byte version tag, then records of (kind: u8, length: u16, body).
// Records execute in append order on the destination side.
use serde::{Deserialize, Serialize};

pub const OPTIONS_VERSION: u16 = 3;

pub const KIND_RECEIVE_GAS: u8 = 1;
pub const KIND_COMPOSE_GAS: u8 = 2;
pub const KIND_ORDERED_EXECUTION: u8 = 5;

const RECORD_HEADER_LEN: usize = 3;
const RECEIVE_GAS_BODY_LEN: usize = 32;
const COMPOSE_GAS_BODY_LEN: usize = 34;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionsError {
    #[error("options must start with version tag {expected}, found {found:?}")]
    InvalidVersion { expected: u16, found: Option<u16> },

    #[error("truncated option record at offset {0}")]
    TruncatedRecord(usize),

    #[error("option kind {kind} expects a {expected}-byte body, got {actual}")]
    BodyLength {
        kind: u8,
        expected: usize,
        actual: usize,
    },

    #[error("unknown option kind {0}")]
    UnknownKind(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionOption {
    ReceiveGas { gas: u128, value: u128 },
    ComposeGas { index: u16, gas: u128, value: u128 },
    OrderedExecution,
}

impl ExecutionOption {
    pub fn kind(&self) -> u8 {
        match self {
            ExecutionOption::ReceiveGas { .. } => KIND_RECEIVE_GAS,
            ExecutionOption::ComposeGas { .. } => KIND_COMPOSE_GAS,
            ExecutionOption::OrderedExecution => KIND_ORDERED_EXECUTION,
        }
    }

    fn body(&self) -> Vec<u8> {
        match self {
            ExecutionOption::ReceiveGas { gas, value } => {
                let mut body = Vec::with_capacity(RECEIVE_GAS_BODY_LEN);
                body.extend_from_slice(&gas.to_be_bytes());
                body.extend_from_slice(&value.to_be_bytes());
                body
            }
            ExecutionOption::ComposeGas { index, gas, value } => {
                let mut body = Vec::with_capacity(COMPOSE_GAS_BODY_LEN);
                body.extend_from_slice(&index.to_be_bytes());
                body.extend_from_slice(&gas.to_be_bytes());
                body.extend_from_slice(&value.to_be_bytes());
                body
            }
            ExecutionOption::OrderedExecution => Vec::new(),
        }
    }
}

/// Empty option blob: just the version tag.
pub fn new_options() -> Vec<u8> {
    OPTIONS_VERSION.to_be_bytes().to_vec()
}

fn ensure_version(options: &[u8]) -> Result<(), OptionsError> {
    let found = options
        .get(..2)
        .map(|tag| u16::from_be_bytes([tag[0], tag[1]]));
    if found != Some(OPTIONS_VERSION) {
        return Err(OptionsError::InvalidVersion {
            expected: OPTIONS_VERSION,
            found,
        });
    }
    Ok(())
}

/// Append one record to an existing option blob.
pub fn append_option(mut options: Vec<u8>, option: ExecutionOption) -> Result<Vec<u8>, OptionsError> {
    ensure_version(&options)?;
    push_record(&mut options, option);
    Ok(options)
}

fn push_record(out: &mut Vec<u8>, option: ExecutionOption) {
    let body = option.body();
    out.push(option.kind());
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(&body);
}

pub fn add_receive_gas(options: Vec<u8>, gas: u128, value: u128) -> Result<Vec<u8>, OptionsError> {
    append_option(options, ExecutionOption::ReceiveGas { gas, value })
}

pub fn add_compose_gas(
    options: Vec<u8>,
    index: u16,
    gas: u128,
    value: u128,
) -> Result<Vec<u8>, OptionsError> {
    append_option(options, ExecutionOption::ComposeGas { index, gas, value })
}

pub fn add_ordered_execution(options: Vec<u8>) -> Result<Vec<u8>, OptionsError> {
    append_option(options, ExecutionOption::OrderedExecution)
}

fn read_u128(bytes: &[u8]) -> u128 {
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&bytes[..16]);
    u128::from_be_bytes(buf)
}

pub fn parse_options(options: &[u8]) -> Result<Vec<ExecutionOption>, OptionsError> {
    ensure_version(options)?;

    let mut parsed = Vec::new();
    let mut offset = 2;

    while offset < options.len() {
        let header = options
            .get(offset..offset + RECORD_HEADER_LEN)
            .ok_or(OptionsError::TruncatedRecord(offset))?;
        let kind = header[0];
        let len = u16::from_be_bytes([header[1], header[2]]) as usize;

        let body_start = offset + RECORD_HEADER_LEN;
        let body = options
            .get(body_start..body_start + len)
            .ok_or(OptionsError::TruncatedRecord(offset))?;

        let expected = match kind {
            KIND_RECEIVE_GAS => RECEIVE_GAS_BODY_LEN,
            KIND_COMPOSE_GAS => COMPOSE_GAS_BODY_LEN,
            KIND_ORDERED_EXECUTION => 0,
            other => return Err(OptionsError::UnknownKind(other)),
        };
        if len != expected {
            return Err(OptionsError::BodyLength {
                kind,
                expected,
                actual: len,
            });
        }

        let option = match kind {
            KIND_RECEIVE_GAS => ExecutionOption::ReceiveGas {
                gas: read_u128(&body[0..16]),
                value: read_u128(&body[16..32]),
            },
            KIND_COMPOSE_GAS => ExecutionOption::ComposeGas {
                index: u16::from_be_bytes([body[0], body[1]]),
                gas: read_u128(&body[2..18]),
                value: read_u128(&body[18..34]),
            },
            _ => ExecutionOption::OrderedExecution,
        };
        parsed.push(option);
        offset = body_start + len;
    }

    Ok(parsed)
}

/// Chained form of the free functions above.
#[derive(Debug, Clone)]
pub struct OptionsBuilder {
    records: Vec<ExecutionOption>,
}

impl OptionsBuilder {
    pub fn new() -> Self {
        Self { records: Vec::new() }
    }

    pub fn receive_gas(mut self, gas: u128, value: u128) -> Self {
        self.records.push(ExecutionOption::ReceiveGas { gas, value });
        self
    }

    pub fn compose_gas(mut self, index: u16, gas: u128, value: u128) -> Self {
        self.records.push(ExecutionOption::ComposeGas { index, gas, value });
        self
    }

    pub fn ordered_execution(mut self) -> Self {
        self.records.push(ExecutionOption::OrderedExecution);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = new_options();
        for record in self.records {
            push_record(&mut out, record);
        }
        out
    }
}

impl Default for OptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
