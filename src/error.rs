use thiserror::Error as ThisError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure the assembler can report. All of them abort the current
/// build; nothing is retried.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required {style} pulse parameter(s): {missing:?}")]
    MissingParams { style: &'static str, missing: Vec<String> },
    #[error("unsupported {style} pulse parameter(s): {extra:?}")]
    UnsupportedParams { style: &'static str, extra: Vec<String> },
    #[error("unknown pulse style {0:?}")]
    UnknownStyle(String),
    #[error("bad value {value:?} for pulse parameter {param}")]
    BadParamValue { param: &'static str, value: String },
    #[error("register name {0:?} already exists")]
    DuplicateRegister(String),
    #[error("register p{page}:r{addr} is already occupied")]
    RegisterTaken { page: u8, addr: u8 },
    #[error("label {0:?} already defined")]
    DuplicateLabel(String),
    #[error("{kind} {name:?} already defined on channel {ch}")]
    DuplicateName { kind: &'static str, ch: usize, name: String },
    #[error("{kind} {name:?} not defined on channel {ch}")]
    UnknownName { kind: &'static str, ch: usize, name: String },
    #[error("close_loop() without a matching open_loop()")]
    UnbalancedLoop,
    #[error("unknown mnemonic {0:?}")]
    UnknownMnemonic(String),
    #[error("{mnemonic} takes {expected} operand(s), got {got}")]
    OperandCount { mnemonic: &'static str, expected: usize, got: usize },
    #[error("{mnemonic} operand {index}: expected {expected}")]
    OperandKind { mnemonic: &'static str, index: usize, expected: &'static str },
    #[error("{mnemonic} has no update-flags bit")]
    NoUpdateFlags { mnemonic: &'static str },
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("{kind} {index} is not configured")]
    NoSuchChannel { kind: &'static str, index: usize },
    #[error("envelope {0:?} has no samples")]
    EmptyEnvelope(String),
    #[error("envelope {name:?}: I and Q lengths differ ({i} vs {q})")]
    EnvelopeShape { name: String, i: usize, q: usize },
}

/// A value does not fit the field it is headed for.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
#[error("{field} = {value} out of range ({limit})")]
pub struct RangeError {
    pub field: String,
    pub value: i128,
    pub limit: String,
}

impl RangeError {
    pub fn new(field: impl Into<String>, value: impl Into<i128>, limit: impl Into<String>) -> Self {
        Self { field: field.into(), value: value.into(), limit: limit.into() }
    }
}

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("label {label:?} referenced at p_addr {p_addr} is never defined")]
    UndefinedLabel { label: String, p_addr: u32 },
}

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
#[error("{what}: requested {requested} bytes, transferred {transferred}")]
pub struct TransferError {
    pub what: String,
    pub requested: usize,
    pub transferred: usize,
}
