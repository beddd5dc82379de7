use solana_program::pubkey::Pubkey;
use thiserror::Error;

pub type DexResult<T = ()> = Result<T, DexError>;

/// A raw account buffer could not be turned into a typed record.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Buffer too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("Unknown account flag bits {0:#x}")]
    InvalidAccountFlags(u64),
    #[error("Account flags {flags:#x} do not describe a {expected} account")]
    WrongAccountKind { flags: u64, expected: &'static str },
    #[error("Unknown event flag bits {0:#x}")]
    InvalidEventFlags(u8),
    #[error("Invalid slab node tag {tag} at handle {handle}")]
    InvalidNodeTag { handle: u32, tag: u32 },
    #[error("Slab node handle {0} is out of bounds")]
    NodeHandleOutOfBounds(u32),
    #[error("Slab traversal exceeded the node count, the tree is malformed")]
    MalformedTree,
}

/// An operation was requested while the session could not honor it.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum PreconditionError {
    #[error("No signer configured for this session")]
    NoSigner,
    #[error("No owner configured for this session")]
    NoOwner,
    #[error("The market has not been loaded")]
    MarketNotLoaded,
    #[error("The order {0} could not be found in the open orders account")]
    OrderNotFound(u128),
    #[error("No open order with client id {0}")]
    ClientOrderNotFound(u64),
    #[error("The {0} account is unresolved")]
    AccountUnresolved(&'static str),
    #[error("Invalid order parameters: {0}")]
    InvalidOrder(String),
}

/// The transport collaborator failed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request to {method} failed: {message}")]
    Request { method: &'static str, message: String },
}

/// A transaction could not be assembled.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ComposeError {
    #[error("Numerical overflow while computing {0}")]
    NumericalOverflow(&'static str),
    #[error("The vault signer could not be derived for market {0}")]
    VaultSigner(Pubkey),
    #[error("Transaction serialization failed: {0}")]
    Serialization(String),
    #[error("Instruction construction failed: {0}")]
    Instruction(String),
    #[error("No signature available for required signer {0}")]
    MissingSigner(Pubkey),
    #[error("Nothing to compose")]
    NoOperations,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum DexError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Compose(#[from] ComposeError),
    #[error("Invalid session configuration: {0}")]
    Config(String),
}
