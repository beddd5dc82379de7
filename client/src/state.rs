use bytemuck::Pod;
use enumflags2::{bitflags, BitFlags};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Event queue decoding
pub mod event_queue;
/// Market metadata decoding
pub mod market;
/// Open orders account codec
pub mod open_orders;
/// Composite order book view and its synchronizer
pub mod orderbook;
/// Critbit slab decoding
pub mod slab;

pub use event_queue::{EventFlag, EventQueue, TradeEvent};
pub use market::Market;
pub use open_orders::{OpenOrder, OpenOrdersAccount};
pub use orderbook::{OrderBook, OrderBookSynchronizer, PriceLevel};
pub use slab::{OrderBookSide, SlabOrder};

/// Every DEX account starts with these five bytes.
pub const ACCOUNT_HEAD_PADDING: &[u8; 5] = b"serum";
/// Every DEX account ends with these seven bytes.
pub const ACCOUNT_TAIL_PADDING: &[u8; 7] = b"padding";

#[bitflags]
#[repr(u64)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum AccountFlag {
    Initialized = 1 << 0,
    Market = 1 << 1,
    OpenOrders = 1 << 2,
    RequestQueue = 1 << 3,
    EventQueue = 1 << 4,
    Bids = 1 << 5,
    Asks = 1 << 6,
    Disabled = 1 << 7,
    Closed = 1 << 8,
    Permissioned = 1 << 9,
    CrankAuthorityRequired = 1 << 10,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum Side {
    Bid = 0,
    Ask = 1,
}

impl Side {
    /// Recover the matching engine's sequence number from an order id.
    ///
    /// Bid ids carry the bitwise complement of the sequence number so that
    /// older bids sort after newer ones inside the tree.
    pub fn sequence_number(&self, order_id: u128) -> u64 {
        match self {
            Side::Bid => !(order_id as u64),
            Side::Ask => order_id as u64,
        }
    }
}

/// Describes what happens when two order with identical callback informations are matched together
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[repr(u32)]
pub enum SelfTradeBehavior {
    /// The orders are matched together
    DecrementTake = 0,
    /// The order on the provide side is cancelled. Matching for the current order continues and essentially bypasses
    /// the self-provided order.
    CancelProvide = 1,
    /// The entire transaction fails and the program returns an error.
    AbortTransaction = 2,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum OrderType {
    Limit = 0,
    ImmediateOrCancel = 1,
    PostOnly = 2,
}

pub(crate) fn check_len(buf: &[u8], expected: usize) -> Result<(), DecodeError> {
    if buf.len() < expected {
        return Err(DecodeError::TooShort {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// View the first `size_of::<T>()` bytes of `buf` as a layout struct.
///
/// Layout structs are made of byte arrays only, so any offset is suitably aligned.
pub(crate) fn load<T: Pod>(buf: &[u8]) -> Result<&T, DecodeError> {
    let len = std::mem::size_of::<T>();
    check_len(buf, len)?;
    bytemuck::try_from_bytes(&buf[..len]).map_err(|_| DecodeError::TooShort {
        expected: len,
        actual: buf.len(),
    })
}

pub(crate) fn parse_flags(
    raw: [u8; 8],
    required: AccountFlag,
    kind: &'static str,
) -> Result<BitFlags<AccountFlag>, DecodeError> {
    let bits = u64::from_le_bytes(raw);
    let flags = BitFlags::<AccountFlag>::from_bits(bits)
        .map_err(|_| DecodeError::InvalidAccountFlags(bits))?;
    if !flags.contains(AccountFlag::Initialized | required) {
        return Err(DecodeError::WrongAccountKind {
            flags: bits,
            expected: kind,
        });
    }
    Ok(flags)
}
