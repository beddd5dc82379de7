//! The open orders account tracks a trader's resting orders and unsettled balances on one market.
//!
//! Orders live in a fixed array of 128 slots. A slot is occupied when its bit in the free-slot bitmap is
//! cleared, in which case the matching bit of the is-bid bitmap gives the order's side.
use bytemuck::{Pod, Zeroable};
use enumflags2::BitFlags;
use solana_program::pubkey::Pubkey;

use super::{
    load, parse_flags, AccountFlag, OrderBook, Side, ACCOUNT_HEAD_PADDING, ACCOUNT_TAIL_PADDING,
};
use crate::error::DecodeError;

/// Number of order slots in an open orders account
pub const MAX_ORDERS: usize = 128;

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct OpenOrdersLayout {
    head_padding: [u8; 5],
    account_flags: [u8; 8],
    market: [u8; 32],
    owner: [u8; 32],
    base_token_free: [u8; 8],
    base_token_total: [u8; 8],
    quote_token_free: [u8; 8],
    quote_token_total: [u8; 8],
    free_slot_bits: [u8; 16],
    is_bid_bits: [u8; 16],
    orders: [[u8; 16]; MAX_ORDERS],
    client_order_ids: [[u8; 8]; MAX_ORDERS],
    referrer_rebates_accrued: [u8; 8],
    tail_padding: [u8; 7],
}

/// A resting order as recorded by the open orders account
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenOrder {
    /// Position of the order in the 128 slot array
    pub order_index: u8,
    #[allow(missing_docs)]
    pub side: Side,
    /// Composite of the raw price (upper 64 bits) and the matching engine's sequence number
    pub order_id: u128,
    /// Price in quote lots per base lot
    pub raw_price: u64,
    /// Remaining size in base lots, only known once matched against the order book
    pub raw_quantity: u64,
    #[allow(missing_docs)]
    pub client_order_id: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct OpenOrdersAccount {
    pub account_flags: BitFlags<AccountFlag>,
    pub market: Pubkey,
    pub owner: Pubkey,
    pub base_token_free: u64,
    pub base_token_total: u64,
    pub quote_token_free: u64,
    pub quote_token_total: u64,
    /// Occupied slots, ordered by slot index
    pub orders: Vec<OpenOrder>,
    pub referrer_rebates_accrued: u64,
}

#[inline(always)]
fn bit_at(bitmap: &[u8; 16], index: usize) -> bool {
    (bitmap[index / 8] >> (index % 8)) & 1 == 1
}

#[inline(always)]
fn set_bit(bitmap: &mut [u8; 16], index: usize) {
    bitmap[index / 8] |= 1 << (index % 8);
}

impl OpenOrdersAccount {
    /// Serialized size of an open orders account
    pub const LEN: usize = std::mem::size_of::<OpenOrdersLayout>();
    /// Offset of the market address, used to filter program accounts
    pub const MARKET_OFFSET: usize = 13;
    /// Offset of the owner address, used to filter program accounts
    pub const OWNER_OFFSET: usize = 45;

    /// Decode an open orders account. Fails without building anything if the buffer is too short.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let layout = load::<OpenOrdersLayout>(buf)?;
        let account_flags = parse_flags(layout.account_flags, AccountFlag::OpenOrders, "open orders")?;

        let orders = (0..MAX_ORDERS)
            .filter(|&slot| !bit_at(&layout.free_slot_bits, slot))
            .map(|slot| {
                let order_id = u128::from_le_bytes(layout.orders[slot]);
                OpenOrder {
                    order_index: slot as u8,
                    side: if bit_at(&layout.is_bid_bits, slot) {
                        Side::Bid
                    } else {
                        Side::Ask
                    },
                    order_id,
                    raw_price: (order_id >> 64) as u64,
                    raw_quantity: 0,
                    client_order_id: u64::from_le_bytes(layout.client_order_ids[slot]),
                }
            })
            .collect();

        Ok(Self {
            account_flags,
            market: Pubkey::new_from_array(layout.market),
            owner: Pubkey::new_from_array(layout.owner),
            base_token_free: u64::from_le_bytes(layout.base_token_free),
            base_token_total: u64::from_le_bytes(layout.base_token_total),
            quote_token_free: u64::from_le_bytes(layout.quote_token_free),
            quote_token_total: u64::from_le_bytes(layout.quote_token_total),
            orders,
            referrer_rebates_accrued: u64::from_le_bytes(layout.referrer_rebates_accrued),
        })
    }

    /// Write the account back into its on-chain form. Free slots are zeroed.
    pub fn encode(&self) -> Vec<u8> {
        let mut layout = OpenOrdersLayout::zeroed();
        layout.head_padding = *ACCOUNT_HEAD_PADDING;
        layout.tail_padding = *ACCOUNT_TAIL_PADDING;
        layout.account_flags = self.account_flags.bits().to_le_bytes();
        layout.market = self.market.to_bytes();
        layout.owner = self.owner.to_bytes();
        layout.base_token_free = self.base_token_free.to_le_bytes();
        layout.base_token_total = self.base_token_total.to_le_bytes();
        layout.quote_token_free = self.quote_token_free.to_le_bytes();
        layout.quote_token_total = self.quote_token_total.to_le_bytes();
        layout.free_slot_bits = self.free_slot_bits().to_le_bytes();
        layout.is_bid_bits = self.is_bid_bits().to_le_bytes();
        for order in &self.orders {
            let slot = order.order_index as usize;
            layout.orders[slot] = order.order_id.to_le_bytes();
            layout.client_order_ids[slot] = order.client_order_id.to_le_bytes();
        }
        layout.referrer_rebates_accrued = self.referrer_rebates_accrued.to_le_bytes();
        bytemuck::bytes_of(&layout).to_vec()
    }

    /// Bitmap with bit `i` set when slot `i` is free
    pub fn free_slot_bits(&self) -> u128 {
        let mut bits = [0xffu8; 16];
        for order in &self.orders {
            let slot = order.order_index as usize;
            bits[slot / 8] &= !(1 << (slot % 8));
        }
        u128::from_le_bytes(bits)
    }

    /// Bitmap with bit `i` set when slot `i` holds a bid
    pub fn is_bid_bits(&self) -> u128 {
        let mut bits = [0u8; 16];
        for order in self.orders.iter().filter(|o| o.side == Side::Bid) {
            set_bit(&mut bits, order.order_index as usize);
        }
        u128::from_le_bytes(bits)
    }

    pub fn find_order(&self, order_id: u128) -> Option<&OpenOrder> {
        self.orders.iter().find(|o| o.order_id == order_id)
    }

    pub fn find_by_client_id(&self, client_order_id: u64) -> Option<&OpenOrder> {
        self.orders
            .iter()
            .find(|o| o.client_order_id == client_order_id)
    }

    /// Fill in the remaining quantity of each order from the current order book.
    ///
    /// Orders that are not visible on the book (filled or not yet processed) keep a zero quantity.
    pub fn orders_with_book(&self, book: &OrderBook) -> Vec<OpenOrder> {
        self.orders
            .iter()
            .map(|order| {
                let raw_quantity = book
                    .side(order.side)
                    .and_then(|s| s.find(order.order_id))
                    .map(|o| o.quantity)
                    .unwrap_or(0);
                OpenOrder {
                    raw_quantity,
                    ..*order
                }
            })
            .collect()
    }
}
