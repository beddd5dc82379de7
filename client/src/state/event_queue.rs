use bytemuck::{Pod, Zeroable};
use enumflags2::{bitflags, BitFlags};
use solana_program::pubkey::Pubkey;

use super::{
    check_len, load, parse_flags, AccountFlag, Side, ACCOUNT_HEAD_PADDING, ACCOUNT_TAIL_PADDING,
};
use crate::error::DecodeError;

#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventFlag {
    Fill = 0x1,
    Out = 0x2,
    Bid = 0x4,
    Maker = 0x8,
    ReleaseFunds = 0x10,
}

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct EventQueueHeader {
    head_padding: [u8; 5],
    account_flags: [u8; 8],
    head: [u8; 4],
    _padding0: [u8; 4],
    count: [u8; 4],
    _padding1: [u8; 4],
    seq_num: [u8; 4],
    _padding2: [u8; 4],
}

impl EventQueueHeader {
    const LEN: usize = std::mem::size_of::<Self>();
}

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct EventLayout {
    event_flags: u8,
    owner_slot: u8,
    fee_tier: u8,
    _padding: [u8; 5],
    native_qty_released: [u8; 8],
    native_qty_paid: [u8; 8],
    native_fee_or_rebate: [u8; 8],
    order_id: [u8; 16],
    owner: [u8; 32],
    client_order_id: [u8; 8],
}

/// Serialized size of a single event
pub const EVENT_LEN: usize = std::mem::size_of::<EventLayout>();

/// A fill or out event taken from the event queue
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TradeEvent {
    pub flags: BitFlags<EventFlag>,
    /// Slot of the order inside its open orders account
    pub owner_slot: u8,
    pub fee_tier: u8,
    /// For a fill: native units received. For an out: native units unlocked.
    pub native_qty_released: u64,
    /// For a fill: native units paid. For an out: native units still locked.
    pub native_qty_paid: u64,
    pub native_fee_or_rebate: u64,
    pub order_id: u128,
    /// The open orders account the event belongs to
    pub owner: Pubkey,
    pub client_order_id: u64,
}

/// A fill expressed in UI units
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fill {
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub maker: bool,
    pub event: TradeEvent,
}

impl TradeEvent {
    pub fn is_fill(&self) -> bool {
        self.flags.contains(EventFlag::Fill)
    }

    pub fn is_maker(&self) -> bool {
        self.flags.contains(EventFlag::Maker)
    }

    pub fn side(&self) -> Side {
        if self.flags.contains(EventFlag::Bid) {
            Side::Bid
        } else {
            Side::Ask
        }
    }

    /// Convert a fill event to UI price and size. Returns `None` for out events and empty fills.
    pub fn to_fill(&self, base_decimals: u8, quote_decimals: u8) -> Option<Fill> {
        if !self.is_fill() {
            return None;
        }
        let base_multiplier = 10f64.powi(base_decimals as i32);
        let quote_multiplier = 10f64.powi(quote_decimals as i32);
        let fee = self.native_fee_or_rebate as f64;
        let (quote_before_fees, base_native) = match (self.side(), self.is_maker()) {
            (Side::Bid, true) => (self.native_qty_paid as f64 + fee, self.native_qty_released),
            (Side::Bid, false) => (self.native_qty_paid as f64 - fee, self.native_qty_released),
            (Side::Ask, true) => (self.native_qty_released as f64 - fee, self.native_qty_paid),
            (Side::Ask, false) => (self.native_qty_released as f64 + fee, self.native_qty_paid),
        };
        if base_native == 0 {
            return None;
        }
        Some(Fill {
            side: self.side(),
            price: quote_before_fees * base_multiplier / (quote_multiplier * base_native as f64),
            size: base_native as f64 / base_multiplier,
            maker: self.is_maker(),
            event: *self,
        })
    }

    fn decode(l: &EventLayout) -> Result<Self, DecodeError> {
        Ok(Self {
            flags: BitFlags::from_bits(l.event_flags)
                .map_err(|_| DecodeError::InvalidEventFlags(l.event_flags))?,
            owner_slot: l.owner_slot,
            fee_tier: l.fee_tier,
            native_qty_released: u64::from_le_bytes(l.native_qty_released),
            native_qty_paid: u64::from_le_bytes(l.native_qty_paid),
            native_fee_or_rebate: u64::from_le_bytes(l.native_fee_or_rebate),
            order_id: u128::from_le_bytes(l.order_id),
            owner: Pubkey::new_from_array(l.owner),
            client_order_id: u64::from_le_bytes(l.client_order_id),
        })
    }

    fn encode(&self) -> EventLayout {
        let mut l = EventLayout::zeroed();
        l.event_flags = self.flags.bits();
        l.owner_slot = self.owner_slot;
        l.fee_tier = self.fee_tier;
        l.native_qty_released = self.native_qty_released.to_le_bytes();
        l.native_qty_paid = self.native_qty_paid.to_le_bytes();
        l.native_fee_or_rebate = self.native_fee_or_rebate.to_le_bytes();
        l.order_id = self.order_id.to_le_bytes();
        l.owner = self.owner.to_bytes();
        l.client_order_id = self.client_order_id.to_le_bytes();
        l
    }
}

/// The event queue account contains a serialized header and a circular buffer of serialized events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventQueue {
    /// Ring position of the oldest unconsumed event
    pub head: u32,
    /// Number of unconsumed events
    pub count: u32,
    /// Total number of events ever pushed, wrapping
    pub seq_num: u32,
    /// Every slot of the ring buffer, consumed or not
    pub slots: Vec<TradeEvent>,
}

impl EventQueue {
    #[allow(missing_docs)]
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        check_len(buf, EventQueueHeader::LEN + ACCOUNT_TAIL_PADDING.len())?;
        let header = load::<EventQueueHeader>(buf)?;
        parse_flags(header.account_flags, AccountFlag::EventQueue, "event queue")?;
        let ring = &buf[EventQueueHeader::LEN..buf.len() - ACCOUNT_TAIL_PADDING.len()];
        let slots = ring
            .chunks_exact(EVENT_LEN)
            .map(|c| TradeEvent::decode(bytemuck::from_bytes(c)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            head: u32::from_le_bytes(header.head),
            count: u32::from_le_bytes(header.count),
            seq_num: u32::from_le_bytes(header.seq_num),
            slots,
        })
    }

    #[allow(missing_docs)]
    pub fn encode(&self) -> Vec<u8> {
        let mut header = EventQueueHeader::zeroed();
        header.head_padding = *ACCOUNT_HEAD_PADDING;
        header.account_flags = (AccountFlag::Initialized | AccountFlag::EventQueue)
            .bits()
            .to_le_bytes();
        header.head = self.head.to_le_bytes();
        header.count = self.count.to_le_bytes();
        header.seq_num = self.seq_num.to_le_bytes();
        let mut buf = bytemuck::bytes_of(&header).to_vec();
        for event in &self.slots {
            buf.extend_from_slice(bytemuck::bytes_of(&event.encode()));
        }
        buf.extend_from_slice(ACCOUNT_TAIL_PADDING);
        buf
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Retrieves the unconsumed event at position index in the queue.
    pub fn peek_at(&self, index: u32) -> Option<&TradeEvent> {
        if self.count <= index || self.slots.is_empty() {
            return None;
        }
        let event_idx = (self.head as usize + index as usize) % self.capacity();
        self.slots.get(event_idx)
    }

    /// Returns the unconsumed events, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &TradeEvent> + '_ {
        (0..self.count).filter_map(move |i| self.peek_at(i))
    }

    /// Events pushed after sequence number `last_seq_num`, oldest first, paired with their own sequence number.
    ///
    /// Consumed events are still returned as long as the ring has not overwritten them.
    pub fn events_since(&self, last_seq_num: u32) -> Vec<(u32, TradeEvent)> {
        let capacity = self.capacity();
        if capacity == 0 {
            return vec![];
        }
        let new_events = std::cmp::min(self.seq_num.wrapping_sub(last_seq_num) as usize, capacity);
        let end = self.head as usize + self.count as usize;
        (1..=new_events)
            .rev()
            .map(|i| {
                let idx = (end + capacity - i) % capacity;
                (self.seq_num.wrapping_sub(i as u32), self.slots[idx])
            })
            .collect()
    }
}
