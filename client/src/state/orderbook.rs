use std::sync::Arc;

use parking_lot::RwLock;

use super::{OrderBookSide, Side, SlabOrder};
use crate::{error::DecodeError, utils::MarketScale};

/// An aggregated price level in both exchange lots and UI units
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriceLevel {
    pub price_lots: u64,
    pub quantity_lots: u64,
    pub price: f64,
    pub size: f64,
}

/// A consistent view of both sides of the book.
///
/// A side that never received a snapshot is `None`, which is distinct from an empty side.
#[derive(Clone, Debug)]
pub struct OrderBook {
    pub bids: Option<Arc<OrderBookSide>>,
    pub asks: Option<Arc<OrderBookSide>>,
    pub scale: MarketScale,
}

impl OrderBook {
    pub fn side(&self, side: Side) -> Option<&OrderBookSide> {
        match side {
            Side::Bid => self.bids.as_deref(),
            Side::Ask => self.asks.as_deref(),
        }
    }

    /// Bids by descending price
    pub fn bids(&self) -> Option<Vec<SlabOrder>> {
        self.bids.as_ref().map(|s| s.sorted())
    }

    /// Asks by ascending price
    pub fn asks(&self) -> Option<Vec<SlabOrder>> {
        self.asks.as_ref().map(|s| s.sorted())
    }

    /// Up to `depth` aggregated levels of a side, in display order
    pub fn levels(&self, side: Side, depth: usize) -> Option<Vec<PriceLevel>> {
        self.side(side).map(|s| {
            s.levels(depth)
                .into_iter()
                .map(|(price_lots, quantity_lots)| PriceLevel {
                    price_lots,
                    quantity_lots,
                    price: self.scale.price_lots_to_number(price_lots),
                    size: self.scale.base_size_lots_to_number(quantity_lots),
                })
                .collect()
        })
    }

    pub fn bid_levels(&self, depth: usize) -> Option<Vec<PriceLevel>> {
        self.levels(Side::Bid, depth)
    }

    pub fn ask_levels(&self, depth: usize) -> Option<Vec<PriceLevel>> {
        self.levels(Side::Ask, depth)
    }

    /// This util is used to return the orderbook's spread (best_bid_price, best_ask_price) in lots
    pub fn get_spread(&self) -> (Option<u64>, Option<u64>) {
        let best_bid_price = self.bids.as_ref().and_then(|s| s.best()).map(|o| o.price);
        let best_ask_price = self.asks.as_ref().and_then(|s| s.best()).map(|o| o.price);
        (best_bid_price, best_ask_price)
    }

    /// Whether both sides have been received at least once
    pub fn is_complete(&self) -> bool {
        self.bids.is_some() && self.asks.is_some()
    }
}

/// Holds the latest snapshot of each side and republishes a composite view on every update.
///
/// Each side sits behind its own lock which is only held to swap an `Arc`, so bid and ask feeds never
/// contend and readers always observe a fully formed snapshot.
#[derive(Debug, Default)]
pub struct OrderBookSynchronizer {
    bids: RwLock<Option<Arc<OrderBookSide>>>,
    asks: RwLock<Option<Arc<OrderBookSide>>>,
    scale: RwLock<MarketScale>,
}

impl OrderBookSynchronizer {
    pub fn new(scale: MarketScale) -> Self {
        Self {
            bids: RwLock::new(None),
            asks: RwLock::new(None),
            scale: RwLock::new(scale),
        }
    }

    pub fn set_scale(&self, scale: MarketScale) {
        *self.scale.write() = scale;
    }

    fn slot(&self, side: Side) -> &RwLock<Option<Arc<OrderBookSide>>> {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    /// Replace one side's snapshot and return the resulting composite view
    pub fn update(&self, snapshot: OrderBookSide) -> OrderBook {
        let side = snapshot.side();
        *self.slot(side).write() = Some(Arc::new(snapshot));
        self.view()
    }

    /// Decode a raw bids or asks account and apply it.
    ///
    /// The account must describe `expected`, a bids account pushed on the asks feed is rejected.
    pub fn apply(&self, expected: Side, data: &[u8]) -> Result<OrderBook, DecodeError> {
        let snapshot = OrderBookSide::decode(data)?;
        if snapshot.side() != expected {
            return Err(DecodeError::WrongAccountKind {
                flags: 0,
                expected: match expected {
                    Side::Bid => "bids",
                    Side::Ask => "asks",
                },
            });
        }
        Ok(self.update(snapshot))
    }

    /// The current composite view
    pub fn view(&self) -> OrderBook {
        OrderBook {
            bids: self.bids.read().clone(),
            asks: self.asks.read().clone(),
            scale: *self.scale.read(),
        }
    }

    /// Forget both snapshots, e.g. after switching markets
    pub fn clear(&self) {
        *self.bids.write() = None;
        *self.asks.write() = None;
    }
}
