use crate::{
    composer::{check_order, Batch, Composer},
    error::{DexResult, PreconditionError},
    instruction,
    state::{OrderType, SelfTradeBehavior, Side},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Params {
    pub side: Side,
    /// Price in quote lots per base lot
    pub limit_price: u64,
    /// Size in base lots
    pub max_base_qty: u64,
    pub order_type: OrderType,
    pub self_trade_behavior: SelfTradeBehavior,
    pub client_order_id: u64,
    pub limit: u16,
}

/// Build the transaction placing an order.
///
/// Setup creates whatever token or open orders account is missing, the order is followed by a settle so that
/// immediately matched funds come back to the owner, then ephemeral wrapped native accounts are closed.
pub fn compose(composer: &Composer, params: &Params) -> DexResult<Batch> {
    check_order(params.limit_price, params.max_base_qty)?;
    let max_native_quote = composer
        .scale
        .max_native_quote(params.limit_price, params.max_base_qty)?;
    let (base_paid, quote_paid) = match params.side {
        Side::Bid => (0, max_native_quote),
        Side::Ask => (composer.scale.native_base(params.max_base_qty)?, 0),
    };
    let setup = composer.setup(base_paid, quote_paid, true)?;
    let open_orders = setup
        .open_orders
        .ok_or(PreconditionError::AccountUnresolved("open orders"))?;
    let order_payer = match params.side {
        Side::Bid => setup.quote_wallet,
        Side::Ask => setup.base_wallet,
    };
    let market = composer.market;

    let new_order = instruction::new_order(
        composer.program_id,
        instruction::new_order::Accounts {
            market: &market.own_address,
            open_orders: &open_orders,
            request_queue: &market.request_queue,
            event_queue: &market.event_queue,
            bids: &market.bids,
            asks: &market.asks,
            order_payer: &order_payer,
            owner: &composer.owner,
            base_vault: &market.base_vault,
            quote_vault: &market.quote_vault,
            fee_discount: composer.fee_discount.as_ref(),
        },
        instruction::new_order::Params {
            side: params.side.into(),
            limit_price: params.limit_price,
            max_base_qty: params.max_base_qty,
            max_native_quote_qty_including_fees: max_native_quote,
            self_trade_behavior: params.self_trade_behavior.into(),
            order_type: params.order_type.into(),
            client_order_id: params.client_order_id,
            limit: params.limit,
        },
    )?;
    let settle = composer.settle_instruction(&open_orders, &setup.base_wallet, &setup.quote_wallet)?;
    let batch = setup.into_batch(vec![new_order, settle]);

    let size = composer.measure(&batch.instructions)?;
    if size >= composer.size_ceiling {
        log::warn!(
            "New order transaction is {} bytes, above the {} byte ceiling",
            size,
            composer.size_ceiling
        );
    }
    Ok(batch)
}
