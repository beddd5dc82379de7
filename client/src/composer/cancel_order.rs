use solana_program::instruction::Instruction;

use crate::{
    composer::{Batch, Composer},
    error::{ComposeError, DexResult},
    instruction,
    state::{OpenOrder, Side},
};

/// How the order to cancel is identified on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    OrderId { side: Side, order_id: u128 },
    ClientId(u64),
}

impl From<&OpenOrder> for Target {
    fn from(order: &OpenOrder) -> Self {
        Target::OrderId {
            side: order.side,
            order_id: order.order_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Params {
    pub target: Target,
}

pub(crate) fn cancel_instruction(
    composer: &Composer,
    open_orders: &solana_program::pubkey::Pubkey,
    target: Target,
) -> Result<Instruction, ComposeError> {
    let market = composer.market;
    let accounts = instruction::cancel_order::Accounts {
        market: &market.own_address,
        bids: &market.bids,
        asks: &market.asks,
        open_orders,
        owner: &composer.owner,
        event_queue: &market.event_queue,
    };
    match target {
        Target::OrderId { side, order_id } => instruction::cancel_order(
            composer.program_id,
            accounts,
            instruction::cancel_order::Params {
                side: side.into(),
                order_id,
            },
        ),
        Target::ClientId(client_order_id) => instruction::cancel_order_by_client_id(
            composer.program_id,
            accounts,
            instruction::cancel_order::ByClientIdParams { client_order_id },
        ),
    }
}

/// Build the transaction cancelling a single order and settling the released funds
pub fn compose(composer: &Composer, params: &Params) -> DexResult<Batch> {
    let open_orders = composer.require_open_orders()?;
    let setup = composer.setup(0, 0, false)?;
    let cancel = cancel_instruction(composer, &open_orders, params.target)?;
    let settle = composer.settle_instruction(&open_orders, &setup.base_wallet, &setup.quote_wallet)?;
    Ok(setup.into_batch(vec![cancel, settle]))
}
