use borsh::BorshSerialize;
use solana_program::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    sysvar,
};

use crate::error::ComposeError;

/// Instruction layout version understood by the exchange program
pub const INSTRUCTION_VERSION: u8 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
/// Describes the exchange instructions this client emits and their required accounts
pub enum DexInstruction {
    /// Settle the free balances of an open orders account back to the owner's wallets.
    ///
    /// Required accounts
    ///
    /// | index | writable | signer | description                        |
    /// |-------|----------|--------|------------------------------------|
    /// | 0     | ✅       | ❌     | The market account                 |
    /// | 1     | ✅       | ❌     | The open orders account            |
    /// | 2     | ❌       | ✅     | The open orders owner              |
    /// | 3     | ✅       | ❌     | The base vault                     |
    /// | 4     | ✅       | ❌     | The quote vault                    |
    /// | 5     | ✅       | ❌     | The owner's base wallet            |
    /// | 6     | ✅       | ❌     | The owner's quote wallet           |
    /// | 7     | ❌       | ❌     | The vault signer                   |
    /// | 8     | ❌       | ❌     | The token program                  |
    /// | 9     | ✅       | ❌     | (optional) referrer quote wallet   |
    SettleFunds = 5,
    /// Place an order, matching against the opposite side before posting the remainder.
    ///
    /// Required accounts
    ///
    /// | index | writable | signer | description                        |
    /// |-------|----------|--------|------------------------------------|
    /// | 0     | ✅       | ❌     | The market account                 |
    /// | 1     | ✅       | ❌     | The open orders account            |
    /// | 2     | ✅       | ❌     | The request queue                  |
    /// | 3     | ✅       | ❌     | The event queue                    |
    /// | 4     | ✅       | ❌     | The bids account                   |
    /// | 5     | ✅       | ❌     | The asks account                   |
    /// | 6     | ✅       | ❌     | The token account paying the order |
    /// | 7     | ❌       | ✅     | The open orders owner              |
    /// | 8     | ✅       | ❌     | The base vault                     |
    /// | 9     | ✅       | ❌     | The quote vault                    |
    /// | 10    | ❌       | ❌     | The token program                  |
    /// | 11    | ❌       | ❌     | The rent sysvar                    |
    /// | 12    | ❌       | ❌     | (optional) fee discount account    |
    NewOrderV3 = 10,
    /// Cancel an order by its exchange assigned id.
    ///
    /// Required accounts
    ///
    /// | index | writable | signer | description             |
    /// |-------|----------|--------|-------------------------|
    /// | 0     | ❌       | ❌     | The market account      |
    /// | 1     | ✅       | ❌     | The bids account        |
    /// | 2     | ✅       | ❌     | The asks account        |
    /// | 3     | ✅       | ❌     | The open orders account |
    /// | 4     | ❌       | ✅     | The open orders owner   |
    /// | 5     | ✅       | ❌     | The event queue         |
    CancelOrderV2 = 11,
    /// Cancel an order by the id the client attached to it. Same accounts as [`DexInstruction::CancelOrderV2`].
    CancelOrderByClientIdV2 = 12,
    /// Initialize a freshly allocated open orders account.
    ///
    /// Required accounts
    ///
    /// | index | writable | signer | description             |
    /// |-------|----------|--------|-------------------------|
    /// | 0     | ✅       | ❌     | The open orders account |
    /// | 1     | ❌       | ✅     | The open orders owner   |
    /// | 2     | ❌       | ❌     | The market account      |
    /// | 3     | ❌       | ❌     | The rent sysvar         |
    InitOpenOrders = 15,
}

fn pack_tag(tag: DexInstruction) -> Vec<u8> {
    let mut data = Vec::with_capacity(64);
    data.push(INSTRUCTION_VERSION);
    data.extend_from_slice(&(tag as u32).to_le_bytes());
    data
}

/// Pack the version byte, the tag and the borsh encoded parameters
pub fn pack<P: BorshSerialize>(tag: DexInstruction, params: &P) -> Result<Vec<u8>, ComposeError> {
    let mut data = pack_tag(tag);
    params
        .serialize(&mut data)
        .map_err(|e| ComposeError::Serialization(e.to_string()))?;
    Ok(data)
}

pub mod new_order {
    use super::*;

    #[derive(BorshSerialize, Clone, Debug, PartialEq, Eq)]
    pub struct Params {
        /// [`crate::state::Side`] discriminant
        pub side: u32,
        /// Price in quote lots per base lot, must be non zero
        pub limit_price: u64,
        /// Size in base lots
        pub max_base_qty: u64,
        /// Native quote units the order may spend, fees included
        pub max_native_quote_qty_including_fees: u64,
        /// [`crate::state::SelfTradeBehavior`] discriminant
        pub self_trade_behavior: u32,
        /// [`crate::state::OrderType`] discriminant
        pub order_type: u32,
        pub client_order_id: u64,
        /// Maximum number of resting orders the matching loop may visit
        pub limit: u16,
    }

    #[derive(Clone, Copy, Debug)]
    pub struct Accounts<'a> {
        pub market: &'a Pubkey,
        pub open_orders: &'a Pubkey,
        pub request_queue: &'a Pubkey,
        pub event_queue: &'a Pubkey,
        pub bids: &'a Pubkey,
        pub asks: &'a Pubkey,
        pub order_payer: &'a Pubkey,
        pub owner: &'a Pubkey,
        pub base_vault: &'a Pubkey,
        pub quote_vault: &'a Pubkey,
        pub fee_discount: Option<&'a Pubkey>,
    }

    impl<'a> Accounts<'a> {
        pub fn metas(&self) -> Vec<AccountMeta> {
            let mut metas = vec![
                AccountMeta::new(*self.market, false),
                AccountMeta::new(*self.open_orders, false),
                AccountMeta::new(*self.request_queue, false),
                AccountMeta::new(*self.event_queue, false),
                AccountMeta::new(*self.bids, false),
                AccountMeta::new(*self.asks, false),
                AccountMeta::new(*self.order_payer, false),
                AccountMeta::new_readonly(*self.owner, true),
                AccountMeta::new(*self.base_vault, false),
                AccountMeta::new(*self.quote_vault, false),
                AccountMeta::new_readonly(spl_token::ID, false),
                AccountMeta::new_readonly(sysvar::rent::ID, false),
            ];
            if let Some(fee_discount) = self.fee_discount {
                metas.push(AccountMeta::new_readonly(*fee_discount, false));
            }
            metas
        }
    }
}

pub mod cancel_order {
    use super::*;

    #[derive(BorshSerialize, Clone, Debug, PartialEq, Eq)]
    pub struct Params {
        pub side: u32,
        pub order_id: u128,
    }

    #[derive(BorshSerialize, Clone, Debug, PartialEq, Eq)]
    pub struct ByClientIdParams {
        pub client_order_id: u64,
    }

    #[derive(Clone, Copy, Debug)]
    pub struct Accounts<'a> {
        pub market: &'a Pubkey,
        pub bids: &'a Pubkey,
        pub asks: &'a Pubkey,
        pub open_orders: &'a Pubkey,
        pub owner: &'a Pubkey,
        pub event_queue: &'a Pubkey,
    }

    impl<'a> Accounts<'a> {
        pub fn metas(&self) -> Vec<AccountMeta> {
            vec![
                AccountMeta::new_readonly(*self.market, false),
                AccountMeta::new(*self.bids, false),
                AccountMeta::new(*self.asks, false),
                AccountMeta::new(*self.open_orders, false),
                AccountMeta::new_readonly(*self.owner, true),
                AccountMeta::new(*self.event_queue, false),
            ]
        }
    }
}

pub mod settle_funds {
    use super::*;

    #[derive(Clone, Copy, Debug)]
    pub struct Accounts<'a> {
        pub market: &'a Pubkey,
        pub open_orders: &'a Pubkey,
        pub owner: &'a Pubkey,
        pub base_vault: &'a Pubkey,
        pub quote_vault: &'a Pubkey,
        pub base_wallet: &'a Pubkey,
        pub quote_wallet: &'a Pubkey,
        pub vault_signer: &'a Pubkey,
        pub referrer_quote_wallet: Option<&'a Pubkey>,
    }

    impl<'a> Accounts<'a> {
        pub fn metas(&self) -> Vec<AccountMeta> {
            let mut metas = vec![
                AccountMeta::new(*self.market, false),
                AccountMeta::new(*self.open_orders, false),
                AccountMeta::new_readonly(*self.owner, true),
                AccountMeta::new(*self.base_vault, false),
                AccountMeta::new(*self.quote_vault, false),
                AccountMeta::new(*self.base_wallet, false),
                AccountMeta::new(*self.quote_wallet, false),
                AccountMeta::new_readonly(*self.vault_signer, false),
                AccountMeta::new_readonly(spl_token::ID, false),
            ];
            if let Some(referrer) = self.referrer_quote_wallet {
                metas.push(AccountMeta::new(*referrer, false));
            }
            metas
        }
    }
}

pub mod init_open_orders {
    use super::*;

    #[derive(Clone, Copy, Debug)]
    pub struct Accounts<'a> {
        pub open_orders: &'a Pubkey,
        pub owner: &'a Pubkey,
        pub market: &'a Pubkey,
    }

    impl<'a> Accounts<'a> {
        pub fn metas(&self) -> Vec<AccountMeta> {
            vec![
                AccountMeta::new(*self.open_orders, false),
                AccountMeta::new_readonly(*self.owner, true),
                AccountMeta::new_readonly(*self.market, false),
                AccountMeta::new_readonly(sysvar::rent::ID, false),
            ]
        }
    }
}

/// Place an order on the market.
///
/// The order is matched against the opposite side, the remainder is posted unless the order type forbids it.
pub fn new_order(
    program_id: Pubkey,
    accounts: new_order::Accounts,
    params: new_order::Params,
) -> Result<Instruction, ComposeError> {
    Ok(Instruction {
        program_id,
        accounts: accounts.metas(),
        data: pack(DexInstruction::NewOrderV3, &params)?,
    })
}

/// Cancel an existing order by its order id
pub fn cancel_order(
    program_id: Pubkey,
    accounts: cancel_order::Accounts,
    params: cancel_order::Params,
) -> Result<Instruction, ComposeError> {
    Ok(Instruction {
        program_id,
        accounts: accounts.metas(),
        data: pack(DexInstruction::CancelOrderV2, &params)?,
    })
}

/// Cancel an existing order by its client order id
pub fn cancel_order_by_client_id(
    program_id: Pubkey,
    accounts: cancel_order::Accounts,
    params: cancel_order::ByClientIdParams,
) -> Result<Instruction, ComposeError> {
    Ok(Instruction {
        program_id,
        accounts: accounts.metas(),
        data: pack(DexInstruction::CancelOrderByClientIdV2, &params)?,
    })
}

/// Move free balances from the open orders account to the owner's wallets
pub fn settle_funds(
    program_id: Pubkey,
    accounts: settle_funds::Accounts,
) -> Instruction {
    Instruction {
        program_id,
        accounts: accounts.metas(),
        data: pack_tag(DexInstruction::SettleFunds),
    }
}

pub fn init_open_orders(
    program_id: Pubkey,
    accounts: init_open_orders::Accounts,
) -> Instruction {
    Instruction {
        program_id,
        accounts: accounts.metas(),
        data: pack_tag(DexInstruction::InitOpenOrders),
    }
}
