use serde::Deserialize;
use solana_program::pubkey::Pubkey;

use crate::{
    error::{DexError, DexResult},
    state::SelfTradeBehavior,
    transport::Commitment,
    utils::{deserialize_optional_pubkey, deserialize_pubkey},
};

/// Conservative serialized transaction size, well under the ledger's packet limit
pub const DEFAULT_SIZE_CEILING: usize = 850;
/// Extra lamports put on a wrapped native account paying for an order
pub const DEFAULT_WRAP_MARGIN: u64 = 10_000_000;
/// Let the matching loop visit as many resting orders as the program allows
pub const DEFAULT_MATCH_LIMIT: u16 = u16::MAX;

fn default_program_id() -> Pubkey {
    crate::ID
}

fn default_size_ceiling() -> usize {
    DEFAULT_SIZE_CEILING
}

fn default_wrap_margin() -> u64 {
    DEFAULT_WRAP_MARGIN
}

fn default_match_limit() -> u16 {
    DEFAULT_MATCH_LIMIT
}

fn default_self_trade_behavior() -> SelfTradeBehavior {
    SelfTradeBehavior::DecrementTake
}

/// Identity and tuning of a trading session. Addresses are base58 strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionConfig {
    #[serde(deserialize_with = "deserialize_pubkey")]
    pub market: Pubkey,
    #[serde(default = "default_program_id", deserialize_with = "deserialize_pubkey")]
    pub program_id: Pubkey,
    /// Wallet owning the open orders and token accounts, required for any order operation
    #[serde(default, deserialize_with = "deserialize_optional_pubkey")]
    pub owner: Option<Pubkey>,
    /// Token account holding the fee discount token
    #[serde(default, deserialize_with = "deserialize_optional_pubkey")]
    pub fee_discount_account: Option<Pubkey>,
    #[serde(default, deserialize_with = "deserialize_optional_pubkey")]
    pub referrer_quote_wallet: Option<Pubkey>,
    #[serde(default)]
    pub commitment: Commitment,
    #[serde(default = "default_size_ceiling")]
    pub size_ceiling: usize,
    #[serde(default = "default_wrap_margin")]
    pub wrap_margin: u64,
    #[serde(default = "default_match_limit")]
    pub match_limit: u16,
    #[serde(default = "default_self_trade_behavior")]
    pub self_trade_behavior: SelfTradeBehavior,
}

impl SessionConfig {
    pub fn new(market: Pubkey) -> Self {
        Self {
            market,
            program_id: default_program_id(),
            owner: None,
            fee_discount_account: None,
            referrer_quote_wallet: None,
            commitment: Commitment::default(),
            size_ceiling: DEFAULT_SIZE_CEILING,
            wrap_margin: DEFAULT_WRAP_MARGIN,
            match_limit: DEFAULT_MATCH_LIMIT,
            self_trade_behavior: default_self_trade_behavior(),
        }
    }

    pub fn with_owner(mut self, owner: Pubkey) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Parse configuration from a JSON document.
    pub fn from_json_str(content: &str) -> DexResult<Self> {
        let config: Self =
            serde_json::from_str(content).map_err(|e| DexError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DexResult {
        if self.size_ceiling == 0 {
            return Err(DexError::Config("size_ceiling must be positive".to_owned()));
        }
        if self.match_limit == 0 {
            return Err(DexError::Config("match_limit must be positive".to_owned()));
        }
        Ok(())
    }
}
