//! The market state tracks the addresses and scaling parameters of a trading pair.
use bytemuck::{Pod, Zeroable};
use enumflags2::BitFlags;
use solana_program::pubkey::Pubkey;

use super::{load, parse_flags, AccountFlag, ACCOUNT_HEAD_PADDING, ACCOUNT_TAIL_PADDING};
use crate::error::{ComposeError, DecodeError};

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct MarketLayout {
    head_padding: [u8; 5],
    account_flags: [u8; 8],
    own_address: [u8; 32],
    vault_signer_nonce: [u8; 8],
    base_mint: [u8; 32],
    quote_mint: [u8; 32],
    base_vault: [u8; 32],
    base_deposits_total: [u8; 8],
    base_fees_accrued: [u8; 8],
    quote_vault: [u8; 32],
    quote_deposits_total: [u8; 8],
    quote_fees_accrued: [u8; 8],
    quote_dust_threshold: [u8; 8],
    request_queue: [u8; 32],
    event_queue: [u8; 32],
    bids: [u8; 32],
    asks: [u8; 32],
    base_lot_size: [u8; 8],
    quote_lot_size: [u8; 8],
    fee_rate_bps: [u8; 8],
    referrer_rebates_accrued: [u8; 8],
    tail_padding: [u8; 7],
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The market's central state
pub struct Market {
    #[allow(missing_docs)]
    pub account_flags: BitFlags<AccountFlag>,
    /// The market's own address
    pub own_address: Pubkey,
    /// Seed used with the market address to derive the vault signer
    pub vault_signer_nonce: u64,
    #[allow(missing_docs)]
    pub base_mint: Pubkey,
    #[allow(missing_docs)]
    pub quote_mint: Pubkey,
    #[allow(missing_docs)]
    pub base_vault: Pubkey,
    #[allow(missing_docs)]
    pub base_deposits_total: u64,
    #[allow(missing_docs)]
    pub base_fees_accrued: u64,
    #[allow(missing_docs)]
    pub quote_vault: Pubkey,
    #[allow(missing_docs)]
    pub quote_deposits_total: u64,
    #[allow(missing_docs)]
    pub quote_fees_accrued: u64,
    #[allow(missing_docs)]
    pub quote_dust_threshold: u64,
    /// The public key of the market's request queue account
    pub request_queue: Pubkey,
    /// The public key of the market's event queue account
    pub event_queue: Pubkey,
    /// The public key of the market's bids account
    pub bids: Pubkey,
    /// The public key of the market's asks account
    pub asks: Pubkey,
    /// Base token native units per base lot
    pub base_lot_size: u64,
    /// Quote token native units per quote lot
    pub quote_lot_size: u64,
    #[allow(missing_docs)]
    pub fee_rate_bps: u64,
    #[allow(missing_docs)]
    pub referrer_rebates_accrued: u64,
}

impl Market {
    /// Expected size in bytes of a market account
    pub const LEN: usize = std::mem::size_of::<MarketLayout>();

    #[allow(missing_docs)]
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let l = load::<MarketLayout>(buf)?;
        let account_flags = parse_flags(l.account_flags, AccountFlag::Market, "market")?;
        let key = Pubkey::new_from_array;
        let int = u64::from_le_bytes;
        Ok(Self {
            account_flags,
            own_address: key(l.own_address),
            vault_signer_nonce: int(l.vault_signer_nonce),
            base_mint: key(l.base_mint),
            quote_mint: key(l.quote_mint),
            base_vault: key(l.base_vault),
            base_deposits_total: int(l.base_deposits_total),
            base_fees_accrued: int(l.base_fees_accrued),
            quote_vault: key(l.quote_vault),
            quote_deposits_total: int(l.quote_deposits_total),
            quote_fees_accrued: int(l.quote_fees_accrued),
            quote_dust_threshold: int(l.quote_dust_threshold),
            request_queue: key(l.request_queue),
            event_queue: key(l.event_queue),
            bids: key(l.bids),
            asks: key(l.asks),
            base_lot_size: int(l.base_lot_size),
            quote_lot_size: int(l.quote_lot_size),
            fee_rate_bps: int(l.fee_rate_bps),
            referrer_rebates_accrued: int(l.referrer_rebates_accrued),
        })
    }

    #[allow(missing_docs)]
    pub fn encode(&self) -> Vec<u8> {
        let mut l = MarketLayout::zeroed();
        l.head_padding = *ACCOUNT_HEAD_PADDING;
        l.tail_padding = *ACCOUNT_TAIL_PADDING;
        l.account_flags = self.account_flags.bits().to_le_bytes();
        l.own_address = self.own_address.to_bytes();
        l.vault_signer_nonce = self.vault_signer_nonce.to_le_bytes();
        l.base_mint = self.base_mint.to_bytes();
        l.quote_mint = self.quote_mint.to_bytes();
        l.base_vault = self.base_vault.to_bytes();
        l.base_deposits_total = self.base_deposits_total.to_le_bytes();
        l.base_fees_accrued = self.base_fees_accrued.to_le_bytes();
        l.quote_vault = self.quote_vault.to_bytes();
        l.quote_deposits_total = self.quote_deposits_total.to_le_bytes();
        l.quote_fees_accrued = self.quote_fees_accrued.to_le_bytes();
        l.quote_dust_threshold = self.quote_dust_threshold.to_le_bytes();
        l.request_queue = self.request_queue.to_bytes();
        l.event_queue = self.event_queue.to_bytes();
        l.bids = self.bids.to_bytes();
        l.asks = self.asks.to_bytes();
        l.base_lot_size = self.base_lot_size.to_le_bytes();
        l.quote_lot_size = self.quote_lot_size.to_le_bytes();
        l.fee_rate_bps = self.fee_rate_bps.to_le_bytes();
        l.referrer_rebates_accrued = self.referrer_rebates_accrued.to_le_bytes();
        bytemuck::bytes_of(&l).to_vec()
    }

    /// Derive the program authority over the market's vaults
    pub fn vault_signer(&self, program_id: &Pubkey) -> Result<Pubkey, ComposeError> {
        Pubkey::create_program_address(
            &[
                self.own_address.as_ref(),
                &self.vault_signer_nonce.to_le_bytes(),
            ],
            program_id,
        )
        .map_err(|_| ComposeError::VaultSigner(self.own_address))
    }
}
