use solana_program::{
    hash::Hash, instruction::Instruction, message::Message, program_pack::Pack, pubkey::Pubkey,
    system_instruction,
};
use solana_sdk::{
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account,
};

use crate::{
    error::{ComposeError, DexResult, PreconditionError},
    instruction::{init_open_orders, settle_funds},
    state::{Market, OpenOrdersAccount},
    transport,
    utils::MarketScale,
};

#[allow(missing_docs)]
pub mod cancel_all;
#[allow(missing_docs)]
pub mod cancel_order;
#[allow(missing_docs)]
pub mod new_order;
#[allow(missing_docs)]
pub mod settle;

/// Rent exempt balances of the accounts a transaction may create
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RentSchedule {
    pub token_account: u64,
    pub open_orders: u64,
}

/// Everything a transaction is composed from.
///
/// Built by the session from its cached state for the duration of one operation.
#[derive(Clone, Debug)]
pub struct Composer<'a> {
    pub program_id: Pubkey,
    pub market: &'a Market,
    pub owner: Pubkey,
    pub scale: MarketScale,
    pub base_wallet: Option<Pubkey>,
    pub quote_wallet: Option<Pubkey>,
    pub open_orders: Option<Pubkey>,
    pub fee_discount: Option<Pubkey>,
    pub referrer_quote_wallet: Option<Pubkey>,
    pub rent: RentSchedule,
    /// Extra lamports put on a wrapped native account that pays for an order
    pub wrap_margin: u64,
    /// Serialized transaction size at which a batch is sealed
    pub size_ceiling: usize,
}

/// Accounts created by a transaction that outlive it
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreatedAccounts {
    pub base_wallet: Option<Pubkey>,
    pub quote_wallet: Option<Pubkey>,
    pub open_orders: Option<Pubkey>,
}

impl CreatedAccounts {
    pub fn is_empty(&self) -> bool {
        self.base_wallet.is_none() && self.quote_wallet.is_none() && self.open_orders.is_none()
    }
}

/// One transaction's worth of instructions and the ephemeral accounts co-signing it
#[derive(Debug)]
pub struct Batch {
    pub instructions: Vec<Instruction>,
    /// Freshly generated accounts in creation order
    pub signers: Vec<Keypair>,
    pub created: CreatedAccounts,
}

/// Setup and cleanup instructions surrounding the core of an operation
#[derive(Debug, Default)]
pub(crate) struct Setup {
    pub instructions: Vec<Instruction>,
    pub signers: Vec<Keypair>,
    pub created: CreatedAccounts,
    pub closures: Vec<Instruction>,
    pub base_wallet: Pubkey,
    pub quote_wallet: Pubkey,
    pub open_orders: Option<Pubkey>,
}

impl<'a> Composer<'a> {
    /// Resolve the token account used for `mint`, adding the instructions needed to create it.
    ///
    /// `native_paid` is the amount this account must provide to the operation.
    fn resolve_wallet(
        &self,
        setup: &mut Setup,
        mint: &Pubkey,
        cached: Option<Pubkey>,
        native_paid: u64,
    ) -> Result<(Pubkey, Option<Pubkey>), ComposeError> {
        if let Some(address) = cached {
            return Ok((address, None));
        }
        if *mint == spl_token::native_mint::ID {
            let wrap = Keypair::new();
            let margin = if native_paid > 0 { self.wrap_margin } else { 0 };
            let lamports = self
                .rent
                .token_account
                .checked_add(native_paid)
                .and_then(|l| l.checked_add(margin))
                .ok_or(ComposeError::NumericalOverflow("wrapped native lamports"))?;
            log::debug!(
                "Wrapping {} lamports into ephemeral account {}",
                lamports,
                wrap.pubkey()
            );
            setup.instructions.push(system_instruction::create_account(
                &self.owner,
                &wrap.pubkey(),
                lamports,
                spl_token::state::Account::LEN as u64,
                &spl_token::ID,
            ));
            setup.instructions.push(
                spl_token::instruction::initialize_account(
                    &spl_token::ID,
                    &wrap.pubkey(),
                    mint,
                    &self.owner,
                )
                .map_err(|e| ComposeError::Instruction(e.to_string()))?,
            );
            setup.closures.push(
                spl_token::instruction::close_account(
                    &spl_token::ID,
                    &wrap.pubkey(),
                    &self.owner,
                    &self.owner,
                    &[],
                )
                .map_err(|e| ComposeError::Instruction(e.to_string()))?,
            );
            let address = wrap.pubkey();
            setup.signers.push(wrap);
            return Ok((address, None));
        }
        let address = get_associated_token_address(&self.owner, mint);
        log::debug!("Creating associated token account {} for {}", address, mint);
        setup.instructions.push(create_associated_token_account(
            &self.owner,
            &self.owner,
            mint,
            &spl_token::ID,
        ));
        Ok((address, Some(address)))
    }

    /// Resolve token accounts and the open orders account.
    ///
    /// Base wallet first, then quote wallet, then the open orders account, so ephemeral signers come out in
    /// creation order.
    pub(crate) fn setup(
        &self,
        base_paid: u64,
        quote_paid: u64,
        create_open_orders: bool,
    ) -> Result<Setup, ComposeError> {
        let mut setup = Setup::default();
        let (base_wallet, created_base) =
            self.resolve_wallet(&mut setup, &self.market.base_mint, self.base_wallet, base_paid)?;
        let (quote_wallet, created_quote) = self.resolve_wallet(
            &mut setup,
            &self.market.quote_mint,
            self.quote_wallet,
            quote_paid,
        )?;
        setup.base_wallet = base_wallet;
        setup.quote_wallet = quote_wallet;
        setup.created.base_wallet = created_base;
        setup.created.quote_wallet = created_quote;

        setup.open_orders = match self.open_orders {
            Some(address) => Some(address),
            None if create_open_orders => {
                let account = Keypair::new();
                log::debug!("Creating open orders account {}", account.pubkey());
                setup.instructions.push(system_instruction::create_account(
                    &self.owner,
                    &account.pubkey(),
                    self.rent.open_orders,
                    OpenOrdersAccount::LEN as u64,
                    &self.program_id,
                ));
                setup.instructions.push(init_open_orders(
                    self.program_id,
                    crate::instruction::init_open_orders::Accounts {
                        open_orders: &account.pubkey(),
                        owner: &self.owner,
                        market: &self.market.own_address,
                    },
                ));
                let address = account.pubkey();
                setup.created.open_orders = Some(address);
                setup.signers.push(account);
                Some(address)
            }
            None => None,
        };
        Ok(setup)
    }

    pub(crate) fn require_open_orders(&self) -> Result<Pubkey, PreconditionError> {
        self.open_orders
            .ok_or(PreconditionError::AccountUnresolved("open orders"))
    }

    pub(crate) fn settle_instruction(
        &self,
        open_orders: &Pubkey,
        base_wallet: &Pubkey,
        quote_wallet: &Pubkey,
    ) -> Result<Instruction, ComposeError> {
        let vault_signer = self.market.vault_signer(&self.program_id)?;
        Ok(settle_funds(
            self.program_id,
            crate::instruction::settle_funds::Accounts {
                market: &self.market.own_address,
                open_orders,
                owner: &self.owner,
                base_vault: &self.market.base_vault,
                quote_vault: &self.market.quote_vault,
                base_wallet,
                quote_wallet,
                vault_signer: &vault_signer,
                referrer_quote_wallet: self.referrer_quote_wallet.as_ref(),
            },
        ))
    }

    /// Serialized size of a signed transaction carrying `instructions`
    pub fn measure(&self, instructions: &[Instruction]) -> Result<usize, ComposeError> {
        let message = Message::new(instructions, Some(&self.owner));
        let transaction = Transaction::new_unsigned(message);
        bincode::serialized_size(&transaction)
            .map(|s| s as usize)
            .map_err(|e| ComposeError::Serialization(e.to_string()))
    }
}

impl Setup {
    /// Wrap a core instruction sequence into a single batch
    pub(crate) fn into_batch(self, core: Vec<Instruction>) -> Batch {
        let mut instructions = self.instructions;
        instructions.extend(core);
        instructions.extend(self.closures);
        Batch {
            instructions,
            signers: self.signers,
            created: self.created,
        }
    }
}

impl Batch {
    /// Compile the batch into a signed transaction.
    ///
    /// The external signature comes first, followed by the ephemeral accounts in creation order.
    pub fn sign(
        &self,
        payer: &Pubkey,
        recent_blockhash: Hash,
        signer: &dyn transport::TransactionSigner,
    ) -> Result<Transaction, ComposeError> {
        let mut message =
            Message::new_with_blockhash(&self.instructions, Some(payer), &recent_blockhash);
        self.order_signers(&mut message, payer);
        let message_bytes = message.serialize();
        let signer_key = transport::TransactionSigner::pubkey(signer);
        let required = message.header.num_required_signatures as usize;
        let signatures = message.account_keys[..required]
            .iter()
            .map(|key| {
                if *key == signer_key {
                    return Ok(transport::TransactionSigner::sign_message(signer, &message_bytes));
                }
                self.signers
                    .iter()
                    .find(|kp| Signer::pubkey(*kp) == *key)
                    .map(|kp| Signer::sign_message(kp, &message_bytes))
                    .ok_or(ComposeError::MissingSigner(*key))
            })
            .collect::<Result<Vec<Signature>, _>>()?;
        Ok(Transaction {
            signatures,
            message,
        })
    }

    /// Reorder the writable signer keys to payer first, then ephemeral accounts in creation order.
    ///
    /// Compilation sorts signers other than the payer by key. Instruction indices are remapped to match.
    fn order_signers(&self, message: &mut Message, payer: &Pubkey) {
        let writable_signers = message
            .header
            .num_required_signatures
            .saturating_sub(message.header.num_readonly_signed_accounts)
            as usize;
        let keys = &message.account_keys[..writable_signers];
        let mut order: Vec<usize> = Vec::with_capacity(writable_signers);
        order.extend(keys.iter().position(|k| k == payer));
        for kp in &self.signers {
            let key = Signer::pubkey(kp);
            if let Some(i) = keys.iter().position(|k| *k == key) {
                if !order.contains(&i) {
                    order.push(i);
                }
            }
        }
        for i in 0..writable_signers {
            if !order.contains(&i) {
                order.push(i);
            }
        }

        // old index -> new index, compiled messages never exceed u8 indices
        let mut remap: Vec<u8> = (0..message.account_keys.len()).map(|i| i as u8).collect();
        for (new, &old) in order.iter().enumerate() {
            remap[old] = new as u8;
        }
        let reordered: Vec<Pubkey> = order.iter().map(|&i| message.account_keys[i]).collect();
        message.account_keys[..writable_signers].copy_from_slice(&reordered);
        for ix in message.instructions.iter_mut() {
            ix.program_id_index = remap[ix.program_id_index as usize];
            for index in ix.accounts.iter_mut() {
                *index = remap[*index as usize];
            }
        }
    }
}

/// Wire form of a signed transaction
pub fn serialize_transaction(transaction: &Transaction) -> Result<Vec<u8>, ComposeError> {
    bincode::serialize(transaction).map_err(|e| ComposeError::Serialization(e.to_string()))
}

/// Split `items` into consecutive batches.
///
/// Items are appended one at a time and `measure(batch_index, batch)` is evaluated after each append. The batch
/// keeps growing while the measure stays under `ceiling` and items remain, otherwise it is sealed.
pub fn split_batches<T>(
    items: &[T],
    ceiling: usize,
    mut measure: impl FnMut(usize, &[T]) -> Result<usize, ComposeError>,
) -> Result<Vec<&[T]>, ComposeError> {
    let mut batches = Vec::new();
    let mut start = 0;
    while start < items.len() {
        let mut end = start + 1;
        while end < items.len() && measure(batches.len(), &items[start..end])? < ceiling {
            end += 1;
        }
        batches.push(&items[start..end]);
        start = end;
    }
    Ok(batches)
}

pub(crate) fn check_order(limit_price: u64, max_base_qty: u64) -> DexResult {
    if limit_price == 0 {
        return Err(PreconditionError::InvalidOrder("price rounds to zero lots".to_owned()).into());
    }
    if max_base_qty == 0 {
        return Err(PreconditionError::InvalidOrder("size rounds to zero lots".to_owned()).into());
    }
    Ok(())
}
