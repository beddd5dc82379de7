use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use enumflags2::BitFlags;
use parking_lot::Mutex;
use serum_session::{
    error::TransportError,
    state::{
        slab::order_id, AccountFlag, Market, OpenOrder, OpenOrdersAccount, Side,
    },
    transport::{
        AccountCallback, AccountFilter, AccountNotification, Commitment, SendOutcome,
        SignatureCallback, SignatureNotification, SubscriptionId, Transport,
    },
};
use solana_program::{
    hash::Hash, program_option::COption, program_pack::Pack, pubkey::Pubkey, rent::Rent,
};
use solana_sdk::{signature::Signature, transaction::Transaction};

type SharedAccountCallback = Arc<dyn Fn(AccountNotification) + Send + Sync>;
type SharedSignatureCallback = Arc<dyn Fn(SignatureNotification) + Send + Sync>;

/// In memory ledger answering the session's requests
#[derive(Default)]
pub struct MockTransport {
    /// address -> (owning program, data)
    accounts: Mutex<HashMap<Pubkey, (Pubkey, Vec<u8>)>>,
    sent: Mutex<Vec<Transaction>>,
    /// Submissions with an index at or past this one are rejected
    reject_from: Mutex<Option<usize>>,
    /// Reads of these addresses fail
    failing_reads: Mutex<HashSet<Pubkey>>,
    fail_scans: AtomicBool,
    account_subs: Mutex<HashMap<SubscriptionId, (Pubkey, SharedAccountCallback)>>,
    signature_subs: Mutex<HashMap<SubscriptionId, (Signature, SharedSignatureCallback)>>,
    unsubscribed: Mutex<Vec<SubscriptionId>>,
    next_id: AtomicU64,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_account(&self, address: Pubkey, owner: Pubkey, data: Vec<u8>) {
        self.accounts.lock().insert(address, (owner, data));
    }

    /// Store new data for an account and notify its subscribers
    pub fn push_account(&self, address: Pubkey, data: Vec<u8>, slot: u64) {
        if let Some(entry) = self.accounts.lock().get_mut(&address) {
            entry.1 = data.clone();
        }
        let callbacks: Vec<SharedAccountCallback> = self
            .account_subs
            .lock()
            .values()
            .filter(|(a, _)| *a == address)
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in callbacks {
            cb(AccountNotification {
                data: data.clone(),
                slot,
            });
        }
    }

    /// Deliver the outcome of a transaction. Signature subscriptions are one shot.
    pub fn notify_signature(&self, signature: &Signature, err: Option<serde_json::Value>, slot: u64) {
        let callbacks: Vec<SharedSignatureCallback> = {
            let mut subs = self.signature_subs.lock();
            let ids: Vec<SubscriptionId> = subs
                .iter()
                .filter(|(_, (s, _))| s == signature)
                .map(|(id, _)| *id)
                .collect();
            ids.iter()
                .filter_map(|id| subs.remove(id))
                .map(|(_, cb)| cb)
                .collect()
        };
        for cb in callbacks {
            cb(SignatureNotification {
                slot,
                err: err.clone(),
            });
        }
    }

    /// Forget every signature subscription without notifying it
    pub fn drop_signature_subscriptions(&self) {
        self.signature_subs.lock().clear();
    }

    pub fn reject_from(&self, index: usize) {
        *self.reject_from.lock() = Some(index);
    }

    pub fn fail_reads_of(&self, address: Pubkey) {
        self.failing_reads.lock().insert(address);
    }

    pub fn fail_scans(&self) {
        self.fail_scans.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Transaction> {
        self.sent.lock().clone()
    }

    pub fn signature_subscriptions(&self) -> usize {
        self.signature_subs.lock().len()
    }

    pub fn account_subscriptions(&self) -> Vec<Pubkey> {
        self.account_subs.lock().values().map(|(a, _)| *a).collect()
    }

    pub fn unsubscribed(&self) -> Vec<SubscriptionId> {
        self.unsubscribed.lock().clone()
    }

    fn next_id(&self) -> SubscriptionId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn check_read(&self, address: &Pubkey, method: &'static str) -> Result<(), TransportError> {
        if self.failing_reads.lock().contains(address) {
            return Err(TransportError::Request {
                method,
                message: format!("account {} unavailable", address),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get_account_data(
        &self,
        address: &Pubkey,
        _commitment: Commitment,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        self.check_read(address, "getAccountInfo")?;
        Ok(self.accounts.lock().get(address).map(|(_, data)| data.clone()))
    }

    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        filters: &[AccountFilter],
        _commitment: Commitment,
    ) -> Result<Vec<(Pubkey, Vec<u8>)>, TransportError> {
        if self.fail_scans.load(Ordering::SeqCst) {
            return Err(TransportError::Request {
                method: "getProgramAccounts",
                message: "scan disabled".to_owned(),
            });
        }
        Ok(self
            .accounts
            .lock()
            .iter()
            .filter(|(_, (owner, data))| {
                owner == program_id && filters.iter().all(|f| f.matches(data))
            })
            .map(|(address, (_, data))| (*address, data.clone()))
            .collect())
    }

    async fn get_latest_blockhash(&self, _commitment: Commitment) -> Result<Hash, TransportError> {
        Ok(Hash::new_unique())
    }

    async fn get_minimum_balance_for_rent_exemption(
        &self,
        data_len: usize,
    ) -> Result<u64, TransportError> {
        Ok(Rent::default().minimum_balance(data_len))
    }

    async fn send_transaction(
        &self,
        wire_transaction: Vec<u8>,
    ) -> Result<SendOutcome, TransportError> {
        let transaction: Transaction =
            bincode::deserialize(&wire_transaction).map_err(|e| TransportError::Request {
                method: "sendTransaction",
                message: e.to_string(),
            })?;
        let index = {
            let mut sent = self.sent.lock();
            sent.push(transaction.clone());
            sent.len() - 1
        };
        if transaction.verify().is_err() {
            return Ok(SendOutcome::Rejected {
                code: -32003,
                message: "Transaction signature verification failure".to_owned(),
                data: None,
            });
        }
        if matches!(*self.reject_from.lock(), Some(n) if index >= n) {
            return Ok(SendOutcome::Rejected {
                code: -32002,
                message: "Transaction simulation failed: Error processing Instruction 0".to_owned(),
                data: Some(serde_json::json!({
                    "err": {"InstructionError": [0, {"Custom": 1}]},
                    "logs": ["Program log: Error: insufficient funds"],
                })),
            });
        }
        Ok(SendOutcome::Accepted(transaction.signatures[0]))
    }

    async fn subscribe_account(
        &self,
        address: &Pubkey,
        _commitment: Commitment,
        callback: AccountCallback,
    ) -> Result<SubscriptionId, TransportError> {
        let id = self.next_id();
        self.account_subs
            .lock()
            .insert(id, (*address, Arc::from(callback)));
        Ok(id)
    }

    async fn subscribe_signature(
        &self,
        signature: &Signature,
        _commitment: Commitment,
        callback: SignatureCallback,
    ) -> Result<SubscriptionId, TransportError> {
        let id = self.next_id();
        self.signature_subs
            .lock()
            .insert(id, (*signature, Arc::from(callback)));
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), TransportError> {
        self.account_subs.lock().remove(&id);
        self.signature_subs.lock().remove(&id);
        self.unsubscribed.lock().push(id);
        Ok(())
    }
}

pub fn mint_data(decimals: u8) -> Vec<u8> {
    let mut data = vec![0; spl_token::state::Mint::LEN];
    spl_token::state::Mint {
        mint_authority: COption::None,
        supply: 1_000_000_000,
        decimals,
        is_initialized: true,
        freeze_authority: COption::None,
    }
    .pack_into_slice(&mut data);
    data
}

/// A market account with a valid vault signer, registered on the mock ledger along with its mints
pub fn create_market(transport: &MockTransport, quote_mint: Option<Pubkey>) -> Market {
    let own_address = Pubkey::new_unique();
    let vault_signer_nonce = (0..u64::MAX)
        .find(|nonce| {
            Pubkey::create_program_address(
                &[own_address.as_ref(), &nonce.to_le_bytes()],
                &serum_session::ID,
            )
            .is_ok()
        })
        .unwrap();
    let base_mint = Pubkey::new_unique();
    let quote_mint = quote_mint.unwrap_or_else(Pubkey::new_unique);
    let market = Market {
        account_flags: AccountFlag::Initialized | AccountFlag::Market,
        own_address,
        vault_signer_nonce,
        base_mint,
        quote_mint,
        base_vault: Pubkey::new_unique(),
        base_deposits_total: 0,
        base_fees_accrued: 0,
        quote_vault: Pubkey::new_unique(),
        quote_deposits_total: 0,
        quote_fees_accrued: 0,
        quote_dust_threshold: 100,
        request_queue: Pubkey::new_unique(),
        event_queue: Pubkey::new_unique(),
        bids: Pubkey::new_unique(),
        asks: Pubkey::new_unique(),
        base_lot_size: 100_000,
        quote_lot_size: 100,
        fee_rate_bps: 0,
        referrer_rebates_accrued: 0,
    };
    transport.set_account(own_address, serum_session::ID, market.encode());
    transport.set_account(base_mint, spl_token::ID, mint_data(6));
    if quote_mint != spl_token::native_mint::ID {
        transport.set_account(quote_mint, spl_token::ID, mint_data(6));
    }
    market
}

/// An open orders account holding asks at increasing prices
pub fn open_orders_account(market: &Market, owner: &Pubkey, n: u8) -> OpenOrdersAccount {
    OpenOrdersAccount {
        account_flags: BitFlags::from(AccountFlag::Initialized) | AccountFlag::OpenOrders,
        market: market.own_address,
        owner: *owner,
        base_token_free: 0,
        base_token_total: 10_000_000,
        quote_token_free: 0,
        quote_token_total: 0,
        orders: (0..n)
            .map(|i| OpenOrder {
                order_index: i,
                side: Side::Ask,
                order_id: order_id(Side::Ask, 1_000 + i as u64, i as u64),
                raw_price: 1_000 + i as u64,
                raw_quantity: 0,
                client_order_id: 100 + i as u64,
            })
            .collect(),
        referrer_rebates_accrued: 0,
    }
}
