//! Narrow contracts for the ledger transport and the owner's signer.
//!
//! Nothing in this crate opens a connection itself. A session is handed a [`Transport`] implementation and an
//! optional [`TransactionSigner`], both of which live outside the crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_program::{hash::Hash, pubkey::Pubkey};
use solana_sdk::signature::{Keypair, Signature, Signer};

use crate::error::TransportError;

/// Ledger confirmation level requested for reads and subscriptions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

/// Server side filter for program account scans
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountFilter {
    DataSize(u64),
    Memcmp { offset: usize, bytes: Vec<u8> },
}

impl AccountFilter {
    /// Whether `data` passes the filter
    pub fn matches(&self, data: &[u8]) -> bool {
        match self {
            AccountFilter::DataSize(size) => data.len() as u64 == *size,
            AccountFilter::Memcmp { offset, bytes } => data
                .get(*offset..offset + bytes.len())
                .map(|window| window == bytes.as_slice())
                .unwrap_or(false),
        }
    }
}

pub type SubscriptionId = u64;

/// Result of handing a signed transaction to the transport
#[derive(Clone, Debug, PartialEq)]
pub enum SendOutcome {
    /// The transaction passed preflight and was forwarded
    Accepted(Signature),
    /// The transaction was refused, usually because its simulation failed
    Rejected {
        code: i64,
        message: String,
        /// Raw simulation payload, when the node returned one
        data: Option<serde_json::Value>,
    },
}

/// Account data pushed by a subscription
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountNotification {
    pub data: Vec<u8>,
    pub slot: u64,
}

/// Outcome pushed by a signature subscription
#[derive(Clone, Debug, PartialEq)]
pub struct SignatureNotification {
    pub slot: u64,
    /// The transaction error, `None` on success
    pub err: Option<serde_json::Value>,
}

pub type AccountCallback = Box<dyn Fn(AccountNotification) + Send + Sync>;
pub type SignatureCallback = Box<dyn Fn(SignatureNotification) + Send + Sync>;

/// The RPC and streaming collaborator.
///
/// Implementations own connection management and retries. Dropping a signature callback without calling it
/// tells waiting confirmations that the outcome will never be known.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Raw account data, `None` if the account does not exist
    async fn get_account_data(
        &self,
        address: &Pubkey,
        commitment: Commitment,
    ) -> Result<Option<Vec<u8>>, TransportError>;

    /// Every account owned by `program_id` passing all `filters`
    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        filters: &[AccountFilter],
        commitment: Commitment,
    ) -> Result<Vec<(Pubkey, Vec<u8>)>, TransportError>;

    async fn get_latest_blockhash(&self, commitment: Commitment) -> Result<Hash, TransportError>;

    async fn get_minimum_balance_for_rent_exemption(
        &self,
        data_len: usize,
    ) -> Result<u64, TransportError>;

    /// Submit a serialized, fully signed transaction
    async fn send_transaction(&self, wire_transaction: Vec<u8>)
        -> Result<SendOutcome, TransportError>;

    async fn subscribe_account(
        &self,
        address: &Pubkey,
        commitment: Commitment,
        callback: AccountCallback,
    ) -> Result<SubscriptionId, TransportError>;

    async fn subscribe_signature(
        &self,
        signature: &Signature,
        commitment: Commitment,
        callback: SignatureCallback,
    ) -> Result<SubscriptionId, TransportError>;

    /// Releasing a subscription the transport already ended, such as a notified signature, must succeed
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), TransportError>;
}

/// Signs transaction messages on behalf of the session owner
pub trait TransactionSigner: Send + Sync {
    fn pubkey(&self) -> Pubkey;

    fn sign_message(&self, message: &[u8]) -> Signature;
}

impl TransactionSigner for Keypair {
    fn pubkey(&self) -> Pubkey {
        Signer::pubkey(self)
    }

    fn sign_message(&self, message: &[u8]) -> Signature {
        Signer::sign_message(self, message)
    }
}
