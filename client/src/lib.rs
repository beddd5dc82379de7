/*!
Client side engine for Serum style on-chain central limit order books.

## Overview

This library reads the exchange's binary accounts and builds the transactions a trader needs, without ever
opening a connection itself. All ledger access goes through the [`Transport`][`transport::Transport`] trait
and all signing of the owner's transactions through [`TransactionSigner`][`transport::TransactionSigner`].

There are two paths through the crate:
- the read path decodes raw account data into typed snapshots and keeps a synchronized view of the market
- the write path composes, signs and submits transactions and tracks each of them to a terminal outcome

## Reading state

Every account layout of the exchange has a decoder under [`state`]: the [`Market`][`state::Market`], the
trader's [`OpenOrdersAccount`][`state::OpenOrdersAccount`], each side of the book as an
[`OrderBookSide`][`state::OrderBookSide`] and the [`EventQueue`][`state::EventQueue`]. Decoding either fully
succeeds or fails with a [`DecodeError`][`error::DecodeError`].

Book sides arrive on separate feeds. The [`OrderBookSynchronizer`][`state::OrderBookSynchronizer`] swaps each
side independently and publishes a composite [`OrderBook`][`state::OrderBook`] where a side that was never
received is absent rather than empty.

## Trading

A [`TradingSession`][`session::TradingSession`] owns the trader's state on one market and exposes
[`place_order`][`session::TradingSession::place_order`],
[`cancel_order`][`session::TradingSession::cancel_order`],
[`cancel_order_by_client_id`][`session::TradingSession::cancel_order_by_client_id`],
[`cancel_all`][`session::TradingSession::cancel_all`] and
[`settle_funds`][`session::TradingSession::settle_funds`].

Each operation is composed by the [`composer`] which adds the setup the transaction needs (token accounts,
wrapped native accounts, the open orders account) and the matching cleanup. Cancelling every order may not fit
in a single transaction, in which case it is split into batches that are submitted one after the other and
stop at the first rejection.

Every submitted transaction yields a [`SignatureConfirmation`][`confirmation::SignatureConfirmation`] which
moves once from submission to a terminal state.
*/

pub mod composer;
pub mod config;
pub mod confirmation;
pub mod error;
/// Exchange instructions and their account lists
pub mod instruction;
pub mod session;
/// Decoders for the exchange's accounts
pub mod state;
pub mod transport;
pub mod utils;

use solana_program::declare_id;

declare_id!("9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin");

pub use crate::{
    config::SessionConfig,
    confirmation::{ConfirmationState, SignatureConfirmation},
    error::{DexError, DexResult},
    session::{OrderRequest, TradingSession},
};
