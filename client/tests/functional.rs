use std::sync::Arc;

use parking_lot::Mutex;
use serum_session::{
    confirmation::ConfirmationState,
    error::{DexError, PreconditionError},
    instruction::DexInstruction,
    state::{
        slab::{order_id, SlabBuilder},
        EventFlag, EventQueue, Market, OpenOrdersAccount, OrderBook, Side, SlabOrder, TradeEvent,
    },
    OrderRequest, SessionConfig, TradingSession,
};
use solana_program::pubkey::Pubkey;
use solana_sdk::{
    signature::{Keypair, Signer},
    transaction::Transaction,
};
use spl_associated_token_account::get_associated_token_address;

pub mod common;

use crate::common::utils::{create_market, open_orders_account, MockTransport};

struct Trader {
    transport: Arc<MockTransport>,
    market: Market,
    owner: Arc<Keypair>,
    session: TradingSession<MockTransport>,
}

/// A session on a fresh market. The owner holds a base token account and, when `orders` is set, an open orders
/// account with that many resting asks.
async fn trader(quote_mint: Option<Pubkey>, orders: Option<u8>) -> Trader {
    let transport = MockTransport::new();
    let market = create_market(&transport, quote_mint);
    let owner = Arc::new(Keypair::new());
    transport.set_account(
        get_associated_token_address(&owner.pubkey(), &market.base_mint),
        spl_token::ID,
        vec![0; 165],
    );
    if let Some(n) = orders {
        transport.set_account(
            Pubkey::new_unique(),
            serum_session::ID,
            open_orders_account(&market, &owner.pubkey(), n).encode(),
        );
    }
    let mut session = TradingSession::new(
        Arc::clone(&transport),
        SessionConfig::new(market.own_address).with_owner(owner.pubkey()),
    )
    .with_signer(owner.clone());
    session.initialize().await.unwrap();
    Trader {
        transport,
        market,
        owner,
        session,
    }
}

fn dex_tag(tx: &Transaction, index: usize) -> Option<u32> {
    let ix = &tx.message.instructions[index];
    if *ix.program_id(&tx.message.account_keys) != serum_session::ID {
        return None;
    }
    Some(u32::from_le_bytes(ix.data[1..5].try_into().unwrap()))
}

fn dex_tags(tx: &Transaction) -> Vec<Option<u32>> {
    (0..tx.message.instructions.len())
        .map(|i| dex_tag(tx, i))
        .collect()
}

fn count_tag(tx: &Transaction, tag: DexInstruction) -> usize {
    dex_tags(tx)
        .into_iter()
        .filter(|t| *t == Some(tag as u32))
        .count()
}

#[tokio::test]
async fn test_initialize_resolves_accounts() {
    let t = trader(None, Some(2)).await;
    let scale = t.session.scale();
    assert_eq!(scale.base_decimals, 6);
    assert_eq!(scale.quote_decimals, 6);
    assert_eq!(scale.base_lot_size, t.market.base_lot_size);
    assert_eq!(
        t.session.base_wallet(),
        Some(get_associated_token_address(
            &t.owner.pubkey(),
            &t.market.base_mint
        ))
    );
    // no quote token account on the ledger
    assert_eq!(t.session.quote_wallet(), None);
    assert!(t.session.open_orders_address().is_some());
    assert_eq!(t.session.open_orders().unwrap().orders.len(), 2);
}

#[tokio::test]
async fn test_initialize_degrades_on_lookup_failures() {
    let transport = MockTransport::new();
    let market = create_market(&transport, None);
    let owner = Pubkey::new_unique();
    transport.fail_reads_of(market.quote_mint);
    transport.fail_reads_of(get_associated_token_address(&owner, &market.base_mint));
    transport.fail_scans();
    let mut session = TradingSession::new(
        Arc::clone(&transport),
        SessionConfig::new(market.own_address).with_owner(owner),
    );
    session.initialize().await.unwrap();
    assert_eq!(session.scale().base_decimals, 6);
    assert_eq!(session.scale().quote_decimals, 0);
    assert_eq!(session.base_wallet(), None);
    assert_eq!(session.open_orders_address(), None);
}

#[tokio::test]
async fn test_missing_market() {
    let transport = MockTransport::new();
    let mut session = TradingSession::new(transport, SessionConfig::new(Pubkey::new_unique()));
    assert!(matches!(
        session.initialize().await,
        Err(DexError::Precondition(PreconditionError::MarketNotLoaded))
    ));
}

#[tokio::test]
async fn test_native_quote_is_always_wrapped() {
    let t = trader(Some(spl_token::native_mint::ID), None).await;
    assert_eq!(t.session.scale().quote_decimals, 9);
    assert_eq!(t.session.quote_wallet(), None);
}

#[tokio::test]
async fn test_place_order_without_signer() {
    let transport = MockTransport::new();
    let market = create_market(&transport, None);
    let mut session = TradingSession::new(
        Arc::clone(&transport),
        SessionConfig::new(market.own_address).with_owner(Pubkey::new_unique()),
    );
    session.initialize().await.unwrap();
    let result = session
        .place_order(&OrderRequest::limit(Side::Bid, 1.5, 2.0))
        .await;
    assert!(matches!(
        result,
        Err(DexError::Precondition(PreconditionError::NoSigner))
    ));
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_place_order_invalid_size() {
    let mut t = trader(None, Some(0)).await;
    let result = t
        .session
        .place_order(&OrderRequest::limit(Side::Ask, 1.5, 0.0))
        .await;
    assert!(matches!(
        result,
        Err(DexError::Precondition(PreconditionError::InvalidOrder(_)))
    ));
    assert!(t.transport.sent().is_empty());
}

#[tokio::test]
async fn test_place_wrapped_bid_creates_accounts() {
    let mut t = trader(Some(spl_token::native_mint::ID), None).await;
    let confirmation = t
        .session
        .place_order(&OrderRequest::limit(Side::Bid, 0.5, 2.0))
        .await
        .unwrap();
    assert_eq!(confirmation.state(), ConfirmationState::AwaitingConfirmation);

    let sent = t.transport.sent();
    assert_eq!(sent.len(), 1);
    let tx = &sent[0];
    let keys = &tx.message.account_keys;
    // owner, wrap account, open orders account
    assert_eq!(tx.signatures.len(), 3);
    assert_eq!(keys[0], t.owner.pubkey());
    let created = |i: usize| keys[tx.message.instructions[i].accounts[1] as usize];
    let (wrap, open_orders) = (created(0), created(2));
    // ephemeral signers follow the owner in creation order
    assert_eq!(&keys[1..3], &[wrap, open_orders]);

    let programs: Vec<Pubkey> = tx
        .message
        .instructions
        .iter()
        .map(|ix| *ix.program_id(keys))
        .collect();
    assert_eq!(
        programs,
        vec![
            solana_program::system_program::ID,
            spl_token::ID,
            solana_program::system_program::ID,
            serum_session::ID,
            serum_session::ID,
            serum_session::ID,
            spl_token::ID,
        ]
    );
    let tags = dex_tags(tx);
    assert_eq!(tags[3], Some(DexInstruction::InitOpenOrders as u32));
    assert_eq!(tags[4], Some(DexInstruction::NewOrderV3 as u32));
    assert_eq!(tags[5], Some(DexInstruction::SettleFunds as u32));
    // the wrapped account is closed back to the owner
    let close = &tx.message.instructions[6];
    assert_eq!(keys[close.accounts[0] as usize], wrap);
    assert_eq!(keys[close.accounts[1] as usize], t.owner.pubkey());

    // 2 UI units at 0.5 is 20 base lots at 500_000 quote lots
    let create_wrap = &tx.message.instructions[0];
    let lamports = u64::from_le_bytes(create_wrap.data[4..12].try_into().unwrap());
    let rent = solana_program::rent::Rent::default().minimum_balance(165);
    assert_eq!(lamports, rent + 100 * 500_000 * 20 + 10_000_000);

    assert_eq!(t.session.open_orders_address(), Some(open_orders));
    assert_eq!(t.transport.signature_subscriptions(), 1);
}

#[tokio::test]
async fn test_rejected_order_keeps_state() {
    let mut t = trader(None, None).await;
    t.transport.reject_from(0);
    let confirmation = t
        .session
        .place_order(&OrderRequest::limit(Side::Ask, 1.5, 2.0))
        .await
        .unwrap();
    assert_eq!(confirmation.state(), ConfirmationState::RejectedAtSimulation);
    assert_eq!(confirmation.signature(), None);
    let diagnostics = confirmation.diagnostics().unwrap();
    assert_eq!(diagnostics.code, -32002);
    assert_eq!(diagnostics.logs.len(), 1);
    // nothing was created, nothing is watched
    assert_eq!(t.session.open_orders_address(), None);
    assert_eq!(t.transport.signature_subscriptions(), 0);
    assert_eq!(confirmation.wait_terminal().await, Some(ConfirmationState::RejectedAtSimulation));
}

#[tokio::test]
async fn test_confirmation_single_terminal_transition() {
    let mut t = trader(None, Some(0)).await;
    let confirmation = t
        .session
        .place_order(&OrderRequest::limit(Side::Ask, 1.5, 2.0))
        .await
        .unwrap();
    let signature = confirmation.signature().unwrap();
    assert_eq!(signature, t.transport.sent()[0].signatures[0]);

    t.transport.notify_signature(&signature, None, 42);
    assert_eq!(confirmation.state(), ConfirmationState::Confirmed);
    assert_eq!(confirmation.slot(), Some(42));
    assert_eq!(confirmation.wait_terminal().await, Some(ConfirmationState::Confirmed));

    // a late failure report does not move a terminal state
    t.transport
        .notify_signature(&signature, Some(serde_json::json!("AccountInUse")), 43);
    assert_eq!(confirmation.state(), ConfirmationState::Confirmed);
}

#[tokio::test]
async fn test_confirmation_failed() {
    let mut t = trader(None, Some(0)).await;
    let confirmation = t.session.settle_funds().await.unwrap();
    let signature = confirmation.signature().unwrap();
    let waiter = {
        let confirmation = confirmation.clone();
        tokio::spawn(async move { confirmation.wait_terminal().await })
    };
    t.transport.notify_signature(
        &signature,
        Some(serde_json::json!({"InstructionError": [0, {"Custom": 41}]})),
        7,
    );
    assert_eq!(waiter.await.unwrap(), Some(ConfirmationState::Failed));
    assert!(confirmation.failure().is_some());
}

#[tokio::test]
async fn test_lost_signature_feed_is_indeterminate() {
    let mut t = trader(None, Some(0)).await;
    let confirmation = t.session.settle_funds().await.unwrap();
    assert!(confirmation.subscription().is_some());
    t.transport.drop_signature_subscriptions();
    assert_eq!(confirmation.wait_terminal().await, None);
    assert_eq!(confirmation.state(), ConfirmationState::AwaitingConfirmation);
}

#[tokio::test]
async fn test_settled_signature_watches_are_released() {
    let mut t = trader(None, Some(0)).await;
    let first = t.session.settle_funds().await.unwrap();
    let first_watch = first.subscription().unwrap();
    t.transport
        .notify_signature(&first.signature().unwrap(), None, 3);
    assert_eq!(first.state(), ConfirmationState::Confirmed);

    let second = t.session.settle_funds().await.unwrap();
    let second_watch = second.subscription().unwrap();
    // the settled watch goes on the next submission, the pending one stays
    assert_eq!(t.transport.unsubscribed(), vec![first_watch]);
    assert_eq!(t.transport.signature_subscriptions(), 1);

    t.session.unsubscribe_all().await.unwrap();
    assert_eq!(t.transport.unsubscribed(), vec![first_watch, second_watch]);
    assert_eq!(t.transport.signature_subscriptions(), 0);
}

#[tokio::test]
async fn test_cancel_requires_known_order() {
    let mut t = trader(None, Some(3)).await;
    assert!(matches!(
        t.session.cancel_order(12345).await,
        Err(DexError::Precondition(PreconditionError::OrderNotFound(12345)))
    ));
    assert!(matches!(
        t.session.cancel_order_by_client_id(999).await,
        Err(DexError::Precondition(PreconditionError::ClientOrderNotFound(999)))
    ));
    assert!(t.transport.sent().is_empty());

    let order = t.session.open_orders().unwrap().orders[1];
    t.session.cancel_order(order.order_id).await.unwrap();
    t.session
        .cancel_order_by_client_id(order.client_order_id)
        .await
        .unwrap();
    let sent = t.transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(count_tag(&sent[0], DexInstruction::CancelOrderV2), 1);
    assert_eq!(count_tag(&sent[1], DexInstruction::CancelOrderByClientIdV2), 1);
    for tx in &sent {
        assert_eq!(
            dex_tag(tx, tx.message.instructions.len() - 1),
            Some(DexInstruction::SettleFunds as u32)
        );
    }
}

#[tokio::test]
async fn test_cancel_all_batches() {
    let mut t = trader(None, Some(37)).await;
    let confirmations = t.session.cancel_all().await.unwrap();
    let sent = t.transport.sent();
    assert_eq!(confirmations.len(), sent.len());
    for tx in &sent {
        assert!(bincode::serialized_size(tx).unwrap() < 1232);
        assert_eq!(count_tag(tx, DexInstruction::SettleFunds), 1);
    }
    // the first batch also creates the missing quote token account
    let cancels: Vec<usize> = sent
        .iter()
        .map(|tx| count_tag(tx, DexInstruction::CancelOrderV2))
        .collect();
    assert_eq!(cancels, [11, 16, 10]);
    assert_eq!(
        *sent[0].message.instructions[0].program_id(&sent[0].message.account_keys),
        spl_associated_token_account::ID
    );
    assert!(confirmations
        .iter()
        .all(|c| c.state() == ConfirmationState::AwaitingConfirmation));
}

#[tokio::test]
async fn test_cancel_all_wrapped_closure_in_last_batch() {
    let mut t = trader(Some(spl_token::native_mint::ID), Some(30)).await;
    t.session.cancel_all().await.unwrap();
    let sent = t.transport.sent();
    assert!(sent.len() > 1);
    let first = &sent[0].message;
    let wrap = first.account_keys[first.instructions[0].accounts[1] as usize];
    assert_eq!(sent[0].signatures.len(), 2);
    for (i, tx) in sent.iter().enumerate() {
        let keys = &tx.message.account_keys;
        let closes = tx
            .message
            .instructions
            .iter()
            .filter(|ix| {
                *ix.program_id(keys) == spl_token::ID
                    && ix.data.first() == Some(&9)
                    && keys[ix.accounts[0] as usize] == wrap
            })
            .count();
        assert_eq!(closes, usize::from(i == sent.len() - 1));
        if i > 0 {
            assert_eq!(tx.signatures.len(), 1);
        }
    }
}

#[tokio::test]
async fn test_cancel_all_stops_at_first_rejection() {
    let mut t = trader(None, Some(37)).await;
    t.transport.reject_from(1);
    let confirmations = t.session.cancel_all().await.unwrap();
    assert_eq!(confirmations.len(), 2);
    assert_eq!(t.transport.sent().len(), 2);
    assert_eq!(confirmations[0].state(), ConfirmationState::AwaitingConfirmation);
    assert_eq!(confirmations[1].state(), ConfirmationState::RejectedAtSimulation);
    // only the accepted batch is watched
    assert_eq!(t.transport.signature_subscriptions(), 1);
}

#[tokio::test]
async fn test_cancel_all_without_orders() {
    let mut t = trader(None, Some(0)).await;
    assert!(t.session.cancel_all().await.unwrap().is_empty());
    assert!(t.transport.sent().is_empty());
}

#[tokio::test]
async fn test_order_book_subscription() {
    let t = trader(None, None).await;
    let views: Arc<Mutex<Vec<(OrderBook, u64)>>> = Arc::new(Mutex::new(vec![]));
    let recorder = Arc::clone(&views);
    t.session
        .subscribe_order_book(move |book, slot| recorder.lock().push((book, slot)))
        .await
        .unwrap();

    let leaf = |side: Side, price: u64, seq: u64| SlabOrder {
        order_id: order_id(side, price, seq),
        price,
        quantity: 10,
        owner: Pubkey::new_unique(),
        owner_slot: 0,
        fee_tier: 0,
        client_order_id: seq,
        sequence_number: seq,
    };
    let mut bids = SlabBuilder::new(Side::Bid);
    bids.insert(leaf(Side::Bid, 900, 1))
        .insert(leaf(Side::Bid, 950, 2))
        .insert(leaf(Side::Bid, 920, 3));
    t.transport.push_account(t.market.bids, bids.build(16), 10);

    {
        let views = views.lock();
        assert_eq!(views.len(), 1);
        let (book, slot) = &views[0];
        assert_eq!(*slot, 10);
        assert!(book.asks().is_none());
        let prices: Vec<u64> = book.bids().unwrap().iter().map(|o| o.price).collect();
        assert_eq!(prices, vec![950, 920, 900]);
    }

    let mut asks = SlabBuilder::new(Side::Ask);
    asks.insert(leaf(Side::Ask, 1_000, 4));
    // an update on the wrong feed is dropped
    t.transport.push_account(t.market.bids, asks.build(16), 11);
    t.transport.push_account(t.market.asks, asks.build(16), 12);

    let views = views.lock();
    assert_eq!(views.len(), 2);
    let (book, _) = &views[1];
    assert!(book.is_complete());
    assert_eq!(book.get_spread(), (Some(950), Some(1_000)));
    let level = book.ask_levels(5).unwrap()[0];
    assert_eq!((level.price_lots, level.quantity_lots), (1_000, 10));
    assert!((level.price - 1.0).abs() < 1e-9 && (level.size - 1.0).abs() < 1e-9);
    assert_eq!(t.session.order_book().get_spread(), (Some(950), Some(1_000)));
}

#[tokio::test]
async fn test_open_orders_subscription_updates_cache() {
    let t = trader(None, Some(1)).await;
    let address = t.session.open_orders_address().unwrap();
    let seen: Arc<Mutex<Vec<OpenOrdersAccount>>> = Arc::new(Mutex::new(vec![]));
    let recorder = Arc::clone(&seen);
    t.session
        .subscribe_open_orders(move |account, _| recorder.lock().push(account))
        .await
        .unwrap();
    let updated = open_orders_account(&t.market, &t.owner.pubkey(), 4);
    t.transport.push_account(address, updated.encode(), 5);
    assert_eq!(seen.lock().len(), 1);
    assert_eq!(t.session.open_orders().unwrap().orders.len(), 4);
}

#[tokio::test]
async fn test_trades_subscription() {
    let t = trader(None, None).await;
    let fills: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(vec![]));
    let recorder = Arc::clone(&fills);
    t.session
        .subscribe_trades(move |batch, _| recorder.lock().extend(batch.iter().map(|f| f.price)))
        .await
        .unwrap();

    // a taker bid paying 3_000_000 quote for 2_000_000 base is a fill at 1.5
    let fill = |paid: u64| TradeEvent {
        flags: EventFlag::Fill | EventFlag::Bid,
        owner_slot: 0,
        fee_tier: 0,
        native_qty_released: 2_000_000,
        native_qty_paid: paid,
        native_fee_or_rebate: 0,
        order_id: order_id(Side::Bid, 1_500, 1),
        owner: Pubkey::new_unique(),
        client_order_id: 0,
    };
    let out = TradeEvent {
        flags: EventFlag::Out | EventFlag::Bid,
        ..fill(0)
    };
    let mut queue = EventQueue {
        head: 0,
        count: 2,
        seq_num: 2,
        slots: vec![fill(3_000_000), out, fill(0), fill(0)],
    };
    t.transport.push_account(t.market.event_queue, queue.encode(), 1);
    assert_eq!(*fills.lock(), vec![1.5]);

    // only events pushed since the last notification are reported
    queue.slots[2] = fill(4_000_000);
    queue.count = 3;
    queue.seq_num = 3;
    t.transport.push_account(t.market.event_queue, queue.encode(), 2);
    assert_eq!(*fills.lock(), vec![1.5, 2.0]);
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent() {
    let t = trader(None, Some(0)).await;
    let (bids_id, _) = t.session.subscribe_order_book(|_, _| {}).await.unwrap();
    assert_eq!(t.transport.account_subscriptions().len(), 2);

    t.session.unsubscribe(&t.market.bids).await.unwrap();
    t.session.unsubscribe(&t.market.bids).await.unwrap();
    t.session.unsubscribe(&Pubkey::new_unique()).await.unwrap();
    assert_eq!(t.transport.unsubscribed(), vec![bids_id]);
    assert_eq!(t.transport.account_subscriptions(), vec![t.market.asks]);

    // subscribing twice to the same account replaces the first subscription
    t.session.subscribe_open_orders(|_, _| {}).await.unwrap();
    t.session.subscribe_open_orders(|_, _| {}).await.unwrap();
    assert_eq!(t.transport.account_subscriptions().len(), 2);

    t.session.unsubscribe_all().await.unwrap();
    assert!(t.transport.account_subscriptions().is_empty());
}
