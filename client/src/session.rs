use std::{collections::HashMap, sync::Arc};

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use solana_program::{program_pack::Pack, pubkey::Pubkey};
use spl_associated_token_account::get_associated_token_address;

use crate::{
    composer::{
        cancel_all, cancel_order, new_order, serialize_transaction, settle, Batch, Composer,
        CreatedAccounts, RentSchedule,
    },
    config::SessionConfig,
    confirmation::{ConfirmationState, SignatureConfirmation},
    error::{DexResult, PreconditionError},
    state::{
        event_queue::Fill, EventQueue, Market, OpenOrder, OpenOrdersAccount, OrderBook,
        OrderBookSynchronizer, OrderType, Side, TradeEvent,
    },
    transport::{
        AccountCallback, AccountFilter, AccountNotification, SubscriptionId, TransactionSigner,
        Transport,
    },
    utils::MarketScale,
};

fn default_order_type() -> OrderType {
    OrderType::Limit
}

/// An order expressed in UI units
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct OrderRequest {
    pub side: Side,
    pub price: f64,
    pub size: f64,
    #[serde(default = "default_order_type")]
    pub order_type: OrderType,
    #[serde(default)]
    pub client_order_id: u64,
}

impl OrderRequest {
    pub fn limit(side: Side, price: f64, size: f64) -> Self {
        Self {
            side,
            price,
            size,
            order_type: OrderType::Limit,
            client_order_id: 0,
        }
    }
}

/// Owns the state of one trader on one market and exposes the order lifecycle.
///
/// Order operations take `&mut self`, so at most one of them is in flight per session. Subscription callbacks
/// run on the transport's threads and only touch the order book synchronizer and the open orders cache.
pub struct TradingSession<T: Transport> {
    transport: Arc<T>,
    config: SessionConfig,
    signer: Option<Arc<dyn TransactionSigner>>,
    market: Option<Market>,
    scale: MarketScale,
    base_wallet: Option<Pubkey>,
    quote_wallet: Option<Pubkey>,
    open_orders_address: Option<Pubkey>,
    open_orders: Arc<RwLock<Option<OpenOrdersAccount>>>,
    order_book: Arc<OrderBookSynchronizer>,
    subscriptions: Mutex<HashMap<Pubkey, SubscriptionId>>,
    /// Signature subscriptions of submitted transactions, released once their outcome is known
    signature_watches: Mutex<Vec<(SubscriptionId, SignatureConfirmation)>>,
    rent: Option<RentSchedule>,
}

impl<T: Transport> TradingSession<T> {
    pub fn new(transport: Arc<T>, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            signer: None,
            market: None,
            scale: MarketScale::default(),
            base_wallet: None,
            quote_wallet: None,
            open_orders_address: None,
            open_orders: Arc::new(RwLock::new(None)),
            order_book: Arc::new(OrderBookSynchronizer::default()),
            subscriptions: Mutex::new(HashMap::new()),
            signature_watches: Mutex::new(Vec::new()),
            rent: None,
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn TransactionSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn market(&self) -> Option<&Market> {
        self.market.as_ref()
    }

    pub fn scale(&self) -> MarketScale {
        self.scale
    }

    pub fn base_wallet(&self) -> Option<Pubkey> {
        self.base_wallet
    }

    pub fn quote_wallet(&self) -> Option<Pubkey> {
        self.quote_wallet
    }

    pub fn open_orders_address(&self) -> Option<Pubkey> {
        self.open_orders_address
    }

    /// Latest known state of the owner's open orders account
    pub fn open_orders(&self) -> Option<OpenOrdersAccount> {
        self.open_orders.read().clone()
    }

    pub fn order_book(&self) -> OrderBook {
        self.order_book.view()
    }

    /// The owner's open orders with their remaining quantity taken from the current book
    pub fn open_orders_with_book(&self) -> Vec<OpenOrder> {
        let book = self.order_book.view();
        self.open_orders
            .read()
            .as_ref()
            .map(|account| account.orders_with_book(&book))
            .unwrap_or_default()
    }

    fn owner(&self) -> Option<Pubkey> {
        self.config
            .owner
            .or_else(|| self.signer.as_ref().map(|s| s.pubkey()))
    }

    fn loaded_market(&self) -> Result<&Market, PreconditionError> {
        self.market.as_ref().ok_or(PreconditionError::MarketNotLoaded)
    }

    fn signer(&self) -> Result<Arc<dyn TransactionSigner>, PreconditionError> {
        self.signer.clone().ok_or(PreconditionError::NoSigner)
    }

    /// Fetch and decode the market, the mint decimals and, when an owner is known, the owner's accounts.
    pub async fn initialize(&mut self) -> DexResult {
        let data = self
            .transport
            .get_account_data(&self.config.market, self.config.commitment)
            .await?
            .ok_or(PreconditionError::MarketNotLoaded)?;
        let market = Market::decode(&data)?;
        let base_decimals = self.mint_decimals(&market.base_mint).await;
        let quote_decimals = self.mint_decimals(&market.quote_mint).await;
        self.scale = MarketScale {
            base_decimals,
            quote_decimals,
            base_lot_size: market.base_lot_size,
            quote_lot_size: market.quote_lot_size,
        };
        self.order_book.clear();
        self.order_book.set_scale(self.scale);
        log::info!(
            "Loaded market {} (base {} / quote {})",
            market.own_address,
            market.base_mint,
            market.quote_mint
        );
        self.market = Some(market);
        if self.owner().is_some() {
            self.reload().await?;
        }
        Ok(())
    }

    /// Re-resolve the owner's token accounts and open orders account.
    ///
    /// Lookup failures are logged and leave the corresponding account unresolved.
    pub async fn reload(&mut self) -> DexResult {
        let market = self.loaded_market()?;
        let (base_mint, quote_mint) = (market.base_mint, market.quote_mint);
        let owner = self.owner().ok_or(PreconditionError::NoOwner)?;
        self.base_wallet = self.find_wallet(&owner, &base_mint).await;
        self.quote_wallet = self.find_wallet(&owner, &quote_mint).await;
        let found = self.find_open_orders(&owner).await;
        self.open_orders_address = found.as_ref().map(|(address, _)| *address);
        *self.open_orders.write() = found.map(|(_, account)| account);
        log::debug!(
            "Resolved base wallet {:?}, quote wallet {:?}, open orders {:?}",
            self.base_wallet,
            self.quote_wallet,
            self.open_orders_address
        );
        Ok(())
    }

    async fn mint_decimals(&self, mint: &Pubkey) -> u8 {
        if *mint == spl_token::native_mint::ID {
            return spl_token::native_mint::DECIMALS;
        }
        match self
            .transport
            .get_account_data(mint, self.config.commitment)
            .await
        {
            Ok(Some(data)) => match spl_token::state::Mint::unpack(&data) {
                Ok(m) => m.decimals,
                Err(e) => {
                    log::warn!("Invalid mint account {}: {}", mint, e);
                    0
                }
            },
            Ok(None) => {
                log::warn!("Mint {} not found", mint);
                0
            }
            Err(e) => {
                log::warn!("Mint {} lookup failed: {}", mint, e);
                0
            }
        }
    }

    /// The owner's associated token account for `mint`, if it exists.
    ///
    /// The native mint is always wrapped per transaction, so it never resolves to a persistent account.
    async fn find_wallet(&self, owner: &Pubkey, mint: &Pubkey) -> Option<Pubkey> {
        if *mint == spl_token::native_mint::ID {
            return None;
        }
        let address = get_associated_token_address(owner, mint);
        match self
            .transport
            .get_account_data(&address, self.config.commitment)
            .await
        {
            Ok(Some(_)) => Some(address),
            Ok(None) => None,
            Err(e) => {
                log::warn!("Token account lookup for mint {} failed: {}", mint, e);
                None
            }
        }
    }

    async fn find_open_orders(&self, owner: &Pubkey) -> Option<(Pubkey, OpenOrdersAccount)> {
        let filters = [
            AccountFilter::DataSize(OpenOrdersAccount::LEN as u64),
            AccountFilter::Memcmp {
                offset: OpenOrdersAccount::MARKET_OFFSET,
                bytes: self.config.market.to_bytes().to_vec(),
            },
            AccountFilter::Memcmp {
                offset: OpenOrdersAccount::OWNER_OFFSET,
                bytes: owner.to_bytes().to_vec(),
            },
        ];
        let accounts = match self
            .transport
            .get_program_accounts(&self.config.program_id, &filters, self.config.commitment)
            .await
        {
            Ok(accounts) => accounts,
            Err(e) => {
                log::warn!("Open orders lookup failed: {}", e);
                return None;
            }
        };
        if accounts.len() > 1 {
            log::debug!("{} open orders accounts found, using the first", accounts.len());
        }
        accounts
            .into_iter()
            .find_map(|(address, data)| match OpenOrdersAccount::decode(&data) {
                Ok(account) => Some((address, account)),
                Err(e) => {
                    log::warn!("Skipping open orders account {}: {}", address, e);
                    None
                }
            })
    }

    async fn subscribe(&self, address: Pubkey, callback: AccountCallback) -> DexResult<SubscriptionId> {
        let id = self
            .transport
            .subscribe_account(&address, self.config.commitment, callback)
            .await?;
        let previous = self.subscriptions.lock().insert(address, id);
        if let Some(previous) = previous {
            if let Err(e) = self.transport.unsubscribe(previous).await {
                log::warn!("Could not drop previous subscription on {}: {}", address, e);
            }
        }
        Ok(id)
    }

    /// Follow both sides of the book. The callback receives the composite view and the slot of every update.
    pub async fn subscribe_order_book<F>(
        &self,
        callback: F,
    ) -> DexResult<(SubscriptionId, SubscriptionId)>
    where
        F: Fn(OrderBook, u64) + Send + Sync + 'static,
    {
        let market = self.loaded_market()?;
        let (bids, asks) = (market.bids, market.asks);
        let callback = Arc::new(callback);
        let mut ids = [0; 2];
        for (i, (side, address)) in [(Side::Bid, bids), (Side::Ask, asks)].into_iter().enumerate() {
            let book = Arc::clone(&self.order_book);
            let callback = Arc::clone(&callback);
            ids[i] = self
                .subscribe(
                    address,
                    Box::new(move |n: AccountNotification| match book.apply(side, &n.data) {
                        Ok(view) => callback(view, n.slot),
                        Err(e) => log::warn!(
                            "Dropping undecodable {:?} update at slot {}: {}",
                            side,
                            n.slot,
                            e
                        ),
                    }),
                )
                .await?;
        }
        Ok((ids[0], ids[1]))
    }

    /// Follow the owner's open orders account, keeping the session cache current
    pub async fn subscribe_open_orders<F>(&self, callback: F) -> DexResult<SubscriptionId>
    where
        F: Fn(OpenOrdersAccount, u64) + Send + Sync + 'static,
    {
        let address = self
            .open_orders_address
            .ok_or(PreconditionError::AccountUnresolved("open orders"))?;
        let cache = Arc::clone(&self.open_orders);
        self.subscribe(
            address,
            Box::new(move |n: AccountNotification| match OpenOrdersAccount::decode(&n.data) {
                Ok(account) => {
                    *cache.write() = Some(account.clone());
                    callback(account, n.slot)
                }
                Err(e) => log::warn!("Dropping undecodable open orders update: {}", e),
            }),
        )
        .await
    }

    /// Follow the market's fills.
    ///
    /// The first notification reports the unconsumed fills, later ones only the events pushed since.
    pub async fn subscribe_trades<F>(&self, callback: F) -> DexResult<SubscriptionId>
    where
        F: Fn(Vec<Fill>, u64) + Send + Sync + 'static,
    {
        let address = self.loaded_market()?.event_queue;
        let scale = self.scale;
        let last_seq_num: Mutex<Option<u32>> = Mutex::new(None);
        self.subscribe(
            address,
            Box::new(move |n: AccountNotification| {
                let queue = match EventQueue::decode(&n.data) {
                    Ok(queue) => queue,
                    Err(e) => {
                        log::warn!("Dropping undecodable event queue update: {}", e);
                        return;
                    }
                };
                let events: Vec<TradeEvent> = {
                    let mut last = last_seq_num.lock();
                    let events = match *last {
                        Some(seq) => queue.events_since(seq).into_iter().map(|(_, e)| e).collect(),
                        None => queue.iter().copied().collect(),
                    };
                    *last = Some(queue.seq_num);
                    events
                };
                let fills: Vec<Fill> = events
                    .iter()
                    .filter_map(|e| e.to_fill(scale.base_decimals, scale.quote_decimals))
                    .collect();
                if !fills.is_empty() {
                    callback(fills, n.slot)
                }
            }),
        )
        .await
    }

    /// Drop the subscription on `address`. Unknown addresses are ignored.
    pub async fn unsubscribe(&self, address: &Pubkey) -> DexResult {
        let id = self.subscriptions.lock().remove(address);
        if let Some(id) = id {
            self.transport.unsubscribe(id).await?;
        }
        Ok(())
    }

    /// Drop every account subscription and every signature watch, settled or not
    pub async fn unsubscribe_all(&self) -> DexResult {
        let mut ids: Vec<SubscriptionId> =
            self.subscriptions.lock().drain().map(|(_, id)| id).collect();
        ids.extend(self.signature_watches.lock().drain(..).map(|(id, _)| id));
        for id in ids {
            self.transport.unsubscribe(id).await?;
        }
        Ok(())
    }

    /// Release the signature subscriptions of transactions that reached a terminal state.
    ///
    /// Runs before every submission. The transport must accept releasing a subscription it already ended.
    pub async fn release_settled_watches(&self) {
        let settled: Vec<SubscriptionId> = {
            let mut watches = self.signature_watches.lock();
            let (settled, pending): (Vec<_>, Vec<_>) = watches
                .drain(..)
                .partition(|(_, confirmation)| confirmation.state().is_terminal());
            *watches = pending;
            settled.into_iter().map(|(id, _)| id).collect()
        };
        for id in settled {
            if let Err(e) = self.transport.unsubscribe(id).await {
                log::warn!("Could not release signature subscription {}: {}", id, e);
            }
        }
    }

    async fn rent(&mut self) -> DexResult<RentSchedule> {
        if let Some(rent) = self.rent {
            return Ok(rent);
        }
        let rent = RentSchedule {
            token_account: self
                .transport
                .get_minimum_balance_for_rent_exemption(spl_token::state::Account::LEN)
                .await?,
            open_orders: self
                .transport
                .get_minimum_balance_for_rent_exemption(OpenOrdersAccount::LEN)
                .await?,
        };
        self.rent = Some(rent);
        Ok(rent)
    }

    fn composer(&self, rent: RentSchedule) -> DexResult<Composer<'_>> {
        let market = self.loaded_market()?;
        let owner = self.owner().ok_or(PreconditionError::NoOwner)?;
        Ok(Composer {
            program_id: self.config.program_id,
            market,
            owner,
            scale: self.scale,
            base_wallet: self.base_wallet,
            quote_wallet: self.quote_wallet,
            open_orders: self.open_orders_address,
            fee_discount: self.config.fee_discount_account,
            referrer_quote_wallet: self.config.referrer_quote_wallet,
            rent,
            wrap_margin: self.config.wrap_margin,
            size_ceiling: self.config.size_ceiling,
        })
    }

    fn record_created(&mut self, created: &CreatedAccounts) {
        if let Some(address) = created.base_wallet {
            self.base_wallet = Some(address);
        }
        if let Some(address) = created.quote_wallet {
            self.quote_wallet = Some(address);
        }
        if let Some(address) = created.open_orders {
            log::info!("Using new open orders account {}", address);
            self.open_orders_address = Some(address);
        }
    }

    /// Sign and submit one batch, then watch its signature.
    ///
    /// Transport failures while submitting end up in the returned confirmation rather than as an error.
    async fn submit(
        &mut self,
        batch: Batch,
        signer: &dyn TransactionSigner,
    ) -> DexResult<SignatureConfirmation> {
        let owner = self.owner().ok_or(PreconditionError::NoOwner)?;
        self.release_settled_watches().await;
        let (confirmation, feed) = SignatureConfirmation::submitted();
        let result = match self
            .transport
            .get_latest_blockhash(self.config.commitment)
            .await
        {
            Ok(blockhash) => {
                let transaction = batch.sign(&owner, blockhash, signer)?;
                let wire = serialize_transaction(&transaction)?;
                log::info!(
                    "Submitting transaction {:?} ({} bytes, {} instructions)",
                    transaction.signatures.first(),
                    wire.len(),
                    batch.instructions.len()
                );
                self.transport.send_transaction(wire).await
            }
            Err(e) => Err(e),
        };
        let feed = Arc::new(feed);
        if let Some(signature) = feed.on_submit_result(result) {
            self.record_created(&batch.created);
            let watcher = Arc::clone(&feed);
            match self
                .transport
                .subscribe_signature(
                    &signature,
                    self.config.commitment,
                    Box::new(move |n| {
                        watcher.on_notification(n);
                    }),
                )
                .await
            {
                Ok(id) => {
                    feed.attach_subscription(id);
                    self.signature_watches
                        .lock()
                        .push((id, confirmation.clone()));
                }
                Err(e) => log::warn!("Could not watch transaction {}: {}", signature, e),
            }
        }
        Ok(confirmation)
    }

    fn order_params(&self, order: &OrderRequest) -> Result<new_order::Params, PreconditionError> {
        if !(order.price.is_finite() && order.price > 0.0) {
            return Err(PreconditionError::InvalidOrder(format!(
                "price {} must be positive",
                order.price
            )));
        }
        if !(order.size.is_finite() && order.size > 0.0) {
            return Err(PreconditionError::InvalidOrder(format!(
                "size {} must be positive",
                order.size
            )));
        }
        Ok(new_order::Params {
            side: order.side,
            limit_price: self.scale.price_number_to_lots(order.price),
            max_base_qty: self.scale.base_size_number_to_lots(order.size),
            order_type: order.order_type,
            self_trade_behavior: self.config.self_trade_behavior,
            client_order_id: order.client_order_id,
            limit: self.config.match_limit,
        })
    }

    /// Place an order, creating the open orders account and token accounts as needed
    pub async fn place_order(&mut self, order: &OrderRequest) -> DexResult<SignatureConfirmation> {
        let signer = self.signer()?;
        self.loaded_market()?;
        let params = self.order_params(order)?;
        let rent = self.rent().await?;
        let batch = new_order::compose(&self.composer(rent)?, &params)?;
        log::info!(
            "Placing {:?} order: {} lots at {} lots",
            params.side,
            params.max_base_qty,
            params.limit_price
        );
        self.submit(batch, signer.as_ref()).await
    }

    /// Cancel one of the owner's orders by its exchange order id
    pub async fn cancel_order(&mut self, order_id: u128) -> DexResult<SignatureConfirmation> {
        let signer = self.signer()?;
        let order = self
            .open_orders
            .read()
            .as_ref()
            .and_then(|account| account.find_order(order_id).copied())
            .ok_or(PreconditionError::OrderNotFound(order_id))?;
        self.cancel(cancel_order::Target::from(&order), signer).await
    }

    /// Cancel one of the owner's orders by the id the client attached to it
    pub async fn cancel_order_by_client_id(
        &mut self,
        client_order_id: u64,
    ) -> DexResult<SignatureConfirmation> {
        let signer = self.signer()?;
        let known = self
            .open_orders
            .read()
            .as_ref()
            .map(|account| account.find_by_client_id(client_order_id).is_some())
            .unwrap_or(false);
        if !known {
            return Err(PreconditionError::ClientOrderNotFound(client_order_id).into());
        }
        self.cancel(cancel_order::Target::ClientId(client_order_id), signer)
            .await
    }

    async fn cancel(
        &mut self,
        target: cancel_order::Target,
        signer: Arc<dyn TransactionSigner>,
    ) -> DexResult<SignatureConfirmation> {
        let rent = self.rent().await?;
        let batch = cancel_order::compose(&self.composer(rent)?, &cancel_order::Params { target })?;
        log::info!("Cancelling {:?}", target);
        self.submit(batch, signer.as_ref()).await
    }

    /// Cancel every open order of the owner.
    ///
    /// Batches are submitted in order and the first rejected batch stops the sequence. The returned list holds
    /// one confirmation per submitted batch, the last one being the rejected batch if any.
    pub async fn cancel_all(&mut self) -> DexResult<Vec<SignatureConfirmation>> {
        let signer = self.signer()?;
        self.loaded_market()?;
        let orders = self
            .open_orders
            .read()
            .as_ref()
            .map(|account| account.orders.clone())
            .unwrap_or_default();
        if orders.is_empty() {
            log::info!("No open orders to cancel");
            return Ok(vec![]);
        }
        let rent = self.rent().await?;
        let batches = cancel_all::compose(&self.composer(rent)?, &cancel_all::Params { orders })?;
        let total = batches.len();
        let mut confirmations = Vec::with_capacity(total);
        for (i, batch) in batches.into_iter().enumerate() {
            let confirmation = self.submit(batch, signer.as_ref()).await?;
            let rejected = confirmation.state() == ConfirmationState::RejectedAtSimulation;
            confirmations.push(confirmation);
            if rejected {
                log::warn!(
                    "Cancel batch {}/{} rejected, skipping the remaining {}",
                    i + 1,
                    total,
                    total - i - 1
                );
                break;
            }
        }
        Ok(confirmations)
    }

    /// Move the open orders account's free balances back to the owner's wallets
    pub async fn settle_funds(&mut self) -> DexResult<SignatureConfirmation> {
        let signer = self.signer()?;
        self.loaded_market()?;
        let rent = self.rent().await?;
        let batch = settle::compose(&self.composer(rent)?)?;
        log::info!("Settling funds");
        self.submit(batch, signer.as_ref()).await
    }
}
