use anyhow::{Result, ensure};
use async_trait::async_trait;
use shared::types::{Coin, Contract, Order, OrderId, OrderRequest, OrderState, Side};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

mod rest;

pub use rest::RestVenue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wallet {
    pub address: String,
    pub endpoint: String,
    pub credential_env: String,
}

#[derive(Debug, Error)]
pub enum VenueError {
    #[error("order {0} not found")]
    OrderNotFound(String),
}

#[async_trait]
pub trait VenueBackend: Send + Sync {
    async fn connect(&self, endpoint: &str, credential_env: &str) -> Result<Wallet>;
    async fn get_market_price(&self, wallet: &Wallet, contract: &Contract) -> Result<f64>;
    async fn get_balances(&self, wallet: &Wallet) -> Result<Vec<Coin>>;
    async fn get_orders(&self, wallet: &Wallet, contract: &Contract) -> Result<Vec<Order>>;
    /// Submits the whole batch in a single transaction; all or nothing.
    async fn submit_orders(&self, wallet: &Wallet, requests: &[OrderRequest]) -> Result<()>;
    async fn cancel_orders(
        &self,
        wallet: &Wallet,
        contract: &Contract,
        orders: &[Order],
    ) -> Result<()>;
    async fn withdraw_orders(
        &self,
        wallet: &Wallet,
        contract: &Contract,
        orders: &[Order],
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct VenueClient {
    backend: Arc<dyn VenueBackend>,
}

impl VenueClient {
    pub fn with_backend<B>(backend: B) -> Self
    where
        B: VenueBackend + 'static,
    {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn in_memory() -> (Self, Arc<InMemoryVenue>) {
        let venue = Arc::new(InMemoryVenue::new());
        let client = Self {
            backend: venue.clone(),
        };
        (client, venue)
    }

    pub async fn connect(&self, endpoint: &str, credential_env: &str) -> Result<Wallet> {
        let wallet = self.backend.connect(endpoint, credential_env).await?;
        info!(address = %wallet.address, endpoint = %wallet.endpoint, "wallet connected");
        Ok(wallet)
    }

    /// Produces a replacement wallet for the same credential. Never
    /// mutates the old value; the caller swaps it in.
    pub async fn reconnect(&self, wallet: &Wallet) -> Result<Wallet> {
        self.connect(&wallet.endpoint, &wallet.credential_env).await
    }

    pub async fn get_market_price(&self, wallet: &Wallet, contract: &Contract) -> Result<f64> {
        self.backend.get_market_price(wallet, contract).await
    }

    pub async fn get_balances(&self, wallet: &Wallet) -> Result<Vec<Coin>> {
        self.backend.get_balances(wallet).await
    }

    pub async fn get_orders(&self, wallet: &Wallet, contract: &Contract) -> Result<Vec<Order>> {
        self.backend.get_orders(wallet, contract).await
    }

    pub async fn submit_orders(&self, wallet: &Wallet, requests: &[OrderRequest]) -> Result<()> {
        self.backend.submit_orders(wallet, requests).await
    }

    pub async fn cancel_orders(
        &self,
        wallet: &Wallet,
        contract: &Contract,
        orders: &[Order],
    ) -> Result<()> {
        self.backend.cancel_orders(wallet, contract, orders).await
    }

    pub async fn withdraw_orders(
        &self,
        wallet: &Wallet,
        contract: &Contract,
        orders: &[Order],
    ) -> Result<()> {
        self.backend.withdraw_orders(wallet, contract, orders).await
    }
}

impl std::fmt::Debug for VenueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueClient").finish()
    }
}

/// Scriptable backend: tests drive prices, balances and fills through
/// the setters and inspect every write the engine performs.
pub struct InMemoryVenue {
    inner: Inner,
}

#[derive(Default)]
struct Inner {
    prices: Mutex<HashMap<String, f64>>,
    balances: Mutex<HashMap<String, Vec<Coin>>>,
    orders: Mutex<HashMap<String, Vec<Order>>>,
    submitted_batches: Mutex<Vec<Vec<OrderRequest>>>,
    cancelled_ids: Mutex<Vec<OrderId>>,
    withdrawn_ids: Mutex<Vec<OrderId>>,
    write_calls: std::sync::atomic::AtomicU64,
    id_counter: std::sync::atomic::AtomicU64,
}

impl InMemoryVenue {
    pub fn new() -> Self {
        Self {
            inner: Inner::default(),
        }
    }

    pub async fn set_market_price(&self, contract: &str, price: f64) {
        let mut prices = self.inner.prices.lock().await;
        prices.insert(contract.to_string(), price);
    }

    pub async fn set_balances(&self, wallet: &str, coins: Vec<Coin>) {
        let mut balances = self.inner.balances.lock().await;
        balances.insert(wallet.to_string(), coins);
    }

    /// Marks `base_amount` of the order as traded.
    pub async fn fill_order(&self, contract: &str, order_id: &str, base_amount: f64) -> Result<()> {
        let mut orders = self.inner.orders.lock().await;
        let book = orders
            .get_mut(contract)
            .ok_or_else(|| VenueError::OrderNotFound(order_id.to_string()))?;
        let order = book
            .iter_mut()
            .find(|order| order.id == order_id)
            .ok_or_else(|| VenueError::OrderNotFound(order_id.to_string()))?;
        let amount = base_amount.min(order.remaining_amount);
        order.filled_amount += amount;
        order.remaining_amount -= amount;
        Ok(())
    }

    pub async fn open_orders(&self, contract: &str) -> Vec<Order> {
        let orders = self.inner.orders.lock().await;
        orders.get(contract).cloned().unwrap_or_default()
    }

    pub async fn submitted_batches(&self) -> Vec<Vec<OrderRequest>> {
        self.inner.submitted_batches.lock().await.clone()
    }

    pub async fn cancelled_ids(&self) -> Vec<OrderId> {
        self.inner.cancelled_ids.lock().await.clone()
    }

    pub async fn withdrawn_ids(&self) -> Vec<OrderId> {
        self.inner.withdrawn_ids.lock().await.clone()
    }

    pub fn write_calls(&self) -> u64 {
        self.inner
            .write_calls
            .load(std::sync::atomic::Ordering::Relaxed)
    }

    fn note_write(&self) {
        self.inner
            .write_calls
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn next_order_id(&self) -> OrderId {
        let id = self
            .inner
            .id_counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;
        id.to_string()
    }
}

impl Default for InMemoryVenue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueBackend for InMemoryVenue {
    async fn connect(&self, endpoint: &str, credential_env: &str) -> Result<Wallet> {
        Ok(Wallet {
            address: format!("mem-{credential_env}"),
            endpoint: endpoint.to_string(),
            credential_env: credential_env.to_string(),
        })
    }

    async fn get_market_price(&self, _wallet: &Wallet, contract: &Contract) -> Result<f64> {
        let prices = self.inner.prices.lock().await;
        prices
            .get(&contract.address)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no market price for {}", contract.address))
    }

    async fn get_balances(&self, wallet: &Wallet) -> Result<Vec<Coin>> {
        let balances = self.inner.balances.lock().await;
        Ok(balances.get(&wallet.address).cloned().unwrap_or_default())
    }

    async fn get_orders(&self, _wallet: &Wallet, contract: &Contract) -> Result<Vec<Order>> {
        let orders = self.inner.orders.lock().await;
        Ok(orders.get(&contract.address).cloned().unwrap_or_default())
    }

    async fn submit_orders(&self, _wallet: &Wallet, requests: &[OrderRequest]) -> Result<()> {
        for request in requests {
            ensure!(request.price > 0.0, "order price must be positive");
            ensure!(request.amount > 0.0, "order amount must be positive");
        }
        self.note_write();
        let mut orders = self.inner.orders.lock().await;
        for request in requests {
            // Buy amounts arrive in quote units; the book tracks base.
            let base_amount = match request.side {
                Side::Buy => request.amount / request.price,
                Side::Sell => request.amount,
            };
            let book = orders.entry(request.contract.clone()).or_default();
            book.push(Order {
                id: self.next_order_id(),
                side: request.side,
                price: request.price,
                original_amount: base_amount,
                filled_amount: 0.0,
                remaining_amount: base_amount,
            });
        }
        let mut batches = self.inner.submitted_batches.lock().await;
        batches.push(requests.to_vec());
        Ok(())
    }

    async fn cancel_orders(
        &self,
        _wallet: &Wallet,
        contract: &Contract,
        orders: &[Order],
    ) -> Result<()> {
        self.note_write();
        let ids: Vec<OrderId> = orders.iter().map(|order| order.id.clone()).collect();
        {
            let mut book = self.inner.orders.lock().await;
            if let Some(entries) = book.get_mut(&contract.address) {
                entries.retain(|order| !ids.contains(&order.id));
            }
        }
        let mut cancelled = self.inner.cancelled_ids.lock().await;
        cancelled.extend(ids);
        Ok(())
    }

    async fn withdraw_orders(
        &self,
        _wallet: &Wallet,
        contract: &Contract,
        orders: &[Order],
    ) -> Result<()> {
        self.note_write();
        let ids: Vec<OrderId> = orders.iter().map(|order| order.id.clone()).collect();
        {
            let mut book = self.inner.orders.lock().await;
            if let Some(entries) = book.get_mut(&contract.address) {
                entries.retain(|order| {
                    !(ids.contains(&order.id) && order.state() == OrderState::Closed)
                });
            }
        }
        let mut withdrawn = self.inner.withdrawn_ids.lock().await;
        withdrawn.extend(ids);
        Ok(())
    }
}
