use crate::{VenueBackend, Wallet};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use shared::types::{Coin, Contract, Order, OrderRequest, Side};
use std::time::Duration;
use tracing::debug;

/// Talks to the venue gateway, a REST service that signs and broadcasts
/// chain transactions on behalf of a connected wallet.
#[derive(Clone)]
pub struct RestVenue {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ConnectResponse {
    address: String,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: f64,
}

/// Order row as the gateway reports it: amounts are raw chain integers
/// rendered as strings, carrying `6 + decimal_delta` decimals.
#[derive(Debug, Deserialize)]
struct RawOrder {
    idx: String,
    side: String,
    quote_price: String,
    original_offer_amount: String,
    filled_amount: String,
    offer_amount: String,
}

impl RestVenue {
    pub fn new(base_url: String, token: String, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build venue http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        debug!(url = %url, "venue gateway request");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("venue gateway request failed: {url}"))?
            .error_for_status()
            .with_context(|| format!("venue gateway rejected request: {url}"))?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("venue gateway returned malformed body: {url}"))
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let url = self.url(path);
        debug!(url = %url, "venue gateway request");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("venue gateway request failed: {url}"))?
            .error_for_status()
            .with_context(|| format!("venue gateway rejected request: {url}"))?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("venue gateway returned malformed body: {url}"))
    }

    fn parse_order(raw: &RawOrder, contract: &Contract) -> Result<Order> {
        let scale = contract.amount_scale();
        let parse = |field: &str, value: &str| -> Result<f64> {
            value
                .parse::<f64>()
                .with_context(|| format!("malformed order {field}: {value}"))
        };
        let side = match raw.side.as_str() {
            "buy" => Side::Buy,
            "sell" => Side::Sell,
            other => anyhow::bail!("unknown order side: {other}"),
        };
        Ok(Order {
            id: raw.idx.clone(),
            side,
            price: parse("quote_price", &raw.quote_price)?,
            original_amount: parse("original_offer_amount", &raw.original_offer_amount)? / scale,
            filled_amount: parse("filled_amount", &raw.filled_amount)? / scale,
            remaining_amount: parse("offer_amount", &raw.offer_amount)? / scale,
        })
    }

    fn order_ids(orders: &[Order]) -> Vec<String> {
        orders.iter().map(|order| order.id.clone()).collect()
    }
}

#[async_trait]
impl VenueBackend for RestVenue {
    async fn connect(&self, endpoint: &str, credential_env: &str) -> Result<Wallet> {
        let credential = std::env::var(credential_env)
            .with_context(|| format!("wallet credential {credential_env} is not set"))?;
        let body = serde_json::json!({ "credential": credential });
        let response: ConnectResponse = self.post_json("/wallets", &body).await?;
        Ok(Wallet {
            address: response.address,
            endpoint: endpoint.to_string(),
            credential_env: credential_env.to_string(),
        })
    }

    async fn get_market_price(&self, _wallet: &Wallet, contract: &Contract) -> Result<f64> {
        let response: PriceResponse = self
            .get_json(&format!("/contracts/{}/price", contract.address))
            .await?;
        Ok(response.price)
    }

    async fn get_balances(&self, wallet: &Wallet) -> Result<Vec<Coin>> {
        self.get_json(&format!("/wallets/{}/balances", wallet.address))
            .await
    }

    async fn get_orders(&self, wallet: &Wallet, contract: &Contract) -> Result<Vec<Order>> {
        let raw: Vec<RawOrder> = self
            .get_json(&format!(
                "/wallets/{}/contracts/{}/orders",
                wallet.address, contract.address
            ))
            .await?;
        raw.iter()
            .map(|order| Self::parse_order(order, contract))
            .collect()
    }

    async fn submit_orders(&self, wallet: &Wallet, requests: &[OrderRequest]) -> Result<()> {
        let body = serde_json::json!({
            "wallet": wallet.address,
            "orders": requests,
        });
        let _: serde_json::Value = self.post_json("/orders", &body).await?;
        Ok(())
    }

    async fn cancel_orders(
        &self,
        wallet: &Wallet,
        contract: &Contract,
        orders: &[Order],
    ) -> Result<()> {
        let body = serde_json::json!({
            "wallet": wallet.address,
            "contract": contract.address,
            "idxs": Self::order_ids(orders),
        });
        let _: serde_json::Value = self.post_json("/orders/cancel", &body).await?;
        Ok(())
    }

    async fn withdraw_orders(
        &self,
        wallet: &Wallet,
        contract: &Contract,
        orders: &[Order],
    ) -> Result<()> {
        let body = serde_json::json!({
            "wallet": wallet.address,
            "contract": contract.address,
            "idxs": Self::order_ids(orders),
        });
        let _: serde_json::Value = self.post_json("/orders/withdraw", &body).await?;
        Ok(())
    }
}
