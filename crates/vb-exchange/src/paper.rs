//! Simulated exchange for dry runs.
//!
//! [`PaperExchange`] implements [`ExchangeGateway`] without touching a real
//! account: market orders fill immediately at the live ticker price read from
//! any [`MarketDataSource`]. Accounts are keyed by access key and created on
//! first use with the configured starting funds.

use std::sync::{Arc, Mutex};

use ahash::AHashMap;
use async_trait::async_trait;
use tracing::info;
use vb_core::config::PaperConfig;
use vb_core::error::ExchangeError;
use vb_core::trading::*;
use vb_core::{Asset, QUOTE_CURRENCY};

use crate::{ExchangeGateway, ExchangeResult, MarketDataSource};

/// Balances below this are treated as empty.
const DUST: f64 = 1e-12;

#[derive(Debug, Default)]
struct PaperAccount {
    balances: AHashMap<String, f64>,
    /// Newest last.
    orders: Vec<OrderRecord>,
}

/// In-memory exchange that fills at the current ticker.
pub struct PaperExchange {
    prices: Arc<dyn MarketDataSource>,
    starting_funds: f64,
    fee_rate: f64,
    accounts: Mutex<AHashMap<String, PaperAccount>>,
}

impl PaperExchange {
    pub fn new(prices: Arc<dyn MarketDataSource>, config: &PaperConfig) -> Self {
        info!(
            "[paper] simulated exchange — starting funds {:.0} {QUOTE_CURRENCY}, fee {}",
            config.starting_funds, config.fee_rate
        );
        Self {
            prices,
            starting_funds: config.starting_funds,
            fee_rate: config.fee_rate,
            accounts: Mutex::new(AHashMap::new()),
        }
    }

    /// Run `f` against the account for `credential`, creating it if needed.
    fn with_account<T>(&self, credential: &Credential, f: impl FnOnce(&mut PaperAccount) -> T) -> T {
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        let account = accounts
            .entry(credential.access_key.clone())
            .or_insert_with(|| {
                let mut acct = PaperAccount::default();
                acct.balances.insert(QUOTE_CURRENCY.to_string(), self.starting_funds);
                acct
            });
        f(account)
    }

    /// Credit `amount` of `currency` to an account (top-ups in tests and demos).
    pub fn deposit(&self, credential: &Credential, currency: &str, amount: f64) {
        self.with_account(credential, |acct| {
            *acct.balances.entry(currency.to_string()).or_insert(0.0) += amount;
        });
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    async fn balances(&self, credential: &Credential) -> ExchangeResult<Vec<Balance>> {
        Ok(self.with_account(credential, |acct| {
            let mut out: Vec<Balance> = acct
                .balances
                .iter()
                .filter(|(c, v)| c.as_str() == QUOTE_CURRENCY || **v > DUST)
                .map(|(c, v)| Balance {
                    currency: c.clone(),
                    balance: *v,
                    locked: 0.0,
                })
                .collect();
            out.sort_by(|a, b| a.currency.cmp(&b.currency));
            out
        }))
    }

    async fn place_order(
        &self,
        credential: &Credential,
        market: &str,
        side: Side,
        size: OrderSize,
    ) -> ExchangeResult<OrderFill> {
        let asset = Asset::from_market(market)
            .ok_or_else(|| ExchangeError::OrderRejected(format!("unknown market {market}")))?;
        // Price is fetched before taking the account lock.
        let price = self.prices.ticker_price(asset).await?;
        let fee_rate = self.fee_rate;

        let (record, locked) = self.with_account(credential, |acct| {
            let quote = acct.balances.get(QUOTE_CURRENCY).copied().unwrap_or(0.0);
            let base = acct.balances.get(asset.currency()).copied().unwrap_or(0.0);

            let (funds, volume, fee, locked) = match (side, size) {
                (Side::Bid, OrderSize::Funds(funds)) => {
                    let fee = funds * fee_rate;
                    if funds <= 0.0 || funds + fee > quote + DUST {
                        return Err(ExchangeError::OrderRejected(format!(
                            "insufficient_funds_bid: need {:.0}, have {quote:.0}",
                            funds + fee
                        )));
                    }
                    (funds, funds / price, fee, funds + fee)
                }
                (Side::Ask, OrderSize::Volume(volume)) => {
                    if volume <= 0.0 || volume > base + DUST {
                        return Err(ExchangeError::OrderRejected(format!(
                            "insufficient_funds_ask: need {volume}, have {base}"
                        )));
                    }
                    let funds = volume * price;
                    (funds, volume, funds * fee_rate, volume)
                }
                _ => {
                    return Err(ExchangeError::OrderRejected(format!(
                        "unsupported sizing {size:?} for {side}"
                    )));
                }
            };

            let quote_entry = acct.balances.entry(QUOTE_CURRENCY.to_string()).or_insert(0.0);
            match side {
                Side::Bid => *quote_entry -= funds + fee,
                Side::Ask => *quote_entry += funds - fee,
            }
            let base_entry = acct.balances.entry(asset.currency().to_string()).or_insert(0.0);
            match side {
                Side::Bid => *base_entry += volume,
                Side::Ask => *base_entry -= volume,
            }

            let record = OrderRecord {
                uuid: uuid::Uuid::new_v4().to_string(),
                market: market.to_string(),
                side,
                state: OrderState::Done,
                executed_funds: funds,
                paid_fee: fee,
                executed_volume: volume,
            };
            acct.orders.push(record.clone());
            Ok((record, locked))
        })?;

        info!(
            "[paper] {} {market} {side} at {price:.2}: volume={:.8} funds={:.0} fee={:.2}",
            credential.access_key, record.executed_volume, record.executed_funds, record.paid_fee
        );

        Ok(OrderFill {
            uuid: record.uuid,
            market: record.market,
            side,
            locked_funds: locked,
            executed_volume: record.executed_volume,
        })
    }

    async fn recent_orders(
        &self,
        credential: &Credential,
        market: &str,
        count: u32,
        states: &[OrderState],
    ) -> ExchangeResult<Vec<OrderRecord>> {
        Ok(self.with_account(credential, |acct| {
            acct.orders
                .iter()
                .rev()
                .filter(|o| o.market == market && (states.is_empty() || states.contains(&o.state)))
                .take(count as usize)
                .cloned()
                .collect()
        }))
    }
}
