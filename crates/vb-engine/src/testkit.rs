//! Test doubles shared by the engine's unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone};
use vb_core::error::ExchangeError;
use vb_core::time_util::offset_from_hours;
use vb_core::trading::*;
use vb_core::{Asset, DailyCandle, QUOTE_CURRENCY};
use vb_exchange::{ExchangeGateway, ExchangeResult, MarketDataSource};

/// 2025-03-04 at the given exchange-local (UTC+9) time.
pub(crate) fn kst(h: u32, m: u32, s: u32) -> DateTime<FixedOffset> {
    offset_from_hours(9)
        .with_ymd_and_hms(2025, 3, 4, h, m, s)
        .single()
        .expect("valid test time")
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Market data whose answers the test sets directly.
#[derive(Default)]
pub(crate) struct ScriptedMarket {
    prices: Mutex<AHashMap<Asset, f64>>,
    candles: Mutex<AHashMap<Asset, DailyCandle>>,
    candle_failures: Mutex<AHashMap<Asset, (u32, ExchangeError)>>,
    candle_calls: AtomicU64,
}

impl ScriptedMarket {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_price(&self, asset: Asset, price: f64) {
        lock(&self.prices).insert(asset, price);
    }

    pub(crate) fn set_candle(&self, asset: Asset, high: f64, low: f64, close: f64) {
        lock(&self.candles).insert(asset, DailyCandle::new(high, low, close));
    }

    /// Fail the next `n` candle fetches for `asset` with a network error.
    pub(crate) fn fail_candles(&self, asset: Asset, n: u32) {
        self.fail_candles_with(asset, n, ExchangeError::Network("scripted failure".into()));
    }

    pub(crate) fn fail_candles_with(&self, asset: Asset, n: u32, err: ExchangeError) {
        lock(&self.candle_failures).insert(asset, (n, err));
    }

    pub(crate) fn candle_calls(&self) -> u64 {
        self.candle_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MarketDataSource for ScriptedMarket {
    async fn daily_candle(&self, asset: Asset) -> ExchangeResult<DailyCandle> {
        self.candle_calls.fetch_add(1, Ordering::Relaxed);
        {
            let mut failures = lock(&self.candle_failures);
            if let Some((n, err)) = failures.get_mut(&asset).filter(|(n, _)| *n > 0) {
                *n -= 1;
                return Err(err.clone());
            }
        }
        lock(&self.candles)
            .get(&asset)
            .copied()
            .ok_or_else(|| ExchangeError::MarketDataUnavailable(format!("no candle for {asset}")))
    }

    async fn ticker_price(&self, asset: Asset) -> ExchangeResult<f64> {
        lock(&self.prices)
            .get(&asset)
            .copied()
            .ok_or_else(|| ExchangeError::MarketDataUnavailable(format!("no price for {asset}")))
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// One `place_order` call as seen by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PlacedCall {
    pub access_key: String,
    pub market: String,
    pub side: Side,
    pub size: OrderSize,
}

/// Gateway that records orders and answers from configured balances.
pub(crate) struct RecordingGateway {
    balances: Mutex<Vec<Balance>>,
    calls: Mutex<Vec<PlacedCall>>,
    closed: Mutex<Vec<OrderRecord>>,
    place_error: Mutex<Option<ExchangeError>>,
    key_errors: Mutex<AHashMap<String, ExchangeError>>,
    panic_keys: Mutex<Vec<String>>,
    sell_proceeds: Mutex<f64>,
    next_id: AtomicU64,
}

impl RecordingGateway {
    /// Every account holds `krw` of quote currency and `base` of each asset.
    pub(crate) fn new(krw: f64, base: f64) -> Self {
        let mut balances = vec![Balance {
            currency: QUOTE_CURRENCY.into(),
            balance: krw,
            locked: 0.0,
        }];
        for asset in Asset::ALL {
            balances.push(Balance {
                currency: asset.currency().into(),
                balance: base,
                locked: 0.0,
            });
        }
        Self {
            balances: Mutex::new(balances),
            calls: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            place_error: Mutex::new(None),
            key_errors: Mutex::new(AHashMap::new()),
            panic_keys: Mutex::new(Vec::new()),
            sell_proceeds: Mutex::new(0.0),
            next_id: AtomicU64::new(1),
        }
    }

    /// Make every following `place_order` fail with `err`.
    pub(crate) fn fail_orders(&self, err: ExchangeError) {
        *lock(&self.place_error) = Some(err);
    }

    /// Fail `place_order` for one account only.
    pub(crate) fn fail_orders_for(&self, access_key: &str, err: ExchangeError) {
        lock(&self.key_errors).insert(access_key.to_string(), err);
    }

    /// Panic inside `place_order` for one account.
    pub(crate) fn panic_orders_for(&self, access_key: &str) {
        lock(&self.panic_keys).push(access_key.to_string());
    }

    /// Gross funds reported for completed sells.
    pub(crate) fn set_sell_proceeds(&self, funds: f64) {
        *lock(&self.sell_proceeds) = funds;
    }

    pub(crate) fn calls(&self) -> Vec<PlacedCall> {
        lock(&self.calls).clone()
    }

    pub(crate) fn calls_by_side(&self, side: Side) -> usize {
        lock(&self.calls).iter().filter(|c| c.side == side).count()
    }
}

#[async_trait]
impl ExchangeGateway for RecordingGateway {
    async fn balances(&self, _credential: &Credential) -> ExchangeResult<Vec<Balance>> {
        Ok(lock(&self.balances).clone())
    }

    async fn place_order(
        &self,
        credential: &Credential,
        market: &str,
        side: Side,
        size: OrderSize,
    ) -> ExchangeResult<OrderFill> {
        lock(&self.calls).push(PlacedCall {
            access_key: credential.access_key.clone(),
            market: market.to_string(),
            side,
            size,
        });
        if lock(&self.panic_keys).iter().any(|k| *k == credential.access_key) {
            panic!("scripted panic for {}", credential.access_key);
        }
        if let Some(err) = lock(&self.place_error).clone() {
            return Err(err);
        }
        if let Some(err) = lock(&self.key_errors).get(&credential.access_key).cloned() {
            return Err(err);
        }

        let uuid = format!("order-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let (locked_funds, executed_volume) = match size {
            OrderSize::Funds(funds) => (funds * 1.0005, 0.0),
            OrderSize::Volume(volume) => (volume, volume),
        };
        if side == Side::Ask {
            let funds = *lock(&self.sell_proceeds);
            lock(&self.closed).push(OrderRecord {
                uuid: uuid.clone(),
                market: market.to_string(),
                side,
                state: OrderState::Done,
                executed_funds: funds,
                paid_fee: funds * 0.0005,
                executed_volume,
            });
        }
        Ok(OrderFill {
            uuid,
            market: market.to_string(),
            side,
            locked_funds,
            executed_volume,
        })
    }

    async fn recent_orders(
        &self,
        _credential: &Credential,
        market: &str,
        count: u32,
        states: &[OrderState],
    ) -> ExchangeResult<Vec<OrderRecord>> {
        Ok(lock(&self.closed)
            .iter()
            .rev()
            .filter(|o| o.market == market && states.contains(&o.state))
            .take(count as usize)
            .cloned()
            .collect())
    }
}
