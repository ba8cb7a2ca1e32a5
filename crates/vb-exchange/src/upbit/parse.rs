//! JSON → typed helpers for Upbit responses.
//!
//! Upbit encodes most numbers as strings (`"balance": "12345.6"`) but candle
//! and ticker prices as JSON numbers, so [`num`] accepts both.

use chrono::NaiveDate;
use serde_json::Value;
use vb_core::DailyCandle;
use vb_core::error::ExchangeError;
use vb_core::trading::*;

/// Read a numeric field encoded either as a number or a numeric string.
pub fn num(v: &Value, key: &str) -> Option<f64> {
    match v.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(|s| s.as_str())
}

fn parse_side(s: &str) -> Option<Side> {
    match s {
        "bid" => Some(Side::Bid),
        "ask" => Some(Side::Ask),
        _ => None,
    }
}

fn parse_state(s: &str) -> Option<OrderState> {
    match s {
        "wait" => Some(OrderState::Wait),
        "watch" => Some(OrderState::Watch),
        "done" => Some(OrderState::Done),
        "cancel" => Some(OrderState::Cancel),
        _ => None,
    }
}

/// Pick the completed day out of `/v1/candles/days?count=2`.
///
/// The response is newest first; index 0 is today's forming candle.
pub fn previous_day_candle(body: &Value) -> Result<DailyCandle, ExchangeError> {
    let arr = body
        .as_array()
        .ok_or_else(|| ExchangeError::Parse("candles: expected array".into()))?;
    let yesterday = arr
        .get(1)
        .ok_or_else(|| ExchangeError::MarketDataUnavailable("candles: previous day missing".into()))?;

    let candle = DailyCandle {
        date: str_field(yesterday, "candle_date_time_kst")
            .and_then(|s| s.get(..10))
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()),
        high: num(yesterday, "high_price").ok_or_else(|| ExchangeError::Parse("candle: high_price".into()))?,
        low: num(yesterday, "low_price").ok_or_else(|| ExchangeError::Parse("candle: low_price".into()))?,
        close: num(yesterday, "trade_price").ok_or_else(|| ExchangeError::Parse("candle: trade_price".into()))?,
    };

    if !candle.is_valid() {
        return Err(ExchangeError::MarketDataUnavailable(format!("candle out of range: {candle:?}")));
    }
    Ok(candle)
}

/// Extract `trade_price` from `/v1/ticker`.
pub fn ticker_price(body: &Value) -> Result<f64, ExchangeError> {
    let first = body
        .as_array()
        .and_then(|a| a.first())
        .ok_or_else(|| ExchangeError::MarketDataUnavailable("ticker: empty response".into()))?;
    let price = num(first, "trade_price").ok_or_else(|| ExchangeError::Parse("ticker: trade_price".into()))?;
    if price > 0.0 && price.is_finite() {
        Ok(price)
    } else {
        Err(ExchangeError::MarketDataUnavailable(format!("ticker: non-positive price {price}")))
    }
}

/// Parse `/v1/accounts`.
pub fn balances(body: &Value) -> Result<Vec<Balance>, ExchangeError> {
    let arr = body
        .as_array()
        .ok_or_else(|| ExchangeError::Parse("accounts: expected array".into()))?;
    Ok(arr
        .iter()
        .filter_map(|b| {
            Some(Balance {
                currency: str_field(b, "currency")?.to_string(),
                balance: num(b, "balance").unwrap_or(0.0),
                locked: num(b, "locked").unwrap_or(0.0),
            })
        })
        .collect())
}

/// Parse the `POST /v1/orders` response.
pub fn order_fill(body: &Value) -> Result<OrderFill, ExchangeError> {
    let side = str_field(body, "side")
        .and_then(parse_side)
        .ok_or_else(|| ExchangeError::Parse("order: side".into()))?;
    Ok(OrderFill {
        uuid: str_field(body, "uuid").unwrap_or_default().to_string(),
        market: str_field(body, "market").unwrap_or_default().to_string(),
        side,
        locked_funds: num(body, "locked").unwrap_or(0.0),
        executed_volume: num(body, "executed_volume").unwrap_or(0.0),
    })
}

/// Parse `/v1/orders/closed`, skipping entries that lack a side or state.
pub fn order_records(body: &Value) -> Result<Vec<OrderRecord>, ExchangeError> {
    let arr = body
        .as_array()
        .ok_or_else(|| ExchangeError::Parse("orders: expected array".into()))?;
    Ok(arr
        .iter()
        .filter_map(|o| {
            Some(OrderRecord {
                uuid: str_field(o, "uuid")?.to_string(),
                market: str_field(o, "market").unwrap_or_default().to_string(),
                side: parse_side(str_field(o, "side")?)?,
                state: parse_state(str_field(o, "state")?)?,
                executed_funds: num(o, "executed_funds").unwrap_or(0.0),
                paid_fee: num(o, "paid_fee").unwrap_or(0.0),
                executed_volume: num(o, "executed_volume").unwrap_or(0.0),
            })
        })
        .collect())
}

/// Upbit error body: `{"error": {"name": "...", "message": "..."}}`.
pub fn error_name(body: &str) -> Option<(String, String)> {
    let v: Value = serde_json::from_str(body).ok()?;
    let err = v.get("error")?;
    Some((
        str_field(err, "name").unwrap_or_default().to_string(),
        str_field(err, "message").unwrap_or_default().to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn candle_uses_second_entry() {
        let body = json!([
            {"candle_date_time_kst": "2025-02-17T09:00:00", "high_price": 1.0, "low_price": 1.0, "trade_price": 1.0},
            {"candle_date_time_kst": "2025-02-16T09:00:00", "high_price": 110000.0, "low_price": 90000.0, "trade_price": 95000.0}
        ]);
        let c = previous_day_candle(&body).unwrap();
        assert_eq!(c.high, 110_000.0);
        assert_eq!(c.close, 95_000.0);
        assert_eq!(c.date, NaiveDate::from_ymd_opt(2025, 2, 16));
        assert_eq!(c.breakout_target(0.5), 105_000.0);
    }

    #[test]
    fn candle_missing_previous_day() {
        let body = json!([{"high_price": 1.0, "low_price": 1.0, "trade_price": 1.0}]);
        assert!(matches!(previous_day_candle(&body), Err(ExchangeError::MarketDataUnavailable(_))));
    }

    #[test]
    fn ticker_rejects_empty_and_zero() {
        assert_eq!(ticker_price(&json!([{"trade_price": 123.5}])).unwrap(), 123.5);
        assert!(ticker_price(&json!([])).is_err());
        assert!(ticker_price(&json!([{"trade_price": 0}])).is_err());
    }

    #[test]
    fn accounts_with_string_numbers() {
        let body = json!([
            {"currency": "KRW", "balance": "150000.5", "locked": "0"},
            {"currency": "BTC", "balance": "0.01", "locked": "0.002"}
        ]);
        let b = balances(&body).unwrap();
        assert_eq!(b.len(), 2);
        assert_eq!(b[0].balance, 150_000.5);
        assert_eq!(b[1].locked, 0.002);
    }

    #[test]
    fn order_fill_and_records() {
        let fill = order_fill(&json!({
            "uuid": "abc", "market": "KRW-BTC", "side": "bid",
            "locked": "100050.0", "executed_volume": "0"
        }))
        .unwrap();
        assert_eq!(fill.side, Side::Bid);
        assert_eq!(fill.locked_funds, 100_050.0);

        let recs = order_records(&json!([
            {"uuid": "s1", "market": "KRW-BTC", "side": "ask", "state": "done",
             "executed_funds": "101000", "paid_fee": "50.5", "executed_volume": "0.001"},
            {"uuid": "bad", "side": "ask", "state": "unknown"}
        ]))
        .unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].net_funds(), 100_949.5);
    }

    #[test]
    fn error_body() {
        let (name, msg) = error_name(r#"{"error":{"name":"invalid_access_key","message":"bad key"}}"#).unwrap();
        assert_eq!(name, "invalid_access_key");
        assert_eq!(msg, "bad key");
        assert!(error_name("not json").is_none());
    }
}
