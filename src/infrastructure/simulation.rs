//! Deterministic synthetic market collaborators for the simulated
//! modes and the test suite. Prices random-walk around a base level;
//! the same seed reproduces the same tape.

use crate::application::clock::SharedClock;
use crate::domain::ports::{
    ExecutionReceipt, MarketDataSource, NewsFeed, NewsItem, OhlcBar, OptionQuote, OptionsChain,
    OrderExecutor, ReceiptStatus, SentimentSummary, TechnicalIndicators, Tick,
};
use crate::domain::signal::TradeSignal;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::mpsc::Receiver;

fn decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default().round_dp(2)
}

pub struct SimulatedMarket {
    clock: Arc<SharedClock>,
    base_price: f64,
    rng: Mutex<StdRng>,
}

impl SimulatedMarket {
    pub fn new(clock: Arc<SharedClock>, base_price: Decimal, seed: u64) -> Self {
        Self {
            clock,
            base_price: base_price.to_f64().unwrap_or(48_500.0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

#[async_trait]
impl MarketDataSource for SimulatedMarket {
    async fn latest_tick(&self, instrument: &str) -> Result<Option<Tick>> {
        let noise = self.rng.lock().await.random_range(-150.0..150.0);
        Ok(Some(Tick {
            instrument: instrument.to_string(),
            price: decimal(self.base_price + noise),
            timestamp: self.clock.now().await,
        }))
    }

    async fn ohlc(&self, _instrument: &str, timeframe: &str, limit: usize) -> Result<Vec<OhlcBar>> {
        let step = match timeframe {
            "1m" => Duration::minutes(1),
            "5m" => Duration::minutes(5),
            "1h" => Duration::hours(1),
            _ => Duration::minutes(15),
        };
        let now = self.clock.now().await;
        let mut rng = self.rng.lock().await;
        let mut bars = Vec::with_capacity(limit);
        let mut timestamp = now - step * limit as i32;
        let mut level = self.base_price;
        for _ in 0..limit {
            let drift: f64 = rng.random_range(-30.0..30.0);
            let open = level + drift;
            let close = open + rng.random_range(-40.0..40.0);
            let high = open.max(close) + rng.random_range(5.0..25.0);
            let low = open.min(close) - rng.random_range(5.0..25.0);
            bars.push(OhlcBar {
                timestamp,
                open: decimal(open),
                high: decimal(high),
                low: decimal(low),
                close: decimal(close),
                volume: 18_000_000 + rng.random_range(0..4_000_000),
            });
            level = close;
            timestamp += step;
        }
        Ok(bars)
    }

    async fn options_chain(
        &self,
        instrument: &str,
        strikes: Option<u32>,
    ) -> Result<Option<OptionsChain>> {
        let now = self.clock.now().await;
        let count = strikes.unwrap_or(7) as i64;
        let atm = (self.base_price / 100.0).round() * 100.0;
        let strike_list: Vec<f64> = (-(count / 2)..=count / 2)
            .map(|i| atm + (i * 100) as f64)
            .collect();

        let calls: Vec<OptionQuote> = strike_list
            .iter()
            .enumerate()
            .map(|(i, strike)| OptionQuote {
                strike: decimal(*strike),
                price: decimal((150.0 - (atm - strike).abs() * 0.5).max(10.0)),
                open_interest: 100_000 + i as u64 * 5_000,
            })
            .collect();
        let puts: Vec<OptionQuote> = strike_list
            .iter()
            .enumerate()
            .map(|(i, strike)| OptionQuote {
                strike: decimal(*strike),
                price: decimal((140.0 - (atm - strike).abs() * 0.45).max(10.0)),
                open_interest: 90_000 + i as u64 * 4_000,
            })
            .collect();

        let call_oi: u64 = calls.iter().map(|q| q.open_interest).sum();
        let put_oi: u64 = puts.iter().map(|q| q.open_interest).sum();

        Ok(Some(OptionsChain {
            instrument: instrument.to_string(),
            underlying_price: decimal(self.base_price),
            expiries: vec![
                now.date_naive() + Duration::days(7),
                now.date_naive() + Duration::days(14),
            ],
            calls,
            puts,
            put_call_ratio: put_oi as f64 / call_oi.max(1) as f64,
            max_pain: decimal(atm),
        }))
    }

    async fn subscribe(&self, instrument: &str) -> Result<Receiver<Tick>> {
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let clock = self.clock.clone();
        let base = self.base_price;
        let instrument = instrument.to_string();
        let seed = self.rng.lock().await.random_range(0..u64::MAX);
        tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(seed);
            loop {
                let tick = Tick {
                    instrument: instrument.clone(),
                    price: decimal(base + rng.random_range(-150.0..150.0)),
                    timestamp: clock.now().await,
                };
                if tx.send(tick).await.is_err() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        });
        Ok(rx)
    }
}

/// Paper executor: fills at the requested entry, idempotent in the
/// client order id.
#[derive(Default)]
pub struct SimulatedExecutor {
    receipts: Mutex<HashMap<String, ExecutionReceipt>>,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderExecutor for SimulatedExecutor {
    async fn place_order(
        &self,
        signal: &TradeSignal,
        _quantity: u32,
        client_order_id: &str,
    ) -> Result<ExecutionReceipt> {
        let mut receipts = self.receipts.lock().await;
        if let Some(existing) = receipts.get(client_order_id) {
            return Ok(existing.clone());
        }
        let receipt = ExecutionReceipt {
            client_order_id: client_order_id.to_string(),
            venue_order_id: format!("SIM-{}", receipts.len() + 1),
            status: ReceiptStatus::Filled,
            filled_price: Some(signal.entry_price),
        };
        receipts.insert(client_order_id.to_string(), receipt.clone());
        Ok(receipt)
    }
}

pub struct SimulatedIndicators {
    rng: Mutex<StdRng>,
    base_price: f64,
}

impl SimulatedIndicators {
    pub fn new(base_price: Decimal, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            base_price: base_price.to_f64().unwrap_or(48_500.0),
        }
    }
}

#[async_trait]
impl TechnicalIndicators for SimulatedIndicators {
    async fn compute(&self, _instrument: &str, _timeframe: &str) -> Result<HashMap<String, f64>> {
        let mut rng = self.rng.lock().await;
        let mut map = HashMap::new();
        map.insert("rsi".to_string(), rng.random_range(25.0..75.0));
        map.insert(
            "sma_fast".to_string(),
            self.base_price + rng.random_range(-80.0..80.0),
        );
        map.insert(
            "sma_slow".to_string(),
            self.base_price + rng.random_range(-80.0..80.0),
        );
        map.insert("atr".to_string(), rng.random_range(40.0..120.0));
        map.insert("macd".to_string(), rng.random_range(-25.0..25.0));
        Ok(map)
    }
}

pub struct SimulatedNewsFeed {
    clock: Arc<SharedClock>,
    rng: Mutex<StdRng>,
}

impl SimulatedNewsFeed {
    pub fn new(clock: Arc<SharedClock>, seed: u64) -> Self {
        Self {
            clock,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

const HEADLINES: [&str; 5] = [
    "Index futures steady ahead of expiry",
    "Banking heavyweights lead early gains",
    "Volatility gauge cools from weekly high",
    "FII flows turn positive for the third session",
    "Rate decision looms over rate-sensitive sectors",
];

#[async_trait]
impl NewsFeed for SimulatedNewsFeed {
    async fn latest_news(&self, _instrument: &str, limit: usize) -> Result<Vec<NewsItem>> {
        let now = self.clock.now().await;
        Ok(HEADLINES
            .iter()
            .take(limit)
            .enumerate()
            .map(|(i, headline)| NewsItem {
                headline: headline.to_string(),
                source: "sim-wire".to_string(),
                published_at: now - Duration::minutes(i as i64 * 17),
                url: None,
            })
            .collect())
    }

    async fn sentiment_summary(&self, instrument: &str, hours: u32) -> Result<SentimentSummary> {
        let mut rng = self.rng.lock().await;
        let positive = rng.random_range(2..8);
        let negative = rng.random_range(1..6);
        let neutral = rng.random_range(3..9);
        let score =
            (positive as f64 - negative as f64) / (positive + negative + neutral).max(1) as f64;
        Ok(SentimentSummary {
            instrument: instrument.to_string(),
            score,
            positive,
            negative,
            neutral,
            window_hours: hours,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn executor_is_idempotent_in_client_order_id() {
        let executor = SimulatedExecutor::new();
        let signal = TradeSignal {
            instrument: "NIFTY".into(),
            side: crate::domain::signal::Side::Buy,
            entry_price: dec!(100),
            stop_loss: dec!(98),
            take_profit: dec!(104),
            confidence: 0.8,
        };
        let first = executor.place_order(&signal, 10, "ORD-1").await.unwrap();
        let second = executor.place_order(&signal, 10, "ORD-1").await.unwrap();
        assert_eq!(first.venue_order_id, second.venue_order_id);
        assert_eq!(first.status, ReceiptStatus::Filled);
        assert_eq!(first.filled_price, Some(dec!(100)));
    }

    #[tokio::test]
    async fn market_tape_is_reproducible_per_seed() {
        let clock = Arc::new(SharedClock::new());
        let first = SimulatedMarket::new(clock.clone(), dec!(48500), 7);
        let second = SimulatedMarket::new(clock, dec!(48500), 7);
        let bars_a = first.ohlc("NIFTY", "15m", 8).await.unwrap();
        let bars_b = second.ohlc("NIFTY", "15m", 8).await.unwrap();
        let closes_a: Vec<_> = bars_a.iter().map(|b| b.close).collect();
        let closes_b: Vec<_> = bars_b.iter().map(|b| b.close).collect();
        assert_eq!(closes_a, closes_b);
    }
}
