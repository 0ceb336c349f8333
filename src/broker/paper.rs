use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::{Broker, Order, OrderRequest, OrderResult, OrderSide, OrderStatus, OrderType};
use crate::error::EngineError;
use crate::Result;

struct PaperState {
    balances: HashMap<String, f64>,
    open_orders: Vec<Order>,
    fills: Vec<Order>,
    /// Errors to surface on upcoming place_order calls, front first
    injected_failures: VecDeque<EngineError>,
    order_attempts: u32,
}

/// In-memory broker for paper trading and tests.
///
/// Market orders fill immediately at the request price and settle against
/// the quote balance. Limit orders rest in the book and never fill on their
/// own. Failures can be queued to exercise the retry path.
#[derive(Clone)]
pub struct PaperBroker {
    quote_asset: String,
    state: Arc<Mutex<PaperState>>,
}

impl PaperBroker {
    pub fn new(quote_asset: impl Into<String>, initial_balance: f64) -> Self {
        let quote_asset = quote_asset.into();
        let mut balances = HashMap::new();
        balances.insert(quote_asset.clone(), initial_balance);

        Self {
            quote_asset,
            state: Arc::new(Mutex::new(PaperState {
                balances,
                open_orders: Vec::new(),
                fills: Vec::new(),
                injected_failures: VecDeque::new(),
                order_attempts: 0,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue an error to be returned by the next place_order call
    pub fn inject_failure(&self, error: EngineError) {
        self.lock().injected_failures.push_back(error);
    }

    /// Total place_order invocations, including injected failures
    pub fn order_attempts(&self) -> u32 {
        self.lock().order_attempts
    }

    pub fn fills(&self) -> Vec<Order> {
        self.lock().fills.clone()
    }

    pub fn set_balance(&self, asset: &str, amount: f64) {
        self.lock().balances.insert(asset.to_string(), amount);
    }
}

#[async_trait::async_trait]
impl Broker for PaperBroker {
    async fn get_balance(&self, asset: &str) -> Result<f64> {
        Ok(self.lock().balances.get(asset).copied().unwrap_or(0.0))
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult> {
        let mut state = self.lock();
        state.order_attempts += 1;

        if let Some(err) = state.injected_failures.pop_front() {
            return Err(err);
        }

        if request.quantity <= 0.0 || !request.quantity.is_finite() {
            return Err(EngineError::InvalidParameter(format!(
                "order quantity must be positive, got {}",
                request.quantity
            )));
        }
        if request.price <= 0.0 || !request.price.is_finite() {
            return Err(EngineError::InvalidParameter(format!(
                "order price must be positive, got {}",
                request.price
            )));
        }

        let order = Order {
            id: Uuid::new_v4(),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            price: request.price,
            status: OrderStatus::Open,
            created_at: Utc::now(),
        };

        match request.order_type {
            OrderType::Market => {
                let notional = request.quantity * request.price;
                let balance = state
                    .balances
                    .get(&self.quote_asset)
                    .copied()
                    .unwrap_or(0.0);

                if request.side == OrderSide::Buy && notional > balance {
                    return Err(EngineError::InsufficientFunds {
                        needed: notional,
                        available: balance,
                    });
                }

                let delta = match request.side {
                    OrderSide::Buy => -notional,
                    OrderSide::Sell => notional,
                };
                *state
                    .balances
                    .entry(self.quote_asset.clone())
                    .or_insert(0.0) += delta;

                let mut filled = order;
                filled.status = OrderStatus::Filled;
                let result = OrderResult {
                    id: filled.id,
                    status: OrderStatus::Filled,
                    fill_price: Some(request.price),
                };
                state.fills.push(filled);
                Ok(result)
            }
            OrderType::Limit => {
                let id = order.id;
                state.open_orders.push(order);
                Ok(OrderResult {
                    id,
                    status: OrderStatus::Open,
                    fill_price: None,
                })
            }
        }
    }

    async fn cancel_order(&self, symbol: &str, order_id: Uuid) -> Result<bool> {
        let mut state = self.lock();
        let before = state.open_orders.len();
        state
            .open_orders
            .retain(|o| !(o.id == order_id && o.symbol == symbol));
        Ok(state.open_orders.len() < before)
    }

    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>> {
        let state = self.lock();
        Ok(state
            .open_orders
            .iter()
            .filter(|o| symbol.map_or(true, |s| o.symbol == s))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market_buy(symbol: &str, quantity: f64, price: f64) -> OrderRequest {
        OrderRequest {
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity,
            price,
        }
    }

    #[tokio::test]
    async fn test_market_order_fills_and_settles() {
        let broker = PaperBroker::new("USDT", 10_000.0);

        let result = broker
            .place_order(&market_buy("BTCUSDT", 0.1, 50_000.0))
            .await
            .unwrap();
        assert_eq!(result.status, OrderStatus::Filled);
        assert_eq!(result.fill_price, Some(50_000.0));
        assert_eq!(broker.get_balance("USDT").await.unwrap(), 5_000.0);

        let sell = OrderRequest {
            side: OrderSide::Sell,
            ..market_buy("BTCUSDT", 0.1, 52_000.0)
        };
        broker.place_order(&sell).await.unwrap();
        assert_eq!(broker.get_balance("USDT").await.unwrap(), 10_200.0);
    }

    #[tokio::test]
    async fn test_buy_beyond_balance_is_rejected() {
        let broker = PaperBroker::new("USDT", 100.0);

        let err = broker
            .place_order(&market_buy("BTCUSDT", 1.0, 50_000.0))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
        assert_eq!(broker.get_balance("USDT").await.unwrap(), 100.0);
    }

    #[tokio::test]
    async fn test_injected_failures_surface_in_order() {
        let broker = PaperBroker::new("USDT", 10_000.0);
        broker.inject_failure(EngineError::Connection("reset".into()));
        broker.inject_failure(EngineError::RateLimited("429".into()));

        let request = market_buy("BTCUSDT", 0.01, 50_000.0);
        assert!(matches!(
            broker.place_order(&request).await.unwrap_err(),
            EngineError::Connection(_)
        ));
        assert!(matches!(
            broker.place_order(&request).await.unwrap_err(),
            EngineError::RateLimited(_)
        ));
        assert!(broker.place_order(&request).await.is_ok());
        assert_eq!(broker.order_attempts(), 3);
    }

    #[tokio::test]
    async fn test_limit_orders_rest_and_cancel() {
        let broker = PaperBroker::new("USDT", 10_000.0);
        let request = OrderRequest {
            order_type: OrderType::Limit,
            ..market_buy("ETHUSDT", 1.0, 3_000.0)
        };

        let result = broker.place_order(&request).await.unwrap();
        assert_eq!(result.status, OrderStatus::Open);

        let open = broker.get_open_orders(Some("ETHUSDT")).await.unwrap();
        assert_eq!(open.len(), 1);
        assert!(broker.get_open_orders(Some("BTCUSDT")).await.unwrap().is_empty());

        assert!(broker.cancel_order("ETHUSDT", result.id).await.unwrap());
        assert!(!broker.cancel_order("ETHUSDT", result.id).await.unwrap());
        assert!(broker.get_open_orders(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_degenerate_orders() {
        let broker = PaperBroker::new("USDT", 10_000.0);
        assert!(broker
            .place_order(&market_buy("BTCUSDT", 0.0, 50_000.0))
            .await
            .is_err());
        assert!(broker
            .place_order(&market_buy("BTCUSDT", 1.0, f64::NAN))
            .await
            .is_err());
    }
}
