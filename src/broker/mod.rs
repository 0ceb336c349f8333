// Order execution boundary
pub mod paper;

pub use paper::PaperBroker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    /// Reference price; market orders fill here in paper trading,
    /// limit orders rest at it
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub id: Uuid,
    pub status: OrderStatus,
    pub fill_price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// Execution venue. Implementations map their transport failures into the
/// engine's error taxonomy so the retry layer can classify them.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn get_balance(&self, asset: &str) -> Result<f64>;

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult>;

    /// Returns true if the order existed and was cancelled
    async fn cancel_order(&self, symbol: &str, order_id: Uuid) -> Result<bool>;

    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>>;
}
