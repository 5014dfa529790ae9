use async_trait::async_trait;
use rust_decimal::Decimal;

/// Source of the current reference price
///
/// Implementations own their retry and timeout policy. `None` means the feed
/// is unavailable after retries; callers fall back to a recorded price.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn current_price(&self) -> Option<Decimal>;
}

/// Feed that always returns the same answer (dry runs and tests)
#[derive(Debug, Clone)]
pub struct FixedPriceFeed {
    price: Option<Decimal>,
}

impl FixedPriceFeed {
    pub fn new(price: Decimal) -> Self {
        Self { price: Some(price) }
    }

    /// A feed that is never available
    pub fn unavailable() -> Self {
        Self { price: None }
    }
}

#[async_trait]
impl PriceFeed for FixedPriceFeed {
    async fn current_price(&self) -> Option<Decimal> {
        self.price
    }
}
