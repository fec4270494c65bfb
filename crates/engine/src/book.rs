use shared::types::{Order, OrderState, Side};

/// Classified snapshot of the controller's resting orders. Rebuilt from
/// the venue on every poll, never mutated in place.
#[derive(Debug, Clone, Default)]
pub struct OpenOrders {
    orders: Vec<Order>,
}

impl OpenOrders {
    pub fn new(orders: Vec<Order>) -> Self {
        Self { orders }
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Fully filled orders.
    pub fn fulfilled(&self) -> Vec<&Order> {
        self.orders
            .iter()
            .filter(|order| order.state() == OrderState::Closed)
            .collect()
    }

    /// Orders with any traded amount, including partial fills.
    pub fn filled(&self) -> Vec<&Order> {
        self.orders
            .iter()
            .filter(|order| order.filled_amount > 0.0)
            .collect()
    }

    pub fn unfulfilled(&self) -> Vec<&Order> {
        self.orders
            .iter()
            .filter(|order| order.state() != OrderState::Closed)
            .collect()
    }

    pub fn unfulfilled_on(&self, side: Side) -> Vec<&Order> {
        self.orders
            .iter()
            .filter(|order| order.state() != OrderState::Closed && order.side == side)
            .collect()
    }

    /// True when unfulfilled orders remain on exactly one side of the
    /// book.
    pub fn is_remains_one_side(&self) -> bool {
        let buys = !self.unfulfilled_on(Side::Buy).is_empty();
        let sells = !self.unfulfilled_on(Side::Sell).is_empty();
        buys != sells
    }

    /// Smallest distance between an unfulfilled order and the market
    /// price.
    pub fn minimum_gap(&self, market_price: f64) -> Option<f64> {
        self.unfulfilled()
            .iter()
            .map(|order| (order.price - market_price).abs())
            .fold(None, |acc, gap| match acc {
                Some(best) if best <= gap => Some(best),
                _ => Some(gap),
            })
    }

    pub fn gap_percent(&self, market_price: f64) -> Option<f64> {
        self.minimum_gap(market_price)
            .map(|gap| (market_price - gap).abs() / market_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: &str, side: Side, price: f64, filled: f64, remaining: f64) -> Order {
        Order {
            id: id.to_string(),
            side,
            price,
            original_amount: filled + remaining,
            filled_amount: filled,
            remaining_amount: remaining,
        }
    }

    fn sample_book() -> OpenOrders {
        OpenOrders::new(vec![
            order("1", Side::Sell, 1.05, 0.0, 10.0),
            order("2", Side::Sell, 1.02, 10.0, 0.0),
            order("3", Side::Buy, 0.98, 4.0, 6.0),
            order("4", Side::Buy, 0.95, 0.0, 10.0),
        ])
    }

    #[test]
    fn classifies_orders() {
        let book = sample_book();
        assert_eq!(book.len(), 4);
        assert_eq!(book.fulfilled().len(), 1);
        assert_eq!(book.filled().len(), 2);
        assert_eq!(book.unfulfilled().len(), 3);
        assert_eq!(book.unfulfilled_on(Side::Buy).len(), 2);
        assert_eq!(book.unfulfilled_on(Side::Sell).len(), 1);
        assert!(!book.is_remains_one_side());
    }

    #[test]
    fn one_sided_after_sells_fill() {
        let book = OpenOrders::new(vec![
            order("1", Side::Sell, 1.05, 10.0, 0.0),
            order("2", Side::Buy, 0.95, 0.0, 10.0),
        ]);
        assert!(book.is_remains_one_side());
    }

    #[test]
    fn minimum_gap_over_unfulfilled_only() {
        let book = sample_book();
        // The fulfilled sell at 1.02 is excluded, so the buy at 0.98 is
        // nearest.
        let gap = book.minimum_gap(1.0).expect("gap");
        assert!((gap - 0.02).abs() < 1e-12);
    }

    #[test]
    fn gap_metrics_non_negative_and_zero_at_market() {
        let book = OpenOrders::new(vec![order("1", Side::Buy, 1.0, 0.0, 5.0)]);
        let gap = book.minimum_gap(1.0).expect("gap");
        assert_eq!(gap, 0.0);
        let percent = book.gap_percent(1.0).expect("percent");
        assert!(percent >= 0.0);
    }

    #[test]
    fn empty_book_has_no_gap() {
        let book = OpenOrders::default();
        assert!(book.minimum_gap(1.0).is_none());
        assert!(book.gap_percent(1.0).is_none());
    }
}
