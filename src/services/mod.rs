//! Application services: cart mutations, checkout and totals.

mod cart;
mod orders;
mod totals;

pub use cart::{CartService, CartView};
pub use orders::{CheckoutOutcome, CheckoutRequest, OrderService};
pub use totals::{sum_lines, Pricing, TotalAggregator, TotalError};

use std::time::Duration;

use backon::ExponentialBuilder;

/// Backoff between attempts to write a cart change after a concurrent write.
///
/// `max_attempts` counts the first try, so 5 means up to 4 re-reads.
pub fn write_backoff(max_attempts: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(5))
        .with_max_delay(Duration::from_millis(200))
        .with_max_times(max_attempts.saturating_sub(1))
        .with_jitter()
}

/// Backoff for clearing the source cart after checkout.
pub fn clear_backoff(max_retries: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(max_retries)
        .with_jitter()
}

#[cfg(test)]
pub(crate) fn fast_backoff(max_times: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
        .with_max_times(max_times)
}
