//! Orderbook engine for a single product.
//!
//! Absorbs a snapshot followed by an unbounded stream of sparse price-level
//! deltas and answers the four synthetic market-order quote queries. The
//! struct is not internally synchronized; the controller wraps it in a
//! `parking_lot::RwLock` so sweeps read a consistent version of both sides.

use std::sync::Arc;

use tracing::warn;

use super::side::{BookSide, SideKind};
use super::{Quote, Update};
use crate::clock::{Clock, SystemClock};
use crate::error::{FeedError, QuoteError, Result};

/// A book whose newest mutation is older than this many seconds is stale.
pub const STALE_AFTER_SECS: i64 = 5;

/// Sentinel for a book that was never mutated.
const EPOCH_NEVER: i64 = -1;

/// Use this alongside a feed session to keep an up-to-date book, or build
/// it ungated for one-off quote queries against hand-maintained levels.
pub struct Orderbook {
    product_id: String,
    bids: BookSide,
    asks: BookSide,
    last_epoch: i64,
    snapshot_seen: bool,
    clock: Arc<dyn Clock>,
    freshness_gate: bool,
}

impl Orderbook {
    /// Create an empty book with the freshness gate enforced.
    pub fn new(product_id: impl Into<String>) -> Self {
        Self::with_clock(product_id, Arc::new(SystemClock))
    }

    /// Create an empty gated book reading time from the given clock.
    pub fn with_clock(product_id: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self::build(product_id, clock, true)
    }

    /// Create an empty book that skips the snapshot and staleness checks.
    ///
    /// Meant for offline queries where the caller maintains the levels by
    /// hand and freshness has no meaning.
    pub fn ungated(product_id: impl Into<String>) -> Self {
        Self::build(product_id, Arc::new(SystemClock), false)
    }

    fn build(product_id: impl Into<String>, clock: Arc<dyn Clock>, freshness_gate: bool) -> Self {
        Self {
            product_id: product_id.into(),
            bids: BookSide::new(SideKind::Bids),
            asks: BookSide::new(SideKind::Asks),
            last_epoch: EPOCH_NEVER,
            snapshot_seen: false,
            clock,
            freshness_gate,
        }
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    /// Split the product id into its base and quote symbols.
    pub fn product(&self) -> Result<(&str, &str)> {
        let mut parts = self.product_id.split('-');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(base), Some(quote), None) if !base.is_empty() && !quote.is_empty() => {
                Ok((base, quote))
            }
            _ => Err(FeedError::MalformedProduct(self.product_id.clone())),
        }
    }

    /// Epoch of the most recent accepted mutation, or -1 before any.
    pub fn last_epoch(&self) -> i64 {
        self.last_epoch
    }

    pub fn snapshot_seen(&self) -> bool {
        self.snapshot_seen
    }

    /// Count of bid and ask levels.
    ///
    /// NOTE: some of these levels can carry a size of 0 until the next
    /// compaction pass removes them.
    pub fn book_count(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }

    /// Replace both sides with a fresh image of the book.
    ///
    /// Idempotent; an epoch older than the last accepted one is rejected
    /// and the book is left untouched. Returns whether the snapshot was
    /// installed.
    pub fn apply_snapshot(&mut self, epoch: i64, bids: &[Update], asks: &[Update]) -> bool {
        if !self.admit_epoch(epoch) {
            return false;
        }
        self.bids.clear();
        self.asks.clear();
        write_levels(&mut self.bids, bids);
        write_levels(&mut self.asks, asks);
        self.snapshot_seen = true;
        true
    }

    /// Upsert sparse price levels into the book.
    ///
    /// Ties on price within one batch resolve to the last update. Returns
    /// whether the batch was accepted.
    pub fn apply_delta(&mut self, epoch: i64, bids: &[Update], asks: &[Update]) -> bool {
        if !self.admit_epoch(epoch) {
            return false;
        }
        write_levels(&mut self.bids, bids);
        write_levels(&mut self.asks, asks);
        true
    }

    /// Housekeeping: drop levels whose size has gone to zero.
    pub fn compact(&mut self) {
        self.bids.compact();
        self.asks.compact();
    }

    fn admit_epoch(&mut self, epoch: i64) -> bool {
        if epoch < self.last_epoch {
            warn!(
                last_epoch = self.last_epoch,
                epoch, "skipping update due to race condition"
            );
            return false;
        }
        self.last_epoch = epoch;
        true
    }

    /// Simulate a market buy spending `amount` of the quote currency.
    /// In a BTC-USD book, `buy_quote(usd)` returns the BTC to sell.
    pub fn buy_quote(&self, amount: f64) -> std::result::Result<Quote, QuoteError> {
        self.sweep_quote_in(amount, &self.bids)
    }

    /// Simulate a market sell of `amount` of the quote currency.
    /// In a BTC-USD book, `sell_quote(usd)` returns the BTC to buy.
    pub fn sell_quote(&self, amount: f64) -> std::result::Result<Quote, QuoteError> {
        self.sweep_quote_in(amount, &self.asks)
    }

    /// Simulate a market buy of `amount` of the base asset.
    /// In a BTC-USD book, `buy_base(btc)` returns the USD sold.
    pub fn buy_base(&self, amount: f64) -> std::result::Result<Quote, QuoteError> {
        self.sweep_base_in(amount, &self.asks)
    }

    /// Simulate a market sell of `amount` of the base asset.
    /// In a BTC-USD book, `sell_base(btc)` returns the USD purchased.
    pub fn sell_base(&self, amount: f64) -> std::result::Result<Quote, QuoteError> {
        self.sweep_base_in(amount, &self.bids)
    }

    fn check_gate(&self, amount: f64) -> std::result::Result<(), QuoteError> {
        if self.freshness_gate {
            if !self.snapshot_seen {
                return Err(QuoteError::NotInitialized);
            }
            if self.clock.now_epoch() - self.last_epoch > STALE_AFTER_SECS {
                return Err(QuoteError::Stale);
            }
        }
        if !(amount > 0.0) || !amount.is_finite() {
            return Err(QuoteError::InvalidAmount);
        }
        Ok(())
    }

    fn sweep_quote_in(
        &self,
        amount: f64,
        side: &BookSide,
    ) -> std::result::Result<Quote, QuoteError> {
        self.check_gate(amount)?;

        let mut remaining = amount;
        let mut base_out = 0.0;
        for (price, size) in side.iter_best_first() {
            if remaining <= 0.0 {
                break;
            }
            if size <= 0.0 {
                continue;
            }
            let level_quote = price * size;
            let take = level_quote.min(remaining);
            remaining -= take;
            base_out += take / price;
            if remaining < 0.0 {
                return Err(QuoteError::InternalInvariant);
            }
        }
        if remaining <= 0.0 {
            Ok(Quote {
                amount: base_out,
                epoch: self.last_epoch,
            })
        } else {
            Err(QuoteError::InsufficientLiquidity)
        }
    }

    fn sweep_base_in(
        &self,
        amount: f64,
        side: &BookSide,
    ) -> std::result::Result<Quote, QuoteError> {
        self.check_gate(amount)?;

        let mut remaining = amount;
        let mut quote_out = 0.0;
        for (price, size) in side.iter_best_first() {
            if size <= 0.0 {
                continue;
            }
            let take = size.min(remaining);
            remaining -= take;
            quote_out += take * price;
            if remaining < 0.0 {
                return Err(QuoteError::InternalInvariant);
            }
            if remaining <= 0.0 {
                break;
            }
        }
        if remaining <= 0.0 {
            Ok(Quote {
                amount: quote_out,
                epoch: self.last_epoch,
            })
        } else {
            Err(QuoteError::InsufficientLiquidity)
        }
    }

    #[cfg(test)]
    pub(crate) fn validate_invariants(&self) {
        self.bids.validate();
        self.asks.validate();
    }
}

fn write_levels(side: &mut BookSide, updates: &[Update]) {
    for update in updates {
        if let Err(err) = side.upsert(&update.price, &update.size) {
            warn!(msg = %err, "skipped update due to error");
        }
    }
}
