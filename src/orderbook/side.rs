//! One side of the book: a price-level container with best-first iteration.

use std::collections::{BTreeSet, HashMap};

use ordered_float::NotNan;

use crate::error::{FeedError, Result};

/// Which half of the book a container holds. Bids sweep price-descending,
/// asks price-ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideKind {
    Bids,
    Asks,
}

#[derive(Debug, Clone, Copy)]
struct Level {
    price: NotNan<f64>,
    size: f64,
}

/// Price levels for one side of the book.
///
/// The price text as received on the wire is the canonical identity, so two
/// spellings of the same numeric price ("320" and "320.00") are distinct
/// levels and deltas re-address exactly what the exchange sent. The parsed
/// value is cached once and used only as the sweep comparator.
#[derive(Debug, Clone)]
pub struct BookSide {
    kind: SideKind,
    /// Size index keyed by the wire text.
    levels: HashMap<String, Level>,
    /// Sorted view; ties on numeric price fall back to the text.
    ladder: BTreeSet<(NotNan<f64>, String)>,
}

impl BookSide {
    pub fn new(kind: SideKind) -> Self {
        Self {
            kind,
            levels: HashMap::new(),
            ladder: BTreeSet::new(),
        }
    }

    pub fn kind(&self) -> SideKind {
        self.kind
    }

    /// Set the level at `price` to `size`, inserting it if unseen.
    ///
    /// Both fields are parsed here; a field that does not parse leaves the
    /// side untouched and reports the offender.
    pub fn upsert(&mut self, price: &str, size: &str) -> Result<()> {
        let parsed_size: f64 = size
            .parse()
            .map_err(|_| FeedError::Parse(format!("invalid size {size:?}")))?;

        if let Some(level) = self.levels.get_mut(price) {
            level.size = parsed_size;
            return Ok(());
        }

        let parsed_price = price
            .parse::<f64>()
            .ok()
            .and_then(|value| NotNan::new(value).ok())
            .ok_or_else(|| FeedError::Parse(format!("invalid price {price:?}")))?;

        self.ladder.insert((parsed_price, price.to_owned()));
        self.levels.insert(
            price.to_owned(),
            Level {
                price: parsed_price,
                size: parsed_size,
            },
        );
        Ok(())
    }

    /// Drop every level whose size is zero, from both views.
    pub fn compact(&mut self) {
        let dead: Vec<(NotNan<f64>, String)> = self
            .levels
            .iter()
            .filter(|(_, level)| level.size <= 0.0)
            .map(|(text, level)| (level.price, text.clone()))
            .collect();
        for key in dead {
            self.ladder.remove(&key);
            self.levels.remove(&key.1);
        }
    }

    pub fn clear(&mut self) {
        self.levels.clear();
        self.ladder.clear();
    }

    /// Level count, including levels whose size is currently zero.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Current size at the exact wire text, if the level exists.
    pub fn size_of(&self, price: &str) -> Option<f64> {
        self.levels.get(price).map(|level| level.size)
    }

    /// Walk `(price, size)` pairs from best price outward.
    pub fn iter_best_first(&self) -> SweepIter<'_> {
        let inner = match self.kind {
            SideKind::Asks => SweepInner::Ascending(self.ladder.iter()),
            SideKind::Bids => SweepInner::Descending(self.ladder.iter().rev()),
        };
        SweepIter {
            inner,
            levels: &self.levels,
        }
    }

    #[cfg(test)]
    pub(crate) fn validate(&self) {
        assert_eq!(self.levels.len(), self.ladder.len());
        for (price, text) in &self.ladder {
            let level = self
                .levels
                .get(text)
                .expect("ladder entry missing from size index");
            assert_eq!(level.price, *price);
        }
        let prices: Vec<f64> = self.iter_best_first().map(|(price, _)| price).collect();
        for pair in prices.windows(2) {
            match self.kind {
                SideKind::Bids => assert!(pair[0] >= pair[1]),
                SideKind::Asks => assert!(pair[0] <= pair[1]),
            }
        }
    }
}

enum SweepInner<'a> {
    Ascending(std::collections::btree_set::Iter<'a, (NotNan<f64>, String)>),
    Descending(std::iter::Rev<std::collections::btree_set::Iter<'a, (NotNan<f64>, String)>>),
}

/// Best-first walk over one side, resolving sizes through the text index.
pub struct SweepIter<'a> {
    inner: SweepInner<'a>,
    levels: &'a HashMap<String, Level>,
}

impl Iterator for SweepIter<'_> {
    type Item = (f64, f64);

    fn next(&mut self) -> Option<Self::Item> {
        let (price, text) = match &mut self.inner {
            SweepInner::Ascending(iter) => iter.next()?,
            SweepInner::Descending(iter) => iter.next()?,
        };
        let size = self.levels.get(text).map(|level| level.size).unwrap_or(0.0);
        Some((price.into_inner(), size))
    }
}
