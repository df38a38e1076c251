//! Per-item outcomes of batch operations.
//!
//! Batch mutations (create, taint, delete across many targets) are attempted
//! on every target. Instead of joining failures into one opaque error, each
//! target keeps its own result so callers and tests can see exactly which
//! items failed and why.

use std::fmt;

/// Result of one item in a batch.
#[derive(Debug)]
pub struct ItemOutcome<T, E> {
    /// Name (or `namespace/name`) of the target.
    pub target: String,
    /// What happened to it.
    pub result: Result<T, E>,
}

impl<T, E> ItemOutcome<T, E> {
    /// A successful item.
    pub fn ok(target: impl Into<String>, value: T) -> Self {
        Self {
            target: target.into(),
            result: Ok(value),
        }
    }

    /// A failed item.
    pub fn failed(target: impl Into<String>, error: E) -> Self {
        Self {
            target: target.into(),
            result: Err(error),
        }
    }

    /// Whether the item succeeded.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Outcomes of a batch operation, in submission order.
#[derive(Debug)]
pub struct BatchOutcome<T, E> {
    items: Vec<ItemOutcome<T, E>>,
}

impl<T, E> Default for BatchOutcome<T, E> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T, E> BatchOutcome<T, E> {
    /// Create an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an item outcome.
    pub fn push(&mut self, item: ItemOutcome<T, E>) {
        self.items.push(item);
    }

    /// Record the result of an attempt on `target`.
    pub fn record(&mut self, target: impl Into<String>, result: Result<T, E>) {
        self.items.push(ItemOutcome {
            target: target.into(),
            result,
        });
    }

    /// All item outcomes.
    #[must_use]
    pub fn items(&self) -> &[ItemOutcome<T, E>] {
        &self.items
    }

    /// Number of attempted items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing was attempted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether every attempted item succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.items.iter().all(ItemOutcome::is_ok)
    }

    /// Values of the successful items.
    pub fn succeeded(&self) -> impl Iterator<Item = (&str, &T)> {
        self.items
            .iter()
            .filter_map(|i| i.result.as_ref().ok().map(|v| (i.target.as_str(), v)))
    }

    /// Errors of the failed items.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &E)> {
        self.items
            .iter()
            .filter_map(|i| i.result.as_ref().err().map(|e| (i.target.as_str(), e)))
    }

    /// Targets that failed.
    #[must_use]
    pub fn failed_targets(&self) -> Vec<String> {
        self.failures().map(|(t, _)| t.to_string()).collect()
    }

    /// Consume the batch, returning the successful values.
    #[must_use]
    pub fn into_succeeded(self) -> Vec<T> {
        self.items.into_iter().filter_map(|i| i.result.ok()).collect()
    }

    /// Consume the batch, returning every item outcome.
    #[must_use]
    pub fn into_items(self) -> Vec<ItemOutcome<T, E>> {
        self.items
    }

    /// Append the outcomes of another batch.
    pub fn extend(&mut self, other: Self) {
        self.items.extend(other.items);
    }

    /// Drop success values, keeping only the per-item status.
    #[must_use]
    pub fn discard_values(self) -> BatchOutcome<(), E> {
        BatchOutcome {
            items: self
                .items
                .into_iter()
                .map(|i| ItemOutcome {
                    target: i.target,
                    result: i.result.map(|_| ()),
                })
                .collect(),
        }
    }
}

impl<T, E: fmt::Display> BatchOutcome<T, E> {
    /// One-line summary of the failures, for logs and wrapped errors.
    #[must_use]
    pub fn failure_summary(&self) -> String {
        self.failures()
            .map(|(t, e)| format!("{t}: {e}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl<T, E> FromIterator<ItemOutcome<T, E>> for BatchOutcome<T, E> {
    fn from_iter<I: IntoIterator<Item = ItemOutcome<T, E>>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}
