//! Subscription Tracking
//!
//! The client follows exactly one symbol at a time. The slot records the
//! caller's desired symbol and reports what kind of change each update
//! represents, so the connection machine can decide between connecting,
//! resubscribing on the live transport, or tearing down.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

// =============================================================================
// Symbol
// =============================================================================

/// Errors raised when validating a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    /// The symbol was empty or whitespace only.
    #[error("symbol cannot be empty")]
    Empty,
}

/// An instrument identifier such as a stock ticker.
///
/// Surrounding whitespace is trimmed; the remaining text is opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol(String);

impl Symbol {
    /// Validate and wrap a symbol.
    ///
    /// # Errors
    ///
    /// Returns [`SymbolError::Empty`] for blank input.
    pub fn parse(value: impl AsRef<str>) -> Result<Self, SymbolError> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(SymbolError::Empty);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Subscription Slot
// =============================================================================

/// Outcome of replacing the desired symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolChange {
    /// The new value equals the current one.
    Unchanged,
    /// A symbol was set where there was none.
    Acquired(Symbol),
    /// One symbol replaced another.
    Switched {
        /// Previously desired symbol.
        from: Symbol,
        /// Newly desired symbol.
        to: Symbol,
    },
    /// The symbol was removed.
    Cleared(Symbol),
}

/// Holds at most one desired symbol.
#[derive(Debug, Default)]
pub struct SubscriptionSlot {
    desired: Option<Symbol>,
}

impl SubscriptionSlot {
    /// Create an empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self { desired: None }
    }

    /// The currently desired symbol.
    #[must_use]
    pub const fn desired(&self) -> Option<&Symbol> {
        self.desired.as_ref()
    }

    /// Check if no symbol is desired.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.desired.is_none()
    }

    /// Replace the desired symbol and describe the change.
    pub fn replace(&mut self, next: Option<Symbol>) -> SymbolChange {
        if self.desired == next {
            return SymbolChange::Unchanged;
        }

        let previous = std::mem::replace(&mut self.desired, next.clone());
        match (previous, next) {
            (None, Some(to)) => SymbolChange::Acquired(to),
            (Some(from), Some(to)) => SymbolChange::Switched { from, to },
            (Some(from), None) => SymbolChange::Cleared(from),
            (None, None) => SymbolChange::Unchanged,
        }
    }
}
