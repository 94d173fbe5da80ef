//! Domain Layer - Core quote streaming types and business rules.
//!
//! This layer contains the vocabulary of the quote client: connection
//! lifecycle, session identity, the single-symbol subscription slot and the
//! latest quote snapshot. Nothing here performs I/O.

/// Connection lifecycle states and close classification.
pub mod connection;

/// Latest quote snapshot and the observable client outputs.
pub mod quote;

/// Session identity, user identity and credential blobs.
pub mod session;

/// Single-symbol subscription tracking.
pub mod subscription;
