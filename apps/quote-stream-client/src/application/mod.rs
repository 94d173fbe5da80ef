//! Application Layer - Port definitions.
//!
//! This layer defines the seams between the quote client's connection logic
//! and the outside world: the duplex transport and the host-supplied
//! identity providers.

/// Port interfaces for the transport and identity providers.
pub mod ports;
