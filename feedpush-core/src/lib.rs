//! This crate contains the pure logic shared by feedpush agents: feed and
//! record types, worker tiers, clock skew estimation, the update decision
//! rules, fee arithmetic and batch collection, along with the traits agents
//! use to reach the chain and the upstream price source.
//!
//! Nothing in here performs network access; everything that does lives behind
//! the traits in [`traits`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::unwrap_used, clippy::panic)]

pub use batch::*;
pub use clock_skew::*;
pub use decision::*;
pub use error::*;
pub use fees::*;
pub use schedule::*;
pub use traits::*;
pub use types::*;

mod batch;
mod clock_skew;
mod decision;
mod error;
mod fees;
mod schedule;
mod traits;
mod types;

/// Assorted helpers
pub mod utils;

pub use ethers::types::{Address, Bytes, H256, U256};
