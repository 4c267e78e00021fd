//! EVM implementations of the feedpush chain traits: multicall batched reads
//! of the on-chain feed store, fee history based fee estimation and signed
//! update transactions.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(unused_extern_crates)]

pub use calldata::*;
pub use error::*;
pub use provider::*;
pub use reader::*;
pub use submitter::*;

mod calldata;
mod error;
mod provider;
mod reader;
mod submitter;

/// Generated contract bindings.
mod contracts;
