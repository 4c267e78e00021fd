//! The pusher watches upstream price reports and pushes them to an on-chain
//! feed store whenever a feed is stale or has deviated enough.
//!
//! Several pushers run redundantly against the same feeds, each with its own
//! worker index. Later tiers wait longer and pay more, so they only land a
//! transaction when the earlier ones did not.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use eyre::Result;

use feedpush_base::agent_main;

use crate::pusher::Pusher;

mod pusher;
mod scheduler;
mod settings;
#[cfg(test)]
mod test_utils;
mod tracker;
mod worker;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    // Logging is not initialised at this point, so, using `println!`
    println!("Pusher starting up...");

    agent_main::<Pusher>().await
}
