//! Settings shared by feedpush agents.
//!
//! Sources are merged in order, later ones overriding earlier ones:
//! 1. every `*.json` file in `./config`, in file name order
//! 2. each file listed in the comma separated `CONFIG_FILES` env var
//! 3. env vars prefixed with `PUSH_`, nesting separated by `__`, e.g.
//!    `PUSH_WORKER_INDEX=2` or `PUSH_CHAIN__RPC_URL=http://...`
//!
//! The merged tree is deserialized into a raw, loosely typed form and then
//! validated into the typed settings with [`FromRawConf`]. Keys are
//! `snake_case`; durations are given in millis with an `_ms` suffix.

pub use base::*;
pub use chain::*;
pub use loader::*;
pub use trace::*;
pub use tx::*;

mod base;
mod chain;
mod loader;
mod trace;
mod tx;
