pub use feed::*;
pub use multiplier::*;
pub use record::*;
pub use tier::*;

mod feed;
mod multiplier;
mod record;
mod tier;
