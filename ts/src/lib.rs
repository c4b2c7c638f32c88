//! Generic persistent state management: a SQLite-backed record store keyed
//! by a small `Record` trait, used by the daemon's session and loop
//! registries.

mod error;
mod filter;
mod record;
mod store;
mod time;

pub use error::{Result, StoreError};
pub use filter::{Filter, FilterOp};
pub use record::{IndexValue, Record};
pub use store::Store;
pub use time::now_ms;
