//! staffrate-core: single-use feedback codes, a ratings ledger, and a
//! monthly rank-based points pool, over an injected document store.

pub mod app;
pub mod clock;
pub mod codes;
pub mod config;
pub mod directory;
pub mod document;
pub mod error;
pub mod ledger;
pub mod points;
pub mod redemption;
pub mod rng;
pub mod session;
pub mod store;
pub mod types;
