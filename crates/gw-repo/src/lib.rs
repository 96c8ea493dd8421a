//! Transactional, SQL-agnostic persistence for devices, ports, orders, the
//! outbound queue, and the append-only command log. Upper layers never emit
//! SQL directly — they call the functions in this crate's per-aggregate
//! modules, passing a [`TxContext`] obtained from [`Repository::ctx`] or
//! threaded through [`Repository::with_tx`].

pub mod cmd_log;
pub mod devices;
mod error;
pub mod models;
pub mod orders;
pub mod outbound;
pub mod ports;
mod tx;

pub use error::RepoError;
pub use tx::{create_pool, run_migrations, Repository, TxContext};
