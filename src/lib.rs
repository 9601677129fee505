pub mod config;
pub mod coverage;
pub mod endorsement;
pub mod engine;
pub mod error;
pub mod evolution;
pub mod ledger;
pub mod logging;
pub mod rate_table;
pub mod rating;
pub mod snapshot;
pub mod store;
pub mod types;
