pub mod abi;
pub mod config;
pub mod errors;
pub mod ledger;
pub mod metrics;
pub mod pricing;
pub mod source;
pub mod state;
pub mod tools;
pub mod utils;
