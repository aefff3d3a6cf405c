//! Back-office core for a laundry-shop point of sale.
//!
//! Owns order intake, line pricing, multi-method partial payments, the
//! loyalty-points program with spend-milestone fidelity discounts, and the
//! reconciliation rules that keep order totals, the payment ledger and
//! customer point balances consistent. Presentation layers (admin UI,
//! receipt renderer, SMS dispatcher, dashboards) consume the derived fields
//! and events exposed here and never write them directly.

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod logging;
pub mod migrator;
pub mod money;
pub mod services;

pub use config::{AppConfig, HangerConfig, LoyaltyConfig};
pub use db::DbPool;
pub use errors::ServiceError;
pub use services::AppServices;
