//! Query modules for each table group.

pub mod performance;
pub mod prices;
pub mod vaults;
