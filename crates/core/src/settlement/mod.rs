//! Settlements: batching posted entries of one account into a single
//! transfer to a contra account.

pub mod repository;
pub mod service;
pub mod types;

#[cfg(test)]
mod types_props;

pub use repository::SettlementRepository;
pub use types::{
    NewSettlement, Settlement, SettlementRecord, SettlementStatus, StatusUpdate, TransitionEffect, TransitionPlan,
    net_amount,
};
