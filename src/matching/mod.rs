// src/matching/mod.rs

pub mod details;
pub mod matcher;
pub mod normalize;
pub mod similarity;

pub use details::MatchDetails;
pub use matcher::{match_transaction, MatchDecision};
