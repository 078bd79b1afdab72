//! Resume Intake — recurring inbox-to-CSV extraction daemon.

pub mod config;
pub mod error;
pub mod inbox;
pub mod ledger;
pub mod llm;
pub mod pipeline;
pub mod render;
pub mod sink;
