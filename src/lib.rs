//! gatehouse library
//!
//! Core functionality for the gatehouse bot: verification session
//! lifecycle with exactly-once resolution, the idle reaper, the abuse
//! filter, and the Telegram moderation gateway.

pub mod cli;
pub mod config;
pub mod filter;
pub mod gateway;
pub mod logging;
pub mod renderer;
pub mod secret;
pub mod store;
pub mod telegram;
pub mod verify;
