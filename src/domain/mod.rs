//! Transport-independent types and policies.

pub mod command;
pub mod cursor;
pub mod errors;
pub mod link;
pub mod models;
pub mod monitor;
pub mod peers;
pub mod settings;
