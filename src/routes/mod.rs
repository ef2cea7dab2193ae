//! Route modules for the sync server

pub mod health;
pub mod records;
pub mod sync;
