//! API handlers module

pub mod articles;
pub mod auth;
pub mod health;
