//! Database models and queries.

pub mod audit;
pub mod enums;
pub mod health;
pub mod models;
pub mod orders;
pub mod otp;
pub mod products;
pub mod tokens;
pub mod users;
