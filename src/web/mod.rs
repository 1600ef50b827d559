//! HTTP API for the storefront.

pub mod account;
pub mod admin;
pub mod audit;
pub mod auth;
pub mod error;
pub mod middleware;
pub mod orders;
pub mod products;
pub mod routes;
pub mod status;

pub use routes::*;
