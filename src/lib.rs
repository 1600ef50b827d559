pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod logging;
pub mod services;
pub mod sms;
pub mod state;
pub mod utils;
pub mod web;
