mod error;
pub use error::*;

pub mod accounts;
pub mod api;
pub mod config;
pub mod crypto;
pub mod database;
pub mod links;
pub mod models;
pub mod storage;
pub(crate) mod time_utils;
pub mod ui;
