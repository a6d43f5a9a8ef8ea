//! Student performance scoring, population analytics and the record
//! storage that feeds them.

pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod report;
pub mod risk;
pub mod seed;
pub mod server;
pub mod store;
