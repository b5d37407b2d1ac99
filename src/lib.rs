pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod hierarchy;
pub mod models;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;
