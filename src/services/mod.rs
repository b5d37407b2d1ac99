pub mod admin;
pub mod auth;
pub mod kpi;
pub mod tasks;
