pub mod kpi;
pub mod task;
pub mod unit;
pub mod user;
