pub mod config;
pub mod gate;
pub mod mqtt;
pub mod session;
pub mod ui;
