pub mod actions;
pub mod app;
pub mod listener;
pub mod manager;
pub mod notify;
