pub mod bot;
pub mod cache;
pub mod config;
pub mod context;
pub mod cooldown;
pub mod models;
pub mod stats;
pub mod storage;
pub mod tracker;
