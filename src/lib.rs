pub mod amount;
pub mod api;
pub mod config;
pub mod eth;
pub mod executor;
pub mod models;
pub mod normalize;
pub mod preview;
