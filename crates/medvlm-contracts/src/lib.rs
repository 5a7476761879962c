pub mod analysis;
pub mod chat;
pub mod datasets;
pub mod events;
pub mod models;
pub mod views;
