pub mod diesel_store;
pub mod memory;
pub mod models;
