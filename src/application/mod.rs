pub mod catalog_service;
pub mod order_service;
pub mod retry;
