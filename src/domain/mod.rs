pub mod errors;
pub mod ledger;
pub mod order;
pub mod ports;
pub mod product;
pub mod status;
