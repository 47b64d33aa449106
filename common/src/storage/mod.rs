pub mod cache;
pub mod store;
pub mod types;
