pub mod admin;
pub mod config;
pub mod error;
pub mod node;
pub mod notify;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod stream;
pub mod worker;
