pub mod agreement;
pub mod config;
pub mod error;
pub mod facade;
pub mod process;
pub mod record_agreement;
pub mod registry;
pub mod route;
pub mod service;
pub mod step;
pub mod store;
pub mod task;
pub mod types;
pub mod utils;
