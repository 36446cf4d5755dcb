pub mod context;
pub mod errors;
pub mod models;
pub mod ports;
pub mod safety;
pub mod sanitizer;
pub mod service;
pub mod service_helpers;
pub mod store;
pub mod streaming;
pub mod tools;
