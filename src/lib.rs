pub mod config;
pub mod conversion;
pub mod converter;
pub mod http;
pub mod job;
pub mod notify;
pub mod objects;
pub mod pipeline;
pub mod state;
pub mod store;
