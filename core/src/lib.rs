pub mod data;
pub mod decoder;
pub mod entity;
pub mod ingester;
pub mod mapper;
pub mod network;
pub mod registry;
pub mod resolver;
pub mod shutdown;
pub mod types;
pub mod utils;
