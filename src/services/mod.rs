pub mod datasource;
pub mod frames;
pub mod loader;
pub mod request;
pub mod store;
