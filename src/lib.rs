// Library for tests to access modules

pub mod collector;
pub mod config;
pub mod error;
pub mod metrics_source;
pub mod metrics_store;
pub mod models;
pub mod periodic;
pub mod pruner;
pub mod routes;
