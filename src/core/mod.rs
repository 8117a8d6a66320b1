pub mod configuration;
pub mod logical_processor;
pub mod manager;
pub mod runahead;
pub mod support;
pub mod work;
pub mod worker;
pub mod worker_pool;
