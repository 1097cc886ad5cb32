pub mod acquisition;
pub mod broker;
pub mod config;
pub mod dedup;
pub mod error;
pub mod import;
pub mod lock;
pub mod queue;
pub mod report;
pub mod scan;
pub mod service;
pub mod tree;
pub mod unpack;
pub mod worker;
pub mod workflow;

pub use error::Error;
