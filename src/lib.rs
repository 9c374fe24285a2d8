pub mod arm;
pub mod config;
pub mod kobuki;
pub mod messages;
pub mod runtime;
