//! 领域服务

pub mod mention;

pub use mention::*;
