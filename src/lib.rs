pub mod config;
pub mod error;
pub mod maven;
pub mod storage;
pub mod util;
