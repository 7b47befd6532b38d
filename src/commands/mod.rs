pub mod config;
pub mod renew;
