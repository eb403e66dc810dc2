pub mod config;
pub mod plugins;
pub mod process;
pub mod serve;
pub mod validate;
