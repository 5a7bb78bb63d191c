pub mod compress;
pub mod config_cmd;
pub mod plan;
pub mod route;
