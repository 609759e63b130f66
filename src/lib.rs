pub mod calibration;
pub mod cli;
pub mod config;
pub mod geosense;
pub mod modbus;
pub mod retry;
pub mod serial;
pub mod workflow;

pub use cli::run;
