pub mod app;
pub mod commands;
pub mod config;
pub mod context;
pub mod credentials;
pub mod dispatch;
pub mod doctor;
pub mod env;
pub mod output;
pub mod run;
pub mod runtime;

pub use config::{cmd_config, ConfigArgs};
pub use doctor::{cmd_doctor, DoctorArgs};
pub use run::{cmd_run, RunArgs};
