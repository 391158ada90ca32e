#[macro_use]
pub mod control_types_macro;

pub mod common;
pub mod config;
pub mod damper;
pub mod device;
pub mod driver;
pub mod error;
pub mod freeze;
pub mod pipeline;
pub mod schemas;
