pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod services;
pub mod simulator;
pub mod token;
