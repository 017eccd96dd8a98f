pub mod capture;
pub mod cli;
pub mod config;
pub mod drivers;
pub mod input;
pub mod sync;
