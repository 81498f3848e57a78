pub mod assignment;
pub mod capture;
pub mod catalog;
pub mod constants;
pub mod counter_store;
pub mod discovery;
pub mod grid;
pub mod logging;
pub mod overlay;
pub mod proximity;
pub mod rng;
pub mod signal;
pub mod types;
