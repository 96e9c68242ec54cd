pub mod config;
pub mod lifecycle;
pub mod model;
pub mod prompt;
pub mod queue;
pub mod runner;
pub mod store;
pub mod terminal;
pub mod tools;
