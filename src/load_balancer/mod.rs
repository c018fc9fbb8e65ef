// src/load_balancer/mod.rs
mod dispatcher;
mod round_robin;

pub use dispatcher::Dispatcher;
pub use round_robin::RoundRobin;
