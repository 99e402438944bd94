pub mod control_loop;
pub mod controller;
pub mod core;
pub mod error;
pub mod graph;
pub mod sampler;
pub mod session;
pub mod spectrum;
pub mod stream;
