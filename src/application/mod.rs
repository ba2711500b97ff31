pub mod bootstrap;
pub mod commands;
pub mod engine;
pub mod handoff;
pub mod hooks;
pub mod session_runtime;
pub mod timer;
