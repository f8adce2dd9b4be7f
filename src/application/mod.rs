pub mod bootstrap;
pub mod commands;
pub mod invalidation;
pub mod resolution;
pub mod session;
pub mod sync;
pub mod workflow;
