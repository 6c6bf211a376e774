pub mod builtins;
pub mod channel;
pub mod config;
pub mod context;
pub mod control;
pub mod executor;
pub mod host;
pub mod job;
pub mod multi;
pub mod redirect;
pub mod state;
pub mod stdio;
pub mod streams;

#[cfg(test)]
pub mod test_support;
