pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod paths;
pub mod plan;
pub mod remote;
pub mod session;
pub mod signals;
pub mod upgrade;

#[cfg(test)]
pub mod test_support;
