//! Utility functions shared by the binary and hosts.

pub mod bootstrap;
pub mod retry;
