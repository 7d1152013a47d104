//! Integration tests

mod capture_test;
mod config_test;
mod monitor_test;
mod settlement_test;
mod support;
