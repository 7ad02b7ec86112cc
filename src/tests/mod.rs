// src/tests/mod.rs
mod connection_tests;
mod store_tests;
mod utils;
