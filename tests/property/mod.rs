//! Property-based tests

mod store_proptest;
