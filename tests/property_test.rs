// tests/property_test.rs

#[path = "integration/helpers.rs"]
mod helpers;

mod property {
    pub mod cache_invariants_test;
}
