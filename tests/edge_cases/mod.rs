//! Malformed input, resource limits and failure paths

mod error_handling_tests;
