//! Successful download scenarios
