//! Secret handling utilities.
//!
//! Re-exports secrecy types used for the ingest bearer token.

pub use secrecy::{ExposeSecret, SecretString};
