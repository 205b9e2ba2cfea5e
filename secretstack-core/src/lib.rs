//! Core types and traits for SecretStack
//!
//! This crate provides common types used across all SecretStack crates.

pub mod account;
pub mod error;
pub mod request_id;

pub use account::{AccountRegionKey, StateStore, DEFAULT_ACCOUNT_ID, DEFAULT_REGION};
pub use error::{AwsError, ErrorCode};
pub use request_id::{RequestId, REQUEST_ID_HEADER};
