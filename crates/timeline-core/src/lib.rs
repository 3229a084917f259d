//! Core types, identifiers, and shared utilities for timeline reconstruction.
//!
//! This crate provides:
//! - Change events as delivered by changelog feeds
//! - Interval and membership records plus their pure merge rules
//! - Canonical id generation for source-system entities
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
mod event;
pub mod history;
pub mod ident;
pub mod metrics;

/// Maximum number of tasks a scheduler runs at once, regardless of credentials.
pub const MAX_CONCURRENT_TASKS: usize = 50;

pub use error::{Error, Result};
pub use event::{ChangeEvent, ChangeField};
pub use history::{
    AddedStage, Bucket, BucketKey, Dimension, EntityKey, Interval, MembershipKey,
    MembershipRecord, MembershipSpan, classify_stage, membership_delta, parse_bucket_list,
};
pub use ident::DomainIdGenerator;
