//! Service layer entry points.
//!
//! # Responsibility
//! - Orchestrate repository calls into caller-facing use cases.
//! - Apply configured paging defaults and limits.

pub mod member_service;
