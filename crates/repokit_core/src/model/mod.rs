//! Entity model and storage value types.
//!
//! # Responsibility
//! - Define the backend-neutral `Value`/`Record` shape.
//! - Define entity metadata and the demo entities (`Member`, `Team`, `Item`).
//!
//! # Invariants
//! - An entity id never changes once assigned.
//! - Relations are explicit `Reference`s; back-collections are derived queries.

pub mod audit;
pub mod entity;
pub mod item;
pub mod member;
pub mod reference;
pub mod team;
pub mod value;
