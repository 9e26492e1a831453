//! Shared types for murmur: domain models, gateway wire events, REST DTOs
//! and the chat error taxonomy.

pub mod api;
pub mod auth;
pub mod error;
pub mod events;
pub mod models;
