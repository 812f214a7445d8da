//! Conversation-session synchronization core for the ChatLens front-end, in a strictly linted crate.

// Interdiction stricte de pratiques dangereuses ou non idiomatiques
#![forbid(unsafe_code)] // Le code unsafe est interdit
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(non_upper_case_globals)]
#![deny(nonstandard_style)]
#![warn(missing_docs)] // Toute fonction, struct, enum ou module public doit être documenté
#![warn(unused_must_use)] // Oblige à gérer explicitement les Result et Option

// Clippy pour stricte discipline
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

/// Conversation store, remote gateway, and side cache (the synchronization core).
pub mod conversations;
/// Reference HTTP backend the gateway talks to in development and tests.
pub mod server;
/// Entry helpers to start the reference backend.
pub mod start_backend;
