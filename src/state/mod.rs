/// State management module
///
/// This module handles all gallery state, including:
/// - Database connections and queries (library.rs)
/// - Shared data structures (data.rs)
/// - The observable view state and the operations on it (controller.rs)

pub mod controller;
pub mod data;
pub mod library;
