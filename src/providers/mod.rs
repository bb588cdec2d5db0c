//! Metadata providers, one per enrichment stage, plus the shared HTTP client.

pub mod ddd;
pub mod http;
pub mod omdb;
pub mod tmdb;
