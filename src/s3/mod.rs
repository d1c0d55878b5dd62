//! C11 — S3-compatible dispatcher (spec.md §4.11).

pub mod handlers;
pub mod routes;
pub mod xml;
