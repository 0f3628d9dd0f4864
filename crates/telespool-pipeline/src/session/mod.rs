// ABOUTME: Session adapters that implement telespool_core::Session over a concrete transport.
// ABOUTME: Currently an HTTP adapter; tests use the in-memory stub from the testing module.

pub mod http;

pub use http::HttpSession;
