// src/lib.rs

pub mod catalog;
pub mod config;
pub mod handler;
pub mod learn;
pub mod metadata;
pub mod query;
pub mod redact;
pub mod token;
pub mod upstream;

mod clock;

// Re-export for the entry layers and tests
pub use handler::{handle_request, ProxyRequest, ProxyResponse, RequestMethod};

// Re-export tracing for use in other modules
pub use tracing;

#[cfg(target_arch = "wasm32")]
mod wasm;

#[cfg(not(target_arch = "wasm32"))]
pub mod native;

#[cfg(not(target_arch = "wasm32"))]
pub use native::build_router;
