// Reelforge API Library
//
// HTTP surface for slideshow generation

pub mod http;

// Re-export commonly used types
pub use http::{create_router, AppState};
