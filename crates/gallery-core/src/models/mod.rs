//! Data models for the gallery
//!
//! Organized by concern: storage keys for the two image phases, upload grants
//! handed to clients, and the responsive variant matrix.

mod image_key;
mod upload_grant;
mod variant;

// Re-export all models for convenient imports
pub use image_key::*;
pub use upload_grant::*;
pub use variant::*;
