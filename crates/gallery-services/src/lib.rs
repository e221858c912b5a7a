//! Gallery Services Layer
//!
//! Business services on top of storage: issuing direct-upload grants for draft
//! images and moving drafts into the persistent namespace when a listing is
//! published. Both take their configuration and `Arc<dyn Storage>` at construction.

pub mod lifecycle;
pub mod upload_grant;

pub use lifecycle::{DraftLifecycleManager, ListingImageRepository, PromotionOutcome};
pub use upload_grant::{canonical_extension, UploadGrantIssuer};
