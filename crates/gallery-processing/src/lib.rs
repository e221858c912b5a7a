//! Image processing for the listing gallery
//!
//! Plans the breakpoint x format variant matrix for a stored source image, then
//! resizes, encodes and publishes every variant through the storage abstraction.

pub mod compression;
pub mod metadata;
pub mod pipeline;
pub mod planner;
pub mod resize;

pub use compression::{EncoderSettings, ImageCompressor, VariantEncoder};
pub use metadata::ImageMetadata;
pub use pipeline::{ImageOptimizer, PipelineOutcome, PipelineStage, VariantPipeline};
pub use planner::VariantPlanner;
pub use resize::ImageResize;
