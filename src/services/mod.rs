pub mod image_fill;
pub mod renderer;
pub mod status;
pub mod submitter;
pub mod vision_service;

pub use image_fill::{FillRequest, HttpImageFillService, ImageFillService};
pub use renderer::{DirectoryRenderer, PageRenderer};
pub use status::{FileStatusSink, StatusSink, TracingStatusSink};
pub use submitter::{GroupSubmitter, LocalSubmitter};
pub use vision_service::{LlmVisionService, VisionService, EXTRACTION_INSTRUCTIONS, EXTRACTION_SCHEMA};
