pub mod group;
pub mod page_image;
pub mod region;
pub mod slot;
pub mod vision;

pub use group::{
    Fragment, GroupId, GroupKind, GroupStatus, NewGroup, RegionGroup, TAG_AI, TAG_MANUAL,
    TAG_SLOT_MODE,
};
pub use page_image::PageImage;
pub use region::{NormalizedBox, PixelRect, Region};
pub use slot::SlotId;
pub use vision::{AuditVerdict, ExtractedRegion, ExtractionResult};
