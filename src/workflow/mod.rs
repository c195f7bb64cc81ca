pub mod page_flow;
pub mod scan_state;

pub use page_flow::{PageFlow, PageOutcome};
pub use scan_state::{Checkpoint, ScanState, ScanStep};
