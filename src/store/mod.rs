pub mod region_store;

pub use region_store::{RegionStore, StoreEvent, SubscriptionId};
