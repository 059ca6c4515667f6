//! JPX index-master snapshots and the features derived from them.

pub mod features;
pub mod master;

pub use features::{EventType, FfwChangeRow, IndexFeatureRow, IndexFeatureTable};
pub use master::{load_index_master, parse_index_master_csv, IndexMembershipRecord};
