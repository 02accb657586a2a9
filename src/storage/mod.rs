pub mod staging;

pub use staging::{Namespace, StagingStore, StagingSummary};
