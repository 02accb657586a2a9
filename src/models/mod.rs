pub mod record;

pub use record::{ChunkIndex, Page, Record, SettingsBlob};
