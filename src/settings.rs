//! Settings replication: copy index configuration from source to destination.

use crate::client::{DestinationIndex, SourceIndex};
use crate::error::{FerryError, Result};

/// Fetch the source settings and apply them verbatim to the destination.
pub async fn replicate_settings(
    source: &dyn SourceIndex,
    destination: &dyn DestinationIndex,
) -> Result<()> {
    let settings = source.get_settings().await.map_err(|e| {
        FerryError::SettingsReplication(format!("fetching from {}: {}", source.name(), e))
    })?;
    destination.set_settings(&settings).await.map_err(|e| {
        FerryError::SettingsReplication(format!("applying to {}: {}", destination.name(), e))
    })?;
    Ok(())
}

/// Replicate settings, logging the outcome. Never fails.
pub async fn replicate_settings_logged(
    source: &dyn SourceIndex,
    destination: &dyn DestinationIndex,
) -> bool {
    match replicate_settings(source, destination).await {
        Ok(()) => {
            tracing::info!("Settings copied from {} to {}", source.name(), destination.name());
            true
        }
        Err(e) => {
            tracing::error!("Copy settings failed: {}", e);
            false
        }
    }
}
