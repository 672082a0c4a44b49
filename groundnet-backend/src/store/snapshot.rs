use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

use super::Tables;

const STORE_FILE: &str = "store.json";

pub async fn ensure_data_dir(data_dir: &Path) -> Result<()> {
    if !data_dir.exists() {
        fs::create_dir_all(data_dir)
            .await
            .context("Failed to create data directory")?;
        tracing::info!("Created data directory: {}", data_dir.display());
    }
    Ok(())
}

/// Load the store snapshot, or `None` when no snapshot exists yet.
pub async fn load(data_dir: &Path) -> Result<Option<Tables>> {
    let path = data_dir.join(STORE_FILE);
    if !path.exists() {
        tracing::debug!("No store snapshot at {}", path.display());
        return Ok(None);
    }

    let content = fs::read_to_string(&path)
        .await
        .context("Failed to read store snapshot")?;
    let tables: Tables =
        serde_json::from_str(&content).context("Failed to parse store snapshot")?;

    tracing::info!(
        "Loaded store snapshot: {} observations, {} stations, {} satellites",
        tables.observations.len(),
        tables.stations.len(),
        tables.satellites.len()
    );
    Ok(Some(tables))
}

pub async fn save(data_dir: &Path, tables: &Tables) -> Result<()> {
    ensure_data_dir(data_dir).await?;

    let path = data_dir.join(STORE_FILE);
    let content = serde_json::to_string_pretty(tables).context("Failed to serialize store")?;
    fs::write(&path, content)
        .await
        .context("Failed to write store snapshot")?;

    tracing::debug!("Saved store snapshot to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn snapshot_round_trips() {
        let temp_dir = TempDir::new().unwrap();

        let mut tables = Tables::default();
        tables.next_observation_id = 42;
        save(temp_dir.path(), &tables).await.unwrap();

        let loaded = load(temp_dir.path()).await.unwrap().unwrap();
        assert_eq!(loaded.next_observation_id, 42);
    }

    #[tokio::test]
    async fn missing_snapshot_is_none() {
        let temp_dir = TempDir::new().unwrap();
        assert!(load(temp_dir.path()).await.unwrap().is_none());
    }
}
