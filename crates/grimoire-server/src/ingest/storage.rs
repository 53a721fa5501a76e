//! Local storage layout for downloaded bulk files
//!
//! Files live at `<root>/<provider>/<sync_type>/<remote-filename>`. One file per
//! completed sync is kept until a later sync of the same type completes. When the
//! remote file name is already taken by a retained file, the new download is stored
//! as `<sync-id>-<remote-filename>` instead of replacing it.

use std::path::{Path, PathBuf};

use grimoire_common::SyncType;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::SyncStore;
use super::Result;

#[derive(Debug, Clone)]
pub struct SyncStorage {
    root: PathBuf,
    provider: String,
}

impl SyncStorage {
    pub fn new(root: impl Into<PathBuf>, provider: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            provider: provider.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn type_dir(&self, sync_type: SyncType) -> PathBuf {
        self.root.join(&self.provider).join(sync_type.as_str())
    }

    /// Destination of the file behind `download_uri`
    pub fn path_for(&self, sync_type: SyncType, download_uri: &str) -> PathBuf {
        self.type_dir(sync_type).join(remote_file_name(download_uri, sync_type))
    }

    /// Where the download of sync `sync_id` should land, never an existing file
    pub async fn destination(
        &self,
        sync_type: SyncType,
        download_uri: &str,
        sync_id: Uuid,
    ) -> Result<PathBuf> {
        let path = self.path_for(sync_type, download_uri);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(path);
        }

        let name = remote_file_name(download_uri, sync_type);
        Ok(self.type_dir(sync_type).join(format!("{}-{}", sync_id, name)))
    }

    /// Delete a stored file; a missing file is not an error
    pub async fn remove(&self, path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Removed stored file");
                Ok(true)
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete files of completed syncs of `sync_type` other than `keep`
    ///
    /// Returns the number of records whose file was released.
    pub async fn cleanup_superseded(
        &self,
        store: &dyn SyncStore,
        sync_type: SyncType,
        keep: &Path,
    ) -> Result<usize> {
        let mut released = 0;

        for record in store.completed_with_files(sync_type).await? {
            let Some(file_path) = record.file_path.as_deref() else {
                continue;
            };
            if Path::new(file_path) == keep {
                continue;
            }

            match self.remove(Path::new(file_path)).await {
                Ok(_) => {
                    store.clear_file_path(record.id).await?;
                    released += 1;
                },
                Err(e) => {
                    warn!(
                        sync_id = %record.id,
                        path = file_path,
                        error = %e,
                        "Failed to remove superseded file"
                    );
                },
            }
        }

        if released > 0 {
            info!(%sync_type, released, "Cleaned up superseded bulk files");
        }
        Ok(released)
    }
}

/// Last path segment of `uri`, without query or fragment
fn remote_file_name(uri: &str, sync_type: SyncType) -> String {
    let without_query = uri.split(['?', '#']).next().unwrap_or_default();
    match without_query.rsplit('/').next() {
        Some(name) if !name.is_empty() && name != "." && name != ".." && !name.contains(':') => {
            name.to_string()
        },
        _ => format!("{}.json", sync_type.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::models::SyncRecord;
    use crate::ingest::store::MemorySyncStore;

    #[test]
    fn test_path_for_uses_remote_filename() {
        let storage = SyncStorage::new("storage", "scryfall");
        let path = storage.path_for(
            SyncType::OracleCards,
            "https://data.example.com/bulk/oracle-cards-20261019.json?token=abc",
        );
        assert_eq!(
            path,
            PathBuf::from("storage/scryfall/oracle_cards/oracle-cards-20261019.json")
        );
    }

    #[test]
    fn test_path_for_falls_back_to_type_name() {
        let storage = SyncStorage::new("/data", "scryfall");
        assert_eq!(
            storage.path_for(SyncType::Rulings, "https://data.example.com/bulk/"),
            PathBuf::from("/data/scryfall/rulings/rulings.json")
        );
    }

    #[tokio::test]
    async fn test_destination_never_reuses_a_retained_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SyncStorage::new(dir.path(), "scryfall");
        let uri = "https://data.example.com/bulk/rulings.json";
        let sync_id = Uuid::new_v4();

        let free = storage.destination(SyncType::Rulings, uri, sync_id).await.unwrap();
        assert_eq!(free, storage.path_for(SyncType::Rulings, uri));

        tokio::fs::create_dir_all(free.parent().unwrap()).await.unwrap();
        tokio::fs::write(&free, b"[]").await.unwrap();

        let taken = storage.destination(SyncType::Rulings, uri, sync_id).await.unwrap();
        assert_ne!(taken, free);
        assert_eq!(
            taken.file_name().unwrap().to_string_lossy(),
            format!("{}-rulings.json", sync_id)
        );
    }

    #[tokio::test]
    async fn test_cleanup_superseded_keeps_current_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SyncStorage::new(dir.path(), "scryfall");
        let store = MemorySyncStore::new();

        let mut paths = Vec::new();
        for name in ["old.json", "current.json"] {
            let path = storage.type_dir(SyncType::Rulings).join(name);
            tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
            tokio::fs::write(&path, b"[]").await.unwrap();

            let mut record = SyncRecord::new(SyncType::Rulings);
            record.start();
            record.complete(path.to_string_lossy(), 2).unwrap();
            store.insert(&record).await.unwrap();
            paths.push((record.id, path));
        }

        let released = storage
            .cleanup_superseded(&store, SyncType::Rulings, &paths[1].1)
            .await
            .unwrap();

        assert_eq!(released, 1);
        assert!(!paths[0].1.exists());
        assert!(paths[1].1.exists());
        let old = store.get(paths[0].0).await.unwrap().unwrap();
        assert!(old.file_path.is_none());
        let current = store.get(paths[1].0).await.unwrap().unwrap();
        assert!(current.file_path.is_some());
    }
}
