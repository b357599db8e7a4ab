//! Input discovery.

use callstream_config::StoreSettings;
use callstream_core::{BackendResult, ObjectStore, WorkItem};
use tracing::info;

/// List input audio under the configured prefix.
///
/// Keys are filtered by file prefix and extension, sorted, and truncated to
/// `file_limit` when one is set.
///
/// # Errors
///
/// Returns the store error when listing fails.
pub async fn discover(
    store: &dyn ObjectStore,
    settings: &StoreSettings,
    file_limit: Option<usize>,
) -> BackendResult<Vec<WorkItem>> {
    let listed = store.list(&settings.input_prefix).await?;
    let total = listed.len();
    let mut keys: Vec<String> = listed
        .into_iter()
        .filter(|key| settings.accepts(key))
        .collect();
    keys.sort();
    if let Some(limit) = file_limit {
        keys.truncate(limit);
    }
    info!(
        prefix = %settings.input_prefix,
        listed = total,
        selected = keys.len(),
        "audio discovery completed"
    );
    Ok(keys.into_iter().map(WorkItem::new).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use callstream_test_support::MemoryObjectStore;
    use std::path::PathBuf;

    fn settings() -> StoreSettings {
        StoreSettings {
            input_root: PathBuf::from("/in"),
            output_root: PathBuf::from("/out"),
            input_prefix: "calls/".into(),
            file_prefix_filter: "merged".into(),
            audio_extensions: vec![".wav".into(), ".mp3".into()],
            output_prefix: "processed".into(),
            scratch_dir: None,
        }
    }

    #[tokio::test]
    async fn filters_sorts_and_limits() -> anyhow::Result<()> {
        let store = MemoryObjectStore::new()?;
        for key in [
            "calls/merged_c.wav",
            "calls/merged_a.mp3",
            "calls/raw_b.wav",
            "calls/merged_d.txt",
            "other/merged_e.wav",
            "calls/merged_b.WAV",
        ] {
            store.insert(key, b"RIFF");
        }

        let all = discover(&store, &settings(), None).await?;
        let keys: Vec<&str> = all.iter().map(|item| item.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["calls/merged_a.mp3", "calls/merged_b.WAV", "calls/merged_c.wav"]
        );

        let limited = discover(&store, &settings(), Some(2)).await?;
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[1].key, "calls/merged_b.WAV");
        Ok(())
    }

    #[tokio::test]
    async fn empty_store_yields_empty_worklist() -> anyhow::Result<()> {
        let store = MemoryObjectStore::new()?;
        assert!(discover(&store, &settings(), Some(5)).await?.is_empty());
        Ok(())
    }
}
