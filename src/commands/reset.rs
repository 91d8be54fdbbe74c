use super::Host;
use super::common::default_checkpoint_dir;
use crate::Result;
use crate::facts::CheckpointStore;
use camino::Utf8PathBuf;
use clap::Parser;
use std::io::Write;

#[derive(Parser, Debug)]
pub struct ResetArgs {
    /// Directory holding the checkpoints to delete
    #[arg(long, value_name = "PATH")]
    pub checkpoint_dir: Option<Utf8PathBuf>,
}

/// Delete every checkpoint so that the next run starts from scratch.
pub async fn reset_checkpoints<H: Host>(host: &mut H, args: &ResetArgs) -> Result<()> {
    let dir = match &args.checkpoint_dir {
        Some(dir) => dir.clone().into_std_path_buf(),
        None => default_checkpoint_dir()?,
    };

    let store = CheckpointStore::open(&dir).await?;
    let removed = store.clear()?;

    let _ = writeln!(host.output(), "Removed {removed} checkpoint(s) from {}", dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::host::TestHost;
    use crate::facts::{CheckpointEntry, PairKey, WindowSetting};
    use chrono::Utc;

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot do file locking")]
    async fn test_reset_removes_entries() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = CheckpointStore::open(dir.path()).await.unwrap();
            store
                .save(&CheckpointEntry::new(PairKey::new("acme", "alice"), WindowSetting::AllTime, None, Utc::now()))
                .unwrap();
            store
                .save(&CheckpointEntry::new(PairKey::new("acme", "bob"), WindowSetting::AllTime, None, Utc::now()))
                .unwrap();
        }

        let mut host = TestHost::new();
        let args = ResetArgs {
            checkpoint_dir: Some(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()),
        };
        reset_checkpoints(&mut host, &args).await.unwrap();
        assert!(host.output_text().starts_with("Removed 2 checkpoint(s)"));

        let store = CheckpointStore::open(dir.path()).await.unwrap();
        assert!(store.load().unwrap().entries.is_empty());
    }
}
