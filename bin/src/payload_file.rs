use std::{
    io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use tracing::{debug, warn};

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

/// Zero-filled upload file in the temp dir, removed on drop
#[derive(Debug)]
pub struct PayloadFile {
    path: PathBuf,
}

impl PayloadFile {
    pub async fn create(size: usize) -> io::Result<Self> {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "loadgen-payload-{}-{id}.bin",
            std::process::id()
        ));
        let file = tokio::fs::File::create(&path).await?;
        file.set_len(size as u64).await?;
        debug!(?path, size, "created payload file");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PayloadFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(path = ?self.path, %err, "failed to remove payload file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PayloadFile;

    #[tokio::test]
    async fn zero_filled_and_removed_on_drop() {
        let file = PayloadFile::create(3000).await.unwrap();
        let path = file.path().to_path_buf();

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents.len(), 3000);
        assert!(contents.iter().all(|b| *b == 0));

        drop(file);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn distinct_paths() {
        let a = PayloadFile::create(0).await.unwrap();
        let b = PayloadFile::create(0).await.unwrap();
        assert_ne!(a.path(), b.path());
    }
}
