//! Temporary on-disk copies of uploaded files.
//!
//! The backend client takes file paths, so every uploaded blob is written to a
//! uniquely named file for the duration of one request. A [`StagedFile`]
//! removes its file when released or dropped, so a cancelled request still
//! cleans up after itself.

use crate::models::UploadedFile;
use prometheus::IntGauge;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("Failed to create staging directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to stage {file_name}: {source}")]
    Write {
        file_name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Count of staged files still on disk, mirrored into an optional gauge.
#[derive(Clone, Debug, Default)]
struct LiveFiles {
    count: Arc<AtomicUsize>,
    gauge: Option<IntGauge>,
}

impl LiveFiles {
    fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    fn inc(&self) {
        let now = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        self.publish(now);
    }

    fn dec(&self) {
        let now = self.count.fetch_sub(1, Ordering::SeqCst) - 1;
        self.publish(now);
    }

    fn publish(&self, count: usize) {
        if let Some(gauge) = &self.gauge {
            gauge.set(count as i64);
        }
    }
}

/// Directory holding the staged files of in-flight requests.
#[derive(Clone, Debug)]
pub struct StagingArea {
    dir: PathBuf,
    live: LiveFiles,
}

impl StagingArea {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, StagingError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| StagingError::CreateDir {
                path: dir.clone(),
                source,
            })?;

        Ok(Self {
            dir,
            live: LiveFiles::default(),
        })
    }

    /// Mirror the live file count into `gauge`, on every change including
    /// cleanup of cancelled requests.
    pub fn with_gauge(mut self, gauge: IntGauge) -> Self {
        gauge.set(self.live.get() as i64);
        self.live.gauge = Some(gauge);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of staged files not yet removed.
    pub fn live_files(&self) -> usize {
        self.live.get()
    }

    /// Write `file` under a fresh name, keeping its extension.
    ///
    /// Bytes go to a hidden `.part` file first and are renamed into place, so
    /// the final path never exposes a partially written file. The write runs
    /// on the blocking pool; if the caller is cancelled meanwhile, whatever it
    /// leaves behind is removed.
    pub async fn stage(&self, file: &UploadedFile) -> Result<StagedFile, StagingError> {
        let id = Uuid::new_v4();
        let file_name = match extension_of(&file.file_name) {
            Some(ext) => format!("{}.{}", id, ext),
            None => id.to_string(),
        };
        let path = self.dir.join(&file_name);
        let partial = self.dir.join(format!(".{}.part", id));

        let mut pending = PendingWrite {
            partial: partial.clone(),
            path: path.clone(),
            abandoned: Arc::new(AtomicBool::new(false)),
            armed: true,
        };

        let write = {
            let (partial, path) = (partial.clone(), path.clone());
            let abandoned = pending.abandoned.clone();
            let data = file.data.clone();
            tokio::task::spawn_blocking(move || {
                write_then_rename(&partial, &path, &data, &abandoned)
            })
        };

        let result = match write.await {
            Ok(result) => result,
            Err(e) => Err(std::io::Error::other(e)),
        };
        pending.armed = false;

        if let Err(source) = result {
            return Err(StagingError::Write {
                file_name: file.file_name.clone(),
                source,
            });
        }

        self.live.inc();
        tracing::debug!(
            original_name = %file.file_name,
            path = %path.display(),
            size = file.data.len(),
            "Staged uploaded file"
        );

        Ok(StagedFile {
            path,
            live: self.live.clone(),
            released: false,
        })
    }

    /// Stage every file; on failure the ones already written are removed.
    pub async fn stage_all(&self, files: &[UploadedFile]) -> Result<StagedFiles, StagingError> {
        let mut staged = StagedFiles::default();
        for file in files {
            match self.stage(file).await {
                Ok(s) => staged.files.push(s),
                Err(e) => {
                    staged.release().await;
                    return Err(e);
                }
            }
        }
        Ok(staged)
    }
}

/// Blocking half of [`StagingArea::stage`].
fn write_then_rename(
    partial: &Path,
    path: &Path,
    data: &[u8],
    abandoned: &AtomicBool,
) -> std::io::Result<()> {
    let result = std::fs::write(partial, data).and_then(|()| {
        if abandoned.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                ErrorKind::Interrupted,
                "staging abandoned by caller",
            ));
        }
        std::fs::rename(partial, path)
    });
    if result.is_err() {
        let _ = std::fs::remove_file(partial);
    }
    result
}

/// Removes the files of a write whose caller went away before it finished.
///
/// The partial file is removed before the final one: a rename racing with
/// this drop either fails on the missing partial or lands before the final
/// path is removed.
struct PendingWrite {
    partial: PathBuf,
    path: PathBuf,
    abandoned: Arc<AtomicBool>,
    armed: bool,
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.abandoned.store(true, Ordering::SeqCst);
        let _ = std::fs::remove_file(&self.partial);
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Alphanumeric extension of `name`, if any.
fn extension_of(name: &str) -> Option<&str> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
}

/// One staged file, owned by the request that created it.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    live: LiveFiles,
    released: bool,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file. Errors are logged and swallowed.
    pub async fn release(mut self) {
        match fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "Staged file already removed");
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove staged file"
                );
            }
        }
        self.mark_released();
    }

    fn mark_released(&mut self) {
        if !self.released {
            self.released = true;
            self.live.dec();
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Reached when the owning request is cancelled mid-flight.
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != ErrorKind::NotFound
        {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove staged file on drop"
            );
        }
        self.mark_released();
    }
}

/// All files staged for one request.
#[derive(Debug, Default)]
pub struct StagedFiles {
    files: Vec<StagedFile>,
}

impl StagedFiles {
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub async fn release(self) {
        for file in self.files {
            file.release().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn area() -> StagingArea {
        StagingArea::new(format!("target/test-staging-{}", Uuid::new_v4()))
            .await
            .expect("staging dir")
    }

    async fn dir_entries(area: &StagingArea) -> usize {
        let mut entries = fs::read_dir(area.dir()).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        count
    }

    #[tokio::test]
    async fn stage_preserves_extension_and_bytes() {
        let area = area().await;
        let staged = area
            .stage(&UploadedFile::new("holiday photo.JPG", vec![1, 2, 3]))
            .await
            .unwrap();

        assert_eq!(staged.path().extension().unwrap(), "JPG");
        assert_eq!(fs::read(staged.path()).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(area.live_files(), 1);

        staged.release().await;
        assert_eq!(area.live_files(), 0);
        assert_eq!(dir_entries(&area).await, 0);
        fs::remove_dir_all(area.dir()).await.ok();
    }

    #[tokio::test]
    async fn names_are_unique() {
        let area = area().await;
        let file = UploadedFile::new("same.png", vec![0]);
        let a = area.stage(&file).await.unwrap();
        let b = area.stage(&file).await.unwrap();

        assert_ne!(a.path(), b.path());
        a.release().await;
        b.release().await;
        fs::remove_dir_all(area.dir()).await.ok();
    }

    #[test]
    fn unusual_extensions_are_dropped() {
        assert_eq!(extension_of("image.png"), Some("png"));
        assert_eq!(extension_of("archive.tar.gz"), Some("gz"));
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of("weird.p g"), None);
        assert_eq!(extension_of("../../etc/passwd"), None);
    }

    #[tokio::test]
    async fn release_tolerates_missing_file() {
        let area = area().await;
        let staged = area
            .stage(&UploadedFile::new("gone.png", vec![1]))
            .await
            .unwrap();

        fs::remove_file(staged.path()).await.unwrap();
        staged.release().await;

        assert_eq!(area.live_files(), 0);
        fs::remove_dir_all(area.dir()).await.ok();
    }

    #[tokio::test]
    async fn drop_removes_unreleased_files() {
        let gauge = IntGauge::new("test_staged_files", "staged files").unwrap();
        let area = area().await.with_gauge(gauge.clone());
        let staged = area
            .stage_all(&[
                UploadedFile::new("a.png", vec![1]),
                UploadedFile::new("b.webp", vec![2]),
            ])
            .await
            .unwrap();
        assert_eq!(staged.len(), 2);
        assert_eq!(dir_entries(&area).await, 2);
        assert_eq!(gauge.get(), 2);

        drop(staged);

        assert_eq!(area.live_files(), 0);
        assert_eq!(gauge.get(), 0);
        assert_eq!(dir_entries(&area).await, 0);
        fs::remove_dir_all(area.dir()).await.ok();
    }

    #[tokio::test]
    async fn cancelled_stage_leaves_no_partial_files() {
        let area = area().await;
        let file = UploadedFile::new("big.png", vec![7u8; 4 * 1024 * 1024]);

        for delay_ms in [0, 1, 2, 5] {
            let task = {
                let (area, file) = (area.clone(), file.clone());
                tokio::spawn(async move { area.stage(&file).await })
            };
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            task.abort();
            if let Ok(Ok(staged)) = task.await {
                staged.release().await;
            }
        }

        // Let blocking writes that outlived their callers finish.
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        assert_eq!(dir_entries(&area).await, 0);
        assert_eq!(area.live_files(), 0);
        fs::remove_dir_all(area.dir()).await.ok();
    }
}
