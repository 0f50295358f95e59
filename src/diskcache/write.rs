//! The disk write-back cache.
//!
//! Producers stage writes as files ([`DiskCacheWrite::write_disk_file`])
//! and enqueue their object names; one background worker drains the queue
//! every period and pushes the files to object storage. A staged file is
//! deleted from disk on upload success, before its task counts as
//! complete, and its name moves to the back of the shared [`LruIndex`] so
//! the read cache knows the object is no longer local.
//!
//! Upload failures retry indefinitely until the cache is stopped; a
//! stopped cache leaves unuploaded files behind for the next run's
//! [`DiskCacheWrite::upload_all_cache_write_file`].

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use bytes::Bytes;
use rand::RngCore;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cadapter::client::{ObjectBackend, ObjectClient};

use super::lru::LruIndex;
use super::naming::{path_by_obj_name, valid_name_of_inode};
use super::sync::SynchronizationTask;

/// Tunables beyond the staging directory itself.
#[derive(Debug, Clone)]
pub struct DiskCacheWriteOptions {
    /// Nonzero prefixes fan staged files out into subdirectories.
    pub object_prefix: u32,
    /// Worker wake period; also the retry and poll interval.
    pub async_upload_period: Duration,
}

impl Default for DiskCacheWriteOptions {
    fn default() -> Self {
        Self {
            object_prefix: 0,
            async_upload_period: Duration::from_millis(1000),
        }
    }
}

/// One pending upload. The context owns the read buffer; it is dropped on
/// terminal success and re-used as-is across retries.
struct PutObjectContext {
    key: String,
    buffer: Bytes,
    /// The bulk startup flush removes files itself after the whole batch.
    remove_on_success: bool,
}

struct WriteCacheInner<B: ObjectBackend> {
    client: ObjectClient<B>,
    cache_dir: PathBuf,
    object_prefix: u32,
    async_upload_period: Duration,
    wait_upload: StdMutex<VecDeque<String>>,
    /// Notified by the worker whenever a scan finds the queue empty.
    queue_drained: Notify,
    /// Interrupts the worker's period sleep.
    shutdown: Notify,
    /// Worker lifecycle flag.
    running: AtomicBool,
    /// Cache lifecycle flag; upload retries stop once cleared.
    alive: AtomicBool,
    cached_obj_names: Arc<LruIndex>,
    uploaded_objects: AtomicU64,
    uploaded_bytes: AtomicU64,
}

impl<B: ObjectBackend + 'static> WriteCacheInner<B> {
    fn staging_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(path_by_obj_name(name, self.object_prefix))
    }

    /// Swaps out the whole queue, or drains just the names of one inode.
    fn take_upload_names(&self, inode: Option<&str>) -> Vec<String> {
        let mut queue = self.wait_upload.lock().unwrap();
        match inode {
            None => queue.drain(..).collect(),
            Some(inode) => {
                let mut matched = Vec::new();
                queue.retain(|name| {
                    if valid_name_of_inode(inode, name) {
                        matched.push(name.clone());
                        false
                    } else {
                        true
                    }
                });
                matched
            }
        }
    }

    /// Enumerates every staged object name, recursing through prefix
    /// fan-out directories.
    async fn load_all_cache_file(&self) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dirs = vec![self.cache_dir.clone()];
        while let Some(dir) = dirs.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .with_context(|| format!("open staging dir {}", dir.display()))?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    dirs.push(entry.path());
                } else {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }
        Ok(names)
    }

    async fn file_exist(&self, inode: &str) -> anyhow::Result<bool> {
        let names = self.load_all_cache_file().await?;
        Ok(names.iter().any(|name| valid_name_of_inode(inode, name)))
    }

    /// Reads a staged file fully. Short reads are errors.
    async fn read_file(&self, name: &str) -> anyhow::Result<Bytes> {
        let path = self.staging_path(name);
        let expected = fs::metadata(&path)
            .await
            .with_context(|| format!("stat staged file {name}"))?
            .len() as usize;
        let data = fs::read(&path)
            .await
            .with_context(|| format!("read staged file {name}"))?;
        if data.len() < expected {
            bail!(
                "staged file {name} read {} of {} bytes",
                data.len(),
                expected
            );
        }
        Ok(Bytes::from(data))
    }

    /// Deletes the staged file, then marks the object no-longer-local.
    async fn remove_file(&self, name: &str) -> anyhow::Result<()> {
        let path = self.staging_path(name);
        fs::remove_file(&path)
            .await
            .with_context(|| format!("remove staged file {name}"))?;
        self.cached_obj_names.move_back(name);
        debug!(name, "staged file removed after upload");
        Ok(())
    }
}

/// Spawns the retry loop owning one upload context.
fn spawn_upload<B: ObjectBackend + 'static>(
    inner: Arc<WriteCacheInner<B>>,
    context: PutObjectContext,
    sync: Option<Arc<SynchronizationTask>>,
) {
    tokio::spawn(async move {
        let started = Instant::now();
        loop {
            match inner.client.put_object(&context.key, &context.buffer).await {
                Ok(()) => {
                    inner.uploaded_objects.fetch_add(1, Ordering::Relaxed);
                    inner
                        .uploaded_bytes
                        .fetch_add(context.buffer.len() as u64, Ordering::Relaxed);
                    debug!(
                        key = %context.key,
                        bytes = context.buffer.len(),
                        elapsed_us = started.elapsed().as_micros() as u64,
                        "upload complete"
                    );
                    if context.remove_on_success
                        && let Err(err) = inner.remove_file(&context.key).await
                    {
                        warn!(key = %context.key, %err, "remove uploaded file failed");
                    }
                    if let Some(sync) = sync {
                        sync.signal(true);
                    }
                    return;
                }
                Err(err) => {
                    warn!(key = %context.key, %err, "upload object failed");
                    if !inner.alive.load(Ordering::SeqCst) {
                        // Stopped: leave the file on disk for the next run.
                        if let Some(sync) = sync {
                            sync.signal(false);
                        }
                        return;
                    }
                    let jitter = Duration::from_millis(rand::rng().next_u64() % 20);
                    tokio::time::sleep(inner.async_upload_period + jitter).await;
                }
            }
        }
    });
}

/// Reads one staged file and submits it. Read failures signal the batch
/// and surface to the caller; nothing is enqueued to object storage.
async fn upload_one<B: ObjectBackend + 'static>(
    inner: &Arc<WriteCacheInner<B>>,
    name: &str,
    sync: Option<Arc<SynchronizationTask>>,
) -> anyhow::Result<()> {
    let buffer = match inner.read_file(name).await {
        Ok(buffer) => buffer,
        Err(err) => {
            warn!(name, %err, "read staged file for upload failed");
            if let Some(sync) = sync {
                sync.signal(false);
            }
            return Err(err);
        }
    };
    spawn_upload(
        inner.clone(),
        PutObjectContext {
            key: name.to_string(),
            buffer,
            remove_on_success: true,
        },
        sync,
    );
    Ok(())
}

async fn upload_loop<B: ObjectBackend + 'static>(inner: Arc<WriteCacheInner<B>>) {
    info!("async upload worker started");
    let mut last_batch: Option<Arc<SynchronizationTask>> = None;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(inner.async_upload_period) => {}
            _ = inner.shutdown.notified() => break,
        }
        if !inner.running.load(Ordering::SeqCst) {
            break;
        }

        let batch = inner.take_upload_names(None);
        if batch.is_empty() {
            if inner.wait_upload.lock().unwrap().is_empty() {
                inner.queue_drained.notify_waiters();
            }
            continue;
        }

        debug!(count = batch.len(), "async upload batch");
        let sync = Arc::new(SynchronizationTask::new(batch.len()));
        for name in &batch {
            let _ = upload_one(&inner, name, Some(sync.clone())).await;
        }
        last_batch = Some(sync);
    }
    // Do not exit under a half-signalled batch; in-flight callbacks may
    // still run afterwards and must find the world consistent.
    if let Some(sync) = last_batch {
        sync.wait().await;
    }
    info!("async upload worker exited");
}

/// Write-back cache over one staging directory.
pub struct DiskCacheWrite<B: ObjectBackend + 'static> {
    inner: Arc<WriteCacheInner<B>>,
    worker: StdMutex<Option<JoinHandle<()>>>,
}

impl<B: ObjectBackend + 'static> DiskCacheWrite<B> {
    pub fn new(
        client: ObjectClient<B>,
        cache_dir: impl Into<PathBuf>,
        options: DiskCacheWriteOptions,
        cached_obj_names: Arc<LruIndex>,
    ) -> Self {
        Self {
            inner: Arc::new(WriteCacheInner {
                client,
                cache_dir: cache_dir.into(),
                object_prefix: options.object_prefix,
                async_upload_period: options.async_upload_period,
                wait_upload: StdMutex::new(VecDeque::new()),
                queue_drained: Notify::new(),
                shutdown: Notify::new(),
                running: AtomicBool::new(false),
                alive: AtomicBool::new(true),
                cached_obj_names,
                uploaded_objects: AtomicU64::new(0),
                uploaded_bytes: AtomicU64::new(0),
            }),
            worker: StdMutex::new(None),
        }
    }

    /// Creates the staging directory.
    pub async fn init(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.inner.cache_dir)
            .await
            .with_context(|| {
                format!("create staging dir {}", self.inner.cache_dir.display())
            })?;
        Ok(())
    }

    /// Stages `data` under `name`. `force` makes the data durable on local
    /// disk before returning. Nothing is enqueued; callers follow up with
    /// [`Self::async_upload_enqueue`] on success.
    pub async fn write_disk_file(
        &self,
        name: &str,
        data: &[u8],
        force: bool,
    ) -> anyhow::Result<usize> {
        let path = self.inner.staging_path(name);
        if self.inner.object_prefix != 0
            && let Some(parent) = path.parent()
        {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create prefix dir for {name}"))?;
        }
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .await
            .with_context(|| format!("open staged file {name}"))?;
        file.write_all(data)
            .await
            .with_context(|| format!("write staged file {name}"))?;
        if force {
            file.sync_data()
                .await
                .with_context(|| format!("fdatasync staged file {name}"))?;
        }
        debug!(name, len = data.len(), force, "staged write file");
        Ok(data.len())
    }

    /// Queues a staged file for background upload. The file must already
    /// be on disk.
    pub fn async_upload_enqueue(&self, name: &str) {
        self.inner
            .wait_upload
            .lock()
            .unwrap()
            .push_back(name.to_string());
    }

    /// Spawns the background drain worker. Idempotent.
    pub fn async_upload_run(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            info!("async upload worker already running");
            return;
        }
        let inner = self.inner.clone();
        *self.worker.lock().unwrap() = Some(tokio::spawn(upload_loop(inner)));
    }

    /// Drains the queue, stops retries, and joins the worker. In-flight
    /// object-store callbacks may still complete afterwards.
    pub async fn async_upload_stop(&self) {
        if self.inner.running.load(Ordering::SeqCst) {
            loop {
                if self.inner.wait_upload.lock().unwrap().is_empty() {
                    break;
                }
                let _ = tokio::time::timeout(
                    self.inner.async_upload_period,
                    self.inner.queue_drained.notified(),
                )
                .await;
            }
        }
        self.inner.alive.store(false, Ordering::SeqCst);
        if self.inner.running.swap(false, Ordering::SeqCst) {
            info!("stopping async upload worker");
            self.inner.shutdown.notify_waiters();
            let handle = self.worker.lock().unwrap().take();
            if let Some(handle) = handle {
                let _ = handle.await;
            }
        }
    }

    /// Uploads one staged file, optionally reporting into a batch latch.
    pub async fn upload_file(
        &self,
        name: &str,
        sync: Option<Arc<SynchronizationTask>>,
    ) -> anyhow::Result<()> {
        upload_one(&self.inner, name, sync).await
    }

    /// Makes every staged write of `inode` durable in object storage:
    /// drains matching queue entries batch by batch, then polls the
    /// staging directory until the upload callbacks have removed the last
    /// matching file.
    pub async fn upload_file_by_inode(&self, inode: &str) -> anyhow::Result<()> {
        if !fs::try_exists(&self.inner.cache_dir).await? {
            bail!("cache write dir does not exist");
        }

        loop {
            let batch = self.inner.take_upload_names(Some(inode));
            if batch.is_empty() {
                break;
            }
            debug!(inode, count = batch.len(), "flush-by-inode batch");
            let sync = Arc::new(SynchronizationTask::new(batch.len()));
            for name in &batch {
                let _ = upload_one(&self.inner, name, Some(sync.clone())).await;
            }
            sync.wait().await;
            if !sync.succeeded() {
                bail!("flush inode {inode}: upload batch failed");
            }
        }

        // Cover the window between upload submission and the callback's
        // file removal.
        while self.inner.file_exist(inode).await? {
            debug!(inode, "waiting for staged files to upload");
            tokio::time::sleep(self.inner.async_upload_period).await;
        }
        Ok(())
    }

    /// Bulk flush used at startup/shutdown: enumerate all staged files,
    /// submit each, wait for the countdown, then remove every enumerated
    /// file. Removal is unconditional; read failures skip submission and
    /// only count down.
    pub async fn upload_all_cache_write_file(&self) -> anyhow::Result<()> {
        debug!("upload all staged write files start");
        if !fs::try_exists(&self.inner.cache_dir).await? {
            bail!("cache write dir does not exist");
        }
        let names = self.inner.load_all_cache_file().await?;
        if names.is_empty() {
            return Ok(());
        }

        let pending = Arc::new(SynchronizationTask::new(names.len()));
        for name in &names {
            let buffer = match self.inner.read_file(name).await {
                Ok(buffer) => buffer,
                Err(err) => {
                    warn!(name = %name, %err, "read staged file failed, leaving it behind");
                    pending.signal(true);
                    continue;
                }
            };
            spawn_upload(
                self.inner.clone(),
                PutObjectContext {
                    key: name.clone(),
                    buffer,
                    remove_on_success: false,
                },
                Some(pending.clone()),
            );
        }
        pending.wait().await;

        for name in &names {
            if let Err(err) = self.inner.remove_file(name).await {
                warn!(name = %name, %err, "remove staged file after bulk flush failed");
            }
        }
        debug!("upload all staged write files end");
        Ok(())
    }

    /// No queued names and no staged files.
    pub async fn is_cache_clean(&self) -> anyhow::Result<bool> {
        if !self.inner.wait_upload.lock().unwrap().is_empty() {
            return Ok(false);
        }
        if !fs::try_exists(&self.inner.cache_dir).await? {
            return Ok(true);
        }
        Ok(self.inner.load_all_cache_file().await?.is_empty())
    }

    /// Snapshot of the pending queue, for observers.
    pub fn pending_uploads(&self) -> Vec<String> {
        self.inner
            .wait_upload
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .collect()
    }

    /// (objects, bytes) uploaded successfully so far.
    pub fn uploaded(&self) -> (u64, u64) {
        (
            self.inner.uploaded_objects.load(Ordering::Relaxed),
            self.inner.uploaded_bytes.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::client::BackendError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct MemBackend {
        objects: Arc<StdMutex<HashMap<String, Vec<u8>>>>,
        fail_remaining: Arc<AtomicUsize>,
    }

    impl MemBackend {
        fn failing_first(count: usize) -> Self {
            let backend = Self::default();
            backend.fail_remaining.store(count, Ordering::SeqCst);
            backend
        }

        fn keys(&self) -> Vec<String> {
            let mut keys: Vec<_> = self.objects.lock().unwrap().keys().cloned().collect();
            keys.sort();
            keys
        }
    }

    #[async_trait]
    impl ObjectBackend for MemBackend {
        async fn put_object(&self, key: &str, data: &[u8]) -> Result<(), BackendError> {
            if self
                .fail_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err("injected upload failure".into());
            }
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), data.to_vec());
            Ok(())
        }

        async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
            Ok(self.objects.lock().unwrap().get(key).cloned())
        }

        async fn delete_object(&self, key: &str) -> Result<(), BackendError> {
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }
    }

    fn test_cache(
        backend: MemBackend,
        dir: &Path,
    ) -> (DiskCacheWrite<MemBackend>, Arc<LruIndex>) {
        let lru = Arc::new(LruIndex::new());
        let cache = DiskCacheWrite::new(
            ObjectClient::new(backend),
            dir,
            DiskCacheWriteOptions {
                object_prefix: 0,
                async_upload_period: Duration::from_millis(10),
            },
            lru.clone(),
        );
        (cache, lru)
    }

    async fn wait_until(mut condition: impl AsyncFnMut() -> bool) {
        for _ in 0..500 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met within deadline");
    }

    #[tokio::test]
    async fn test_write_disk_file_stages_and_enqueues() {
        let dir = tempdir().unwrap();
        let (cache, _lru) = test_cache(MemBackend::default(), dir.path());
        cache.init().await.unwrap();

        let written = cache
            .write_disk_file("100-0", b"hello tide", true)
            .await
            .unwrap();
        assert_eq!(written, 10);
        assert!(dir.path().join("100-0").exists());
        assert!(cache.is_cache_clean().await.unwrap() == false);

        cache.async_upload_enqueue("100-0");
        assert_eq!(cache.pending_uploads(), vec!["100-0".to_string()]);
    }

    #[tokio::test]
    async fn test_prefixed_writes_land_in_fanout_dirs() {
        let dir = tempdir().unwrap();
        let lru = Arc::new(LruIndex::new());
        let cache = DiskCacheWrite::new(
            ObjectClient::new(MemBackend::default()),
            dir.path(),
            DiskCacheWriteOptions {
                object_prefix: 1,
                async_upload_period: Duration::from_millis(10),
            },
            lru,
        );
        cache.init().await.unwrap();
        cache.write_disk_file("7-0", b"abc", false).await.unwrap();
        assert!(!dir.path().join("7-0").exists());
        // The file is still discoverable by enumeration.
        assert!(!cache.is_cache_clean().await.unwrap());
    }

    #[tokio::test]
    async fn test_background_worker_drains_and_removes_files() {
        let dir = tempdir().unwrap();
        let backend = MemBackend::default();
        let (cache, lru) = test_cache(backend.clone(), dir.path());
        cache.init().await.unwrap();
        cache.async_upload_run();

        for name in ["1-0", "1-1"] {
            cache.write_disk_file(name, b"payload", false).await.unwrap();
            cache.async_upload_enqueue(name);
        }

        wait_until(async || backend.keys().len() == 2).await;
        wait_until(async || cache.is_cache_clean().await.unwrap()).await;
        assert_eq!(backend.keys(), vec!["1-0".to_string(), "1-1".to_string()]);
        // Uploaded names moved to the back of the shared index.
        assert!(lru.contains("1-0") && lru.contains("1-1"));
        assert_eq!(cache.uploaded().0, 2);

        cache.async_upload_stop().await;
    }

    #[tokio::test]
    async fn test_flush_by_inode_leaves_other_inodes_untouched() {
        let dir = tempdir().unwrap();
        let backend = MemBackend::default();
        let (cache, _lru) = test_cache(backend.clone(), dir.path());
        cache.init().await.unwrap();

        for name in ["i1-0", "i1-1", "i2-0"] {
            cache.write_disk_file(name, b"data", false).await.unwrap();
            cache.async_upload_enqueue(name);
        }

        cache.upload_file_by_inode("i1").await.unwrap();

        assert_eq!(backend.keys(), vec!["i1-0".to_string(), "i1-1".to_string()]);
        assert_eq!(cache.pending_uploads(), vec!["i2-0".to_string()]);
        assert!(!dir.path().join("i1-0").exists());
        assert!(!dir.path().join("i1-1").exists());
        assert!(dir.path().join("i2-0").exists());
    }

    #[tokio::test]
    async fn test_flush_by_inode_fails_on_missing_staged_file() {
        let dir = tempdir().unwrap();
        let (cache, _lru) = test_cache(MemBackend::default(), dir.path());
        cache.init().await.unwrap();

        // Enqueued but never staged.
        cache.async_upload_enqueue("9-0");
        assert!(cache.upload_file_by_inode("9").await.is_err());
    }

    #[tokio::test]
    async fn test_upload_retries_until_the_backend_recovers() {
        let dir = tempdir().unwrap();
        let backend = MemBackend::failing_first(2);
        let (cache, _lru) = test_cache(backend.clone(), dir.path());
        cache.init().await.unwrap();

        cache.write_disk_file("5-0", b"retry me", false).await.unwrap();
        let sync = Arc::new(SynchronizationTask::new(1));
        cache.upload_file("5-0", Some(sync.clone())).await.unwrap();
        sync.wait().await;

        assert!(sync.succeeded());
        assert_eq!(backend.keys(), vec!["5-0".to_string()]);
        assert!(!dir.path().join("5-0").exists());
    }

    #[tokio::test]
    async fn test_stop_drains_queue_then_joins_worker() {
        let dir = tempdir().unwrap();
        let backend = MemBackend::default();
        let (cache, _lru) = test_cache(backend.clone(), dir.path());
        cache.init().await.unwrap();
        cache.async_upload_run();

        cache.write_disk_file("3-0", b"last write", false).await.unwrap();
        cache.async_upload_enqueue("3-0");

        cache.async_upload_stop().await;
        assert!(cache.pending_uploads().is_empty());
        wait_until(async || backend.keys() == vec!["3-0".to_string()]).await;
    }

    #[tokio::test]
    async fn test_upload_all_flushes_and_removes_everything() {
        let dir = tempdir().unwrap();
        let backend = MemBackend::default();
        let (cache, _lru) = test_cache(backend.clone(), dir.path());
        cache.init().await.unwrap();

        for name in ["a-0", "a-1", "b-0"] {
            cache.write_disk_file(name, b"bulk", false).await.unwrap();
        }

        cache.upload_all_cache_write_file().await.unwrap();
        assert_eq!(
            backend.keys(),
            vec!["a-0".to_string(), "a-1".to_string(), "b-0".to_string()]
        );
        assert!(cache.is_cache_clean().await.unwrap());
    }

    #[tokio::test]
    async fn test_clean_cache_reports_clean() {
        let dir = tempdir().unwrap();
        let (cache, _lru) = test_cache(MemBackend::default(), dir.path());
        cache.init().await.unwrap();
        assert!(cache.is_cache_clean().await.unwrap());
    }
}
