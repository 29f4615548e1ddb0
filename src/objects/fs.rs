use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::{fs, sync::mpsc, task::JoinHandle};
use uuid::Uuid;

use super::{
    keys, presign::UrlSigner, NotificationRule, ObjectCreated, ObjectStore, ObjectStoreError,
    SignedQuery,
};

struct Subscription {
    rules: Vec<NotificationRule>,
    tx: mpsc::UnboundedSender<ObjectCreated>,
}

/// Object store rooted at `<root>/<bucket>/`.
pub struct FsObjectStore {
    bucket_dir: PathBuf,
    bucket: String,
    signer: UrlSigner,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl FsObjectStore {
    pub async fn open(
        root: impl AsRef<Path>,
        bucket: impl Into<String>,
        signer: UrlSigner,
    ) -> Result<Self, ObjectStoreError> {
        let bucket = bucket.into();
        keys::validate(&bucket).map_err(|reason| ObjectStoreError::InvalidKey {
            key: bucket.clone(),
            reason,
        })?;
        let bucket_dir = root.as_ref().join(&bucket);
        fs::create_dir_all(&bucket_dir).await?;
        Ok(Self {
            bucket_dir,
            bucket,
            signer,
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        keys::validate(key).map_err(|reason| ObjectStoreError::InvalidKey {
            key: key.to_string(),
            reason,
        })?;
        Ok(self.bucket_dir.join(key))
    }

    /// A sibling path for staging a write; staged files start with `.` so the
    /// lifecycle sweep and readers never mistake them for objects.
    fn staging_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("object");
        path.with_file_name(format!(".{}.{}.part", name, Uuid::new_v4().simple()))
    }

    async fn commit(&self, key: &str, staged: &Path, path: &Path) -> Result<(), ObjectStoreError> {
        if let Err(e) = fs::rename(staged, path).await {
            let _ = fs::remove_file(staged).await;
            return Err(e.into());
        }
        let size = fs::metadata(path).await?.len();
        debug!("stored {}/{} ({} bytes)", self.bucket, key, size);
        self.notify(ObjectCreated {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            size,
        });
        Ok(())
    }

    fn notify(&self, event: ObjectCreated) {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscriptions.retain(|sub| {
            if sub.rules.iter().any(|rule| rule.matches(&event.key)) {
                sub.tx.send(event.clone()).is_ok()
            } else {
                !sub.tx.is_closed()
            }
        });
    }

    /// Deletes every object last modified more than `max_age` ago, whatever
    /// the state of the job that owns it.
    pub async fn purge_older_than(&self, max_age: Duration) -> Result<usize, ObjectStoreError> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut purged = 0;
        let mut dirs = vec![self.bucket_dir.clone()];

        while let Some(dir) = dirs.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    dirs.push(entry.path());
                    continue;
                }
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                let modified = meta.modified()?;
                if modified <= cutoff {
                    match fs::remove_file(entry.path()).await {
                        Ok(()) => purged += 1,
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            if dir != self.bucket_dir {
                // only succeeds once a batch directory has been emptied
                let _ = fs::remove_dir(&dir).await;
            }
        }

        Ok(purged)
    }

    /// Runs the bucket lifecycle policy every `every`.
    pub fn spawn_lifecycle(self: Arc<Self>, max_age: Duration, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                match self.purge_older_than(max_age).await {
                    Ok(0) => {}
                    Ok(n) => info!("lifecycle removed {} object(s) from {}", n, self.bucket),
                    Err(e) => error!("object lifecycle sweep failed: {}", e),
                }
            }
        })
    }
}

fn not_found(key: &str, e: std::io::Error) -> ObjectStoreError {
    if e.kind() == ErrorKind::NotFound {
        ObjectStoreError::NotFound(key.to_string())
    } else {
        ObjectStoreError::Io(e)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), ObjectStoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let staged = Self::staging_path(&path);
        fs::write(&staged, bytes).await?;
        self.commit(key, &staged, &path).await
    }

    async fn put_file(&self, key: &str, source: &Path) -> Result<(), ObjectStoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let staged = Self::staging_path(&path);
        if let Err(e) = fs::copy(source, &staged).await {
            let _ = fs::remove_file(&staged).await;
            return Err(e.into());
        }
        self.commit(key, &staged, &path).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let path = self.path_for(key)?;
        fs::read(&path).await.map_err(|e| not_found(key, e))
    }

    async fn download_to(&self, key: &str, dest: &Path) -> Result<u64, ObjectStoreError> {
        let path = self.path_for(key)?;
        fs::copy(&path, dest).await.map_err(|e| not_found(key, e))
    }

    fn presign(&self, key: &str, ttl: Duration, filename: &str) -> Result<String, ObjectStoreError> {
        self.path_for(key)?;
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        self.signer.url(&self.bucket, key, expires, filename)
    }

    fn verify_presigned(&self, key: &str, query: &SignedQuery) -> Result<(), ObjectStoreError> {
        self.path_for(key)?;
        self.signer
            .verify(&self.bucket, key, query, Utc::now().timestamp())
            .inspect_err(|e| warn!("rejected pre-signed request for {}: {}", key, e))
    }

    fn subscribe(&self, rules: Vec<NotificationRule>) -> mpsc::UnboundedReceiver<ObjectCreated> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Subscription { rules, tx });
        rx
    }
}
