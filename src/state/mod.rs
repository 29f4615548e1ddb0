//! Handles shared by every handler invocation. Job state lives only in the
//! job store.

use std::sync::Arc;

use crate::{
    config::Config,
    objects::{presign::UrlSigner, FsObjectStore, ObjectStore},
    store::{JobStore, SqliteJobStore},
};

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub jobs: Arc<dyn JobStore>,
    pub objects: Arc<dyn ObjectStore>,
}

impl AppContext {
    pub fn new(config: Config, jobs: Arc<dyn JobStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            config: Arc::new(config),
            jobs,
            objects,
        }
    }

    /// Opens the filesystem-backed stores described by `config`. Their
    /// expiry sweeps are left to the caller.
    pub async fn open(
        config: Config,
    ) -> anyhow::Result<(Self, Arc<SqliteJobStore>, Arc<FsObjectStore>)> {
        let jobs = Arc::new(SqliteJobStore::open(&config.data_dir, config.job_ttl).await?);
        let objects = Arc::new(
            FsObjectStore::open(
                &config.object_dir,
                config.bucket.clone(),
                UrlSigner::new(config.signing_secret.clone(), config.public_url.clone()),
            )
            .await?,
        );
        tokio::fs::create_dir_all(&config.scratch_dir).await?;
        let ctx = Self::new(config, jobs.clone(), objects.clone());
        Ok((ctx, jobs, objects))
    }
}
