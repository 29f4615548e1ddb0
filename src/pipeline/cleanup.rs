//! Best-effort removal of local working files. Nothing here fails: a file that
//! can't be removed is logged and left for the operator.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use log::warn;
use tokio::fs;
use uuid::Uuid;

pub async fn remove_file_quietly(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove {}: {}", path.display(), e),
    }
}

pub async fn remove_dir_quietly(path: &Path) {
    match fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove {}: {}", path.display(), e),
    }
}

/// A private working directory for one invocation, with `in/` and `out/`
/// subdirectories. Removed by [`cleanup`](Self::cleanup), or on drop when the
/// run is abandoned before reaching it.
pub struct Scratch {
    root: PathBuf,
    removed: bool,
}

impl Scratch {
    pub async fn create(base: &Path, label: &str, job_id: Uuid) -> std::io::Result<Self> {
        // unique per invocation so a duplicate delivery never shares files
        let root = base.join(format!("{}-{}-{}", label, job_id, Uuid::new_v4().simple()));
        fs::create_dir_all(root.join("in")).await?;
        fs::create_dir_all(root.join("out")).await?;
        Ok(Self {
            root,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn input(&self, name: &str) -> PathBuf {
        self.root.join("in").join(name)
    }

    pub fn output(&self, name: &str) -> PathBuf {
        self.root.join("out").join(name)
    }

    pub async fn cleanup(mut self) {
        remove_dir_quietly(&self.root).await;
        self.removed = true;
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove {}: {}", self.root.display(), e),
        }
    }
}
