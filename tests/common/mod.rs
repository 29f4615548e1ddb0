#![allow(dead_code)]

use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use convertd::{
    config::Config,
    job::{Job, JobPatch, JobStatus},
    objects::{NotificationRule, ObjectCreated, ObjectStore, ObjectStoreError, SignedQuery},
    pipeline::submit::UploadedFile,
    state::AppContext,
    store::{JobStore, StoreError},
};
use image::{Rgb, RgbImage};
use lopdf::{dictionary, Document, Object, Stream};
use tokio::sync::mpsc;
use uuid::Uuid;

/// A context on fresh filesystem stores under `root`.
pub async fn context(root: &Path) -> AppContext {
    let (ctx, _, _) = AppContext::open(Config::with_root(root)).await.unwrap();
    ctx
}

/// Writes `bytes` where the HTTP layer would have spooled an upload.
pub async fn spooled(ctx: &AppContext, filename: &str, content_type: &str, bytes: &[u8]) -> UploadedFile {
    let path = ctx
        .config
        .scratch_dir
        .join(format!("upload-{}", Uuid::new_v4().simple()));
    tokio::fs::write(&path, bytes).await.unwrap();
    UploadedFile {
        filename: filename.to_string(),
        content_type: Some(content_type.to_string()),
        path,
        size: bytes.len() as u64,
    }
}

/// A PDF whose page `n` carries the text `Page n`.
pub fn numbered_pdf(pages: u32) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for n in 1..=pages {
        let content = format!("BT /F1 12 Tf 50 700 Td (Page {}) Tj ET", n);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

pub fn page_texts(pdf: &[u8]) -> Vec<String> {
    let doc = Document::load_mem(pdf).unwrap();
    let count = doc.get_pages().len() as u32;
    (1..=count)
        .map(|n| doc.extract_text(&[n]).unwrap().trim().to_string())
        .collect()
}

/// Page widths in points, in page order.
pub fn page_widths(pdf: &[u8]) -> Vec<i64> {
    let doc = Document::load_mem(pdf).unwrap();
    doc.get_pages()
        .values()
        .map(|&id| {
            let page = doc.get_dictionary(id).unwrap();
            let media_box = page.get(b"MediaBox").unwrap().as_array().unwrap();
            media_box[2].as_i64().unwrap()
        })
        .collect()
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = std::io::Cursor::new(Vec::new());
    RgbImage::from_pixel(width, height, Rgb([20, 120, 220]))
        .write_to(&mut bytes, image::ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}

/// Polls the job store until the job reaches a terminal state.
pub async fn wait_for_terminal(ctx: &AppContext, job_id: Uuid) -> Job {
    for _ in 0..250 {
        if let Ok(job) = ctx.jobs.get(job_id).await {
            if job.status.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {} never finished", job_id);
}

pub fn assert_status(job: &Job, status: JobStatus) {
    assert_eq!(job.status, status, "job ended with error {:?}", job.error);
}

/// An object store whose disk is full: reads work, every write fails.
pub struct RefusingObjects(pub Arc<dyn ObjectStore>);

fn disk_full() -> ObjectStoreError {
    ObjectStoreError::Io(std::io::Error::other("disk full"))
}

#[async_trait]
impl ObjectStore for RefusingObjects {
    fn bucket(&self) -> &str {
        self.0.bucket()
    }

    async fn put(&self, _key: &str, _bytes: Vec<u8>) -> Result<(), ObjectStoreError> {
        Err(disk_full())
    }

    async fn put_file(&self, _key: &str, _path: &Path) -> Result<(), ObjectStoreError> {
        Err(disk_full())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        self.0.get(key).await
    }

    async fn download_to(&self, key: &str, path: &Path) -> Result<u64, ObjectStoreError> {
        self.0.download_to(key, path).await
    }

    fn presign(&self, key: &str, ttl: Duration, filename: &str) -> Result<String, ObjectStoreError> {
        self.0.presign(key, ttl, filename)
    }

    fn verify_presigned(&self, key: &str, query: &SignedQuery) -> Result<(), ObjectStoreError> {
        self.0.verify_presigned(key, query)
    }

    fn subscribe(&self, rules: Vec<NotificationRule>) -> mpsc::UnboundedReceiver<ObjectCreated> {
        self.0.subscribe(rules)
    }
}

/// A job store whose reads hang; writes go through.
pub struct StalledJobs(pub Arc<dyn JobStore>);

#[async_trait]
impl JobStore for StalledJobs {
    async fn upsert(&self, job_id: Uuid, patch: JobPatch) -> Result<Job, StoreError> {
        self.0.upsert(job_id, patch).await
    }

    async fn get(&self, job_id: Uuid) -> Result<Job, StoreError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        self.0.get(job_id).await
    }

    async fn list_by_status(&self, status: JobStatus, limit: usize) -> Result<Vec<Job>, StoreError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        self.0.list_by_status(status, limit).await
    }

    async fn delete(&self, job_id: Uuid) -> Result<bool, StoreError> {
        self.0.delete(job_id).await
    }
}
