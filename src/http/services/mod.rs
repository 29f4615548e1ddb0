pub mod convert;
pub mod download;
pub mod jobs;
pub mod objects;
pub mod progress;
pub mod version;
