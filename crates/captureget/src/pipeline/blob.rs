use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use mime::Mime;

/// Extensions accepted for CV uploads.
pub const ALLOWED_EXTENSIONS: [&str; 6] = ["pdf", "doc", "docx", "png", "jpg", "jpeg"];

/// Folder CVs attached to applications are stored under.
pub const CV_FOLDER: &str = "user_cvs";

/// A file received from a client, not yet stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl BlobUpload {
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
    }

    pub fn content_type(&self) -> Mime {
        mime_guess::from_path(&self.file_name).first_or_octet_stream()
    }

    /// Reject unsupported file types and oversize files before anything is stored.
    pub fn validate(&self, max_bytes: usize) -> Result<(), BlobError> {
        let extension = self.extension().unwrap_or_default();
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(BlobError::Rejected(
                "only pdf, doc, docx, png, jpg or jpeg files are accepted".to_string(),
            ));
        }
        if self.bytes.is_empty() {
            return Err(BlobError::Rejected("uploaded file is empty".to_string()));
        }
        if self.bytes.len() > max_bytes {
            return Err(BlobError::Rejected(format!(
                "uploaded file exceeds {max_bytes} bytes"
            )));
        }
        Ok(())
    }
}

/// Location of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub url: String,
    pub content_type: Mime,
}

/// Outbound file storage (CVs, logos).
pub trait BlobStore: Send + Sync {
    fn upload(&self, folder: &str, upload: BlobUpload) -> Result<StoredBlob, BlobError>;
    fn delete(&self, url: &str) -> Result<(), BlobError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("upload rejected: {0}")]
    Rejected(String),
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("blob storage unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for BlobError {
    fn from(value: std::io::Error) -> Self {
        BlobError::Unavailable(value.to_string())
    }
}

fn stored_name(upload: &BlobUpload) -> String {
    let id = uuid::Uuid::new_v4();
    match upload.extension() {
        Some(extension) => format!("{id}.{extension}"),
        None => id.to_string(),
    }
}

/// Stores files beneath a local directory and hands out `{base_url}/{folder}/{file}` URLs.
#[derive(Debug, Clone)]
pub struct DiskBlobStore {
    root: PathBuf,
    base_url: String,
}

impl DiskBlobStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Resolve a URL handed out by this store back to its file. Foreign URLs and anything
    /// trying to escape the root resolve to `None`.
    pub fn resolve(&self, url: &str) -> Option<PathBuf> {
        let relative = url.strip_prefix(&self.base_url)?.trim_start_matches('/');
        let mut segments = relative.split('/');
        let folder = segments.next()?;
        let file = segments.next()?;
        if segments.next().is_some() {
            return None;
        }
        self.locate(folder, file)
    }

    /// Path of `{folder}/{file}` beneath the root, if both are plain file name segments.
    pub fn locate(&self, folder: &str, file: &str) -> Option<PathBuf> {
        if !is_plain_segment(folder) || !is_plain_segment(file) {
            return None;
        }
        Some(self.root.join(folder).join(file))
    }
}

pub(crate) fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl BlobStore for DiskBlobStore {
    fn upload(&self, folder: &str, upload: BlobUpload) -> Result<StoredBlob, BlobError> {
        if !is_plain_segment(folder) {
            return Err(BlobError::Rejected(format!("invalid folder '{folder}'")));
        }
        let directory = self.root.join(folder);
        fs::create_dir_all(&directory)?;

        let name = stored_name(&upload);
        fs::write(directory.join(&name), &upload.bytes)?;

        Ok(StoredBlob {
            url: format!("{}/{folder}/{name}", self.base_url),
            content_type: upload.content_type(),
        })
    }

    fn delete(&self, url: &str) -> Result<(), BlobError> {
        let path = self
            .resolve(url)
            .ok_or_else(|| BlobError::NotFound(url.to_string()))?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(url.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Keeps blobs in memory; used by tests and throwaway local runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn contains(&self, url: &str) -> bool {
        self.blobs
            .lock()
            .expect("blob mutex poisoned")
            .contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().expect("blob mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn upload(&self, folder: &str, upload: BlobUpload) -> Result<StoredBlob, BlobError> {
        let url = format!("memory://{folder}/{}", stored_name(&upload));
        let content_type = upload.content_type();
        self.blobs
            .lock()
            .map_err(|_| BlobError::Unavailable("blob mutex poisoned".to_string()))?
            .insert(url.clone(), upload.bytes);
        Ok(StoredBlob { url, content_type })
    }

    fn delete(&self, url: &str) -> Result<(), BlobError> {
        self.blobs
            .lock()
            .map_err(|_| BlobError::Unavailable("blob mutex poisoned".to_string()))?
            .remove(url)
            .map(|_| ())
            .ok_or_else(|| BlobError::NotFound(url.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf(bytes: usize) -> BlobUpload {
        BlobUpload {
            file_name: "Resume.PDF".to_string(),
            bytes: vec![b'%'; bytes],
        }
    }

    #[test]
    fn validate_checks_extension_and_size() {
        assert!(pdf(10).validate(1024).is_ok());
        assert!(matches!(pdf(2048).validate(1024), Err(BlobError::Rejected(_))));
        assert!(matches!(pdf(0).validate(1024), Err(BlobError::Rejected(_))));

        let script = BlobUpload {
            file_name: "payload.exe".to_string(),
            bytes: vec![1, 2, 3],
        };
        assert!(matches!(script.validate(1024), Err(BlobError::Rejected(_))));
    }

    #[test]
    fn content_type_is_guessed_from_the_file_name() {
        assert_eq!(pdf(1).content_type(), mime::APPLICATION_PDF);
    }

    #[test]
    fn disk_store_round_trips_and_refuses_foreign_urls() {
        let root = std::env::temp_dir().join(format!("captureget-blobs-{}", uuid::Uuid::new_v4()));
        let store = DiskBlobStore::new(&root, "/uploads/");

        let stored = store.upload(CV_FOLDER, pdf(4)).expect("upload succeeds");
        assert!(stored.url.starts_with("/uploads/user_cvs/"));
        let path = store.resolve(&stored.url).expect("own url resolves");
        assert_eq!(fs::read(&path).expect("file written"), vec![b'%'; 4]);

        assert!(store.resolve("/uploads/../etc/passwd").is_none());
        assert!(store.resolve("https://elsewhere/cv.pdf").is_none());

        store.delete(&stored.url).expect("delete succeeds");
        assert!(matches!(store.delete(&stored.url), Err(BlobError::NotFound(_))));

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn memory_store_tracks_blobs() {
        let store = MemoryBlobStore::default();
        let stored = store.upload(CV_FOLDER, pdf(3)).expect("upload");
        assert!(store.contains(&stored.url));
        store.delete(&stored.url).expect("delete");
        assert!(store.is_empty());
    }
}
