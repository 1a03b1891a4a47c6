//! Upload of produced export files

use crate::config::SecretString;
use crate::core::session::EXPORT_DIR;
use crate::domain::{AgentError, JobId, Result, UploadError};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Header listing the files packed into one part, in order
pub const FILES_HEADER: &str = "x-hostagent-files";

/// What was uploaded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSummary {
    pub parts: usize,
    pub size: u64,
}

/// Uploads the files produced under a state root
#[async_trait]
pub trait Uploader: Send + Sync {
    /// # Errors
    ///
    /// [`UploadError::NoFiles`] when nothing was produced. Callers treat that
    /// as success.
    async fn upload(
        &self,
        root: &Path,
        url: &str,
        job_id: &JobId,
        api_key: &SecretString,
        log_path: Option<&Path>,
    ) -> Result<UploadSummary>;
}

/// PUTs data parts and the worker log to an HTTP endpoint
pub struct HttpUploader {
    client: Client,
    part_size: u64,
}

struct Part {
    files: Vec<PathBuf>,
    size: u64,
}

impl HttpUploader {
    pub fn new(part_size: u64) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| UploadError::Request(e.to_string()))?;
        Ok(Self {
            client,
            part_size: part_size.max(1),
        })
    }

    async fn put(
        &self,
        url: String,
        part: &str,
        api_key: &SecretString,
        body: Vec<u8>,
        files: Option<String>,
    ) -> Result<()> {
        let mut request = self
            .client
            .put(&url)
            .bearer_auth(api_key.expose_secret().as_str())
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        if let Some(files) = files {
            request = request.header(FILES_HEADER, files);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| UploadError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(UploadError::Rejected {
                part: part.to_string(),
                status: resp.status().as_u16(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(
        &self,
        root: &Path,
        url: &str,
        job_id: &JobId,
        api_key: &SecretString,
        log_path: Option<&Path>,
    ) -> Result<UploadSummary> {
        let base = url::Url::parse(url).map_err(|_| UploadError::InvalidUrl(url.to_string()))?;
        let base = format!("{}/{}", base.as_str().trim_end_matches('/'), job_id);

        let export_dir = root.join(EXPORT_DIR);
        let files = collect_files(&export_dir)?;
        if files.is_empty() {
            return Err(UploadError::NoFiles.into());
        }

        let parts = pack(files, self.part_size);
        let mut summary = UploadSummary::default();
        for (index, part) in parts.iter().enumerate() {
            let name = format!("part-{index}");
            let mut body = Vec::with_capacity(part.size as usize);
            let mut listed = Vec::with_capacity(part.files.len());
            for file in &part.files {
                body.extend(tokio::fs::read(file).await?);
                listed.push(relative_name(&export_dir, file));
            }

            self.put(format!("{base}/{name}"), &name, api_key, body, Some(listed.join(",")))
                .await?;
            summary.parts += 1;
            summary.size += part.size;
            tracing::debug!(job_id = %job_id, part = %name, size = part.size, "Part uploaded");
        }

        if let Some(log_path) = log_path {
            let log = tokio::fs::read(log_path).await?;
            self.put(format!("{base}/log"), "log", api_key, log, None).await?;
        }

        tracing::info!(
            job_id = %job_id,
            parts = summary.parts,
            size = summary.size,
            "Upload complete"
        );
        Ok(summary)
    }
}

/// Every regular file under `dir`, sorted by path
fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if file_type.is_file() && entry.metadata()?.len() > 0 {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Groups whole files into parts of at most `limit` bytes
///
/// A file larger than `limit` gets a part of its own.
fn pack(files: Vec<PathBuf>, limit: u64) -> Vec<Part> {
    let mut parts: Vec<Part> = Vec::new();
    for file in files {
        let size = std::fs::metadata(&file).map(|m| m.len()).unwrap_or(0);
        match parts.last_mut() {
            Some(part) if part.size + size <= limit => {
                part.size += size;
                part.files.push(file);
            }
            _ => parts.push(Part {
                files: vec![file],
                size,
            }),
        }
    }
    parts
}

fn relative_name(root: &Path, file: &Path) -> String {
    file.strip_prefix(root)
        .unwrap_or(file)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Removes everything produced by a previous attempt
pub fn clear_export_dir(root: &Path) -> Result<()> {
    let dir = root.join(EXPORT_DIR);
    match std::fs::remove_dir_all(&dir) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(AgentError::Io(format!(
            "Failed to clear {}: {e}",
            dir.display()
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::secret_string;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, bytes: &[u8]) {
        let path = root.join(EXPORT_DIR).join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_pack_respects_limit() {
        let dir = TempDir::new().unwrap();
        let paths: Vec<PathBuf> = [("a", 4usize), ("b", 4), ("c", 10), ("d", 1)]
            .iter()
            .map(|(name, len)| {
                let path = dir.path().join(name);
                std::fs::write(&path, vec![b'x'; *len]).unwrap();
                path
            })
            .collect();

        let parts = pack(paths, 8);
        let sizes: Vec<u64> = parts.iter().map(|p| p.size).collect();
        assert_eq!(sizes, vec![8, 10, 1]);
        assert_eq!(parts[0].files.len(), 2);
    }

    #[tokio::test]
    async fn test_no_files_is_sentinel() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "sourcecode/gh/repo.ndjson", b"");

        let uploader = HttpUploader::new(1024).unwrap();
        let err = uploader
            .upload(
                dir.path(),
                "http://127.0.0.1:1",
                &JobId::new("job-1").unwrap(),
                &secret_string("key".to_string()),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Upload(UploadError::NoFiles)));
    }

    #[tokio::test]
    async fn test_uploads_parts_and_log() {
        let mut server = mockito::Server::new_async().await;
        let part = server
            .mock("PUT", "/exports/job-1/part-0")
            .match_header("authorization", "Bearer key")
            .match_header(FILES_HEADER, "sourcecode/gh/repo.ndjson")
            .with_status(200)
            .create_async()
            .await;
        let log = server
            .mock("PUT", "/exports/job-1/log")
            .with_status(201)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        write(dir.path(), "sourcecode/gh/repo.ndjson", b"{\"id\":1}\n");
        let log_path = dir.path().join("worker.log");
        std::fs::write(&log_path, b"log line\n").unwrap();

        let uploader = HttpUploader::new(1024).unwrap();
        let summary = uploader
            .upload(
                dir.path(),
                &format!("{}/exports/", server.url()),
                &JobId::new("job-1").unwrap(),
                &secret_string("key".to_string()),
                Some(&log_path),
            )
            .await
            .unwrap();

        assert_eq!(summary, UploadSummary { parts: 1, size: 9 });
        part.assert_async().await;
        log.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_part() {
        let mut server = mockito::Server::new_async().await;
        let _part = server
            .mock("PUT", "/job-1/part-0")
            .with_status(403)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        write(dir.path(), "work/jira/project.ndjson", b"{}\n");

        let uploader = HttpUploader::new(1024).unwrap();
        let err = uploader
            .upload(
                dir.path(),
                &server.url(),
                &JobId::new("job-1").unwrap(),
                &secret_string("key".to_string()),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::Upload(UploadError::Rejected { status: 403, .. })
        ));
    }

    #[test]
    fn test_clear_export_dir() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "work/jira/project.ndjson", b"{}\n");
        clear_export_dir(dir.path()).unwrap();
        assert!(!dir.path().join(EXPORT_DIR).exists());
        clear_export_dir(dir.path()).unwrap();
    }
}
