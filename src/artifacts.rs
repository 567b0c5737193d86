//! Artifact sink: persists generated source and extracted files through the
//! external storage interfaces.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::interfaces::{CodeStorage, FileStorage, StoredFile};
use crate::types::GeneratedArtifact;

pub struct ArtifactSink {
    code_storage: Arc<dyn CodeStorage>,
    file_storage: Arc<dyn FileStorage>,
}

impl ArtifactSink {
    pub fn new(code_storage: Arc<dyn CodeStorage>, file_storage: Arc<dyn FileStorage>) -> Self {
        Self {
            code_storage,
            file_storage,
        }
    }

    /// Store a generated artifact in the capability cache.
    pub async fn store_artifact(&self, artifact: &GeneratedArtifact) -> anyhow::Result<()> {
        debug!(id = %artifact.id, task = %artifact.task_name, "storing artifact");
        self.code_storage.store(artifact).await
    }

    /// Store one source file under a deterministic name.
    pub async fn store_source(
        &self,
        filename: &str,
        code: &str,
        workflow_id: &str,
        step_id: &str,
    ) -> anyhow::Result<()> {
        let content = code.as_bytes().to_vec();
        self.file_storage
            .store(StoredFile {
                filename: filename.to_string(),
                size: content.len(),
                content,
                content_type: content_type_for(filename).to_string(),
                workflow_id: workflow_id.to_string(),
                step_id: step_id.to_string(),
                created_at: Utc::now(),
                expires_at: None,
            })
            .await
    }

    /// Persist files extracted from a sandbox run. When `declared` is
    /// non-empty only those filenames are kept; otherwise everything the run
    /// produced is stored. Individual failures are logged and skipped.
    pub async fn store_extracted_files(
        &self,
        files: &BTreeMap<String, Vec<u8>>,
        declared: &[String],
        workflow_id: &str,
        step_id: &str,
    ) -> usize {
        let mut stored = 0;
        for (filename, content) in files {
            if !declared.is_empty() && !declared.iter().any(|d| d == filename) {
                continue;
            }
            let file = StoredFile {
                filename: filename.clone(),
                size: content.len(),
                content: content.clone(),
                content_type: content_type_for(filename).to_string(),
                workflow_id: workflow_id.to_string(),
                step_id: step_id.to_string(),
                created_at: Utc::now(),
                expires_at: None,
            };
            match self.file_storage.store(file).await {
                Ok(()) => stored += 1,
                Err(err) => warn!(filename = %filename, error = %err, "file store failed"),
            }
        }
        stored
    }
}

fn content_type_for(filename: &str) -> &'static str {
    match filename.rsplit_once('.').map(|(_, ext)| ext) {
        Some("json") => "application/json",
        Some("md") => "text/markdown",
        Some("html") => "text/html",
        Some("csv") => "text/csv",
        _ => "text/plain",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingFiles {
        stored: Mutex<Vec<StoredFile>>,
    }

    #[async_trait]
    impl FileStorage for RecordingFiles {
        async fn store(&self, file: StoredFile) -> anyhow::Result<()> {
            self.stored.lock().push(file);
            Ok(())
        }
    }

    struct NullCode;

    #[async_trait]
    impl CodeStorage for NullCode {
        async fn store(&self, _artifact: &GeneratedArtifact) -> anyhow::Result<()> {
            Ok(())
        }
        async fn search(
            &self,
            _task_name: &str,
            _language: Option<&str>,
            _tags: &[String],
        ) -> anyhow::Result<Vec<GeneratedArtifact>> {
            Ok(vec![])
        }
        async fn list_all(&self) -> anyhow::Result<Vec<GeneratedArtifact>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn declared_names_filter_extracted_files() {
        let files = Arc::new(RecordingFiles::default());
        let sink = ArtifactSink::new(Arc::new(NullCode), files.clone());

        let mut produced = BTreeMap::new();
        produced.insert("report.txt".to_string(), b"ok".to_vec());
        produced.insert("scratch.tmp".to_string(), b"junk".to_vec());

        let stored = sink
            .store_extracted_files(&produced, &["report.txt".to_string()], "wf", "step")
            .await;
        assert_eq!(stored, 1);
        assert_eq!(files.stored.lock()[0].filename, "report.txt");
    }

    #[tokio::test]
    async fn empty_declaration_stores_everything() {
        let files = Arc::new(RecordingFiles::default());
        let sink = ArtifactSink::new(Arc::new(NullCode), files.clone());

        let mut produced = BTreeMap::new();
        produced.insert("a.json".to_string(), b"{}".to_vec());
        produced.insert("b.md".to_string(), b"# hi".to_vec());

        let stored = sink.store_extracted_files(&produced, &[], "wf", "step").await;
        assert_eq!(stored, 2);
        let kinds: Vec<String> = files
            .stored
            .lock()
            .iter()
            .map(|f| f.content_type.clone())
            .collect();
        assert!(kinds.contains(&"application/json".to_string()));
        assert!(kinds.contains(&"text/markdown".to_string()));
    }
}
