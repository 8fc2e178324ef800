//! Asynchronous classifier model loading
//!
//! The artifact comes from a local file or an HTTP(S) URL. A failed load is
//! reported to the caller and leaves the classifier "not ready"; nothing here
//! retries on its own.

use crate::infra::metrics::Metrics;
use crate::services::intent::{ClassifierModel, ModelError};
use crate::services::navigator::NavCommand;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("failed to read {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Where a model artifact is fetched from
#[async_trait]
pub trait ModelSource: Send + Sync {
    fn describe(&self) -> String;
    async fn fetch(&self) -> Result<String, ModelLoadError>;
}

pub struct FileModelSource {
    path: PathBuf,
}

impl FileModelSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ModelSource for FileModelSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch(&self) -> Result<String, ModelLoadError> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ModelLoadError::Io { path: self.describe(), source })
    }
}

pub struct HttpModelSource {
    url: String,
    client: reqwest::Client,
}

impl HttpModelSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ModelLoadError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { url: url.to_string(), client })
    }
}

#[async_trait]
impl ModelSource for HttpModelSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch(&self) -> Result<String, ModelLoadError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ModelLoadError::Status { url: self.url.clone(), status: status.as_u16() });
        }
        Ok(response.text().await?)
    }
}

/// Pick a source from a configured location: URLs go over HTTP, anything else is a path
pub fn source_for(location: &str, timeout: Duration) -> Result<Arc<dyn ModelSource>, ModelLoadError> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Ok(Arc::new(HttpModelSource::new(location, timeout)?))
    } else {
        Ok(Arc::new(FileModelSource::new(location)))
    }
}

/// Fetch and validate a model
pub async fn load_model(source: &dyn ModelSource) -> Result<ClassifierModel, ModelLoadError> {
    let json = source.fetch().await?;
    Ok(ClassifierModel::from_json(&json)?)
}

/// Loads models in the background and hands them to the navigator
#[derive(Clone)]
pub struct ModelLoader {
    source: Arc<dyn ModelSource>,
    nav_tx: mpsc::Sender<NavCommand>,
    metrics: Arc<Metrics>,
}

impl ModelLoader {
    pub fn new(source: Arc<dyn ModelSource>, nav_tx: mpsc::Sender<NavCommand>, metrics: Arc<Metrics>) -> Self {
        Self { source, nav_tx, metrics }
    }

    pub fn spawn_load(&self) -> JoinHandle<()> {
        let loader = self.clone();
        tokio::spawn(async move {
            loader.load_once().await;
        })
    }

    async fn load_once(&self) {
        let started = Instant::now();
        let source = self.source.describe();
        match load_model(self.source.as_ref()).await {
            Ok(model) => {
                info!(
                    source = %source,
                    classes = %model.classes().len(),
                    vocabulary = %model.vocabulary_len(),
                    load_ms = %started.elapsed().as_millis(),
                    "classifier_model_loaded"
                );
                if self.nav_tx.send(NavCommand::InstallModel(model)).await.is_err() {
                    warn!("classifier_model_dropped: navigator gone");
                }
            }
            Err(e) => {
                self.metrics.record_model_load_failed();
                error!(source = %source, error = %e, "classifier_model_load_failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MODEL: &str = r#"{"vocabulary": {"coffee": 0}, "classes": ["cafeteria", "library"],
        "priors": [-0.7, -0.7], "featureLogProbs": [[-0.2], [-3.0]]}"#;

    fn model_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let file = model_file(MODEL);
        let source = FileModelSource::new(file.path());
        let model = load_model(&source).await.unwrap();
        assert_eq!(model.classes().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let source = FileModelSource::new("/nonexistent/model.json");
        assert!(matches!(load_model(&source).await, Err(ModelLoadError::Io { .. })));
    }

    #[tokio::test]
    async fn test_malformed_model_is_rejected() {
        let file = model_file(r#"{"vocabulary": {}, "classes": ["a"], "priors": []}"#);
        let source = FileModelSource::new(file.path());
        assert!(matches!(load_model(&source).await, Err(ModelLoadError::Model(_))));
    }

    #[test]
    fn test_source_selection() {
        let timeout = Duration::from_secs(1);
        assert_eq!(source_for("models/intent.json", timeout).unwrap().describe(), "models/intent.json");
        assert_eq!(
            source_for("https://example.invalid/intent.json", timeout).unwrap().describe(),
            "https://example.invalid/intent.json"
        );
    }

    #[tokio::test]
    async fn test_loader_hands_model_to_navigator() {
        let file = model_file(MODEL);
        let (tx, mut rx) = mpsc::channel(4);
        let metrics = Arc::new(Metrics::new());
        let loader = ModelLoader::new(Arc::new(FileModelSource::new(file.path())), tx, metrics.clone());

        loader.spawn_load().await.unwrap();
        assert!(matches!(rx.recv().await, Some(NavCommand::InstallModel(_))));
        assert_eq!(metrics.report().model_load_failures, 0);
    }

    #[tokio::test]
    async fn test_failed_load_is_counted_and_sends_nothing() {
        let (tx, mut rx) = mpsc::channel(4);
        let metrics = Arc::new(Metrics::new());
        let loader =
            ModelLoader::new(Arc::new(FileModelSource::new("/nonexistent/model.json")), tx, metrics.clone());

        loader.spawn_load().await.unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(metrics.report().model_load_failures, 1);
    }
}
