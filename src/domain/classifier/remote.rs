//! Networked inference service client.
//!
//! Endpoints:
//! - `GET  {base}/health`           200 when the service is up
//! - `PUT  {base}/models/{name}`    upload the model (octet-stream), once
//! - `POST {base}/invoke`           `{"model", "input": [[[x, y] x50]]}`
//!                                  -> `{"outputs": [{"data": [...] | [[...]]}]}`

use super::InferenceBackend;
use crate::domain::gesture::GestureSeries;
use crate::error::ClassifierError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize)]
struct InvokeRequest<'a> {
    model: &'a str,
    input: [&'a [[f32; 2]]; 1],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Probabilities {
    Flat(Vec<f32>),
    Batched(Vec<Vec<f32>>),
}

#[derive(Deserialize)]
struct Output {
    data: Probabilities,
}

#[derive(Deserialize)]
struct InvokeResponse {
    outputs: Vec<Output>,
}

pub struct RemoteBackend {
    base_url: String,
    model_path: PathBuf,
    model_name: String,
    timeout: Duration,
    client: OnceCell<reqwest::Client>,
    uploaded: AtomicBool,
    upload_lock: Mutex<()>,
}

impl RemoteBackend {
    pub fn new(base_url: &str, model_path: impl AsRef<Path>, timeout: Duration) -> Self {
        let model_path = model_path.as_ref().to_path_buf();
        let model_name = model_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model.tflite".to_string());

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model_path,
            model_name,
            timeout,
            client: OnceCell::new(),
            uploaded: AtomicBool::new(false),
            upload_lock: Mutex::new(()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn is_uploaded(&self) -> bool {
        self.uploaded.load(Ordering::Acquire)
    }

    async fn client(&self) -> Result<&reqwest::Client, ClassifierError> {
        self.client
            .get_or_try_init(|| async {
                reqwest::Client::builder()
                    .timeout(self.timeout)
                    .build()
                    .map_err(ClassifierError::from)
            })
            .await
    }

    async fn upload_model(&self) -> Result<(), ClassifierError> {
        let _guard = self.upload_lock.lock().await;
        if self.is_uploaded() {
            debug!("Model {} already uploaded, skipping", self.model_name);
            return Ok(());
        }

        let data = tokio::fs::read(&self.model_path).await?;
        let url = format!("{}/models/{}", self.base_url, self.model_name);
        debug!("Uploading model to {} ({} bytes)", url, data.len());

        self.client()
            .await?
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await?
            .error_for_status()?;

        self.uploaded.store(true, Ordering::Release);
        info!("Model {} uploaded to {}", self.model_name, self.base_url);
        Ok(())
    }
}

impl InferenceBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn check_connectivity(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        let client = match self.client().await {
            Ok(client) => client,
            Err(e) => {
                debug!("Health check failed for {}: {}", self.base_url, e);
                return false;
            }
        };
        match client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!("Health check failed for {}: {}", self.base_url, e);
                false
            }
        }
    }

    async fn initialize(&self) -> Result<(), ClassifierError> {
        self.upload_model().await
    }

    async fn infer(&self, series: &GestureSeries) -> Result<Vec<f32>, ClassifierError> {
        if !self.is_uploaded() {
            self.upload_model().await?;
        }

        let request = InvokeRequest {
            model: &self.model_name,
            input: [series.points().as_slice()],
        };
        let url = format!("{}/invoke", self.base_url);
        let response: InvokeResponse = self
            .client()
            .await?
            .post(&url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let output = response
            .outputs
            .into_iter()
            .next()
            .ok_or_else(|| ClassifierError::InvalidResponse("no outputs".into()))?;

        match output.data {
            Probabilities::Flat(values) => Ok(values),
            Probabilities::Batched(batches) => batches
                .into_iter()
                .next()
                .ok_or_else(|| ClassifierError::InvalidResponse("empty batch".into())),
        }
    }
}
