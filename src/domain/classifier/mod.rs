//! Spell classification
//!
//! [`SpellClassifier`] scores a resampled gesture with a pluggable
//! [`InferenceBackend`] and applies the confidence threshold. Backend
//! failures are logged and reported as "no classification".

pub mod on_device;
pub mod remote;

use crate::domain::gesture::GestureSeries;
use crate::domain::settings::{DetectionBackend, Settings};
use crate::domain::spells::SpellLabel;
use crate::error::ClassifierError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

pub use on_device::OnDeviceBackend;
pub use remote::RemoteBackend;

/// Source of class probabilities for a gesture.
pub trait InferenceBackend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Cheap liveness probe; never errors.
    fn check_connectivity(&self) -> impl Future<Output = bool> + Send;

    /// One-time preparation (model upload, warm-up).
    fn initialize(&self) -> impl Future<Output = Result<(), ClassifierError>> + Send;

    /// Probability per vocabulary entry.
    fn infer(
        &self,
        series: &GestureSeries,
    ) -> impl Future<Output = Result<Vec<f32>, ClassifierError>> + Send;
}

/// Backend chosen from settings at startup.
pub enum DetectorBackend {
    OnDevice(OnDeviceBackend),
    Remote(RemoteBackend),
}

impl DetectorBackend {
    pub fn from_settings(settings: &Settings) -> Result<Self, ClassifierError> {
        match settings.detection_backend {
            DetectionBackend::OnDevice => {
                Ok(Self::OnDevice(OnDeviceBackend::load(&settings.on_device_model_path)?))
            }
            DetectionBackend::Remote => Ok(Self::Remote(RemoteBackend::new(
                &settings.tflite_url,
                &settings.remote_model_path,
                Duration::from_millis(settings.classifier_timeout_ms),
            ))),
        }
    }
}

impl InferenceBackend for DetectorBackend {
    fn name(&self) -> &'static str {
        match self {
            Self::OnDevice(backend) => backend.name(),
            Self::Remote(backend) => backend.name(),
        }
    }

    async fn check_connectivity(&self) -> bool {
        match self {
            Self::OnDevice(backend) => backend.check_connectivity().await,
            Self::Remote(backend) => backend.check_connectivity().await,
        }
    }

    async fn initialize(&self) -> Result<(), ClassifierError> {
        match self {
            Self::OnDevice(backend) => backend.initialize().await,
            Self::Remote(backend) => backend.initialize().await,
        }
    }

    async fn infer(&self, series: &GestureSeries) -> Result<Vec<f32>, ClassifierError> {
        match self {
            Self::OnDevice(backend) => backend.infer(series).await,
            Self::Remote(backend) => backend.infer(series).await,
        }
    }
}

/// Arg-max label if its probability reaches `threshold`.
pub fn decide(probabilities: &[f32], threshold: f32) -> Option<SpellLabel> {
    let (index, best) = probabilities
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, p)| !p.is_nan())
        .max_by(|(ia, a), (ib, b)| a.total_cmp(b).then(ib.cmp(ia)))?;

    if best < threshold {
        debug!(best, threshold, "Best class below confidence threshold");
        return None;
    }

    let label = SpellLabel::from_index(index);
    if label.is_none() {
        warn!(index, "Classifier output index outside the vocabulary");
    }
    label
}

pub struct SpellClassifier<B> {
    backend: B,
    reachable: AtomicBool,
}

impl<B: InferenceBackend> SpellClassifier<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            reachable: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Last observed reachability of the backend.
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Relaxed)
    }

    pub async fn check_connectivity(&self) -> bool {
        let reachable = self.backend.check_connectivity().await;
        self.reachable.store(reachable, Ordering::Relaxed);
        reachable
    }

    /// Probe the backend and prepare it when it answers.
    pub async fn initialize(&self) -> Result<bool, ClassifierError> {
        if !self.check_connectivity().await {
            warn!(backend = self.backend.name(), "Inference backend is not reachable");
            return Ok(false);
        }
        self.backend.initialize().await?;
        info!(backend = self.backend.name(), "Inference backend ready");
        Ok(true)
    }

    pub async fn detect(&self, series: &GestureSeries, threshold: f32) -> Option<SpellLabel> {
        match self.backend.infer(series).await {
            Ok(probabilities) => {
                self.reachable.store(true, Ordering::Relaxed);
                decide(&probabilities, threshold)
            }
            Err(e) => {
                if matches!(e, ClassifierError::Unreachable(_) | ClassifierError::Http(_)) {
                    self.reachable.store(false, Ordering::Relaxed);
                }
                warn!(backend = self.backend.name(), "Spell inference failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Backend returning a scripted probability vector.
    pub struct FixedBackend {
        pub probabilities: Mutex<Result<Vec<f32>, String>>,
        pub reachable: bool,
        pub calls: AtomicUsize,
    }

    impl FixedBackend {
        pub fn new(probabilities: Vec<f32>) -> Self {
            Self {
                probabilities: Mutex::new(Ok(probabilities)),
                reachable: true,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn peaked(index: usize, probability: f32) -> Self {
            let mut probabilities = vec![0.0; crate::domain::spells::SPELL_NAMES.len()];
            probabilities[index] = probability;
            Self::new(probabilities)
        }

        pub fn failing(message: &str) -> Self {
            Self {
                probabilities: Mutex::new(Err(message.to_string())),
                reachable: false,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl InferenceBackend for FixedBackend {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn check_connectivity(&self) -> bool {
            self.reachable
        }

        async fn initialize(&self) -> Result<(), ClassifierError> {
            Ok(())
        }

        async fn infer(&self, _series: &GestureSeries) -> Result<Vec<f32>, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.probabilities.lock().unwrap().clone();
            scripted.map_err(ClassifierError::Unreachable)
        }
    }
}
