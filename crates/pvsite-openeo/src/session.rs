//! Classifier sessions and local cube inference
//!
//! Loading a model means downloading it and building a runtime session, which is far more
//! expensive than a prediction. Sessions are therefore kept in a small LRU cache keyed by
//! model URL. A failed load is returned to the caller and leaves no entry behind, so the next
//! request for the same URL tries again.

use lru::LruCache;
use ndarray::{Array1, Array2, ArrayView2, ArrayView3};
use pvsite_core::error::{PvsiteError, Result};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// Default number of cached sessions
pub const DEFAULT_SESSION_CAPACITY: usize = 6;

/// Fill value for missing observations, as used when the model was trained
pub const MISSING_VALUE: f32 = -999_999.0;

/// A tabular classifier: one row of band values per pixel in, one value per pixel out
pub trait Classifier {
    fn predict(&self, features: ArrayView2<'_, f32>) -> Result<Array1<f32>>;
}

impl<C: Classifier + ?Sized> Classifier for Arc<C> {
    fn predict(&self, features: ArrayView2<'_, f32>) -> Result<Array1<f32>> {
        (**self).predict(features)
    }
}

/// Builds a session from a model location
pub trait SessionLoader {
    type Session;

    fn load(&self, model_url: &str) -> Result<Self::Session>;
}

/// Bounded cache of loaded sessions, least recently used entries are evicted first
pub struct SessionCache<L: SessionLoader> {
    loader: L,
    sessions: Mutex<LruCache<String, Arc<L::Session>>>,
}

impl<L: SessionLoader> SessionCache<L> {
    pub fn new(loader: L, capacity: NonZeroUsize) -> Self {
        Self { loader, sessions: Mutex::new(LruCache::new(capacity)) }
    }

    /// Cache with [`DEFAULT_SESSION_CAPACITY`] entries
    pub fn with_default_capacity(loader: L) -> Self {
        let capacity = NonZeroUsize::new(DEFAULT_SESSION_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self::new(loader, capacity)
    }

    /// Session for `model_url`, loading it on a miss
    pub fn get(&self, model_url: &str) -> Result<Arc<L::Session>> {
        let mut sessions = self.sessions.lock().map_err(|_| PvsiteError::Session {
            url: model_url.to_string(),
            reason: "session cache lock poisoned".to_string(),
        })?;

        if let Some(session) = sessions.get(model_url) {
            tracing::debug!("Session cache hit for {}", model_url);
            return Ok(Arc::clone(session));
        }

        tracing::info!("Loading classifier session from {}", model_url);
        let session = Arc::new(self.loader.load(model_url)?);
        if let Some((evicted, _)) = sessions.push(model_url.to_string(), Arc::clone(&session)) {
            if evicted != model_url {
                tracing::debug!("Evicted session for {}", evicted);
            }
        }
        Ok(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a session for `model_url` is cached, without touching its recency
    pub fn contains(&self, model_url: &str) -> bool {
        self.sessions.lock().map(|s| s.contains(model_url)).unwrap_or(false)
    }
}

/// Run a classifier over a `(bands, y, x)` feature cube and return a `(y, x)` prediction
///
/// NaN features are replaced by [`MISSING_VALUE`] before prediction.
pub fn apply_classifier<C: Classifier + ?Sized>(
    cube: ArrayView3<'_, f32>,
    classifier: &C,
) -> Result<Array2<f32>> {
    let (bands, height, width) = cube.dim();
    let pixels = height * width;

    let filled = cube.mapv(|v| if v.is_nan() { MISSING_VALUE } else { v });
    let by_band = filled
        .into_shape_with_order((bands, pixels))
        .map_err(|e| PvsiteError::Inference(format!("Cannot flatten cube: {}", e)))?;
    let features = by_band.t().as_standard_layout().into_owned();

    let prediction = classifier.predict(features.view())?;
    if prediction.len() != pixels {
        return Err(PvsiteError::Inference(format!(
            "Classifier returned {} values for {} pixels",
            prediction.len(),
            pixels
        )));
    }

    prediction
        .into_shape_with_order((height, width))
        .map_err(|e| PvsiteError::Inference(format!("Cannot reshape prediction: {}", e)))
}

/// Fetch model bytes from an http(s) URL or a local path
///
/// Runs its own runtime for remote models and must not be called from async code.
pub fn fetch_model(model_url: &str) -> Result<Vec<u8>> {
    let session_error = |reason: String| PvsiteError::Session { url: model_url.to_string(), reason };

    if !(model_url.starts_with("http://") || model_url.starts_with("https://")) {
        return std::fs::read(model_url).map_err(|e| session_error(e.to_string()));
    }

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| session_error(format!("Failed to create async runtime: {}", e)))?;

    runtime.block_on(async {
        let response = reqwest::get(model_url)
            .await
            .map_err(|e| session_error(format!("Failed to download model: {}", e)))?;

        if !response.status().is_success() {
            return Err(session_error(format!("Model download returned {}", response.status())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| session_error(format!("Failed to read model: {}", e)))?;
        Ok(bytes.to_vec())
    })
}

#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxLoader, OnnxSession};

#[cfg(feature = "onnx")]
mod onnx {
    use super::{fetch_model, Classifier, SessionLoader};
    use ndarray::{Array1, ArrayView2};
    use ort::session::Session;
    use pvsite_core::error::{PvsiteError, Result};

    /// Name of the model input, fixed when the model was exported
    const INPUT_NAME: &str = "input";

    /// An ONNX Runtime session for a tabular classifier
    pub struct OnnxSession {
        session: Session,
    }

    impl OnnxSession {
        pub fn from_bytes(model: &[u8]) -> std::result::Result<Self, ort::Error> {
            let session = Session::builder()?.commit_from_memory(model)?;
            Ok(Self { session })
        }
    }

    impl Classifier for OnnxSession {
        fn predict(&self, features: ArrayView2<'_, f32>) -> Result<Array1<f32>> {
            let inference_error = |e: ort::Error| PvsiteError::Inference(e.to_string());

            let inputs = ort::inputs![INPUT_NAME => features.to_owned()].map_err(inference_error)?;
            let outputs = self.session.run(inputs).map_err(inference_error)?;

            // The first output is the label; probabilities, if any, follow
            let output = &outputs[0];
            let values: Vec<f32> = match output.try_extract_tensor::<f32>() {
                Ok(tensor) => tensor.iter().copied().collect(),
                Err(_) => output
                    .try_extract_tensor::<i64>()
                    .map_err(inference_error)?
                    .iter()
                    .map(|&label| label as f32)
                    .collect(),
            };
            Ok(Array1::from(values))
        }
    }

    /// Loads ONNX models from a URL or path
    #[derive(Debug, Default, Clone, Copy)]
    pub struct OnnxLoader;

    impl SessionLoader for OnnxLoader {
        type Session = OnnxSession;

        fn load(&self, model_url: &str) -> Result<OnnxSession> {
            let model = fetch_model(model_url)?;
            tracing::debug!("Model loaded from {} ({} bytes)", model_url, model.len());

            OnnxSession::from_bytes(&model).map_err(|e| PvsiteError::Session {
                url: model_url.to_string(),
                reason: e.to_string(),
            })
        }
    }
}
