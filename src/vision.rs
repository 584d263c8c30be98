//! Memoized, bounded-parallel image description.
//!
//! Each unique image payload is described at most once per corpus. Calls run
//! on a small worker pool, each under its own timeout. Oversized payloads and
//! failed calls degrade to fixed placeholder text instead of erroring.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::VisionConfig;
use crate::llm::VisionModel;

pub const TOO_LARGE_DESCRIPTION: &str = "Image too large for analysis.";
pub const FAILED_DESCRIPTION: &str = "Image analysis failed.";

/// Outcome of describing one image.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageDescription {
    Described(String),
    TooLarge,
    /// Call failed or timed out; carries the reason for logs.
    Failed(String),
}

impl ImageDescription {
    /// Text stored alongside the image and shown to the model.
    pub fn text(&self) -> &str {
        match self {
            ImageDescription::Described(s) => s,
            ImageDescription::TooLarge => TOO_LARGE_DESCRIPTION,
            ImageDescription::Failed(_) => FAILED_DESCRIPTION,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        !matches!(self, ImageDescription::Described(_))
    }
}

/// True if `description` is one of the fixed degradation strings.
pub fn is_placeholder_text(description: &str) -> bool {
    description == TOO_LARGE_DESCRIPTION || description == FAILED_DESCRIPTION
}

/// SHA-256 hex digest used as the cache key for a payload.
pub fn payload_digest(image_base64: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image_base64.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct ImageDescriber {
    model: Arc<dyn VisionModel>,
    workers: usize,
    timeout: Duration,
    max_payload_bytes: usize,
    cache: Mutex<HashMap<String, ImageDescription>>,
}

impl ImageDescriber {
    pub fn new(model: Arc<dyn VisionModel>, config: &VisionConfig) -> Self {
        Self {
            model,
            workers: config.workers.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
            max_payload_bytes: config.max_payload_bytes,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, key: &str) -> Option<ImageDescription> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(key).cloned()
    }

    fn store(&self, key: String, description: ImageDescription) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(key, description);
    }

    /// Describe a single payload, consulting the cache first.
    pub async fn describe(&self, image_base64: &str) -> ImageDescription {
        let key = payload_digest(image_base64);
        if let Some(hit) = self.cached(&key) {
            return hit;
        }
        let description = if image_base64.len() > self.max_payload_bytes {
            ImageDescription::TooLarge
        } else {
            let task = tokio::spawn(describe_with_timeout(
                self.model.clone(),
                image_base64.to_string(),
                self.timeout,
            ));
            task.await.unwrap_or_else(|e| {
                warn!(error = %e, "image description task failed");
                ImageDescription::Failed(e.to_string())
            })
        };
        self.store(key, description.clone());
        description
    }

    /// Describe many payloads with at most `workers` calls in flight.
    ///
    /// Returns one description per input, in input order. Duplicate payloads
    /// (within this call or seen earlier) trigger a single model call. A
    /// worker that panics leaves its payload described as failed.
    pub async fn describe_all(&self, payloads: &[String]) -> Vec<ImageDescription> {
        let keys: Vec<String> = payloads.iter().map(|p| payload_digest(p)).collect();

        let mut pending: HashMap<&str, &str> = HashMap::new();
        for (key, payload) in keys.iter().zip(payloads) {
            if self.cached(key).is_some() || pending.contains_key(key.as_str()) {
                continue;
            }
            if payload.len() > self.max_payload_bytes {
                debug!(bytes = payload.len(), "image payload too large, skipping model");
                self.store(key.clone(), ImageDescription::TooLarge);
                continue;
            }
            pending.insert(key.as_str(), payload.as_str());
        }

        if !pending.is_empty() {
            debug!(images = pending.len(), workers = self.workers, "describing images");
            let permits = Arc::new(Semaphore::new(self.workers));
            let mut tasks = JoinSet::new();
            let spawned: Vec<String> = pending.keys().map(|k| k.to_string()).collect();
            for (key, payload) in pending {
                let permits = permits.clone();
                let model = self.model.clone();
                let key = key.to_string();
                let payload = payload.to_string();
                let timeout = self.timeout;
                tasks.spawn(async move {
                    let _permit = permits.acquire_owned().await;
                    let description = describe_with_timeout(model, payload, timeout).await;
                    (key, description)
                });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((key, description)) => self.store(key, description),
                    Err(e) => warn!(error = %e, "image description task failed"),
                }
            }
            for key in spawned {
                if self.cached(&key).is_none() {
                    self.store(key, ImageDescription::Failed("worker panicked".into()));
                }
            }
        }

        keys.iter()
            .map(|k| {
                self.cached(k)
                    .unwrap_or_else(|| ImageDescription::Failed("missing from cache".into()))
            })
            .collect()
    }
}

async fn describe_with_timeout(
    model: Arc<dyn VisionModel>,
    payload: String,
    timeout: Duration,
) -> ImageDescription {
    match tokio::time::timeout(timeout, model.describe(&payload)).await {
        Ok(Ok(text)) => ImageDescription::Described(text),
        Ok(Err(e)) => {
            warn!(error = %e, "image description failed");
            ImageDescription::Failed(e.to_string())
        }
        Err(_) => {
            warn!(?timeout, "image description timed out");
            ImageDescription::Failed("timed out".into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingVision {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl CountingVision {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl VisionModel for CountingVision {
        async fn describe(&self, image_base64: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if image_base64 == "broken" {
                anyhow::bail!("decoder error");
            }
            if image_base64 == "poison" {
                panic!("decoder bug");
            }
            Ok(format!("picture of {}", image_base64))
        }
    }

    fn config(workers: usize, timeout_secs: u64, max_payload_bytes: usize) -> VisionConfig {
        VisionConfig {
            workers,
            timeout_secs,
            max_payload_bytes,
            ..VisionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_one_call_per_unique_payload() {
        let model = Arc::new(CountingVision::new(Duration::from_millis(1)));
        let describer = ImageDescriber::new(model.clone(), &config(4, 5, 1024));
        let payloads: Vec<String> = ["a", "b", "a", "a"].iter().map(|s| s.to_string()).collect();

        let out = describer.describe_all(&payloads).await;
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], out[2]);
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);

        let again = describer.describe("b").await;
        assert_eq!(again.text(), "picture of b");
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_oversized_payload_skips_model() {
        let model = Arc::new(CountingVision::new(Duration::from_millis(1)));
        let describer = ImageDescriber::new(model.clone(), &config(1, 5, 3));
        let out = describer.describe("abcdef").await;
        assert_eq!(out, ImageDescription::TooLarge);
        assert_eq!(out.text(), TOO_LARGE_DESCRIPTION);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_degrades_to_placeholder() {
        let model = Arc::new(CountingVision::new(Duration::from_millis(1)));
        let describer = ImageDescriber::new(model, &config(1, 5, 1024));
        let out = describer.describe("broken").await;
        assert!(out.is_placeholder());
        assert_eq!(out.text(), FAILED_DESCRIPTION);
    }

    #[tokio::test]
    async fn test_timeout_degrades_to_placeholder() {
        let model = Arc::new(CountingVision::new(Duration::from_secs(5)));
        let mut describer = ImageDescriber::new(model, &config(1, 1, 1024));
        describer.timeout = Duration::from_millis(20);
        let out = describer.describe("slow").await;
        assert_eq!(out, ImageDescription::Failed("timed out".into()));
    }

    #[tokio::test]
    async fn test_worker_bound() {
        let model = Arc::new(CountingVision::new(Duration::from_millis(20)));
        let describer = ImageDescriber::new(model.clone(), &config(2, 5, 1024));
        let payloads: Vec<String> = (0..8).map(|i| format!("img{}", i)).collect();
        describer.describe_all(&payloads).await;
        assert_eq!(model.calls.load(Ordering::SeqCst), 8);
        assert!(model.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panicking_worker_degrades_only_its_payload() {
        let model = Arc::new(CountingVision::new(Duration::from_millis(1)));
        let describer = ImageDescriber::new(model, &config(2, 5, 1024));
        let payloads: Vec<String> = ["ok", "poison"].iter().map(|s| s.to_string()).collect();

        let out = describer.describe_all(&payloads).await;
        assert_eq!(out[0].text(), "picture of ok");
        assert!(out[1].is_placeholder());
        assert_eq!(out[1].text(), FAILED_DESCRIPTION);

        let single = describer.describe("poison").await;
        assert_eq!(single.text(), FAILED_DESCRIPTION);
    }
}
