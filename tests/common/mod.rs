//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gen_dispatch::core::{
    Artifact, ArtifactStore, DispatchError, GenerationBackend, GenerationParams, SaveTarget,
};
use parking_lot::Mutex;

/// Tracks how many generations run at once across backends.
#[derive(Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

type FailWhen = Box<dyn Fn(&GenerationParams) -> Option<DispatchError> + Send + Sync>;

/// Configurable fake backend.
pub struct MockBackend {
    delay: Duration,
    outputs: usize,
    fail_when: Option<FailWhen>,
    fail_load: bool,
    gauge: Arc<Gauge>,
    calls: AtomicUsize,
    loads: AtomicUsize,
    seeds: Mutex<Vec<i64>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            delay: Duration::from_millis(5),
            outputs: 1,
            fail_when: None,
            fail_load: false,
            gauge: Arc::new(Gauge::default()),
            calls: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
            seeds: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_outputs(mut self, outputs: usize) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_gauge(mut self, gauge: Arc<Gauge>) -> Self {
        self.gauge = gauge;
        self
    }

    pub fn failing(self, error: DispatchError) -> Self {
        self.failing_when(move |_| Some(error.clone()))
    }

    pub fn failing_when(
        mut self,
        f: impl Fn(&GenerationParams) -> Option<DispatchError> + Send + Sync + 'static,
    ) -> Self {
        self.fail_when = Some(Box::new(f));
        self
    }

    pub fn with_failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn seeds(&self) -> Vec<i64> {
        self.seeds.lock().clone()
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    async fn load_model(&self, model: &str) -> Result<(), DispatchError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        if self.fail_load {
            return Err(DispatchError::Internal(format!("cannot load {model}")));
        }
        Ok(())
    }

    async fn generate(&self, params: &GenerationParams) -> Result<Vec<Artifact>, DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seeds.lock().push(params.seed);
        self.gauge.enter();
        tokio::time::sleep(self.delay).await;
        self.gauge.exit();
        if let Some(error) = self.fail_when.as_ref().and_then(|f| f(params)) {
            return Err(error);
        }
        Ok((0..self.outputs)
            .map(|i| Artifact::new(format!("{}-{i}", params.seed).into_bytes(), "png"))
            .collect())
    }
}

/// Store whose saves always fail.
pub struct FailingStore;

#[async_trait]
impl ArtifactStore for FailingStore {
    async fn save(&self, _artifact: &Artifact, _target: &SaveTarget) -> Result<String, DispatchError> {
        Err(DispatchError::PersistenceFailure("disk full".into()))
    }
}

pub fn params(prompt: &str, seed: i64) -> GenerationParams {
    GenerationParams {
        prompt: prompt.to_string(),
        seed,
        var_seed: 0,
        ..GenerationParams::default()
    }
}
