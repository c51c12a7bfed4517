//! Processing pipeline for cached files

use async_trait::async_trait;
use satchel_core::SanitizedFile;
use std::future::Future;
use std::sync::Arc;

/// A single transform over a cached file.
///
/// A step receives the current file and returns the file to hand to the next
/// step. Returning a file with a different name renames the cached artifact.
#[async_trait]
pub trait ProcessStep: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, file: SanitizedFile) -> Result<SanitizedFile, String>;
}

/// Ordered list of processing steps
#[derive(Clone, Default)]
pub struct Pipeline {
    steps: Vec<Arc<dyn ProcessStep>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Append a step
    pub fn add_step(&mut self, step: Arc<dyn ProcessStep>) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order. The first failure stops the pipeline and is
    /// reported together with the step name.
    pub async fn execute(&self, mut file: SanitizedFile) -> Result<SanitizedFile, String> {
        for step in &self.steps {
            tracing::debug!(step = step.name(), "Running processing step");
            file = step
                .process(file)
                .await
                .map_err(|e| format!("{}: {}", step.name(), e))?;
        }
        Ok(file)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.steps.iter().map(|step| step.name()))
            .finish()
    }
}

struct FnStep<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> ProcessStep for FnStep<F>
where
    F: Fn(SanitizedFile) -> Fut + Send + Sync,
    Fut: Future<Output = Result<SanitizedFile, String>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, file: SanitizedFile) -> Result<SanitizedFile, String> {
        (self.f)(file).await
    }
}

/// Adapt an async closure into a [`ProcessStep`].
pub fn step_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn ProcessStep>
where
    F: Fn(SanitizedFile) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<SanitizedFile, String>> + Send + 'static,
{
    Arc::new(FnStep {
        name: name.into(),
        f,
    })
}
