use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::frame::Frame;

/// Classifier backend trait.
///
/// `classify` receives a shared reference; implementations must not keep the
/// frame beyond the call.
pub trait Classifier: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Label index of the most probable class for `frame`.
    fn classify(&mut self, frame: &Frame) -> Result<usize>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Classifier handle that can be moved onto a worker thread.
///
/// Backends are wrapped in `Mutex` because `Classifier::classify` takes `&mut self`.
#[derive(Clone)]
pub struct SharedClassifier {
    name: &'static str,
    inner: Arc<Mutex<dyn Classifier>>,
}

impl SharedClassifier {
    pub fn new<C: Classifier + 'static>(classifier: C) -> Self {
        Self {
            name: classifier.name(),
            inner: Arc::new(Mutex::new(classifier)),
        }
    }

    pub fn from_boxed(classifier: Box<dyn Classifier>) -> Self {
        let name = classifier.name();
        let inner: Arc<Mutex<dyn Classifier>> = Arc::new(Mutex::new(BoxedClassifier(classifier)));
        Self { name, inner }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn classify(&self, frame: &Frame) -> Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("classifier {} lock poisoned", self.name))?;
        guard.classify(frame)
    }

    pub fn warm_up(&self) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("classifier {} lock poisoned", self.name))?;
        guard.warm_up()
    }
}

struct BoxedClassifier(Box<dyn Classifier>);

impl Classifier for BoxedClassifier {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn classify(&mut self, frame: &Frame) -> Result<usize> {
        self.0.classify(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        self.0.warm_up()
    }
}
