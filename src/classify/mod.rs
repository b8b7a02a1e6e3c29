//! Frame classifiers.
//!
//! A classifier maps one frame to a label index. The trigger controller runs it on
//! a worker thread, one frame at a time, and compares the index against the
//! configured target label.

mod backend;
mod backends;
mod labels;

pub use backend::{Classifier, SharedClassifier};
pub use backends::StubClassifier;
#[cfg(feature = "backend-tract")]
pub use backends::TractClassifier;
pub use labels::Labels;
