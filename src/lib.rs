pub mod classify;
pub mod compare;
pub mod config;
pub mod error;
pub mod locator;
pub mod media;
pub mod model;
pub mod naming;
pub mod parser;
pub mod pipeline;
pub mod references;
pub mod report;
pub mod space;
pub mod style;
pub mod zip_handler;

pub use classify::{classify, Classification, Outcome};
pub use config::{CollisionPolicy, PipelineConfig};
pub use error::{KmzError, Result};
pub use model::{MapDocument, Placemark, StyleDef, StyleTable};
pub use pipeline::{KmzProcessor, RunFailure};
pub use report::{RunReport, RunStats};
pub use space::{Fs2Probe, SpaceProbe};
pub use zip_handler::{ExtractionMode, ZipHandler};
