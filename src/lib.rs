pub mod artifact;
pub mod cancel;
pub mod catalog;
pub mod chart;
pub mod config;
pub mod digest;
pub mod driver;
pub mod error;
pub mod executor;
pub mod input;
pub mod lockfile;
pub mod observability;
pub mod presets;
pub mod step;
pub mod tools;
pub mod validation;
pub mod watcher;

pub use artifact::ArtifactRef;
pub use config::PipelineConfig;
pub use driver::{DriverReport, FailurePolicy, PipelineDriver};
pub use executor::StepChainExecutor;
pub use input::InputSource;
pub use step::Step;
pub use watcher::DownloadWatcher;
