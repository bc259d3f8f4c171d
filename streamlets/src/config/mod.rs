//! Runtime configuration.
//!
//! Settings are plain serde structs with defaults, loadable from JSON and
//! overridable from `STREAMLETS_*` environment variables.

mod settings;

pub use settings::{
    CommitterSettings, OutputMode, ResetPosition, StreamletSettings, ENV_MAX_BATCH_INTERVAL_MS,
    ENV_MAX_BATCH_SIZE, ENV_RESET_POSITION,
};
