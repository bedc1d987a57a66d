//! Transcoder driver: command construction, process supervision, progress
//! extraction, and staged commit to the shared store.

pub mod command;
pub mod commit;
pub mod driver;
pub mod progress;

pub use command::{build_rendition_command, scale_height, variant_dir_name};
pub use commit::commit_rendition;
pub use driver::{probe_duration, TranscodeError, TranscodeStage, TranscoderDriver};
pub use progress::ProgressParser;
