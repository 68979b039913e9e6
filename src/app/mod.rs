pub mod assembler;
pub mod asset_store;
pub mod audio_fanout;
pub mod error;
pub mod image_fanout;
pub mod model;
pub mod orchestrator;
pub mod progress;
pub mod queue;
