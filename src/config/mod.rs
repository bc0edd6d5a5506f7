pub use settings::{AccessMode, EngineSettings};

pub mod settings;
