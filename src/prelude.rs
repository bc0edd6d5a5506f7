pub use crate::error::{EngineError, EngineResult};

pub type Result<T> = anyhow::Result<T>;
