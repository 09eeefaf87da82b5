//! Project & Image model (C2): entities, JSON (de)serialization, tag templating.

mod image;
mod project;

pub use image::{HostIdentity, Image, ModelError, Result};
pub use project::Project;
