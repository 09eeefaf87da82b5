//! Project model: a name plus an ordered list of images (C2).
//!
//! The wire format nests each image as a JSON *string* inside the project's
//! own JSON object, rather than flattening images in as nested objects. This
//! looks redundant but is preserved deliberately for wire compatibility — see
//! `DESIGN.md`.

use serde::{Deserialize, Serialize};

use super::image::{Image, ModelError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub name: String,
    pub images: Vec<Image>,
}

/// Wire representation: images are serialized JSON strings, not objects.
#[derive(Serialize, Deserialize)]
struct WireProject {
    name: String,
    images: Vec<String>,
}

impl Project {
    pub fn new(name: impl Into<String>, images: Vec<Image>) -> Self {
        Project {
            name: name.into(),
            images,
        }
    }

    pub fn image_names(&self) -> Vec<String> {
        self.images.iter().map(|i| i.name.clone()).collect()
    }

    /// Serialize to UTF-8 JSON bytes, with each image nested as a JSON string.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let wire = WireProject {
            name: self.name.clone(),
            images: self
                .images
                .iter()
                .map(Image::serialize)
                .collect::<Result<Vec<_>>>()?,
        };
        Ok(serde_json::to_vec(&wire).map_err(ModelError::from)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let wire: WireProject = serde_json::from_slice(bytes).map_err(ModelError::from)?;
        let images = wire
            .images
            .iter()
            .map(|s| Image::deserialize(s))
            .collect::<Result<Vec<_>>>()?;
        Ok(Project {
            name: wire.name,
            images,
        })
    }
}
