//! Image build descriptors (C2).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::DEFAULT_DOCKERFILE;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("image path is empty after trimming trailing slashes")]
    EmptyPath,
    #[error("image name is empty")]
    EmptyName,
    #[error("tag {0:?} references unknown placeholder {1:?}")]
    BadTag(String, String),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;

/// Build-host OS identity used to expand `{system}`/`{node}`/`{release}`/`{arch}`
/// placeholders in a tag. Captured as data (rather than read ad hoc from the OS
/// at format time) so that tag expansion is deterministic and testable.
#[derive(Debug, Clone)]
pub struct HostIdentity {
    pub system: String,
    pub node: String,
    pub release: String,
    pub arch: String,
}

impl HostIdentity {
    /// Resolve the identity of the machine this process is running on.
    pub fn current() -> Self {
        HostIdentity {
            system: std::env::consts::OS.to_string(),
            node: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            release: std::fs::read_to_string("/proc/sys/kernel/osrelease")
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

/// A single image to build, one Dockerfile + build context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub path: String,
    pub name: String,
    pub tag: String,
    pub dockerfile: String,
    pub buildpath: String,
    pub preexec_command: Option<Vec<String>>,
}

impl Image {
    /// Construct an image, applying the same defaulting rules as the wire format:
    /// trailing slashes are trimmed from `path`, `name` defaults to the final path
    /// segment, `tag` defaults to `name`, `dockerfile` defaults to `"Dockerfile"`,
    /// and `buildpath` defaults to `path`.
    pub fn new(
        path: impl Into<String>,
        name: Option<String>,
        tag: Option<String>,
        dockerfile: Option<String>,
        buildpath: Option<String>,
        preexec_command: Option<Vec<String>>,
    ) -> Result<Self> {
        let path = path.into().trim_end_matches('/').to_string();
        if path.is_empty() {
            return Err(ModelError::EmptyPath);
        }
        let name = name.unwrap_or_else(|| {
            path.rsplit('/').next().unwrap_or(&path).to_string()
        });
        if name.is_empty() {
            return Err(ModelError::EmptyName);
        }
        let tag = tag.unwrap_or_else(|| name.clone());
        let dockerfile = dockerfile.unwrap_or_else(|| DEFAULT_DOCKERFILE.to_string());
        let buildpath = buildpath.unwrap_or_else(|| path.clone());

        Ok(Image {
            path,
            name,
            tag,
            dockerfile,
            buildpath,
            preexec_command,
        })
    }

    /// Serialize to the JSON string embedded (nested) inside a `Project`'s own
    /// serialization. Kept as its own method, rather than relying solely on
    /// `serde_json::to_string`, so the nesting contract has one obvious call site.
    pub fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn deserialize(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Expand `{system}`, `{node}`, `{release}` and `{arch}` placeholders in the
    /// tag using the given host identity. Any other `{...}` placeholder is a
    /// "bad tag" error, raised before the builder is ever invoked.
    pub fn expand_tag(&self, host: &HostIdentity) -> Result<String> {
        expand_placeholders(&self.tag, host)
    }
}

fn expand_placeholders(template: &str, host: &HostIdentity) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        let rest = &template[i + 1..];
        let end = rest.find('}').ok_or_else(|| {
            ModelError::BadTag(template.to_string(), rest.to_string())
        })?;
        let name = &rest[..end];
        let value = match name {
            "system" => host.system.as_str(),
            "node" => host.node.as_str(),
            "release" => host.release.as_str(),
            "arch" => host.arch.as_str(),
            other => return Err(ModelError::BadTag(template.to_string(), other.to_string())),
        };
        out.push_str(value);
        for _ in 0..=end {
            chars.next();
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> HostIdentity {
        HostIdentity {
            system: "linux".into(),
            node: "buildbox".into(),
            release: "6.1.0".into(),
            arch: "x86_64".into(),
        }
    }

    #[test]
    fn defaults_name_tag_dockerfile_buildpath_from_path() {
        let img = Image::new("services/api/", None, None, None, None, None).unwrap();
        assert_eq!(img.path, "services/api");
        assert_eq!(img.name, "api");
        assert_eq!(img.tag, "api");
        assert_eq!(img.dockerfile, "Dockerfile");
        assert_eq!(img.buildpath, "services/api");
    }

    #[test]
    fn rejects_empty_path() {
        let err = Image::new("///", None, None, None, None, None).unwrap_err();
        assert!(matches!(err, ModelError::EmptyPath));
    }

    #[test]
    fn expands_known_placeholders() {
        let img = Image::new("a", None, Some("img-{system}-{arch}".into()), None, None, None).unwrap();
        assert_eq!(img.expand_tag(&host()).unwrap(), "img-linux-x86_64");
    }

    #[test]
    fn rejects_unknown_placeholder() {
        let img = Image::new("a", None, Some("img-{nope}".into()), None, None, None).unwrap();
        let err = img.expand_tag(&host()).unwrap_err();
        assert!(matches!(err, ModelError::BadTag(_, _)));
    }

    #[test]
    fn round_trips_through_serialize_deserialize() {
        let img = Image::new(
            "a",
            Some("a".into()),
            Some("a:{release}".into()),
            Some("Dockerfile.alt".into()),
            Some("ctx".into()),
            Some(vec!["make".into(), "deps".into()]),
        )
        .unwrap();
        let s = img.serialize().unwrap();
        let back = Image::deserialize(&s).unwrap();
        assert_eq!(img, back);
    }

    #[test]
    fn round_trips_with_no_preexec_command() {
        let img = Image::new("a", None, None, None, None, None).unwrap();
        let s = img.serialize().unwrap();
        let back = Image::deserialize(&s).unwrap();
        assert_eq!(img, back);
        assert!(back.preexec_command.is_none());
    }
}
