//! Common types used throughout filecrypt.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A backend-relative logical file identifier.
///
/// The identifier is carried verbatim: it is neither normalized nor checked
/// against the backend root. Validation belongs to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRef(String);

impl FileRef {
    /// Create a new FileRef from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "File identifier cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return a new identifier with `suffix` appended.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        Self(format!("{}{}", self.0, suffix))
    }

    /// Return the identifier without `suffix`, if it ends with it and
    /// something remains once it is removed.
    pub fn strip_suffix(&self, suffix: &str) -> Option<Self> {
        self.0
            .strip_suffix(suffix)
            .filter(|rest| !rest.is_empty())
            .map(|rest| Self(rest.to_string()))
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A structured reference to an object in a remote container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteObject {
    /// URI scheme the backend's stream handler is registered under.
    pub scheme: String,
    /// Bucket or container name.
    pub container: String,
    /// Object key within the container.
    pub key: String,
}

impl RemoteObject {
    /// Create a new remote object reference.
    pub fn new(
        scheme: impl Into<String>,
        container: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            container: container.into(),
            key: key.into(),
        }
    }

    /// Render as `scheme://container/key`.
    pub fn uri(&self) -> String {
        format!("{}://{}/{}", self.scheme, self.container, self.key)
    }

    /// The `scheme://container` prefix that identifies the stream handler.
    pub fn authority(&self) -> String {
        format!("{}://{}", self.scheme, self.container)
    }

    /// Parse a `scheme://container/key` URI.
    ///
    /// # Errors
    /// - Missing `://` separator, empty scheme, container, or key
    pub fn parse(uri: &str) -> crate::Result<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| crate::Error::InvalidInput(format!("Not an object URI: {}", uri)))?;
        let (container, key) = rest
            .split_once('/')
            .ok_or_else(|| crate::Error::InvalidInput(format!("Object URI has no key: {}", uri)))?;

        if scheme.is_empty() || container.is_empty() || key.is_empty() {
            return Err(crate::Error::InvalidInput(format!(
                "Incomplete object URI: {}",
                uri
            )));
        }

        Ok(Self::new(scheme, container, key))
    }
}

impl fmt::Display for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri())
    }
}

/// Resolved, backend-specific address used to open a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AccessDescriptor {
    /// A path on the local filesystem.
    Local { path: PathBuf },
    /// An object in a remote store.
    Remote(RemoteObject),
}

impl AccessDescriptor {
    /// Whether this descriptor addresses a remote object.
    pub fn is_remote(&self) -> bool {
        matches!(self, AccessDescriptor::Remote(_))
    }
}

impl fmt::Display for AccessDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessDescriptor::Local { path } => write!(f, "{}", path.display()),
            AccessDescriptor::Remote(object) => write!(f, "{}", object.uri()),
        }
    }
}
