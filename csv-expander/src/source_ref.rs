use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("path is empty")]
    Empty,
    #[error("unsupported scheme '{scheme}' in {path}")]
    UnsupportedScheme { scheme: String, path: String },
    #[error("no object path after the container in {0}")]
    MissingObjectPath(String),
    #[error("no container in {0}")]
    MissingContainer(String),
}

/// Location of one object: a container (bucket) and an object path inside it.
///
/// Accepted grammars are `<scheme>://<container>/<path...>`, where the scheme is one of
/// the configured storage schemes, and `<container>/<path...>` without a scheme.
/// The object path never starts with `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceReference {
    scheme: Option<String>,
    container: String,
    path: String,
}

impl SourceReference {
    pub fn parse(raw: &str, schemes: &[String]) -> Result<Self, ReferenceError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let (scheme, rest) = match trimmed.split_once("://") {
            Some((scheme, rest)) => {
                if !schemes.iter().any(|s| s.eq_ignore_ascii_case(scheme)) {
                    return Err(ReferenceError::UnsupportedScheme {
                        scheme: scheme.to_string(),
                        path: trimmed.to_string(),
                    });
                }
                (Some(scheme.to_ascii_lowercase()), rest)
            }
            None => (None, trimmed),
        };

        let Some((container, path)) = rest.split_once('/') else {
            return Err(ReferenceError::MissingObjectPath(trimmed.to_string()));
        };
        if container.is_empty() {
            return Err(ReferenceError::MissingContainer(trimmed.to_string()));
        }

        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return Err(ReferenceError::MissingObjectPath(trimmed.to_string()));
        }

        Ok(Self {
            scheme,
            container: container.to_string(),
            path: path.to_string(),
        })
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for SourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scheme {
            Some(scheme) => write!(f, "{}://{}/{}", scheme, self.container, self.path),
            None => write!(f, "{}/{}", self.container, self.path),
        }
    }
}
