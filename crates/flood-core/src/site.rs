//! Site identifiers

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Maximum length of a site identifier in bytes
pub const MAX_SITE_ID_LEN: usize = 512;

/// Identifies one peer of the mesh.
///
/// Compared structurally, so an identifier rebuilt from a deserialized message
/// equals the one held locally. The reference transport uses the peer's listen
/// address (`host:port`), which makes a site id dialable as well.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SiteId(String);

impl SiteId {
    /// Create a new site ID, validating the format
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() {
            return Err(Error::InvalidSiteId("Site ID cannot be empty".into()));
        }

        if id.len() > MAX_SITE_ID_LEN {
            return Err(Error::InvalidSiteId(format!(
                "Site ID exceeds {} bytes",
                MAX_SITE_ID_LEN
            )));
        }

        if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::InvalidSiteId(
                "Site ID must not contain whitespace or control characters".into(),
            ));
        }

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SiteId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SiteId> for String {
    fn from(site: SiteId) -> Self {
        site.0
    }
}

impl std::str::FromStr for SiteId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl std::fmt::Display for SiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
