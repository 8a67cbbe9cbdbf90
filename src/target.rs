use std::fmt;

use url::Url;

use crate::error::ConfigError;

/// Query parameter on the waiting page's own URL naming the deployment.
pub const REDIRECT_PARAM: &str = "redirectTo";

/// The deployment being waited for. Fixed for the lifetime of a poll loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeploymentTarget {
    url: Url,
}

impl DeploymentTarget {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        Url::parse(value.trim())
            .map(Self::new)
            .map_err(|source| ConfigError::InvalidUrl {
                value: value.to_owned(),
                source,
            })
    }

    /// Blank input means "no target", which leaves the loop idle.
    pub fn from_optional(value: Option<&str>) -> Result<Option<Self>, ConfigError> {
        match value.map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => Self::parse(value).map(Some),
        }
    }

    /// Reads `redirectTo` off the waiting page's URL.
    pub fn from_page_url(page: &Url) -> Result<Option<Self>, ConfigError> {
        let value = page
            .query_pairs()
            .find(|(key, _)| key == REDIRECT_PARAM)
            .map(|(_, value)| value.into_owned());

        Self::from_optional(value.as_deref())
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for DeploymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
