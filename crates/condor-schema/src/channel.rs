use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a channel obtains its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorMode {
    None,
    Proxy,
    Mirror,
}

impl fmt::Display for MirrorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorMode::None => write!(f, "none"),
            MirrorMode::Proxy => write!(f, "proxy"),
            MirrorMode::Mirror => write!(f, "mirror"),
        }
    }
}

/// A validated upstream base URL: `http` or `https` scheme, non-empty host,
/// no trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MirrorUrl(String);

impl MirrorUrl {
    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        let Some((scheme, rest)) = raw.trim().split_once("://") else {
            return Err(SchemaError::MissingUrlScheme(raw.to_owned()));
        };
        if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
            return Err(SchemaError::UnsupportedUrlScheme(raw.to_owned()));
        }
        let rest = rest.trim_end_matches('/');
        let host = rest.split(['/', '?', '#']).next().unwrap_or("");
        if host.is_empty() {
            return Err(SchemaError::MissingUrlHost(raw.to_owned()));
        }
        Ok(Self(format!("{scheme}://{rest}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join a channel-relative path onto this base URL.
    pub fn join(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            self.0.clone()
        } else {
            format!("{}/{path}", self.0)
        }
    }
}

impl fmt::Display for MirrorUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MirrorUrl {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MirrorUrl> for String {
    fn from(url: MirrorUrl) -> Self {
        url.0
    }
}

/// Where a channel's content comes from. Every entry point (file serving,
/// write endpoints, sync trigger) matches on this exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mirror_mode", rename_all = "lowercase")]
pub enum ChannelSource {
    /// Packages are uploaded directly to this server.
    #[serde(rename = "none")]
    Local,
    /// Files are fetched from upstream on demand and cached.
    Proxy { mirror_channel_url: MirrorUrl },
    /// The upstream index and archives are replicated by sync passes.
    Mirror { mirror_channel_url: MirrorUrl },
}

impl ChannelSource {
    pub fn mode(&self) -> MirrorMode {
        match self {
            ChannelSource::Local => MirrorMode::None,
            ChannelSource::Proxy { .. } => MirrorMode::Proxy,
            ChannelSource::Mirror { .. } => MirrorMode::Mirror,
        }
    }

    pub fn mirror_url(&self) -> Option<&MirrorUrl> {
        match self {
            ChannelSource::Local => None,
            ChannelSource::Proxy { mirror_channel_url }
            | ChannelSource::Mirror { mirror_channel_url } => Some(mirror_channel_url),
        }
    }
}

/// Package-name filters applied to mirror sync. Exclusion wins over inclusion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub includelist: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excludelist: Option<Vec<String>>,
}

impl MirrorFilter {
    pub fn allows(&self, package_name: &str) -> bool {
        if let Some(ref excluded) = self.excludelist {
            if excluded.iter().any(|n| n == package_name) {
                return false;
            }
        }
        match self.includelist {
            Some(ref included) => included.iter().any(|n| n == package_name),
            None => true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.includelist.is_none() && self.excludelist.is_none()
    }
}

/// Channel creation request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default, alias = "mirrorChannelUrl")]
    pub mirror_channel_url: Option<String>,
    #[serde(default, alias = "mirrorMode")]
    pub mirror_mode: Option<MirrorMode>,
    #[serde(default)]
    pub metadata: MirrorFilter,
}

impl ChannelSpec {
    pub fn local(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            description: None,
            private: false,
            mirror_channel_url: None,
            mirror_mode: None,
            metadata: MirrorFilter::default(),
        }
    }

    /// Resolve the requested mode and URL into a [`ChannelSource`].
    ///
    /// A URL without an explicit mode means `proxy`. The URL is validated
    /// before anything touches the network.
    pub fn source(&self) -> Result<ChannelSource, SchemaError> {
        let url = self
            .mirror_channel_url
            .as_deref()
            .filter(|u| !u.trim().is_empty());
        match (self.mirror_mode, url) {
            (None | Some(MirrorMode::None), None) => Ok(ChannelSource::Local),
            (Some(MirrorMode::None), Some(_)) => Err(SchemaError::MirrorConfig(
                "mirror_channel_url given but mirror_mode is none".to_owned(),
            )),
            (Some(mode @ (MirrorMode::Proxy | MirrorMode::Mirror)), None) => Err(
                SchemaError::MirrorConfig(format!("mirror_mode {mode} requires mirror_channel_url")),
            ),
            (None | Some(MirrorMode::Proxy), Some(url)) => Ok(ChannelSource::Proxy {
                mirror_channel_url: MirrorUrl::parse(url)?,
            }),
            (Some(MirrorMode::Mirror), Some(url)) => Ok(ChannelSource::Mirror {
                mirror_channel_url: MirrorUrl::parse(url)?,
            }),
        }
    }
}

pub fn validate_channel_name(name: &str) -> Result<(), SchemaError> {
    if name.is_empty() || name.len() > 128 {
        return Err(SchemaError::InvalidChannelName(
            "channel name must be 1-128 characters".to_owned(),
        ));
    }
    if name.starts_with('.') {
        return Err(SchemaError::InvalidChannelName(
            "channel name must not start with '.'".to_owned(),
        ));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
    {
        return Err(SchemaError::InvalidChannelName(
            "channel name must match [a-zA-Z0-9_.-]".to_owned(),
        ));
    }
    Ok(())
}
