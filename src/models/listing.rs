//! Listing inputs: where to look, how deep, and which names to keep.

use crate::errors::ConfigError;
use regex::Regex;
use std::{fmt, str::FromStr};
use url::Url;

/// A `gs://bucket/prefix` location.
///
/// The prefix never starts with `/`; a trailing `/` is preserved so that
/// `gs://bucket/dir/` and `gs://bucket/dir` list the same directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub bucket: String,
    pub prefix: String,
}

impl Location {
    /// Parse a location URI. Only the `gs` and `gcs` schemes are accepted.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidLocation {
            location: raw.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(raw.trim()).map_err(|err| invalid(&err.to_string()))?;
        if !matches!(url.scheme(), "gs" | "gcs") {
            return Err(invalid("scheme must be `gs://`"));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("query strings and fragments are not allowed"));
        }
        let bucket = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(invalid("missing bucket name")),
        };
        // `Url::path` percent-encodes; object names are matched verbatim.
        let prefix = raw
            .trim()
            .splitn(4, '/')
            .nth(3)
            .unwrap_or("")
            .trim_start_matches('/')
            .to_string();
        if prefix.contains("//") {
            return Err(invalid("prefix contains an empty path segment"));
        }

        Ok(Self { bucket, prefix })
    }

    /// `name` with this location's prefix removed. Names outside the prefix
    /// keep only their last segment.
    pub fn relative_name<'a>(&self, name: &'a str) -> &'a str {
        let dir = self.prefix.trim_end_matches('/');
        let under = if dir.is_empty() {
            Some(name)
        } else {
            name.strip_prefix(dir).and_then(|rest| rest.strip_prefix('/'))
        };
        match under {
            Some(rest) if !rest.is_empty() => rest,
            _ => name.rsplit('/').next().unwrap_or(name),
        }
    }

    /// Name of `file_name` placed directly under this location's prefix.
    pub fn child(&self, file_name: &str) -> String {
        let dir = self.prefix.trim_end_matches('/');
        if dir.is_empty() {
            file_name.to_string()
        } else {
            format!("{}/{}", dir, file_name)
        }
    }
}

impl FromStr for Location {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gs://{}/{}", self.bucket, self.prefix)
    }
}

/// How deep a listing goes below its prefix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ListingType {
    /// Immediate children only.
    #[default]
    Directory,
    /// Every descendant.
    Recursive,
}

/// Which kinds of entries a listing keeps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ListingFilter {
    #[default]
    Files,
    Dirs,
    Both,
}

impl ListingFilter {
    pub fn keeps(self, is_directory: bool) -> bool {
        match self {
            ListingFilter::Files => !is_directory,
            ListingFilter::Dirs => is_directory,
            ListingFilter::Both => true,
        }
    }
}

/// Regular expression matched against the *whole* object name.
///
/// `data/.*\.csv` matches `data/a.csv` but not `data/a.csv.bak` or
/// `old/data/a.csv`.
#[derive(Clone, Debug)]
pub struct NamePattern {
    source: String,
    regex: Regex,
}

impl NamePattern {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|err| {
            ConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: err.to_string(),
            }
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

#[derive(Clone, Debug)]
pub struct ListingRequest {
    pub location: Location,
    pub pattern: Option<NamePattern>,
    pub listing_type: ListingType,
    pub filter: ListingFilter,
}

impl ListingRequest {
    pub fn new(location: Location) -> Self {
        Self {
            location,
            pattern: None,
            listing_type: ListingType::default(),
            filter: ListingFilter::default(),
        }
    }

    pub fn with_pattern(mut self, pattern: NamePattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn with_listing_type(mut self, listing_type: ListingType) -> Self {
        self.listing_type = listing_type;
        self
    }

    pub fn with_filter(mut self, filter: ListingFilter) -> Self {
        self.filter = filter;
        self
    }
}
