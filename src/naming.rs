//! Dataset identifiers and the volume naming convention that links them to
//! provider volumes.
//!
//! The provider has no notion of a dataset, so the dataset UUID is embedded
//! in the volume name as `<prefix>-<uuid as 32 lowercase hex digits>`. Only
//! the canonical form is accepted by [`VolumeNaming::parse`], which keeps
//! `format(parse(name)) == name` for every name this crate recognises.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

/// Default prefix applied to every volume owned by the driver.
pub const DEFAULT_VOLUME_PREFIX: &str = "flocker-v1";

/// Maximum length of a volume name accepted by the provider.
pub const MAX_VOLUME_NAME_LEN: usize = 64;

const DATASET_HEX_LEN: usize = 32;

/// Orchestrator-assigned dataset identity.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DatasetId(Uuid);

impl DatasetId {
    /// Wraps an existing UUID.
    #[must_use]
    pub const fn new(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the wrapped UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for DatasetId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for DatasetId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value.trim()).map(Self)
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

/// Errors raised when a prefix or a volume name violates the convention.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VolumeNameError {
    /// The configured prefix is empty or contains characters the provider
    /// rejects in volume names.
    #[error("invalid volume prefix '{prefix}': use lowercase letters, digits and '-'")]
    InvalidPrefix {
        /// Offending prefix.
        prefix: String,
    },
    /// The name does not start with `<prefix>-`.
    #[error("volume name '{name}' does not start with '{prefix}-'")]
    ForeignName {
        /// Name reported by the provider.
        name: String,
        /// Prefix the driver expects.
        prefix: String,
    },
    /// The suffix after the prefix is not a canonical dataset UUID.
    #[error("volume name '{name}' does not embed a canonical dataset id")]
    MalformedDatasetId {
        /// Name reported by the provider.
        name: String,
    },
}

/// Formats and parses volume names for a single cluster prefix.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeNaming {
    prefix: String,
}

impl VolumeNaming {
    /// Builds a naming scheme for `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeNameError::InvalidPrefix`] when the prefix is empty,
    /// ends with `-`, contains anything other than lowercase ASCII letters,
    /// digits and `-`, or would push names past [`MAX_VOLUME_NAME_LEN`].
    pub fn new(value: impl Into<String>) -> Result<Self, VolumeNameError> {
        let prefix = value.into();
        let well_formed = !prefix.is_empty()
            && !prefix.ends_with('-')
            && prefix
                .chars()
                .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
            && prefix.len() + 1 + DATASET_HEX_LEN <= MAX_VOLUME_NAME_LEN;
        if !well_formed {
            return Err(VolumeNameError::InvalidPrefix { prefix });
        }
        Ok(Self { prefix })
    }

    /// Returns the configured prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Renders the volume name for `dataset_id`.
    #[must_use]
    pub fn format(&self, dataset_id: &DatasetId) -> String {
        format!("{}-{}", self.prefix, dataset_id.as_uuid().simple())
    }

    /// Extracts the dataset id embedded in `name`.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeNameError::ForeignName`] when the prefix does not match
    /// and [`VolumeNameError::MalformedDatasetId`] when the suffix is not 32
    /// lowercase hex digits.
    pub fn parse(&self, name: &str) -> Result<DatasetId, VolumeNameError> {
        let suffix = name
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
            .ok_or_else(|| VolumeNameError::ForeignName {
                name: name.to_owned(),
                prefix: self.prefix.clone(),
            })?;

        let canonical = suffix.len() == DATASET_HEX_LEN
            && suffix
                .chars()
                .all(|ch| ch.is_ascii_digit() || matches!(ch, 'a'..='f'));
        if !canonical {
            return Err(VolumeNameError::MalformedDatasetId {
                name: name.to_owned(),
            });
        }

        Uuid::try_parse(suffix)
            .map(DatasetId)
            .map_err(|_| VolumeNameError::MalformedDatasetId {
                name: name.to_owned(),
            })
    }

    /// Description stamped on volumes owned by `cluster_id`.
    #[must_use]
    pub fn cluster_description(&self, cluster_id: &str) -> String {
        format!("{}-cluster-id: {cluster_id}", self.prefix)
    }
}

impl Default for VolumeNaming {
    fn default() -> Self {
        Self {
            prefix: String::from(DEFAULT_VOLUME_PREFIX),
        }
    }
}
