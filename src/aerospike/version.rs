//! Aerospike server versions and the rules for moving between them.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Server versions the operator knows how to run and upgrade between
pub const SUPPORTED_VERSIONS: &[&str] = &[
    "4.0.0.4", "4.0.0.5", "4.0.0.6", "4.1.0.0", "4.1.0.1", "4.1.0.6", "4.2.0.3", "4.2.0.4",
    "4.2.0.5", "4.2.0.10", "4.3.0.2", "4.3.0.6", "4.3.0.7", "4.3.0.8",
];

/// First version using the new on-disk storage format
const STORAGE_FORMAT_CHANGE: Version = Version::new(4, 2, 0, 0);

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^(\d+)\.(\d+)\.(\d+)(?:\.(\d+))?$").expect("valid version regex")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid version {0:?}")]
    Invalid(String),

    #[error("version {0} is not supported")]
    Unsupported(Version),

    #[error("downgrade from {from} to {to} is not supported")]
    Downgrade { from: Version, to: Version },
}

/// Four-component server version. Three-component inputs get a zero revision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub revision: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            revision,
        }
    }

    pub fn is_supported(&self) -> bool {
        SUPPORTED_VERSIONS
            .iter()
            .filter_map(|v| v.parse::<Version>().ok())
            .any(|v| v == *self)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = VERSION_PATTERN
            .captures(s)
            .ok_or_else(|| VersionError::Invalid(s.to_string()))?;
        let component = |i: usize| -> Result<u32, VersionError> {
            match caps.get(i) {
                Some(m) => m
                    .as_str()
                    .parse()
                    .map_err(|_| VersionError::Invalid(s.to_string())),
                None => Ok(0),
            }
        };
        Ok(Version::new(
            component(1)?,
            component(2)?,
            component(3)?,
            component(4)?,
        ))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.patch, self.revision
        )
    }
}

/// Classification of a version transition by the most significant component
/// that changes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpgradeKind {
    Unchanged,
    Downgrade,
    Major,
    Minor,
    Patch,
    Revision,
}

/// What must happen to a node's storage while moving it to the target version
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpgradeStrategy {
    pub recreate_persistent_volume_claims: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VersionUpgrade {
    pub source: Version,
    pub target: Version,
}

impl VersionUpgrade {
    pub fn new(source: Version, target: Version) -> Self {
        Self { source, target }
    }

    pub fn parse(source: &str, target: &str) -> Result<Self, VersionError> {
        Ok(Self::new(source.parse()?, target.parse()?))
    }

    pub fn kind(&self) -> UpgradeKind {
        let (s, t) = (self.source, self.target);
        if t < s {
            // Component-wise lexicographic order, so a lower target revision
            // with equal major/minor/patch is also a downgrade.
            UpgradeKind::Downgrade
        } else if t.major != s.major {
            UpgradeKind::Major
        } else if t.minor != s.minor {
            UpgradeKind::Minor
        } else if t.patch != s.patch {
            UpgradeKind::Patch
        } else if t.revision != s.revision {
            UpgradeKind::Revision
        } else {
            UpgradeKind::Unchanged
        }
    }

    pub fn is_downgrade(&self) -> bool {
        self.kind() == UpgradeKind::Downgrade
    }

    /// Both endpoints supported and the transition is not a downgrade
    pub fn validate(&self) -> Result<(), VersionError> {
        for v in [self.source, self.target] {
            if !v.is_supported() {
                return Err(VersionError::Unsupported(v));
            }
        }
        if self.is_downgrade() {
            return Err(VersionError::Downgrade {
                from: self.source,
                to: self.target,
            });
        }
        Ok(())
    }

    /// Crossing into the 4.2 storage format requires fresh volumes
    pub fn strategy(&self) -> UpgradeStrategy {
        UpgradeStrategy {
            recreate_persistent_volume_claims: self.source < STORAGE_FORMAT_CHANGE
                && self.target >= STORAGE_FORMAT_CHANGE,
        }
    }
}

impl fmt::Display for VersionUpgrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}
