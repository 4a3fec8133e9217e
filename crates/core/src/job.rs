//! Job family discriminator and the terminal-status contract shared by
//! both family state machines.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The two kinds of long-running backend job this client tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobFamily {
    /// Bulk AI image extraction + item image generation.
    Extraction,
    /// Social-media wardrobe import.
    SocialImport,
}

impl JobFamily {
    /// Stable identifier used in logs and persisted data.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobFamily::Extraction => "extraction",
            JobFamily::SocialImport => "social_import",
        }
    }

    /// URL path segment under which the backend exposes this family.
    pub fn path_segment(&self) -> &'static str {
        match self {
            JobFamily::Extraction => "extraction",
            JobFamily::SocialImport => "social-import",
        }
    }

    /// Key of the durable single-slot "active job" pointer.
    pub fn pointer_key(&self) -> &'static str {
        match self {
            JobFamily::Extraction => "extraction_active_job",
            JobFamily::SocialImport => "social_import_active_job",
        }
    }
}

impl fmt::Display for JobFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobFamily {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extraction" => Ok(JobFamily::Extraction),
            "social_import" | "social-import" => Ok(JobFamily::SocialImport),
            other => Err(CoreError::Validation(format!("Unknown job family '{other}'"))),
        }
    }
}

/// A family-specific job status with absorbing terminal states.
///
/// Once [`is_terminal`](Self::is_terminal) returns `true` no further
/// transition happens without starting a new job.
pub trait JobStatus {
    fn is_terminal(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_keys_are_distinct() {
        assert_ne!(
            JobFamily::Extraction.pointer_key(),
            JobFamily::SocialImport.pointer_key()
        );
    }

    #[test]
    fn parse_accepts_both_spellings() {
        assert_eq!(
            "social-import".parse::<JobFamily>().unwrap(),
            JobFamily::SocialImport
        );
        assert_eq!(
            "social_import".parse::<JobFamily>().unwrap(),
            JobFamily::SocialImport
        );
        assert_eq!(
            "extraction".parse::<JobFamily>().unwrap(),
            JobFamily::Extraction
        );
    }

    #[test]
    fn parse_rejects_unknown_family() {
        let err = "laundry".parse::<JobFamily>().unwrap_err();
        assert!(err.to_string().contains("laundry"));
    }

    #[test]
    fn display_matches_as_str() {
        assert_eq!(JobFamily::SocialImport.to_string(), "social_import");
    }
}
