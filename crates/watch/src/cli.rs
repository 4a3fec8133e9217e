//! Command-line parsing for `closet-watch`.

use std::path::{Path, PathBuf};

use closet_jobs::social_import::SocialPlatform;

pub const USAGE: &str = "\
Usage:
  closet-watch resume
  closet-watch import <instagram|pinterest|tiktok> <profile>
  closet-watch extract <image>...";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Resume whatever the persisted pointers name, in both families.
    Resume,
    /// Start a social import for a profile.
    Import {
        platform: SocialPlatform,
        profile: String,
    },
    /// Upload images and start an extraction job.
    Extract { files: Vec<PathBuf> },
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum UsageError {
    #[error("missing command")]
    MissingCommand,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("missing argument <{0}>")]
    MissingArgument(&'static str),
    #[error("unexpected argument '{0}'")]
    UnexpectedArgument(String),
    #[error("{0}")]
    InvalidPlatform(String),
}

impl Command {
    /// Parse the arguments that follow the program name.
    pub fn parse<I>(args: I) -> Result<Self, UsageError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let command = args.next().ok_or(UsageError::MissingCommand)?;

        let parsed = match command.as_str() {
            "resume" => Self::Resume,
            "import" => {
                let platform = args
                    .next()
                    .ok_or(UsageError::MissingArgument("platform"))?
                    .parse()
                    .map_err(|e: closet_core::error::CoreError| {
                        UsageError::InvalidPlatform(e.to_string())
                    })?;
                let profile = args.next().ok_or(UsageError::MissingArgument("profile"))?;
                Self::Import { platform, profile }
            }
            "extract" => {
                let files: Vec<PathBuf> = args.by_ref().map(PathBuf::from).collect();
                if files.is_empty() {
                    return Err(UsageError::MissingArgument("image"));
                }
                Self::Extract { files }
            }
            other => return Err(UsageError::UnknownCommand(other.to_string())),
        };

        match args.next() {
            Some(extra) => Err(UsageError::UnexpectedArgument(extra)),
            None => Ok(parsed),
        }
    }
}

/// MIME type for an image file, judged by its extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("heic") => "image/heic",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn parse(args: &[&str]) -> Result<Command, UsageError> {
        Command::parse(args.iter().map(|a| a.to_string()))
    }

    #[test]
    fn parses_resume() {
        assert_eq!(parse(&["resume"]).unwrap(), Command::Resume);
    }

    #[test]
    fn parses_import() {
        assert_eq!(
            parse(&["import", "Pinterest", "@closet"]).unwrap(),
            Command::Import {
                platform: SocialPlatform::Pinterest,
                profile: "@closet".into(),
            }
        );
    }

    #[test]
    fn parses_extract_with_several_files() {
        assert_matches!(
            parse(&["extract", "a.jpg", "b.png"]).unwrap(),
            Command::Extract { files } if files.len() == 2
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(parse(&[]), Err(UsageError::MissingCommand));
        assert_eq!(parse(&["extract"]), Err(UsageError::MissingArgument("image")));
        assert_eq!(parse(&["import", "tiktok"]), Err(UsageError::MissingArgument("profile")));
        assert_matches!(parse(&["import", "myspace", "x"]), Err(UsageError::InvalidPlatform(_)));
        assert_matches!(parse(&["resume", "now"]), Err(UsageError::UnexpectedArgument(_)));
        assert_matches!(parse(&["watch"]), Err(UsageError::UnknownCommand(_)));
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for(Path::new("shirt.JPG")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("dress.webp")), "image/webp");
        assert_eq!(content_type_for(Path::new("notes")), "application/octet-stream");
    }
}
