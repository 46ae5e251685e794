//! Post-detection actions applied to the remote originals of a cycle.

use crate::{errors::ConfigError, models::listing::Location};
use std::fmt;

/// Flat action selector as it appears in configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ActionKind {
    None,
    Move,
    Delete,
}

/// What happens to each detected object once the whole batch is staged.
///
/// `None` leaves objects in place, so they are detected again on the next
/// poll unless something downstream removes them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PostAction {
    None,
    Move { directory: Location },
    Delete,
}

impl PostAction {
    /// Build from the flat configuration pair.
    ///
    /// `move_directory` is required for MOVE and ignored otherwise.
    pub fn from_parts(
        kind: ActionKind,
        move_directory: Option<&str>,
    ) -> Result<Self, ConfigError> {
        match kind {
            ActionKind::None => Ok(PostAction::None),
            ActionKind::Delete => Ok(PostAction::Delete),
            ActionKind::Move => {
                let raw = move_directory
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .ok_or(ConfigError::MissingMoveDirectory)?;
                Ok(PostAction::Move {
                    directory: Location::parse(raw)?,
                })
            }
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            PostAction::None => ActionKind::None,
            PostAction::Move { .. } => ActionKind::Move,
            PostAction::Delete => ActionKind::Delete,
        }
    }
}

impl fmt::Display for PostAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostAction::None => write!(f, "NONE"),
            PostAction::Move { directory } => write!(f, "MOVE to {}", directory),
            PostAction::Delete => write!(f, "DELETE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_requires_directory() {
        let err = PostAction::from_parts(ActionKind::Move, None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingMoveDirectory));

        let err = PostAction::from_parts(ActionKind::Move, Some("  ")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingMoveDirectory));
    }

    #[test]
    fn move_directory_must_be_a_location() {
        let err = PostAction::from_parts(ActionKind::Move, Some("/tmp/archive")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLocation { .. }));
    }

    #[test]
    fn move_directory_ignored_for_other_actions() {
        let action = PostAction::from_parts(ActionKind::Delete, Some("gs://b/archive/")).unwrap();
        assert_eq!(action, PostAction::Delete);
        assert_eq!(
            PostAction::from_parts(ActionKind::None, None).unwrap(),
            PostAction::None
        );
    }

    #[test]
    fn move_keeps_parsed_directory() {
        let action = PostAction::from_parts(ActionKind::Move, Some("gs://b/archive/")).unwrap();
        assert_eq!(action.kind(), ActionKind::Move);
        assert_eq!(action.to_string(), "MOVE to gs://b/archive/");
    }
}
