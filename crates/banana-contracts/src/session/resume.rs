//! Turning a stored history into one the backend will accept as context.
//!
//! Newer image models attach a thought signature to the parts they want
//! replayed and reject model turns that mix signed and unsigned parts. The
//! stored session keeps everything; this filter runs only on the copy that is
//! sent back.

use tracing::debug;

use super::schema::{Role, Turn};

/// Versioned replay rules. Each model definition names the one it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumePolicy {
    /// v1: replay the history as stored.
    #[default]
    KeepAll,
    /// v2: in model turns that carry any signed part, drop the unsigned ones.
    SignedPartsOnly,
}

pub fn sanitize_for_resume(turns: &[Turn], policy: ResumePolicy) -> Vec<Turn> {
    match policy {
        ResumePolicy::KeepAll => turns.to_vec(),
        ResumePolicy::SignedPartsOnly => turns.iter().map(keep_signed_parts).collect(),
    }
}

fn keep_signed_parts(turn: &Turn) -> Turn {
    if turn.role != Role::Model || !turn.parts.iter().any(|part| part.is_signed()) {
        return turn.clone();
    }
    let parts = turn
        .parts
        .iter()
        .filter(|part| part.is_signed())
        .cloned()
        .collect::<Vec<_>>();
    debug!(
        dropped = turn.parts.len() - parts.len(),
        "dropping unsigned parts from model turn"
    );
    Turn::new(turn.role, parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::schema::Part;

    fn signed_image() -> Part {
        Part {
            thought_signature: Some("c2ln".to_string()),
            ..Part::image("image/png", b"img")
        }
    }

    fn history() -> Vec<Turn> {
        vec![
            Turn::new(Role::User, vec![Part::text("a cat"), Part::image("image/png", b"ref")]),
            Turn::new(Role::Model, vec![Part::text("Here is your cat"), signed_image()]),
            Turn::new(Role::User, vec![Part::text("make it blue")]),
            Turn::new(Role::Model, vec![Part::text("unsigned"), Part::image("image/png", b"old")]),
        ]
    }

    #[test]
    fn signed_policy_drops_unsigned_parts_from_signed_model_turns() {
        let original = history();
        let cleaned = sanitize_for_resume(&original, ResumePolicy::SignedPartsOnly);

        assert_eq!(cleaned.len(), 4);
        assert_eq!(cleaned[0], original[0]);
        assert_eq!(cleaned[1].parts, vec![signed_image()]);
        assert_eq!(cleaned[2], original[2]);
        // no signatures at all: left alone
        assert_eq!(cleaned[3], original[3]);
    }

    #[test]
    fn sanitizing_does_not_touch_the_input() {
        let original = history();
        let snapshot = original.clone();
        let _ = sanitize_for_resume(&original, ResumePolicy::SignedPartsOnly);
        assert_eq!(original, snapshot);
    }

    #[test]
    fn keep_all_is_identity() {
        let original = history();
        assert_eq!(sanitize_for_resume(&original, ResumePolicy::KeepAll), original);
    }

    #[test]
    fn signed_user_parts_are_not_filtered() {
        let turns = vec![Turn::new(Role::User, vec![Part::text("plain"), signed_image()])];
        assert_eq!(
            sanitize_for_resume(&turns, ResumePolicy::SignedPartsOnly),
            turns
        );
    }
}
