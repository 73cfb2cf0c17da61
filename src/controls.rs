//! Instructor control surface
//!
//! Which buttons an instructor client should show is a pure function of
//! the session state (and, for `next`, whether a planned question is
//! left). Commands are still checked by the state machine; this only
//! keeps the UI from offering ones that would be rejected.

use enum_map::{Enum, EnumMap};
use serde::{Serialize, Serializer, ser::SerializeSeq};

use crate::session::Status;

/// A control an instructor client can offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Control {
    /// Start the quiz
    StartQuiz,
    /// Ask the next planned question
    Next,
    /// Ask a planned question out of order
    Jump,
    /// Ask an ad hoc question
    Improvise,
    /// Ask the current question again
    Repoll,
    /// Stop accepting answers (or votes)
    End,
    /// Show the collected responses
    Responses,
    /// Reveal the correct answer
    Answer,
    /// Run a vote on selected responses
    Vote,
    /// Toggle fullscreen on the instructor display
    Fullscreen,
    /// Close the session
    Quit,
}

/// The set of enabled controls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls(EnumMap<Control, bool>);

impl Controls {
    /// Controls enabled in `status`
    ///
    /// `has_next` says whether a planned question is left for `next`.
    pub fn for_state(status: Status, has_next: bool) -> Self {
        use Control::*;

        let enabled: &[Control] = match status {
            Status::NotRunning => &[StartQuiz, Quit],
            Status::Preparing => &[Improvise, Jump, Fullscreen, Quit],
            Status::Running => &[End, Responses, Fullscreen],
            Status::Reviewing => &[
                Answer, Vote, Repoll, Fullscreen, Improvise, Jump, Quit,
            ],
            Status::Voting => &[Quit, Fullscreen, Answer, Responses, End],
            Status::SessionClosed => &[],
        };

        let mut map = EnumMap::default();
        for control in enabled {
            map[*control] = true;
        }
        if has_next && matches!(status, Status::Preparing | Status::Reviewing) {
            map[Next] = true;
        }
        Self(map)
    }

    /// Whether a control is enabled
    pub fn is_enabled(&self, control: Control) -> bool {
        self.0[control]
    }

    /// Enabled controls in declaration order
    pub fn enabled(&self) -> impl Iterator<Item = Control> + '_ {
        self.0
            .iter()
            .filter_map(|(control, enabled)| enabled.then_some(control))
    }
}

impl Serialize for Controls {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(None)?;
        for control in self.enabled() {
            seq.serialize_element(&control)?;
        }
        seq.end()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use itertools::Itertools;

    use super::*;

    #[test]
    fn test_not_running() {
        let controls = Controls::for_state(Status::NotRunning, true);
        assert_eq!(
            controls.enabled().collect_vec(),
            vec![Control::StartQuiz, Control::Quit]
        );
    }

    #[test]
    fn test_next_depends_on_plan() {
        assert!(Controls::for_state(Status::Preparing, true).is_enabled(Control::Next));
        assert!(!Controls::for_state(Status::Preparing, false).is_enabled(Control::Next));
        assert!(Controls::for_state(Status::Reviewing, true).is_enabled(Control::Next));
        assert!(!Controls::for_state(Status::Running, true).is_enabled(Control::Next));
        assert!(!Controls::for_state(Status::Voting, true).is_enabled(Control::Next));
    }

    #[test]
    fn test_running_cannot_quit() {
        let controls = Controls::for_state(Status::Running, true);
        assert!(controls.is_enabled(Control::End));
        assert!(!controls.is_enabled(Control::Quit));
        assert!(!controls.is_enabled(Control::Vote));
    }

    #[test]
    fn test_closed_has_nothing() {
        assert_eq!(
            Controls::for_state(Status::SessionClosed, true)
                .enabled()
                .count(),
            0
        );
    }

    #[test]
    fn test_serializes_as_list() {
        let json = serde_json::to_string(&Controls::for_state(Status::Voting, false)).unwrap();
        assert_eq!(json, r#"["end","responses","answer","fullscreen","quit"]"#);
    }
}
