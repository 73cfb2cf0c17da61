//! Questions, quiz plans and answer normalization
//!
//! The engine never looks inside a question. It only needs to know how
//! long a question runs, how many tries students get, and which
//! normalization rule applies to its answers. Everything else is handed
//! through from the [`QuestionBank`] untouched.

use std::fmt::Display;

use garde::Validate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use web_time::Duration;

use crate::{
    config::Options,
    constants::{
        question::{MAX_DURATION, MAX_NAME_LENGTH, MAX_TRIES, MIN_DURATION, MIN_TRIES},
        quiz::{MAX_QUESTION_COUNT, MAX_TITLE_LENGTH},
    },
};

/// Reference to a question in the external question bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuestionRef(pub u64);

impl Display for QuestionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Normalization family of a question, derived from its type tag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// Free text answers; surrounding whitespace is insignificant
    FreeText,
    /// Symbolic or equation answers; all whitespace is insignificant
    Symbolic,
    /// Anything else; answers are compared as submitted
    #[default]
    Other,
}

impl QuestionKind {
    /// Picks the normalization family for a question type tag
    pub fn from_type_tag(tag: &str) -> Self {
        match tag {
            "shortanswer" | "essay" => Self::FreeText,
            "stack" | "equation" | "algebra" => Self::Symbolic,
            _ => Self::Other,
        }
    }

    /// Normalizes a raw answer so equivalent answers compare equal
    ///
    /// Matching after normalization is exact and case-sensitive.
    pub fn normalize(self, raw: &str) -> String {
        match self {
            Self::FreeText => raw.trim().to_owned(),
            Self::Symbolic => raw.chars().filter(|c| !c.is_whitespace()).collect(),
            Self::Other => raw.to_owned(),
        }
    }
}

/// What the question bank knows about one question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionInfo {
    /// Question type tag, used only to pick a [`QuestionKind`]
    pub type_tag: String,
    /// Rendered question markup
    pub markup: String,
    /// Rendered correct answer markup
    pub right_answer: String,
}

/// The question-rendering collaborator
pub trait QuestionBank: Send + Sync {
    /// Looks up a question, returning `None` if it does not exist
    fn lookup(&self, question: QuestionRef) -> Option<QuestionInfo>;
}

/// Validates that a duration falls within specified bounds
///
/// # Errors
///
/// Returns a `garde::Error` if the duration in whole seconds is outside
/// `MIN_SECONDS..=MAX_SECONDS`.
pub fn validate_duration<const MIN_SECONDS: u64, const MAX_SECONDS: u64>(
    val: &Duration,
    _ctx: &(),
) -> garde::Result {
    if (MIN_SECONDS..=MAX_SECONDS).contains(&val.as_secs()) {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "outside of bounds [{MIN_SECONDS},{MAX_SECONDS}]",
        )))
    }
}

/// Same as [`validate_duration`] for optional durations; `None` is valid
///
/// # Errors
///
/// Returns a `garde::Error` if the duration is present and out of bounds.
pub fn validate_optional_duration<const MIN_SECONDS: u64, const MAX_SECONDS: u64>(
    val: &Option<Duration>,
    ctx: &(),
) -> garde::Result {
    val.as_ref()
        .map_or(Ok(()), |d| validate_duration::<MIN_SECONDS, MAX_SECONDS>(d, ctx))
}

/// Validates a try count
///
/// # Errors
///
/// Returns a `garde::Error` if the count is outside `MIN_TRIES..=MAX_TRIES`.
pub fn validate_tries(val: &u32, _ctx: &()) -> garde::Result {
    if (MIN_TRIES..=MAX_TRIES).contains(val) {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "outside of bounds [{MIN_TRIES},{MAX_TRIES}]",
        )))
    }
}

fn validate_optional_tries(val: &Option<u32>, ctx: &()) -> garde::Result {
    val.as_ref().map_or(Ok(()), |t| validate_tries(t, ctx))
}

/// One entry of a quiz plan
#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct PlannedQuestion {
    /// The question to ask
    #[garde(skip)]
    pub question: QuestionRef,
    /// Display name used in question lists
    #[garde(length(chars, max = MAX_NAME_LENGTH))]
    pub name: String,
    /// How long the question accepts answers; zero means untimed, `None` uses the activity default
    #[garde(custom(validate_optional_duration::<MIN_DURATION, MAX_DURATION>))]
    #[serde_as(as = "Option<serde_with::DurationMilliSeconds<u64>>")]
    pub duration: Option<Duration>,
    /// Maximum tries per participant; `None` means unlimited
    #[garde(custom(validate_optional_tries))]
    #[serde(default)]
    pub tries: Option<u32>,
    /// Template for ad hoc questions rather than part of the planned sequence
    #[garde(skip)]
    #[serde(default)]
    pub improvised: bool,
}

/// The saved, ordered question plan of an activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct QuizPlan {
    /// Title of the plan
    #[garde(length(chars, max = MAX_TITLE_LENGTH))]
    pub title: String,
    /// Planned questions and improvisation templates, in order
    #[garde(length(max = MAX_QUESTION_COUNT), dive)]
    pub questions: Vec<PlannedQuestion>,
}

impl QuizPlan {
    /// Planned questions in the order they are asked
    pub fn planned(&self) -> impl Iterator<Item = &PlannedQuestion> {
        self.questions.iter().filter(|q| !q.improvised)
    }

    /// Templates offered for improvised questions
    pub fn improvise_templates(&self) -> impl Iterator<Item = &PlannedQuestion> {
        self.questions.iter().filter(|q| q.improvised)
    }

    /// Finds the improvisation template for a question, if any
    pub fn template_for(&self, question: QuestionRef) -> Option<&PlannedQuestion> {
        self.improvise_templates().find(|q| q.question == question)
    }

    /// Number of planned (non-improvised) questions
    pub fn planned_len(&self) -> usize {
        self.planned().count()
    }
}

/// A question as it sits in a session slot, with defaults applied
#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotQuestion {
    /// The question asked in this slot
    pub question: QuestionRef,
    /// Display name
    pub name: String,
    /// Answering time; zero means untimed
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub duration: Duration,
    /// Maximum tries per participant; `None` means unlimited
    pub tries: Option<u32>,
    /// Normalization family of the answers
    pub kind: QuestionKind,
    /// Inserted ad hoc rather than taken from the plan
    pub improvised: bool,
}

impl SlotQuestion {
    /// Resolves a plan entry into a slot, filling gaps from the options
    pub fn from_plan(entry: &PlannedQuestion, kind: QuestionKind, options: &Options) -> Self {
        Self {
            question: entry.question,
            name: entry.name.clone(),
            duration: entry.duration.unwrap_or(options.default_question_time),
            tries: entry.tries,
            kind,
            improvised: entry.improvised,
        }
    }

    /// Builds an improvised slot, using the template when one exists
    pub fn improvised(
        question: QuestionRef,
        template: Option<&PlannedQuestion>,
        kind: QuestionKind,
        options: &Options,
    ) -> Self {
        match template {
            Some(template) => Self {
                improvised: true,
                ..Self::from_plan(template, kind, options)
            },
            None => Self {
                question,
                name: format!("Question {question}"),
                duration: options.default_question_time,
                tries: Some(options.default_tries),
                kind,
                improvised: true,
            },
        }
    }
}

/// An entry in the jump or improvise menus
#[serde_with::serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionListEntry {
    /// Slot the entry maps to (planned list only)
    pub slot: Option<usize>,
    /// The question
    pub question: QuestionRef,
    /// Display name
    pub name: String,
    /// Configured duration, if any
    #[serde_as(as = "Option<serde_with::DurationMilliSeconds<u64>>")]
    pub duration: Option<Duration>,
}

impl QuizPlan {
    /// Lists planned questions with their slots, for jumping
    pub fn jump_list(&self) -> Vec<QuestionListEntry> {
        self.planned()
            .enumerate()
            .map(|(slot, q)| QuestionListEntry {
                slot: Some(slot),
                question: q.question,
                name: q.name.clone(),
                duration: q.duration,
            })
            .collect_vec()
    }

    /// Lists improvisation templates
    pub fn improvise_list(&self) -> Vec<QuestionListEntry> {
        self.improvise_templates()
            .map(|q| QuestionListEntry {
                slot: None,
                question: q.question,
                name: q.name.clone(),
                duration: q.duration,
            })
            .collect_vec()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn entry(question: u64, improvised: bool) -> PlannedQuestion {
        PlannedQuestion {
            question: QuestionRef(question),
            name: format!("Q{question}"),
            duration: Some(Duration::from_secs(30)),
            tries: Some(2),
            improvised,
        }
    }

    fn plan() -> QuizPlan {
        QuizPlan {
            title: "Week 3".to_owned(),
            questions: vec![entry(1, false), entry(2, true), entry(3, false)],
        }
    }

    #[test]
    fn test_free_text_trims() {
        assert_eq!(QuestionKind::FreeText.normalize("  42 \n"), "42");
        assert_eq!(QuestionKind::FreeText.normalize("a  b"), "a  b");
    }

    #[test]
    fn test_symbolic_strips_all_whitespace() {
        assert_eq!(QuestionKind::Symbolic.normalize(" x ^ 2 +\t1 "), "x^2+1");
    }

    #[test]
    fn test_other_passes_through() {
        assert_eq!(QuestionKind::Other.normalize(" B "), " B ");
    }

    #[test]
    fn test_normalization_is_case_sensitive() {
        assert_ne!(
            QuestionKind::FreeText.normalize("Paris"),
            QuestionKind::FreeText.normalize("paris")
        );
    }

    #[test]
    fn test_type_tags() {
        assert_eq!(QuestionKind::from_type_tag("shortanswer"), QuestionKind::FreeText);
        assert_eq!(QuestionKind::from_type_tag("stack"), QuestionKind::Symbolic);
        assert_eq!(QuestionKind::from_type_tag("multichoice"), QuestionKind::Other);
    }

    #[test]
    fn test_planned_skips_templates() {
        let plan = plan();
        assert_eq!(plan.planned_len(), 2);
        assert_eq!(
            plan.planned().map(|q| q.question).collect_vec(),
            vec![QuestionRef(1), QuestionRef(3)]
        );
        assert!(plan.template_for(QuestionRef(2)).is_some());
        assert!(plan.template_for(QuestionRef(1)).is_none());
    }

    #[test]
    fn test_jump_list_slots() {
        let list = plan().jump_list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].slot, Some(1));
        assert_eq!(list[1].question, QuestionRef(3));
        assert_eq!(plan().improvise_list().len(), 1);
    }

    #[test]
    fn test_plan_validation() {
        assert!(plan().validate().is_ok());

        let mut too_long = plan();
        too_long.questions[0].duration = Some(Duration::from_secs(MAX_DURATION + 1));
        assert!(too_long.validate().is_err());

        let mut zero_tries = plan();
        zero_tries.questions[0].tries = Some(0);
        assert!(zero_tries.validate().is_err());

        let mut too_many = plan();
        too_many.questions = vec![entry(1, false); MAX_QUESTION_COUNT + 1];
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn test_slot_defaults() {
        let options = Options::default();
        let mut e = entry(1, false);
        e.duration = None;
        let slot = SlotQuestion::from_plan(&e, QuestionKind::FreeText, &options);
        assert_eq!(slot.duration, options.default_question_time);
        assert_eq!(slot.tries, Some(2));
    }

    #[test]
    fn test_improvised_without_template() {
        let options = Options::default();
        let slot = SlotQuestion::improvised(QuestionRef(9), None, QuestionKind::Other, &options);
        assert!(slot.improvised);
        assert_eq!(slot.tries, Some(options.default_tries));
    }

    #[test]
    fn test_improvised_with_template() {
        let options = Options::default();
        let template = entry(2, true);
        let slot = SlotQuestion::improvised(
            QuestionRef(2),
            Some(&template),
            QuestionKind::FreeText,
            &options,
        );
        assert_eq!(slot.duration, Duration::from_secs(30));
        assert_eq!(slot.name, "Q2");
        assert!(slot.improvised);
    }

    #[test]
    fn test_plan_deserializes_with_defaults() {
        let json = r#"{"title":"T","questions":[{"question":5,"name":"Five"}]}"#;
        let plan: QuizPlan = serde_json::from_str(json).unwrap();
        assert_eq!(plan.questions[0].duration, None);
        assert_eq!(plan.questions[0].tries, None);
        assert!(!plan.questions[0].improvised);
    }
}
