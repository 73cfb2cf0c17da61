//! Activity-level configuration
//!
//! Options that apply to every session of an activity: how long the
//! lead-in before each question lasts, what duration and try count a
//! question gets when its plan entry does not say, and how often
//! clients should poll.

use garde::Validate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use web_time::Duration;

use crate::{
    constants::{
        question::{MAX_DURATION, MIN_DURATION},
        session::*,
    },
    question::{validate_duration, validate_tries},
};

/// Options for all sessions of one activity
#[serde_with::serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Options {
    /// Lead-in between an instructor starting a question and answers opening
    #[garde(custom(validate_duration::<MIN_WAIT_FOR_QUESTION, MAX_WAIT_FOR_QUESTION>))]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub wait_for_question: Duration,
    /// Duration used for questions that do not set one (zero means untimed)
    #[garde(custom(validate_duration::<MIN_DURATION, MAX_DURATION>))]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub default_question_time: Duration,
    /// Tries granted on questions that do not set their own
    #[garde(custom(validate_tries))]
    pub default_tries: u32,
    /// Interval clients are asked to poll at
    #[garde(custom(validate_poll_interval))]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            wait_for_question: Duration::from_secs(DEFAULT_WAIT_FOR_QUESTION),
            default_question_time: Duration::from_secs(DEFAULT_QUESTION_TIME),
            default_tries: DEFAULT_TRIES,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

/// Errors raised while loading [`Options`]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The document is not valid JSON for [`Options`]
    #[error("malformed options: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The options parsed but are out of bounds
    #[error("invalid options: {0}")]
    Invalid(#[from] garde::Report),
}

impl Options {
    /// Parses and validates options from a JSON document
    ///
    /// Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Malformed`] if the JSON cannot be parsed and
    /// [`ConfigError::Invalid`] if a value is out of bounds.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }
}

fn validate_poll_interval(val: &Duration, _ctx: &()) -> garde::Result {
    let millis = val.as_millis();
    if (u128::from(MIN_POLL_INTERVAL_MS)..=u128::from(MAX_POLL_INTERVAL_MS)).contains(&millis) {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "outside of bounds [{MIN_POLL_INTERVAL_MS},{MAX_POLL_INTERVAL_MS}] ms",
        )))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Options::default().validate().is_ok());
    }

    #[test]
    fn test_empty_document_gives_defaults() {
        let options = Options::from_json("{}").unwrap();
        assert_eq!(options, Options::default());
    }

    #[test]
    fn test_partial_document_overrides() {
        let options =
            Options::from_json(r#"{"wait_for_question":0,"default_tries":3}"#).unwrap();
        assert_eq!(options.wait_for_question, Duration::ZERO);
        assert_eq!(options.default_tries, 3);
        assert_eq!(
            options.default_question_time,
            Duration::from_secs(DEFAULT_QUESTION_TIME)
        );
    }

    #[test]
    fn test_lead_in_too_long() {
        let json = format!(
            r#"{{"wait_for_question":{}}}"#,
            (MAX_WAIT_FOR_QUESTION + 1) * 1000
        );
        assert!(matches!(
            Options::from_json(&json),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_zero_tries_rejected() {
        assert!(matches!(
            Options::from_json(r#"{"default_tries":0}"#),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_poll_interval_bounds() {
        assert!(Options::from_json(r#"{"poll_interval":50}"#).is_err());
        assert!(Options::from_json(r#"{"poll_interval":1000}"#).is_ok());
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            Options::from_json("{"),
            Err(ConfigError::Malformed(_))
        ));
    }
}
