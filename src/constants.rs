//! Configuration constants for the quiz session engine
//!
//! This module contains the limits and timings used throughout the
//! engine to validate plans, options and incoming payloads, and the
//! defaults applied when an activity does not configure its own.

/// Quiz plan constants
pub mod quiz {
    /// Maximum number of questions allowed in a single plan
    pub const MAX_QUESTION_COUNT: usize = 100;
    /// Maximum length of a plan title in characters
    pub const MAX_TITLE_LENGTH: usize = 200;
    /// Maximum number of participants that may join one session
    pub const MAX_PARTICIPANT_COUNT: usize = 1000;
}

/// Per-question constants
pub mod question {
    /// Maximum length of a question name in characters
    pub const MAX_NAME_LENGTH: usize = 200;
    /// Minimum question duration in seconds (0 means untimed)
    pub const MIN_DURATION: u64 = 0;
    /// Maximum question duration in seconds
    pub const MAX_DURATION: u64 = 3600;
    /// Minimum number of tries a participant may be given
    pub const MIN_TRIES: u32 = 1;
    /// Maximum number of tries a participant may be given
    pub const MAX_TRIES: u32 = 100;
}

/// Session timing constants
pub mod session {
    /// Default lead-in in seconds between starting a question and it going live
    pub const DEFAULT_WAIT_FOR_QUESTION: u64 = 3;
    /// Minimum lead-in in seconds
    pub const MIN_WAIT_FOR_QUESTION: u64 = 0;
    /// Maximum lead-in in seconds
    pub const MAX_WAIT_FOR_QUESTION: u64 = 60;
    /// Default question duration in seconds when a plan entry does not set one
    pub const DEFAULT_QUESTION_TIME: u64 = 60;
    /// Default number of tries for questions that do not set one
    pub const DEFAULT_TRIES: u32 = 1;
    /// Default interval in milliseconds at which clients are told to poll
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
    /// Minimum poll interval in milliseconds
    pub const MIN_POLL_INTERVAL_MS: u64 = 100;
    /// Maximum poll interval in milliseconds
    pub const MAX_POLL_INTERVAL_MS: u64 = 10_000;
}

/// Answer text constants
pub mod answer_text {
    /// Maximum length of a submitted answer in characters
    pub const MAX_LENGTH: usize = 1000;
}

/// Vote round constants
pub mod vote {
    /// Maximum number of buckets an instructor may put up for a vote
    pub const MAX_OPTION_COUNT: usize = 32;
}
