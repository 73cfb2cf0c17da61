//! Participant attempts
//!
//! An [`Attempt`] binds one participant to one session and counts the
//! tries they used per slot. [`Attempts`] is the registry for a session;
//! there is at most one attempt per participant in it.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use web_time::SystemTime;

use crate::{constants::quiz::MAX_PARTICIPANT_COUNT, error::Error, id::Id};

/// Tries a participant has left on a question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriesLeft {
    /// The question has no try limit
    Unlimited,
    /// This many tries remain
    Count(u32),
}

impl TriesLeft {
    /// Whether no tries remain
    pub fn is_exhausted(self) -> bool {
        self == Self::Count(0)
    }
}

/// One participant's record in a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    participant: Id,
    joined_at: SystemTime,
    /// Tries used, by slot
    tries: BTreeMap<usize, u32>,
    closed: bool,
}

impl Attempt {
    fn new(participant: Id, joined_at: SystemTime) -> Self {
        Self {
            participant,
            joined_at,
            tries: BTreeMap::new(),
            closed: false,
        }
    }

    /// The participant this attempt belongs to
    pub fn participant(&self) -> Id {
        self.participant
    }

    /// When the participant joined
    pub fn joined_at(&self) -> SystemTime {
        self.joined_at
    }

    /// Tries used on a slot
    pub fn tries_used(&self, slot: usize) -> u32 {
        self.tries.get(&slot).copied().unwrap_or_default()
    }

    /// Whether the participant answered a slot at least once
    pub fn has_answered(&self, slot: usize) -> bool {
        self.tries_used(slot) > 0
    }

    /// Tries left on a slot allowing at most `max` tries
    pub fn tries_left(&self, slot: usize, max: Option<u32>) -> TriesLeft {
        match max {
            None => TriesLeft::Unlimited,
            Some(max) => TriesLeft::Count(max.saturating_sub(self.tries_used(slot))),
        }
    }

    /// Whether the session closed this attempt
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// All attempts of a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempts {
    attempts: HashMap<Id, Attempt>,
}

impl Attempts {
    /// Joins a participant, returning `false` if they already had an attempt
    ///
    /// # Errors
    ///
    /// [`Error::MaximumParticipants`] when the session is full.
    pub fn join(&mut self, participant: Id, now: SystemTime) -> Result<bool, Error> {
        if self.attempts.contains_key(&participant) {
            return Ok(false);
        }
        if self.attempts.len() >= MAX_PARTICIPANT_COUNT {
            return Err(Error::MaximumParticipants);
        }
        self.attempts
            .insert(participant, Attempt::new(participant, now));
        Ok(true)
    }

    /// Looks up a participant's attempt
    pub fn get(&self, participant: Id) -> Option<&Attempt> {
        self.attempts.get(&participant)
    }

    /// Uses one try on `slot`, returning the tries left afterwards
    ///
    /// # Errors
    ///
    /// [`Error::NotJoined`] without an open attempt,
    /// [`Error::TriesExhausted`] when all `max` tries are used. Nothing is
    /// counted on error.
    pub fn use_try(
        &mut self,
        participant: Id,
        slot: usize,
        max: Option<u32>,
    ) -> Result<TriesLeft, Error> {
        let attempt = self
            .attempts
            .get_mut(&participant)
            .filter(|attempt| !attempt.closed)
            .ok_or(Error::NotJoined)?;

        if attempt.tries_left(slot, max).is_exhausted() {
            return Err(Error::TriesExhausted);
        }
        *attempt.tries.entry(slot).or_default() += 1;
        Ok(attempt.tries_left(slot, max))
    }

    /// Number of open attempts
    pub fn enrolled(&self) -> usize {
        self.attempts.values().filter(|a| !a.closed).count()
    }

    /// Closes every attempt
    pub fn close_all(&mut self) {
        for attempt in self.attempts.values_mut() {
            attempt.closed = true;
        }
    }

    /// Forgets the tries everyone used on `slot`
    pub fn reset_slot(&mut self, slot: usize) {
        for attempt in self.attempts.values_mut() {
            attempt.tries.remove(&slot);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH
    }

    #[test]
    fn test_one_attempt_per_participant() {
        let mut attempts = Attempts::default();
        let id = Id::new();
        assert!(attempts.join(id, now()).unwrap());
        assert!(!attempts.join(id, now()).unwrap());
        assert_eq!(attempts.enrolled(), 1);
    }

    #[test]
    fn test_tries_count_down() {
        let mut attempts = Attempts::default();
        let id = Id::new();
        attempts.join(id, now()).unwrap();

        assert_eq!(attempts.use_try(id, 0, Some(2)), Ok(TriesLeft::Count(1)));
        assert_eq!(attempts.use_try(id, 0, Some(2)), Ok(TriesLeft::Count(0)));
        assert_eq!(attempts.use_try(id, 0, Some(2)), Err(Error::TriesExhausted));
        assert_eq!(attempts.get(id).unwrap().tries_used(0), 2);

        // other slots are independent
        assert_eq!(attempts.use_try(id, 1, Some(2)), Ok(TriesLeft::Count(1)));
    }

    #[test]
    fn test_unlimited_tries() {
        let mut attempts = Attempts::default();
        let id = Id::new();
        attempts.join(id, now()).unwrap();
        for _ in 0..50 {
            assert_eq!(attempts.use_try(id, 0, None), Ok(TriesLeft::Unlimited));
        }
    }

    #[test]
    fn test_not_joined() {
        let mut attempts = Attempts::default();
        assert_eq!(
            attempts.use_try(Id::new(), 0, None),
            Err(Error::NotJoined)
        );
    }

    #[test]
    fn test_closed_attempts_reject_tries() {
        let mut attempts = Attempts::default();
        let id = Id::new();
        attempts.join(id, now()).unwrap();
        attempts.close_all();
        assert!(attempts.get(id).unwrap().is_closed());
        assert_eq!(attempts.enrolled(), 0);
        assert_eq!(attempts.use_try(id, 0, None), Err(Error::NotJoined));
    }

    #[test]
    fn test_reset_slot() {
        let mut attempts = Attempts::default();
        let id = Id::new();
        attempts.join(id, now()).unwrap();
        attempts.use_try(id, 3, Some(1)).unwrap();
        assert!(attempts.get(id).unwrap().has_answered(3));
        assert!(!attempts.get(id).unwrap().has_answered(2));
        attempts.reset_slot(3);
        assert!(!attempts.get(id).unwrap().has_answered(3));
        assert_eq!(attempts.use_try(id, 3, Some(1)), Ok(TriesLeft::Count(0)));
    }

    #[test]
    fn test_participant_limit() {
        let mut attempts = Attempts::default();
        for _ in 0..MAX_PARTICIPANT_COUNT {
            attempts.join(Id::new(), now()).unwrap();
        }
        assert_eq!(
            attempts.join(Id::new(), now()),
            Err(Error::MaximumParticipants)
        );
    }
}
