//! Client resynchronization
//!
//! Clients poll, reconnect and refresh at will, so every poll answers
//! with the full view the client should render. The view is derived
//! from stored state and the current time alone.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use web_time::{Duration, SystemTime};

use crate::{
    attempt::{Attempts, TriesLeft},
    id::Id,
    question::QuestionBank,
    responses::{ResponseAggregator, ResponseSnapshot},
    session::{Session, Status},
    vote::{VoteAggregator, VoteSnapshot},
};

/// Role of whoever is asking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Controls the session
    Instructor,
    /// Answers questions
    Student,
}

/// What a client should render
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum View {
    /// The quiz has not started
    NotRunning {
        /// Participants joined so far
        joined: usize,
    },
    /// The quiz started; no question yet
    Preparing,
    /// A question is about to go live
    WaitForQuestion {
        /// Slot of the question
        slot: usize,
        /// Time until it goes live
        delay_ms: u64,
        /// Answering time once live; zero means untimed
        duration_ms: u64,
    },
    /// A question is live
    StartQuestion {
        /// Slot of the question
        slot: usize,
        /// Rendered question, if the bank still has it
        markup: Option<String>,
        /// Answering time left; absent for untimed questions
        remaining_ms: Option<u64>,
        /// Tries the viewer has left; absent for instructors
        tries_left: Option<TriesLeft>,
        /// Whether the viewer already answered; absent for instructors
        answered: Option<bool>,
        /// Responses so far; instructors only
        responses: Option<ResponseSnapshot>,
    },
    /// Answers are closed
    Reviewing {
        /// Slot under review
        slot: usize,
        /// Whether this connection sees this state for the first time
        is_new_state: bool,
        /// Whether the viewer answered; absent for instructors
        answered: Option<bool>,
        /// Responses to the slot
        responses: ResponseSnapshot,
        /// Result of the latest vote on the slot, if any
        votes: Option<VoteSnapshot>,
        /// Whether the vote result should be shown before the responses
        show_votes_first: bool,
    },
    /// A vote is running
    Voting {
        /// Slot voted on
        slot: usize,
        /// Whether this connection sees this state for the first time
        is_new_state: bool,
        /// Options and tallies
        votes: VoteSnapshot,
        /// Whether the viewer already voted; absent for instructors
        has_voted: Option<bool>,
    },
    /// The session is over
    SessionClosed,
}

/// The stored state a view is derived from
#[derive(Clone, Copy)]
pub struct Snapshot<'a> {
    /// The session
    pub session: &'a Session,
    /// Its attempts
    pub attempts: &'a Attempts,
    /// Its responses
    pub responses: &'a ResponseAggregator,
    /// Its vote rounds
    pub votes: &'a VoteAggregator,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Snapshot<'_> {
    /// Builds the view for one viewer at `now`
    ///
    /// Call [`Session::refresh`] first so an expired question is already
    /// in review.
    pub fn view(
        &self,
        participant: Id,
        role: Role,
        is_new_state: bool,
        bank: &dyn QuestionBank,
        now: SystemTime,
    ) -> View {
        let session = self.session;
        let enrolled = self.attempts.enrolled();
        let slot = session.current_slot().unwrap_or_default();
        let answered = (role == Role::Student).then(|| {
            self.attempts
                .get(participant)
                .is_some_and(|attempt| attempt.has_answered(slot))
        });

        match session.status() {
            Status::NotRunning => View::NotRunning { joined: enrolled },
            Status::Preparing => View::Preparing,
            Status::Running if !session.is_live(now) && session.delay(now) > Duration::ZERO => {
                View::WaitForQuestion {
                    slot,
                    delay_ms: millis(session.delay(now)),
                    duration_ms: millis(session.current_duration()),
                }
            }
            Status::Running => {
                let question = session.current_question();
                let (tries_left, responses) = match role {
                    Role::Student => (
                        Some(self.attempts.get(participant).map_or_else(
                            || TriesLeft::Count(0),
                            |attempt| {
                                attempt.tries_left(slot, question.and_then(|q| q.tries))
                            },
                        )),
                        None,
                    ),
                    Role::Instructor => (None, Some(self.responses.snapshot(slot, enrolled))),
                };
                View::StartQuestion {
                    slot,
                    markup: question
                        .and_then(|q| bank.lookup(q.question))
                        .map(|info| info.markup),
                    remaining_ms: session.remaining(now).map(millis),
                    tries_left,
                    answered,
                    responses,
                }
            }
            Status::Reviewing => View::Reviewing {
                slot,
                is_new_state,
                answered,
                responses: self.responses.snapshot(slot, enrolled),
                votes: self.votes.latest_for(slot).map(VoteSnapshot::from),
                show_votes_first: session.votes_pending_review(),
            },
            Status::Voting => match self.votes.current() {
                Some(round) => View::Voting {
                    slot: round.slot(),
                    is_new_state,
                    votes: VoteSnapshot::from(round),
                    has_voted: (role == Role::Student).then(|| round.has_voted(participant)),
                },
                None => View::Preparing,
            },
            Status::SessionClosed => View::SessionClosed,
        }
    }
}

/// Which state version each connection has already seen
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sightings {
    seen: HashMap<Id, u64>,
}

impl Sightings {
    /// Records that `connection` saw `version`, returning whether it is new
    /// to that connection
    ///
    /// Connections that last saw an older version are forgotten; to them
    /// the current version is new either way.
    pub fn observe(&mut self, connection: Id, version: u64) -> bool {
        self.seen.retain(|_, seen| *seen >= version);
        match self.seen.insert(connection, version) {
            Some(previous) => previous != version,
            None => true,
        }
    }

    /// Forgets every connection
    pub fn clear(&mut self) {
        self.seen.clear();
    }
}
