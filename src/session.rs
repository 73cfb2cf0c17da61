//! Session state machine
//!
//! A [`Session`] is the authoritative record of where a live quiz is:
//! which state it is in, which slot is current and when that slot's
//! question went (or goes) live. It is loaded per request and every
//! mutation goes through the methods below.
//!
//! There is no timer anywhere. A running question whose time is up is
//! moved to reviewing by [`Session::refresh`], which the first request
//! after the deadline calls.

use std::fmt::Display;

use enum_map::Enum;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use web_time::{Duration, SystemTime};

use crate::{config::Options, error::Error, id::Id, question::SlotQuestion};

/// The state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Waiting for the instructor to start the quiz
    NotRunning,
    /// Started, but no question has been asked yet
    Preparing,
    /// A question is counting down or accepting answers
    Running,
    /// Answers are closed and the instructor is going over them
    Reviewing,
    /// Students are voting on selected responses
    Voting,
    /// The session is over
    SessionClosed,
}

impl Status {
    /// Wire name of the state
    pub fn name(self) -> &'static str {
        match self {
            Self::NotRunning => "notrunning",
            Self::Preparing => "preparing",
            Self::Running => "running",
            Self::Reviewing => "reviewing",
            Self::Voting => "voting",
            Self::SessionClosed => "sessionclosed",
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How the next question is chosen when one is started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Start {
    /// The planned question after the last planned one asked
    Next,
    /// The current question again, with its responses cleared
    Repoll,
    /// A planned question picked out of order
    Jump {
        /// Planned slot to ask
        slot: usize,
        /// Replaces the slot's configured duration
        duration: Option<Duration>,
    },
    /// An ad hoc question appended to the sequence
    Improvise(SlotQuestion),
}

impl Start {
    /// Command name used in errors and logs
    pub fn command(&self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::Repoll => "repoll",
            Self::Jump { .. } => "jump",
            Self::Improvise(_) => "improvise",
        }
    }
}

/// Outcome of starting a question
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Started {
    /// Slot now current
    pub slot: usize,
    /// Whether the slot's earlier responses must be discarded
    pub cleared: bool,
}

/// The session aggregate
#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    id: Id,
    activity: Id,
    status: Status,
    /// Planned questions first, improvised insertions after
    sequence: Vec<SlotQuestion>,
    planned_len: usize,
    current_slot: Option<usize>,
    last_planned_slot: Option<usize>,
    /// Answering time of the current question; zero means untimed
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    current_duration: Duration,
    /// When the current question goes live
    scheduled_start: Option<SystemTime>,
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    wait_for_question: Duration,
    votes_pending_review: bool,
    /// Bumped on every committed transition
    version: u64,
}

impl Session {
    /// Creates a session that has not been started
    ///
    /// `planned` holds the plan's non-improvised questions in order.
    pub fn new(id: Id, activity: Id, planned: Vec<SlotQuestion>, options: &Options) -> Self {
        Self {
            id,
            activity,
            status: Status::NotRunning,
            planned_len: planned.len(),
            sequence: planned,
            current_slot: None,
            last_planned_slot: None,
            current_duration: Duration::ZERO,
            scheduled_start: None,
            wait_for_question: options.wait_for_question,
            votes_pending_review: false,
            version: 0,
        }
    }

    /// Session ID
    pub fn id(&self) -> Id {
        self.id
    }

    /// Owning activity
    pub fn activity(&self) -> Id {
        self.activity
    }

    /// Current state
    pub fn status(&self) -> Status {
        self.status
    }

    /// Whether the session has not been closed
    pub fn is_open(&self) -> bool {
        self.status != Status::SessionClosed
    }

    /// Transition counter, used to tell clients whether a state is new to them
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Current slot, if a question has been asked
    pub fn current_slot(&self) -> Option<usize> {
        self.current_slot
    }

    /// Question in the current slot
    pub fn current_question(&self) -> Option<&SlotQuestion> {
        self.current_slot.and_then(|slot| self.sequence.get(slot))
    }

    /// Answering time of the current question; zero means untimed
    pub fn current_duration(&self) -> Duration {
        self.current_duration
    }

    /// When the current question goes (or went) live
    pub fn scheduled_start(&self) -> Option<SystemTime> {
        self.scheduled_start
    }

    /// Number of planned slots
    pub fn planned_len(&self) -> usize {
        self.planned_len
    }

    /// Whether votes are waiting to be shown first in review
    pub fn votes_pending_review(&self) -> bool {
        self.votes_pending_review
    }

    /// Whether `next` would find a planned question
    pub fn has_next(&self) -> bool {
        self.next_slot() < self.planned_len
    }

    fn next_slot(&self) -> usize {
        self.last_planned_slot.map_or(0, |slot| slot + 1)
    }

    fn ensure(&self, command: &'static str, allowed: &[Status]) -> Result<(), Error> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(Error::IllegalTransition {
                status: self.status,
                command,
            })
        }
    }

    fn transition(&mut self, to: Status, reason: &'static str) {
        tracing::info!(
            session = %self.id,
            from = %self.status,
            to = %to,
            reason,
            "session state transition"
        );
        self.status = to;
        self.version += 1;
    }

    /// `notrunning → preparing`
    ///
    /// # Errors
    ///
    /// [`Error::IllegalTransition`] from any other state.
    pub fn start_quiz(&mut self) -> Result<(), Error> {
        self.ensure("start_quiz", &[Status::NotRunning])?;
        self.transition(Status::Preparing, "start_quiz");
        Ok(())
    }

    /// Checks that a question may be started now
    ///
    /// # Errors
    ///
    /// [`Error::IllegalTransition`] outside `preparing` and `reviewing`.
    pub fn check_start(&self, command: &'static str) -> Result<(), Error> {
        self.ensure(command, &[Status::Preparing, Status::Reviewing])
    }

    /// `preparing | reviewing → running`
    ///
    /// The question is in `running` right away but only goes live once the
    /// lead-in has passed.
    ///
    /// # Errors
    ///
    /// [`Error::IllegalTransition`] from any other state,
    /// [`Error::NoMoreQuestions`] when `next` runs past the plan,
    /// [`Error::UnknownSlot`] when a jump targets a slot outside the plan and
    /// [`Error::NoCurrentQuestion`] when repolling before anything was asked.
    /// The session is unchanged on error.
    pub fn start_question(&mut self, start: Start, now: SystemTime) -> Result<Started, Error> {
        self.check_start(start.command())?;

        let command = start.command();
        let (slot, duration, cleared) = match start {
            Start::Next => {
                let slot = self.next_slot();
                if slot >= self.planned_len {
                    return Err(Error::NoMoreQuestions);
                }
                (slot, self.sequence[slot].duration, false)
            }
            Start::Repoll => {
                let slot = self.current_slot.ok_or(Error::NoCurrentQuestion)?;
                (slot, self.sequence[slot].duration, true)
            }
            Start::Jump { slot, duration } => {
                if slot >= self.planned_len {
                    return Err(Error::UnknownSlot(slot));
                }
                (
                    slot,
                    duration.unwrap_or(self.sequence[slot].duration),
                    false,
                )
            }
            Start::Improvise(question) => {
                let duration = question.duration;
                self.sequence.push(question);
                (self.sequence.len() - 1, duration, false)
            }
        };

        if slot < self.planned_len {
            self.last_planned_slot = Some(slot);
        }
        self.current_slot = Some(slot);
        self.current_duration = duration;
        self.scheduled_start = Some(now + self.wait_for_question);
        self.votes_pending_review = false;
        self.transition(Status::Running, command);

        Ok(Started { slot, cleared })
    }

    /// `running → reviewing`, or `voting → reviewing` with votes pending review
    ///
    /// Returns `false` when already reviewing or closed, which is a no-op.
    ///
    /// # Errors
    ///
    /// [`Error::IllegalTransition`] from `notrunning` or `preparing`.
    pub fn end_question(&mut self) -> Result<bool, Error> {
        match self.status {
            Status::Reviewing | Status::SessionClosed => Ok(false),
            Status::Running => {
                self.transition(Status::Reviewing, "end_question");
                Ok(true)
            }
            Status::Voting => {
                self.votes_pending_review = true;
                self.transition(Status::Reviewing, "end_vote");
                Ok(true)
            }
            Status::NotRunning | Status::Preparing => Err(Error::IllegalTransition {
                status: self.status,
                command: "end_question",
            }),
        }
    }

    /// Checks that a vote may start with this many selected buckets
    ///
    /// # Errors
    ///
    /// [`Error::IllegalTransition`] outside `reviewing`,
    /// [`Error::EmptySelection`] when nothing is selected.
    pub fn check_voting(&self, selected: usize) -> Result<(), Error> {
        self.ensure("run_voting", &[Status::Reviewing])?;
        if selected == 0 {
            return Err(Error::EmptySelection);
        }
        Ok(())
    }

    /// `reviewing → voting`
    ///
    /// # Errors
    ///
    /// Same as [`Session::check_voting`].
    pub fn run_voting(&mut self, selected: usize) -> Result<(), Error> {
        self.check_voting(selected)?;
        self.votes_pending_review = false;
        self.transition(Status::Voting, "run_voting");
        Ok(())
    }

    /// Any open state → `sessionclosed`
    ///
    /// # Errors
    ///
    /// [`Error::IllegalTransition`] if the session is already closed.
    pub fn close(&mut self) -> Result<(), Error> {
        self.ensure(
            "close_session",
            &[
                Status::NotRunning,
                Status::Preparing,
                Status::Running,
                Status::Reviewing,
                Status::Voting,
            ],
        )?;
        self.transition(Status::SessionClosed, "close_session");
        Ok(())
    }

    /// Checks that the correct answer may be revealed
    ///
    /// # Errors
    ///
    /// [`Error::IllegalTransition`] outside `reviewing` and `voting`.
    pub fn check_show_answer(&self) -> Result<(), Error> {
        self.ensure("show_answer", &[Status::Reviewing, Status::Voting])
    }

    /// When the current timed question stops accepting answers
    pub fn deadline(&self) -> Option<SystemTime> {
        if self.current_duration.is_zero() {
            return None;
        }
        self.scheduled_start.map(|start| start + self.current_duration)
    }

    /// Applies the lazy timeout: a timed running question past its deadline
    /// moves to reviewing
    ///
    /// Returns whether a transition happened.
    pub fn refresh(&mut self, now: SystemTime) -> bool {
        if self.status != Status::Running {
            return false;
        }
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.transition(Status::Reviewing, "timeout");
                true
            }
            _ => false,
        }
    }

    /// Whether answers are accepted at `now`
    pub fn is_live(&self, now: SystemTime) -> bool {
        self.status == Status::Running
            && self.scheduled_start.is_some_and(|start| now >= start)
            && self.deadline().is_none_or(|deadline| now < deadline)
    }

    /// Time left in the lead-in, zero once live
    pub fn delay(&self, now: SystemTime) -> Duration {
        self.scheduled_start
            .and_then(|start| start.duration_since(now).ok())
            .unwrap_or_default()
    }

    /// Answering time left, or `None` for untimed questions
    pub fn remaining(&self, now: SystemTime) -> Option<Duration> {
        self.deadline()
            .map(|deadline| deadline.duration_since(now).unwrap_or_default())
    }
}
