//! Session engine and client protocol
//!
//! A [`Room`] is the stored record of one session: the state machine,
//! the attempts, the responses and vote rounds, and the plan they were
//! built from. The [`Engine`] loads a room per request, applies one
//! incoming message and writes the room back. Requests on the same
//! session are serialized; requests on different sessions never wait on
//! each other.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use web_time::{Duration, SystemTime};

use crate::{
    attempt::Attempts,
    clock::Clock,
    config::Options,
    constants::{
        answer_text,
        question::{MAX_DURATION, MIN_DURATION},
        vote::MAX_OPTION_COUNT,
    },
    controls::Controls,
    error::Error,
    id::Id,
    question::{
        QuestionBank, QuestionKind, QuestionListEntry, QuestionRef, QuizPlan, SlotQuestion,
        validate_optional_duration,
    },
    responses::{BucketId, ResponseAggregator, Submitted},
    resync::{Role, Sightings, Snapshot, View},
    session::{Session, Start, Status},
    store::{Record, Store, StoreError, Versioned},
    vote::VoteAggregator,
};

/// The auth collaborator
pub trait Authorizer: Send + Sync {
    /// Whether `participant` may control sessions of `activity`
    fn is_instructor(&self, participant: Id, activity: Id) -> bool;
}

/// Messages a client can send
#[derive(Debug, Deserialize, Clone)]
pub enum IncomingMessage {
    /// Commands from the instructor
    Instructor(IncomingInstructorMessage),
    /// Answers and votes from students
    Student(IncomingStudentMessage),
    /// Asks for the current view
    Poll,
}

impl IncomingMessage {
    fn follows(&self, role: Role) -> bool {
        matches!(
            (self, role),
            (IncomingMessage::Instructor(_), Role::Instructor)
                | (IncomingMessage::Student(_), Role::Student)
                | (IncomingMessage::Poll, _)
        )
    }
}

/// Commands only the instructor can issue
#[serde_with::serde_as]
#[derive(Debug, Deserialize, Clone, Validate)]
pub enum IncomingInstructorMessage {
    /// Starts the quiz
    StartQuiz,
    /// Asks the next planned question
    Next,
    /// Asks a planned question out of order
    Jump {
        /// Planned slot to ask
        #[garde(skip)]
        slot: usize,
        /// Replaces the slot's configured duration
        #[garde(custom(validate_optional_duration::<MIN_DURATION, MAX_DURATION>))]
        #[serde_as(as = "Option<serde_with::DurationMilliSeconds<u64>>")]
        duration: Option<Duration>,
    },
    /// Asks the current question again, discarding its responses
    Repoll,
    /// Asks a question that is not part of the plan
    Improvise {
        /// Question to ask
        #[garde(skip)]
        question: QuestionRef,
        /// Replaces the default duration
        #[garde(custom(validate_optional_duration::<MIN_DURATION, MAX_DURATION>))]
        #[serde_as(as = "Option<serde_with::DurationMilliSeconds<u64>>")]
        duration: Option<Duration>,
    },
    /// Stops accepting answers, or ends a vote
    EndQuestion,
    /// Starts a vote on the selected buckets
    RunVoting {
        /// Buckets to vote on
        #[garde(length(max = MAX_OPTION_COUNT))]
        buckets: Vec<BucketId>,
    },
    /// Reveals the correct answer of the current question
    ShowAnswer,
    /// Merges two buckets of the responses, or of the vote while voting
    MergeBuckets {
        /// Bucket that disappears
        #[garde(skip)]
        from: BucketId,
        /// Bucket that absorbs it
        #[garde(skip)]
        into: BucketId,
    },
    /// Undoes the latest merge
    UndoMerge,
    /// Ends the session for everyone
    CloseSession,
    /// Lists planned questions to jump to
    ListJumpQuestions,
    /// Lists questions offered for improvising
    ListImproviseQuestions,
}

impl IncomingInstructorMessage {
    fn name(&self) -> &'static str {
        match self {
            Self::StartQuiz => "start_quiz",
            Self::Next => "next",
            Self::Jump { .. } => "jump",
            Self::Repoll => "repoll",
            Self::Improvise { .. } => "improvise",
            Self::EndQuestion => "end_question",
            Self::RunVoting { .. } => "run_voting",
            Self::ShowAnswer => "show_answer",
            Self::MergeBuckets { .. } => "merge_buckets",
            Self::UndoMerge => "undo_merge",
            Self::CloseSession => "close_session",
            Self::ListJumpQuestions => "list_jump_questions",
            Self::ListImproviseQuestions => "list_improvise_questions",
        }
    }
}

/// Messages students can send
#[derive(Debug, Deserialize, Clone, Validate)]
pub enum IncomingStudentMessage {
    /// An answer to the live question
    Answer(#[garde(length(chars, max = answer_text::MAX_LENGTH))] String),
    /// A vote for one option of the running vote
    Vote(#[garde(skip)] BucketId),
}

/// Full state a client should render
#[skip_serializing_none]
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct SyncMessage {
    /// Session state
    pub status: Status,
    /// Transition counter of the session
    pub version: u64,
    /// What to render
    pub view: View,
    /// Enabled controls; instructors only
    pub controls: Option<Controls>,
    /// How long to wait before polling again
    pub poll_interval_ms: u64,
}

/// The correct answer of a question
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct AnswerMessage {
    /// Slot of the question
    pub slot: usize,
    /// Rendered correct answer
    pub right_answer: String,
}

/// Replies to incoming messages
#[derive(Debug, Serialize, Clone, PartialEq, Eq, derive_more::From)]
pub enum Reply {
    /// Current view after the message was applied
    Sync(SyncMessage),
    /// An answer was recorded
    Accepted(Submitted),
    /// The correct answer
    Answer(AnswerMessage),
    /// A question menu
    Questions(Vec<QuestionListEntry>),
}

impl Reply {
    /// Converts the reply to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }
}

/// The stored record of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    session: Session,
    plan: QuizPlan,
    options: Options,
    attempts: Attempts,
    responses: ResponseAggregator,
    votes: VoteAggregator,
    sightings: Sightings,
}

impl Room {
    /// Builds a fresh room, resolving every planned question against the bank
    ///
    /// # Errors
    ///
    /// [`Error::UnknownQuestion`] if a planned question is not in the bank.
    pub fn new(
        id: Id,
        activity: Id,
        plan: QuizPlan,
        options: Options,
        bank: &dyn QuestionBank,
    ) -> Result<Self, Error> {
        let planned = plan
            .planned()
            .map(|entry| {
                bank.lookup(entry.question)
                    .map(|info| {
                        SlotQuestion::from_plan(
                            entry,
                            QuestionKind::from_type_tag(&info.type_tag),
                            &options,
                        )
                    })
                    .ok_or(Error::UnknownQuestion(entry.question.0))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            session: Session::new(id, activity, planned, &options),
            plan,
            options,
            attempts: Attempts::default(),
            responses: ResponseAggregator::default(),
            votes: VoteAggregator::default(),
            sightings: Sightings::default(),
        })
    }

    /// The session state machine
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Participant attempts
    pub fn attempts(&self) -> &Attempts {
        &self.attempts
    }

    /// Collected responses
    pub fn responses(&self) -> &ResponseAggregator {
        &self.responses
    }

    /// Vote rounds
    pub fn votes(&self) -> &VoteAggregator {
        &self.votes
    }

    fn sync(
        &mut self,
        participant: Id,
        connection: Id,
        role: Role,
        bank: &dyn QuestionBank,
        now: SystemTime,
    ) -> SyncMessage {
        let is_new_state =
            self.session.is_open() && self.sightings.observe(connection, self.session.version());
        let view = Snapshot {
            session: &self.session,
            attempts: &self.attempts,
            responses: &self.responses,
            votes: &self.votes,
        }
        .view(participant, role, is_new_state, bank, now);

        SyncMessage {
            status: self.session.status(),
            version: self.session.version(),
            view,
            controls: (role == Role::Instructor)
                .then(|| Controls::for_state(self.session.status(), self.session.has_next())),
            poll_interval_ms: u64::try_from(self.options.poll_interval.as_millis())
                .unwrap_or(u64::MAX),
        }
    }

    fn start(&mut self, start: Start, now: SystemTime) -> Result<(), Error> {
        let started = self.session.start_question(start, now)?;
        let asked_before = self.responses.buckets(started.slot).is_some();
        if started.cleared {
            self.votes.reset_slot(started.slot);
        }
        // a slot asked again gets fresh tries; its responses stay unless cleared
        if started.cleared || asked_before {
            self.attempts.reset_slot(started.slot);
        }
        self.responses.activate(started.slot, started.cleared);
        Ok(())
    }

    /// Applies one instructor command
    ///
    /// Returns a reply for read-only commands; state changes are answered
    /// with a sync by the caller.
    fn command(
        &mut self,
        command: IncomingInstructorMessage,
        bank: &dyn QuestionBank,
        now: SystemTime,
    ) -> Result<Option<Reply>, Error> {
        use IncomingInstructorMessage as Command;

        let name = command.name();
        match command {
            Command::StartQuiz => self.session.start_quiz()?,
            Command::Next => self.start(Start::Next, now)?,
            Command::Repoll => self.start(Start::Repoll, now)?,
            Command::Jump { slot, duration } => self.start(Start::Jump { slot, duration }, now)?,
            Command::Improvise { question, duration } => {
                self.session.check_start(name)?;
                let info = bank
                    .lookup(question)
                    .ok_or(Error::UnknownQuestion(question.0))?;
                let mut slot = SlotQuestion::improvised(
                    question,
                    self.plan.template_for(question),
                    QuestionKind::from_type_tag(&info.type_tag),
                    &self.options,
                );
                if let Some(duration) = duration {
                    slot.duration = duration;
                }
                self.start(Start::Improvise(slot), now)?;
            }
            Command::EndQuestion => {
                self.session.end_question()?;
            }
            Command::RunVoting { buckets } => {
                self.session.check_voting(buckets.len())?;
                let slot = self.session.current_slot().ok_or(Error::NoCurrentQuestion)?;
                let empty = Default::default();
                let responses = self.responses.buckets(slot).unwrap_or(&empty);
                let selected = VoteAggregator::resolve(responses, &buckets)?;
                self.votes.start_round(slot, &selected);
                self.session.run_voting(selected.len())?;
            }
            Command::ShowAnswer => {
                self.session.check_show_answer()?;
                let (Some(slot), Some(question)) =
                    (self.session.current_slot(), self.session.current_question())
                else {
                    return Err(Error::NoCurrentQuestion);
                };
                let info = bank
                    .lookup(question.question)
                    .ok_or(Error::UnknownQuestion(question.question.0))?;
                return Ok(Some(
                    AnswerMessage {
                        slot,
                        right_answer: info.right_answer,
                    }
                    .into(),
                ));
            }
            Command::MergeBuckets { from, into } => match self.session.status() {
                Status::Running | Status::Reviewing => self.responses.merge(from, into)?,
                Status::Voting => self.votes.merge(from, into)?,
                status => return Err(Error::IllegalTransition { status, command: name }),
            },
            Command::UndoMerge => match self.session.status() {
                Status::Running | Status::Reviewing => self.responses.undo()?,
                Status::Voting => self.votes.undo()?,
                status => return Err(Error::IllegalTransition { status, command: name }),
            },
            Command::CloseSession => {
                self.session.close()?;
                self.attempts.close_all();
                self.sightings.clear();
            }
            Command::ListJumpQuestions | Command::ListImproviseQuestions
                if !self.session.is_open() =>
            {
                return Err(Error::IllegalTransition {
                    status: self.session.status(),
                    command: name,
                });
            }
            Command::ListJumpQuestions => return Ok(Some(self.plan.jump_list().into())),
            Command::ListImproviseQuestions => {
                return Ok(Some(self.plan.improvise_list().into()));
            }
        }
        Ok(None)
    }

    fn student(
        &mut self,
        participant: Id,
        message: IncomingStudentMessage,
        now: SystemTime,
    ) -> Result<Option<Reply>, Error> {
        match message {
            IncomingStudentMessage::Answer(text) => {
                let submitted = self.responses.submit(
                    &self.session,
                    &mut self.attempts,
                    participant,
                    &text,
                    now,
                )?;
                Ok(Some(submitted.into()))
            }
            IncomingStudentMessage::Vote(option) => {
                if self.session.status() != Status::Voting {
                    return Err(Error::IllegalTransition {
                        status: self.session.status(),
                        command: "vote",
                    });
                }
                if self.attempts.get(participant).is_none_or(|a| a.is_closed()) {
                    return Err(Error::NotJoined);
                }
                self.votes.vote(participant, option)?;
                Ok(None)
            }
        }
    }

    /// Applies one message from `participant` on `connection`
    ///
    /// Expired questions are moved to review before the message is looked
    /// at. On error the room may be partially changed and must be dropped.
    ///
    /// # Errors
    ///
    /// Whatever the state machine or the aggregators reject.
    pub fn receive_message(
        &mut self,
        participant: Id,
        connection: Id,
        role: Role,
        message: IncomingMessage,
        bank: &dyn QuestionBank,
        now: SystemTime,
    ) -> Result<Reply, Error> {
        self.session.refresh(now);

        if !message.follows(role) {
            return Err(match role {
                Role::Student => Error::NotInstructor,
                Role::Instructor => Error::NotJoined,
            });
        }

        let reply = match message {
            IncomingMessage::Poll => {
                if role == Role::Student && self.session.is_open() {
                    self.attempts.join(participant, now)?;
                }
                None
            }
            IncomingMessage::Instructor(command) => {
                command.validate()?;
                self.command(command, bank, now)?
            }
            IncomingMessage::Student(message) => {
                message.validate()?;
                self.student(participant, message, now)?
            }
        };

        Ok(match reply {
            Some(reply) => reply,
            None => self.sync(participant, connection, role, bank, now).into(),
        })
    }
}

/// Runs sessions against the storage, auth and question collaborators
pub struct Engine<S, A, Q, C> {
    store: S,
    auth: A,
    bank: Q,
    clock: C,
    locks: Mutex<HashMap<Id, Arc<Mutex<()>>>>,
}

impl<S: Store, A: Authorizer, Q: QuestionBank, C: Clock> Engine<S, A, Q, C> {
    /// Creates an engine
    pub fn new(store: S, auth: A, bank: Q, clock: C) -> Self {
        Self {
            store,
            auth,
            bank,
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The storage collaborator
    pub fn store(&self) -> &S {
        &self.store
    }

    fn lock_for(&self, session: Id) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session)
            .or_default()
            .clone()
    }

    fn release(&self, session: Id, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // held by the map and by us only
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&session);
        }
    }

    /// Opens a new session of `activity` running `plan`
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPayload`] for an invalid plan or options,
    /// [`Error::UnknownQuestion`] if the bank lacks a planned question and
    /// [`Error::SessionAlreadyOpen`] if the activity has an open session.
    pub fn open_session(
        &self,
        activity: Id,
        plan: QuizPlan,
        options: Options,
    ) -> Result<Id, Error> {
        plan.validate()?;
        options.validate()?;
        if self.store.open_session(activity)?.is_some() {
            return Err(Error::SessionAlreadyOpen);
        }

        let id = Id::new();
        let room = Room::new(id, activity, plan, options, &self.bank)?;
        let body = serde_json::to_string(&room).map_err(StoreError::from)?;
        self.store
            .create(
                id,
                Record {
                    activity,
                    open: true,
                    body,
                },
            )
            .map_err(|e| match e {
                StoreError::Conflict => Error::SessionAlreadyOpen,
                e => e.into(),
            })?;

        tracing::info!(session = %id, %activity, "session opened");
        Ok(id)
    }

    /// Loads a session's room as currently stored
    ///
    /// # Errors
    ///
    /// [`Error::UnknownSession`] if there is no such session and
    /// [`Error::Storage`] if it cannot be read.
    pub fn room(&self, session: Id) -> Result<Room, Error> {
        Ok(self.load(session)?.value)
    }

    fn load(&self, session: Id) -> Result<Versioned<Room>, Error> {
        let Versioned { version, value } =
            self.store.load(session)?.ok_or(Error::UnknownSession)?;
        let room = serde_json::from_str(&value.body).map_err(StoreError::from)?;
        Ok(Versioned {
            version,
            value: room,
        })
    }

    /// Handles one message for `session`
    ///
    /// The room is written back only when the message succeeds and changed
    /// something, so a rejected message leaves the stored session as it was.
    ///
    /// # Errors
    ///
    /// Any [`Error`]; only [`Error::Storage`] is worth retrying as is.
    pub fn handle(
        &self,
        session: Id,
        participant: Id,
        connection: Id,
        message: IncomingMessage,
    ) -> Result<Reply, Error> {
        let lock = self.lock_for(session);
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.apply(session, participant, connection, message)
        };
        self.release(session, lock);
        result
    }

    fn apply(
        &self,
        session: Id,
        participant: Id,
        connection: Id,
        message: IncomingMessage,
    ) -> Result<Reply, Error> {
        let Versioned {
            version,
            value: mut room,
        } = self.load(session)?;
        let before = room.clone();

        let now = self.clock.now();
        let role = if self.auth.is_instructor(participant, room.session.activity()) {
            Role::Instructor
        } else {
            Role::Student
        };
        tracing::debug!(%session, %participant, ?role, ?message, "received message");

        let reply = room
            .receive_message(participant, connection, role, message, &self.bank, now)
            .inspect_err(|e| tracing::debug!(%session, error = %e, "message rejected"))?;

        if room != before {
            let record = Record {
                activity: room.session.activity(),
                open: room.session.is_open(),
                body: serde_json::to_string(&room).map_err(StoreError::from)?,
            };
            self.store
                .compare_and_swap(session, version, record)
                .inspect_err(|e| tracing::warn!(%session, error = %e, "failed to commit session"))?;
        }

        Ok(reply)
    }
}
