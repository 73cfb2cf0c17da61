//! Response aggregation
//!
//! Answers are normalized and grouped into buckets of identical text.
//! Buckets are what the instructor sees and merges. A [`BucketSet`] is
//! one independent aggregation space with its own single-level undo;
//! the [`ResponseAggregator`] keeps one per slot and vote rounds keep
//! their own.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use web_time::SystemTime;

use crate::{
    attempt::{Attempts, TriesLeft},
    error::Error,
    id::Id,
    session::Session,
};

/// Identifier of a bucket within its [`BucketSet`]
///
/// IDs are handed out in creation order and never reused within a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketId(pub u32);

/// A group of responses with identical normalized text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Bucket ID
    pub id: BucketId,
    /// Representative normalized text
    pub text: String,
    /// Distinct response texts grouped here
    pub members: Vec<String>,
    /// Number of responses counted here
    pub count: u32,
}

/// Enough to reverse the latest merge exactly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct MergeRecord {
    /// The merged away bucket as it was
    from: Bucket,
    into: BucketId,
    moved_count: u32,
    /// Members `into` gained from `from`
    moved_members: Vec<String>,
}

/// An independent set of buckets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSet {
    buckets: BTreeMap<BucketId, Bucket>,
    next_id: u32,
    last_merge: Option<MergeRecord>,
}

impl BucketSet {
    fn create(&mut self, text: String, members: Vec<String>, count: u32) -> BucketId {
        let id = BucketId(self.next_id);
        self.next_id += 1;
        self.buckets.insert(
            id,
            Bucket {
                id,
                text,
                members,
                count,
            },
        );
        id
    }

    /// Counts one response, creating its bucket if no bucket has the same text
    pub fn add(&mut self, normalized: &str, raw: &str) -> BucketId {
        let existing = self
            .buckets
            .values_mut()
            .find(|bucket| bucket.text == normalized);

        match existing {
            Some(bucket) => {
                bucket.count += 1;
                if !bucket.members.iter().any(|m| m == raw) {
                    bucket.members.push(raw.to_owned());
                }
                bucket.id
            }
            None => self.create(normalized.to_owned(), vec![raw.to_owned()], 1),
        }
    }

    /// Adds an empty bucket, used to seed vote options
    pub fn seed(&mut self, text: String, members: Vec<String>) -> BucketId {
        self.create(text, members, 0)
    }

    /// Adds one to a bucket's count
    ///
    /// # Errors
    ///
    /// [`Error::UnknownBucket`] if the bucket does not exist.
    pub fn increment(&mut self, id: BucketId) -> Result<(), Error> {
        let bucket = self
            .buckets
            .get_mut(&id)
            .ok_or(Error::UnknownBucket(id.0))?;
        bucket.count += 1;
        Ok(())
    }

    /// Looks up a bucket
    pub fn get(&self, id: BucketId) -> Option<&Bucket> {
        self.buckets.get(&id)
    }

    /// Merges `from` into `into`, replacing any earlier undo record
    ///
    /// # Errors
    ///
    /// [`Error::SelfMerge`] if the two are the same bucket and
    /// [`Error::UnknownBucket`] if either does not exist. Nothing changes on
    /// error.
    pub fn merge(&mut self, from: BucketId, into: BucketId) -> Result<(), Error> {
        if from == into {
            return Err(Error::SelfMerge);
        }
        if !self.buckets.contains_key(&into) {
            return Err(Error::UnknownBucket(into.0));
        }
        let from_bucket = self
            .buckets
            .remove(&from)
            .ok_or(Error::UnknownBucket(from.0))?;

        let Some(into_bucket) = self.buckets.get_mut(&into) else {
            return Err(Error::UnknownBucket(into.0));
        };
        into_bucket.count += from_bucket.count;
        let moved_members = from_bucket
            .members
            .iter()
            .filter(|member| !into_bucket.members.contains(member))
            .cloned()
            .collect_vec();
        into_bucket.members.extend(moved_members.iter().cloned());

        tracing::debug!(from = from.0, into = into.0, moved = from_bucket.count, "merged buckets");
        self.last_merge = Some(MergeRecord {
            moved_count: from_bucket.count,
            from: from_bucket,
            into,
            moved_members,
        });
        Ok(())
    }

    /// Reverses the latest merge
    ///
    /// Responses counted since the merge stay where they are, except that a
    /// bucket created for the restored bucket's text is folded back into it.
    ///
    /// # Errors
    ///
    /// [`Error::NothingToUndo`] if there is no merge to reverse.
    pub fn undo(&mut self) -> Result<(), Error> {
        let record = self.last_merge.take().ok_or(Error::NothingToUndo)?;

        if let Some(into) = self.buckets.get_mut(&record.into) {
            into.count -= record.moved_count;
            into.members
                .retain(|member| !record.moved_members.contains(member));
        }

        let mut from = record.from;
        let recreated = self
            .buckets
            .values()
            .find(|bucket| bucket.text == from.text)
            .map(|bucket| bucket.id);
        if let Some(bucket) = recreated.and_then(|id| self.buckets.remove(&id)) {
            from.count += bucket.count;
            for member in bucket.members {
                if !from.members.contains(&member) {
                    from.members.push(member);
                }
            }
        }

        tracing::debug!(from = from.id.0, into = record.into.0, "undid merge");
        self.buckets.insert(from.id, from);
        Ok(())
    }

    /// Whether a merge can be undone
    pub fn can_undo(&self) -> bool {
        self.last_merge.is_some()
    }

    /// Buckets by count, highest first, ties in creation order
    pub fn sorted(&self) -> Vec<Bucket> {
        self.buckets
            .values()
            .cloned()
            .sorted_by(|a, b| b.count.cmp(&a.count).then(a.id.cmp(&b.id)))
            .collect_vec()
    }

    /// Number of buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether there are no buckets
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Sum of all bucket counts
    pub fn total(&self) -> u32 {
        self.buckets.values().map(|b| b.count).sum()
    }
}

/// A submitted answer as received
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResponse {
    /// Who answered
    pub participant: Id,
    /// Slot answered
    pub slot: usize,
    /// Text after normalization
    pub normalized: String,
    /// Text as submitted
    pub raw: String,
    /// When the answer arrived
    pub submitted_at: SystemTime,
}

/// Everything collected for one slot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct SlotResponses {
    buckets: BucketSet,
    responses: Vec<RawResponse>,
}

impl SlotResponses {
    fn respondents(&self) -> usize {
        self.responses
            .iter()
            .map(|r| r.participant)
            .collect::<BTreeSet<_>>()
            .len()
    }
}

/// Result of an accepted submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Submitted {
    /// Bucket the answer was counted in
    pub bucket: BucketId,
    /// Tries the participant has left
    pub tries_left: TriesLeft,
}

/// What the instructor sees of a slot's responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseSnapshot {
    /// Slot the responses belong to
    pub slot: usize,
    /// Buckets by count, highest first
    pub buckets: Vec<Bucket>,
    /// Distinct participants who answered
    pub respondents: usize,
    /// Participants enrolled in the session
    pub enrolled: usize,
    /// Whether the latest merge can be undone
    pub can_undo: bool,
}

/// Collects responses per slot
///
/// Only the active slot, the one most recently started, accepts
/// submissions and merges. Earlier slots are kept as history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseAggregator {
    slots: BTreeMap<usize, SlotResponses>,
    active: Option<usize>,
}

impl ResponseAggregator {
    /// Makes `slot` the active slot, optionally discarding what it had
    pub fn activate(&mut self, slot: usize, clear: bool) {
        if clear {
            self.slots.remove(&slot);
        }
        self.slots.entry(slot).or_default();
        self.active = Some(slot);
    }

    /// The active slot
    pub fn active(&self) -> Option<usize> {
        self.active
    }

    /// Records an answer to the live question
    ///
    /// # Errors
    ///
    /// [`Error::QuestionNotLive`] outside the answering window,
    /// [`Error::NotJoined`] without an attempt and [`Error::TriesExhausted`]
    /// when the participant has no tries left. Nothing is recorded on error.
    pub fn submit(
        &mut self,
        session: &Session,
        attempts: &mut Attempts,
        participant: Id,
        raw: &str,
        now: SystemTime,
    ) -> Result<Submitted, Error> {
        if !session.is_live(now) {
            return Err(Error::QuestionNotLive);
        }
        let (Some(slot), Some(question)) = (session.current_slot(), session.current_question())
        else {
            return Err(Error::QuestionNotLive);
        };

        let tries_left = attempts.use_try(participant, slot, question.tries)?;
        let normalized = question.kind.normalize(raw);

        self.active = Some(slot);
        let responses = self.slots.entry(slot).or_default();
        let bucket = responses.buckets.add(&normalized, raw);
        responses.responses.push(RawResponse {
            participant,
            slot,
            normalized,
            raw: raw.to_owned(),
            submitted_at: now,
        });

        tracing::debug!(%participant, slot, bucket = bucket.0, "response recorded");
        Ok(Submitted { bucket, tries_left })
    }

    fn active_set(&mut self) -> Result<&mut BucketSet, Error> {
        let slot = self.active.ok_or(Error::NoCurrentQuestion)?;
        Ok(&mut self.slots.entry(slot).or_default().buckets)
    }

    /// Merges two buckets of the active slot
    ///
    /// # Errors
    ///
    /// See [`BucketSet::merge`]; [`Error::NoCurrentQuestion`] before any slot
    /// was activated.
    pub fn merge(&mut self, from: BucketId, into: BucketId) -> Result<(), Error> {
        self.active_set()?.merge(from, into)
    }

    /// Undoes the latest merge in the active slot
    ///
    /// # Errors
    ///
    /// See [`BucketSet::undo`]; [`Error::NoCurrentQuestion`] before any slot
    /// was activated.
    pub fn undo(&mut self) -> Result<(), Error> {
        self.active_set()?.undo()
    }

    /// Buckets of any slot
    pub fn buckets(&self, slot: usize) -> Option<&BucketSet> {
        self.slots.get(&slot).map(|s| &s.buckets)
    }

    /// Raw responses of a slot, in arrival order
    pub fn responses(&self, slot: usize) -> &[RawResponse] {
        self.slots
            .get(&slot)
            .map_or(&[], |s| s.responses.as_slice())
    }

    /// Snapshot of a slot
    pub fn snapshot(&self, slot: usize, enrolled: usize) -> ResponseSnapshot {
        let (buckets, respondents, can_undo) = self.slots.get(&slot).map_or_else(
            || (Vec::new(), 0, false),
            |s| (s.buckets.sorted(), s.respondents(), s.buckets.can_undo()),
        );
        ResponseSnapshot {
            slot,
            buckets,
            respondents,
            enrolled,
            can_undo,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use web_time::Duration;

    use super::*;
    use crate::{
        config::Options,
        question::{QuestionKind, QuestionRef, SlotQuestion},
        session::Start,
    };

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn live_session(kind: QuestionKind, tries: Option<u32>) -> Session {
        let options = Options {
            wait_for_question: Duration::ZERO,
            ..Options::default()
        };
        let question = SlotQuestion {
            question: QuestionRef(1),
            name: "Q".to_owned(),
            duration: Duration::ZERO,
            tries,
            kind,
            improvised: false,
        };
        let mut session = Session::new(Id::new(), Id::new(), vec![question], &options);
        session.start_quiz().unwrap();
        session.start_question(Start::Next, at(0)).unwrap();
        session
    }

    fn set(texts: &[&str]) -> BucketSet {
        let mut set = BucketSet::default();
        for text in texts {
            set.add(text, text);
        }
        set
    }

    #[test]
    fn test_whitespace_variants_share_a_bucket() {
        let session = live_session(QuestionKind::FreeText, None);
        let mut attempts = Attempts::default();
        let mut aggregator = ResponseAggregator::default();
        let variants = ["42", " 42", "42 ", "\t42\n", "  42  "];

        for variant in variants {
            let id = Id::new();
            attempts.join(id, at(0)).unwrap();
            aggregator
                .submit(&session, &mut attempts, id, variant, at(1))
                .unwrap();
        }

        let snapshot = aggregator.snapshot(0, attempts.enrolled());
        assert_eq!(snapshot.buckets.len(), 1);
        assert_eq!(snapshot.buckets[0].text, "42");
        assert_eq!(snapshot.buckets[0].count, variants.len() as u32);
        assert_eq!(snapshot.respondents, variants.len());
    }

    #[test]
    fn test_retry_adds_rather_than_replaces() {
        let session = live_session(QuestionKind::FreeText, Some(2));
        let mut attempts = Attempts::default();
        let mut aggregator = ResponseAggregator::default();
        let id = Id::new();
        attempts.join(id, at(0)).unwrap();

        let first = aggregator
            .submit(&session, &mut attempts, id, "42", at(1))
            .unwrap();
        assert_eq!(first.tries_left, TriesLeft::Count(1));
        let second = aggregator
            .submit(&session, &mut attempts, id, " 42 ", at(2))
            .unwrap();
        assert_eq!(second.tries_left, TriesLeft::Count(0));
        assert_eq!(first.bucket, second.bucket);

        assert_eq!(
            aggregator.submit(&session, &mut attempts, id, "43", at(3)),
            Err(Error::TriesExhausted)
        );

        let snapshot = aggregator.snapshot(0, 1);
        assert_eq!(snapshot.buckets.len(), 1);
        assert_eq!(snapshot.buckets[0].count, 2);
        assert_eq!(snapshot.respondents, 1);
        assert_eq!(aggregator.responses(0).len(), 2);
    }

    #[test]
    fn test_symbolic_and_case() {
        let session = live_session(QuestionKind::Symbolic, None);
        let mut attempts = Attempts::default();
        let mut aggregator = ResponseAggregator::default();
        let id = Id::new();
        attempts.join(id, at(0)).unwrap();
        for answer in ["x + 1", "x+1", "X+1"] {
            aggregator
                .submit(&session, &mut attempts, id, answer, at(1))
                .unwrap();
        }
        let buckets = aggregator.snapshot(0, 1).buckets;
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].text, "x+1");
        assert_eq!(buckets[0].count, 2);
        assert_eq!(buckets[0].members, vec!["x + 1", "x+1"]);
    }

    #[test]
    fn test_not_live_during_lead_in() {
        let options = Options::default();
        let question = SlotQuestion {
            question: QuestionRef(1),
            name: "Q".to_owned(),
            duration: Duration::from_secs(30),
            tries: None,
            kind: QuestionKind::Other,
            improvised: false,
        };
        let mut session = Session::new(Id::new(), Id::new(), vec![question], &options);
        session.start_quiz().unwrap();
        session.start_question(Start::Next, at(100)).unwrap();

        let mut attempts = Attempts::default();
        let mut aggregator = ResponseAggregator::default();
        let id = Id::new();
        attempts.join(id, at(0)).unwrap();
        assert_eq!(
            aggregator.submit(&session, &mut attempts, id, "a", at(100)),
            Err(Error::QuestionNotLive)
        );
        assert_eq!(attempts.get(id).unwrap().tries_used(0), 0);
        assert!(aggregator.responses(0).is_empty());
    }

    #[test]
    fn test_merge_then_undo_restores_exactly() {
        let mut set = set(&["a", "a", "b", "c", "c", "c"]);
        let before = set.sorted();

        set.merge(BucketId(0), BucketId(1)).unwrap();
        assert_eq!(set.len(), 2);
        let merged = set.get(BucketId(1)).unwrap();
        assert_eq!(merged.count, 3);
        assert_eq!(merged.members, vec!["b", "a"]);
        assert!(set.get(BucketId(0)).is_none());

        set.undo().unwrap();
        assert_eq!(set.sorted(), before);
        assert!(!set.can_undo());
        assert_eq!(set.undo(), Err(Error::NothingToUndo));
    }

    #[test]
    fn test_undo_after_new_responses_keeps_buckets_distinct() {
        let mut set = set(&["a", "b"]);
        set.merge(BucketId(0), BucketId(1)).unwrap();
        assert_eq!(set.add("a", "a"), BucketId(2));
        assert_eq!(set.add("b", " b "), BucketId(1));

        set.undo().unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.get(BucketId(2)).is_none());
        let restored = set.get(BucketId(0)).unwrap();
        assert_eq!(restored.count, 2);
        assert_eq!(restored.members, vec!["a"]);
        let into = set.get(BucketId(1)).unwrap();
        assert_eq!(into.count, 2);
        assert_eq!(into.members, vec!["b", " b "]);
        assert_eq!(set.total(), 4);
    }

    #[test]
    fn test_only_latest_merge_is_undoable() {
        let mut set = set(&["a", "b", "c"]);
        set.merge(BucketId(0), BucketId(1)).unwrap();
        set.merge(BucketId(2), BucketId(1)).unwrap();
        set.undo().unwrap();

        assert!(set.get(BucketId(0)).is_none());
        assert_eq!(set.get(BucketId(1)).unwrap().count, 2);
        assert_eq!(set.get(BucketId(2)).unwrap().count, 1);
        assert_eq!(set.undo(), Err(Error::NothingToUndo));
    }

    #[test]
    fn test_merge_errors_leave_set_untouched() {
        let mut set = set(&["a", "b"]);
        let before = set.clone();
        assert_eq!(set.merge(BucketId(0), BucketId(0)), Err(Error::SelfMerge));
        assert_eq!(set.merge(BucketId(0), BucketId(9)), Err(Error::UnknownBucket(9)));
        assert_eq!(set.merge(BucketId(9), BucketId(0)), Err(Error::UnknownBucket(9)));
        assert_eq!(set, before);
    }

    #[test]
    fn test_order_by_count_then_creation() {
        let set = set(&["z", "y", "y", "x", "w", "w"]);
        let texts = set.sorted().into_iter().map(|b| b.text).collect_vec();
        assert_eq!(texts, vec!["y", "w", "z", "x"]);
    }

    #[test]
    fn test_merge_only_touches_active_slot() {
        let mut aggregator = ResponseAggregator::default();
        assert_eq!(
            aggregator.merge(BucketId(0), BucketId(1)),
            Err(Error::NoCurrentQuestion)
        );

        aggregator.activate(0, false);
        aggregator.slots.get_mut(&0).unwrap().buckets = set(&["a", "b"]);
        aggregator.activate(1, false);
        assert_eq!(
            aggregator.merge(BucketId(0), BucketId(1)),
            Err(Error::UnknownBucket(1))
        );
        assert_eq!(aggregator.buckets(0).unwrap().len(), 2);
    }

    #[test]
    fn test_activate_with_clear() {
        let mut aggregator = ResponseAggregator::default();
        aggregator.activate(0, false);
        aggregator.slots.get_mut(&0).unwrap().buckets = set(&["a"]);
        aggregator.activate(0, false);
        assert_eq!(aggregator.buckets(0).unwrap().len(), 1);
        aggregator.activate(0, true);
        assert!(aggregator.buckets(0).unwrap().is_empty());
    }
}
