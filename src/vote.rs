//! Vote rounds
//!
//! A vote round asks students to pick one of the buckets the instructor
//! selected from a slot's responses. Each round tallies into its own
//! [`BucketSet`], separate from the slot's responses, with its own undo.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    id::Id,
    responses::{Bucket, BucketId, BucketSet},
};

/// Identifier of a vote round within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoteRoundId(pub u32);

/// One vote round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRound {
    id: VoteRoundId,
    slot: usize,
    options: BucketSet,
    voters: BTreeSet<Id>,
}

impl VoteRound {
    /// Round ID
    pub fn id(&self) -> VoteRoundId {
        self.id
    }

    /// Slot whose responses are voted on
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Options and their tallies
    pub fn options(&self) -> &BucketSet {
        &self.options
    }

    /// Whether a participant has voted
    pub fn has_voted(&self, participant: Id) -> bool {
        self.voters.contains(&participant)
    }
}

/// What the instructor sees of a vote round
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteSnapshot {
    /// Round ID
    pub round: VoteRoundId,
    /// Slot voted on
    pub slot: usize,
    /// Options by votes, highest first
    pub options: Vec<Bucket>,
    /// Number of participants who voted
    pub voters: usize,
    /// Whether the latest merge can be undone
    pub can_undo: bool,
}

impl From<&VoteRound> for VoteSnapshot {
    fn from(round: &VoteRound) -> Self {
        Self {
            round: round.id,
            slot: round.slot,
            options: round.options.sorted(),
            voters: round.voters.len(),
            can_undo: round.options.can_undo(),
        }
    }
}

/// All vote rounds of a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteAggregator {
    rounds: Vec<VoteRound>,
    next_id: u32,
}

impl VoteAggregator {
    /// Resolves the selected buckets before a round is started
    ///
    /// # Errors
    ///
    /// [`Error::UnknownBucket`] if a selected bucket is not in `responses`.
    pub fn resolve<'a>(
        responses: &'a BucketSet,
        selected: &[BucketId],
    ) -> Result<Vec<&'a Bucket>, Error> {
        let mut seen = BTreeSet::new();
        selected
            .iter()
            .filter(|id| seen.insert(**id))
            .map(|id| responses.get(*id).ok_or(Error::UnknownBucket(id.0)))
            .collect()
    }

    /// Starts a round on `slot` with the given buckets as options
    ///
    /// Options start at zero votes, keeping the text and members of the
    /// bucket they came from.
    pub fn start_round(&mut self, slot: usize, selected: &[&Bucket]) -> VoteRoundId {
        let id = VoteRoundId(self.next_id);
        self.next_id += 1;
        let mut options = BucketSet::default();
        for bucket in selected {
            options.seed(bucket.text.clone(), bucket.members.clone());
        }
        tracing::info!(round = id.0, slot, options = options.len(), "vote round started");
        self.rounds.push(VoteRound {
            id,
            slot,
            options,
            voters: BTreeSet::new(),
        });
        id
    }

    /// The most recent round
    pub fn current(&self) -> Option<&VoteRound> {
        self.rounds.last()
    }

    fn current_mut(&mut self) -> Result<&mut VoteRound, Error> {
        self.rounds.last_mut().ok_or(Error::NoCurrentQuestion)
    }

    /// The most recent round held on `slot`
    pub fn latest_for(&self, slot: usize) -> Option<&VoteRound> {
        self.rounds.iter().rev().find(|round| round.slot == slot)
    }

    /// Records a participant's vote in the current round
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyVoted`] on a second vote and [`Error::UnknownBucket`]
    /// for an option not in the round.
    pub fn vote(&mut self, participant: Id, option: BucketId) -> Result<(), Error> {
        let round = self.current_mut()?;
        if round.voters.contains(&participant) {
            return Err(Error::AlreadyVoted);
        }
        round.options.increment(option)?;
        round.voters.insert(participant);
        tracing::debug!(%participant, round = round.id.0, option = option.0, "vote recorded");
        Ok(())
    }

    /// Merges two options of the current round
    ///
    /// # Errors
    ///
    /// See [`BucketSet::merge`].
    pub fn merge(&mut self, from: BucketId, into: BucketId) -> Result<(), Error> {
        self.current_mut()?.options.merge(from, into)
    }

    /// Undoes the latest merge in the current round
    ///
    /// # Errors
    ///
    /// See [`BucketSet::undo`].
    pub fn undo(&mut self) -> Result<(), Error> {
        self.current_mut()?.options.undo()
    }

    /// Drops every round held on `slot`
    pub fn reset_slot(&mut self, slot: usize) {
        self.rounds.retain(|round| round.slot != slot);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn responses() -> BucketSet {
        let mut set = BucketSet::default();
        for text in ["a", "a", "b", "c"] {
            set.add(text, text);
        }
        set
    }

    fn started() -> VoteAggregator {
        let responses = responses();
        let selected = VoteAggregator::resolve(&responses, &[BucketId(0), BucketId(2)]).unwrap();
        let mut votes = VoteAggregator::default();
        votes.start_round(4, &selected);
        votes
    }

    #[test]
    fn test_round_is_seeded_empty() {
        let votes = started();
        let snapshot = VoteSnapshot::from(votes.current().unwrap());
        assert_eq!(snapshot.slot, 4);
        assert_eq!(snapshot.options.len(), 2);
        assert!(snapshot.options.iter().all(|o| o.count == 0));
        assert_eq!(snapshot.options[1].text, "c");
    }

    #[test]
    fn test_resolve_rejects_unknown() {
        assert_eq!(
            VoteAggregator::resolve(&responses(), &[BucketId(0), BucketId(7)]).unwrap_err(),
            Error::UnknownBucket(7)
        );
    }

    #[test]
    fn test_resolve_drops_duplicates() {
        let responses = responses();
        let selected =
            VoteAggregator::resolve(&responses, &[BucketId(1), BucketId(1)]).unwrap();
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn test_one_vote_per_participant() {
        let mut votes = started();
        let id = Id::new();
        votes.vote(id, BucketId(1)).unwrap();
        assert_eq!(votes.vote(id, BucketId(0)), Err(Error::AlreadyVoted));
        assert_eq!(votes.vote(Id::new(), BucketId(5)), Err(Error::UnknownBucket(5)));

        let snapshot = VoteSnapshot::from(votes.current().unwrap());
        assert_eq!(snapshot.voters, 1);
        assert_eq!(snapshot.options[0].count, 1);
        assert!(votes.current().unwrap().has_voted(id));
    }

    #[test]
    fn test_vote_merge_is_independent_of_responses() {
        let responses = responses();
        let mut votes = started();
        votes.vote(Id::new(), BucketId(0)).unwrap();
        votes.merge(BucketId(0), BucketId(1)).unwrap();
        assert!(votes.current().unwrap().options().can_undo());
        assert!(!responses.can_undo());

        votes.undo().unwrap();
        assert_eq!(
            votes.current().unwrap().options().get(BucketId(0)).unwrap().count,
            1
        );
    }

    #[test]
    fn test_no_round() {
        let mut votes = VoteAggregator::default();
        assert_eq!(votes.vote(Id::new(), BucketId(0)), Err(Error::NoCurrentQuestion));
        assert_eq!(votes.undo(), Err(Error::NoCurrentQuestion));
    }

    #[test]
    fn test_reset_slot() {
        let mut votes = started();
        assert!(votes.latest_for(4).is_some());
        votes.reset_slot(4);
        assert!(votes.latest_for(4).is_none());
    }
}
