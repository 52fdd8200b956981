//! The record graph handed to the encoder.

use crate::db::{
    FileStage, Note, Query, ReviewAssignment, ReviewRound, StageAssignment, Submission,
    SubmissionComment, SubmissionFile, WorkflowStage,
};

#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub submission: Submission,
    pub participants: Vec<StageAssignment>,
    pub queries: Vec<QueryRecord>,
    pub rounds: Vec<RoundRecord>,
}

#[derive(Debug, Clone)]
pub struct QueryRecord {
    pub query: Query,
    /// Replies in stored order.
    pub notes: Vec<Note>,
}

#[derive(Debug, Clone)]
pub struct RoundRecord {
    pub round: ReviewRound,
    pub assignments: Vec<AssignmentRecord>,
    pub files: Vec<SubmissionFile>,
}

/// A file of `stage` listed in `later_round` that the store orders at or
/// before a file already listed in `earlier_round`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossedRounds {
    pub stage: FileStage,
    pub earlier_round: i32,
    pub later_round: i32,
}

#[derive(Debug, Clone)]
pub struct AssignmentRecord {
    pub assignment: ReviewAssignment,
    /// Free-text reviewer comments, used when no structured form is attached.
    pub comments: Vec<SubmissionComment>,
}

impl SubmissionRecord {
    pub fn queries_for(&self, stage: WorkflowStage) -> impl Iterator<Item = &QueryRecord> {
        self.queries
            .iter()
            .filter(move |q| q.query.stage_id == stage.id())
    }

    /// Rounds of `stage` in ascending round number.
    pub fn rounds_for(&self, stage: WorkflowStage) -> Vec<&RoundRecord> {
        let mut rounds: Vec<_> = self
            .rounds
            .iter()
            .filter(|r| r.round.stage_id == stage.id())
            .collect();
        rounds.sort_by_key(|r| r.round.round);
        rounds
    }

    /// Places where the round files of `stage`, read round by round, stop
    /// following store order.
    ///
    /// Decode hands stored review files and revisions to rounds in store
    /// order, so any crossing here comes back in the wrong round. Files of
    /// the same stage that sit in no round at all shift decode as well; the
    /// record does not carry those.
    pub fn crossed_rounds(&self, stage: WorkflowStage) -> Vec<CrossedRounds> {
        let rounds = self.rounds_for(stage);
        let mut crossed = Vec::new();
        for file_stage in [FileStage::ReviewFile, FileStage::ReviewRevision] {
            let mut highest: Option<((i64, i32), i32)> = None;
            for round in &rounds {
                let mut keys: Vec<_> = round
                    .files
                    .iter()
                    .filter(|f| f.stage() == file_stage)
                    .map(SubmissionFile::store_order_key)
                    .collect();
                keys.sort();
                for key in keys {
                    match highest {
                        Some((top, top_round)) if key <= top => {
                            let found = CrossedRounds {
                                stage: file_stage,
                                earlier_round: top_round,
                                later_round: round.round.round,
                            };
                            if crossed.last() != Some(&found) {
                                crossed.push(found);
                            }
                        }
                        _ => highest = Some((key, round.round.round)),
                    }
                }
            }
        }
        crossed
    }
}
