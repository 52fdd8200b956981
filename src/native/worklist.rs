//! Ordered worklists used to rebuild review-round file membership.
//!
//! The document does not say which stored file revision belongs to which
//! round. Decode partitions the submission's revisions by file stage, keeps
//! them in store order, and hands them out head-first as `file` nodes are met
//! in document order.

use std::collections::VecDeque;

use super::error::CodecError;
use crate::db::{FileStage, SubmissionFile};

/// A FIFO of not-yet-assigned items.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedWorklist<T> {
    items: VecDeque<T>,
}

impl<T> OrderedWorklist<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }

    pub fn pop_head(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Review files and review revisions still waiting for a round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundFiles {
    review_files: OrderedWorklist<SubmissionFile>,
    revision_files: OrderedWorklist<SubmissionFile>,
}

impl RoundFiles {
    /// Splits `files` by stage, keeping their relative order. Files of any
    /// other stage are never assigned to a round.
    pub fn partition(files: Vec<SubmissionFile>) -> Self {
        let (review, rest): (Vec<_>, Vec<_>) = files
            .into_iter()
            .partition(|f| f.stage() == FileStage::ReviewFile);
        let revision = rest
            .into_iter()
            .filter(|f| f.stage() == FileStage::ReviewRevision);
        Self {
            review_files: OrderedWorklist::new(review),
            revision_files: OrderedWorklist::new(revision),
        }
    }

    /// Takes the next file of `stage` for round number `round`.
    pub fn take(&mut self, stage: FileStage, round: i32) -> Result<SubmissionFile, CodecError> {
        let list = match stage {
            FileStage::ReviewFile => &mut self.review_files,
            FileStage::ReviewRevision => &mut self.revision_files,
            other => {
                return Err(CodecError::malformed(format!(
                    "round {} lists a file with stage {} which cannot belong to a review round",
                    round,
                    other.id()
                )))
            }
        };
        list.pop_head()
            .ok_or(CodecError::OrderingViolation { stage, round })
    }

    pub fn remaining(&self, stage: FileStage) -> usize {
        match stage {
            FileStage::ReviewFile => self.review_files.len(),
            FileStage::ReviewRevision => self.revision_files.len(),
            _ => 0,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    pub(crate) fn file(file_id: i64, revision: i32, stage: FileStage) -> SubmissionFile {
        let stamp = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        SubmissionFile {
            file_id,
            revision,
            submission_id: 1,
            source_file_id: None,
            source_revision: None,
            genre_id: None,
            file_stage: stage.id(),
            original_file_name: format!("file-{}-{}.pdf", file_id, revision),
            viewable: false,
            date_uploaded: stamp,
            date_modified: stamp,
            file_size: 1024,
            file_type: "application/pdf".to_string(),
            uploader_user_id: None,
            name: Default::default(),
            path: format!("submissions/1/{}-{}.pdf", file_id, revision),
        }
    }

    #[test]
    fn partition_keeps_store_order_per_stage() {
        let mut lists = RoundFiles::partition(vec![
            file(1, 1, FileStage::Submission),
            file(2, 1, FileStage::ReviewFile),
            file(3, 1, FileStage::ReviewRevision),
            file(4, 1, FileStage::ReviewFile),
        ]);
        assert_eq!(lists.remaining(FileStage::ReviewFile), 2);
        assert_eq!(lists.remaining(FileStage::ReviewRevision), 1);
        assert_eq!(lists.take(FileStage::ReviewFile, 1).unwrap().file_id, 2);
        assert_eq!(lists.take(FileStage::ReviewRevision, 1).unwrap().file_id, 3);
        assert_eq!(lists.take(FileStage::ReviewFile, 2).unwrap().file_id, 4);
    }

    #[test]
    fn empty_list_is_an_ordering_violation() {
        let mut lists = RoundFiles::partition(vec![file(1, 1, FileStage::ReviewFile)]);
        lists.take(FileStage::ReviewFile, 1).unwrap();
        match lists.take(FileStage::ReviewFile, 2) {
            Err(CodecError::OrderingViolation { stage, round }) => {
                assert_eq!(stage, FileStage::ReviewFile);
                assert_eq!(round, 2);
            }
            other => panic!("expected ordering violation, got {:?}", other),
        }
        assert!(matches!(
            lists.take(FileStage::ReviewRevision, 2),
            Err(CodecError::OrderingViolation { .. })
        ));
    }

    #[test]
    fn other_stages_are_rejected_without_consuming() {
        let mut lists = RoundFiles::partition(vec![file(1, 1, FileStage::ReviewFile)]);
        assert!(matches!(
            lists.take(FileStage::Proof, 1),
            Err(CodecError::MalformedDocument(_))
        ));
        assert_eq!(lists.remaining(FileStage::ReviewFile), 1);
    }

    fn stage_strategy() -> impl Strategy<Value = FileStage> {
        prop_oneof![
            Just(FileStage::ReviewFile),
            Just(FileStage::ReviewRevision),
            Just(FileStage::Submission),
        ]
    }

    proptest! {
        #[test]
        fn takes_replay_store_order(stages in proptest::collection::vec(stage_strategy(), 0..24)) {
            let files: Vec<_> = stages
                .iter()
                .enumerate()
                .map(|(i, s)| file(i as i64 + 1, 1, *s))
                .collect();
            let mut lists = RoundFiles::partition(files.clone());

            // Asking for every review-stage file in store order hands back exactly that order.
            for expected in files.iter().filter(|f| f.stage() != FileStage::Submission) {
                let got = lists.take(expected.stage(), 1).unwrap();
                prop_assert_eq!(got.file_id, expected.file_id);
            }
            prop_assert_eq!(lists.remaining(FileStage::ReviewFile), 0);
            prop_assert_eq!(lists.remaining(FileStage::ReviewRevision), 0);
        }
    }
}
