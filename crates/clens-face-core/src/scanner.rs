//! Duplicate face detection across enrolled subjects.

use crate::cipher::TemplateCipher;
use crate::similarity::{is_match, similarity};
use crate::template::open_template;
use crate::types::{Candidate, DuplicateMatch, Embedding, MatchThreshold, SubjectId};

/// Counters from one scan, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub examined: usize,
    pub excluded: usize,
    pub skipped: usize,
}

/// Strategy for checking a probe embedding against stored templates.
pub trait DuplicateScanner {
    fn scan<'a, I>(
        &self,
        probe: &Embedding,
        candidates: I,
        exclude: Option<SubjectId>,
        threshold: MatchThreshold,
    ) -> (Option<DuplicateMatch>, ScanStats)
    where
        I: IntoIterator<Item = &'a Candidate>;
}

/// Reports the first candidate, in caller order, whose score meets the threshold.
///
/// Not a best-match search: the scan stops at the first hit, so the reported
/// subject depends on the order the caller supplies. Candidates whose template
/// cannot be decrypted, decoded, or compared are logged and skipped.
pub struct FirstMatchScanner<'c> {
    cipher: &'c TemplateCipher,
}

impl<'c> FirstMatchScanner<'c> {
    pub fn new(cipher: &'c TemplateCipher) -> Self {
        Self { cipher }
    }
}

impl DuplicateScanner for FirstMatchScanner<'_> {
    fn scan<'a, I>(
        &self,
        probe: &Embedding,
        candidates: I,
        exclude: Option<SubjectId>,
        threshold: MatchThreshold,
    ) -> (Option<DuplicateMatch>, ScanStats)
    where
        I: IntoIterator<Item = &'a Candidate>,
    {
        let mut stats = ScanStats::default();

        for candidate in candidates {
            if Some(candidate.subject_id) == exclude {
                stats.excluded += 1;
                continue;
            }
            stats.examined += 1;

            let stored = match open_template(self.cipher, &candidate.template) {
                Ok(stored) => stored,
                Err(err) => {
                    tracing::warn!(
                        subject_id = %candidate.subject_id,
                        error = %err,
                        "duplicate scan: unreadable template, skipping"
                    );
                    stats.skipped += 1;
                    continue;
                }
            };

            let score = match similarity(probe, &stored) {
                Ok(score) => score,
                Err(err) => {
                    tracing::error!(
                        subject_id = %candidate.subject_id,
                        error = %err,
                        "duplicate scan: stored template is incomparable with probe, skipping"
                    );
                    stats.skipped += 1;
                    continue;
                }
            };

            if is_match(score, threshold) {
                tracing::debug!(
                    ?stats,
                    subject_id = %candidate.subject_id,
                    %score,
                    "duplicate scan: hit"
                );
                return (
                    Some(DuplicateMatch {
                        subject_id: candidate.subject_id,
                        score,
                    }),
                    stats,
                );
            }
        }

        tracing::debug!(?stats, "duplicate scan: no match");
        (None, stats)
    }
}

/// Scan `candidates` for a template matching `probe`, skipping `exclude`.
///
/// `Some` means a duplicate was found and names its owner.
pub fn find_duplicate<'a, I>(
    cipher: &TemplateCipher,
    probe: &Embedding,
    candidates: I,
    exclude: Option<SubjectId>,
    threshold: MatchThreshold,
) -> Option<DuplicateMatch>
where
    I: IntoIterator<Item = &'a Candidate>,
{
    FirstMatchScanner::new(cipher)
        .scan(probe, candidates, exclude, threshold)
        .0
}
