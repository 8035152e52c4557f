// src/controller/ranking.rs

use std::cmp::Ordering;

use serde::Serialize;

use crate::{
    config::PRIZE_TABLE,
    models::results::{CandidateOutcome, CandidateStatus, ExamResults},
};

pub fn classify(used: bool, submitted: bool) -> CandidateStatus {
    match (used, submitted) {
        (_, true) => CandidateStatus::Submitted,
        (false, false) => CandidateStatus::NotAttended,
        (true, false) => CandidateStatus::Incomplete,
    }
}

/// Prize money for a final rank, if that rank is paid.
pub fn prize_for(rank: u32) -> Option<u32> {
    PRIZE_TABLE
        .iter()
        .find(|(r, _)| *r == rank)
        .map(|(_, prize)| *prize)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCandidate {
    pub rank: u32,
    pub prize: Option<u32>,
    pub status: CandidateStatus,
    pub candidate: CandidateOutcome,
}

/// A registration that produced no score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnrankedCandidate {
    pub status: CandidateStatus,
    pub candidate: CandidateOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExamRanking {
    pub exam_id: String,
    pub ranked: Vec<RankedCandidate>,
    pub unranked: Vec<UnrankedCandidate>,
}

impl ExamRanking {
    /// Ranked candidates that earned a prize.
    pub fn winners(&self) -> impl Iterator<Item = &RankedCandidate> {
        self.ranked.iter().filter(|c| c.prize.is_some())
    }

    pub fn holder_of(&self, rank: u32) -> Option<&RankedCandidate> {
        self.ranked.iter().find(|c| c.rank == rank)
    }
}

/// Orders submitted candidates by correct answers (more first), then by
/// submission time (earlier first). Remaining ties fall back to the
/// registration number so the order is total.
fn by_merit(a: &CandidateOutcome, b: &CandidateOutcome) -> Ordering {
    b.correct_answers
        .cmp(&a.correct_answers)
        .then_with(|| match (a.timestamp, b.timestamp) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.registration_number.cmp(&b.registration_number))
}

pub fn rank_exam(results: &ExamResults) -> ExamRanking {
    let mut submitted = Vec::new();
    let mut unranked = Vec::new();

    for candidate in &results.candidates {
        match classify(candidate.used, candidate.submitted) {
            CandidateStatus::Submitted => submitted.push(candidate.clone()),
            status => unranked.push(UnrankedCandidate {
                status,
                candidate: candidate.clone(),
            }),
        }
    }

    submitted.sort_by(by_merit);
    unranked.sort_by(|a, b| {
        a.candidate
            .registration_number
            .cmp(&b.candidate.registration_number)
    });

    let ranked = submitted
        .into_iter()
        .zip(1u32..)
        .map(|(candidate, rank)| RankedCandidate {
            rank,
            prize: prize_for(rank),
            status: CandidateStatus::Submitted,
            candidate,
        })
        .collect();

    ExamRanking {
        exam_id: results.exam_id.clone(),
        ranked,
        unranked,
    }
}

pub fn rank_all(results: &[ExamResults]) -> Vec<ExamRanking> {
    results.iter().map(rank_exam).collect()
}
