//! Session block segmentation
//!
//! Facts are grouped into 5-hour blocks. A block starts at its first fact's
//! timestamp floored to the hour and takes every following fact until one
//! lands more than a session length after the block start, or more than a
//! session length after the previous fact. That fact opens the next block.
//!
//! The input must be a single stream sorted by timestamp across all files.

use chrono::{DateTime, Duration, Timelike, Utc};

use crate::usage::models::{CloseReason, UsageFact};

/// Session duration in hours
pub const SESSION_DURATION_HOURS: i64 = 5;

pub fn session_duration() -> Duration {
    Duration::hours(SESSION_DURATION_HOURS)
}

/// Floor a timestamp to the top of its hour
pub fn floor_to_hour(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(timestamp)
}

/// A sealed group of facts sharing one billing window
#[derive(Debug, Clone, PartialEq)]
pub struct SessionBlock {
    pub start: DateTime<Utc>,
    pub facts: Vec<UsageFact>,
    pub close_reason: CloseReason,
    duration: Duration,
}

impl SessionBlock {
    /// Nominal end of the window
    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.duration
    }

    /// Timestamp of the last fact in the block
    pub fn actual_end(&self) -> DateTime<Utc> {
        self.facts.last().map(|f| f.timestamp).unwrap_or(self.start)
    }

    pub fn id(&self) -> String {
        self.start.to_rfc3339()
    }

    /// Whether the window is still open at `now`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.end() >= now
    }

    /// Distinct model ids in first-seen order
    pub fn models(&self) -> Vec<String> {
        let mut models: Vec<String> = Vec::new();
        for model in self.facts.iter().filter_map(|f| f.model_id.as_ref()) {
            if !models.contains(model) {
                models.push(model.clone());
            }
        }
        models
    }
}

#[derive(Debug)]
enum SegmenterState {
    NoBlock,
    InBlock {
        start: DateTime<Utc>,
        facts: Vec<UsageFact>,
    },
}

/// Incremental block builder over a time-ordered stream of facts
#[derive(Debug)]
pub struct BlockSegmenter {
    state: SegmenterState,
    sealed: Vec<SessionBlock>,
    duration: Duration,
}

impl Default for BlockSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockSegmenter {
    pub fn new() -> Self {
        Self::with_duration(session_duration())
    }

    pub fn with_duration(duration: Duration) -> Self {
        Self {
            state: SegmenterState::NoBlock,
            sealed: Vec::new(),
            duration,
        }
    }

    /// Feed the next fact, sealing the open block if the fact falls outside it
    pub fn push(&mut self, fact: UsageFact) {
        let state = std::mem::replace(&mut self.state, SegmenterState::NoBlock);

        self.state = match state {
            SegmenterState::NoBlock => Self::open(fact),
            SegmenterState::InBlock { start, mut facts } => {
                match self.boundary(start, facts.last(), &fact) {
                    None => {
                        facts.push(fact);
                        SegmenterState::InBlock { start, facts }
                    }
                    Some(reason) => {
                        self.seal(start, facts, reason);
                        Self::open(fact)
                    }
                }
            }
        };
    }

    /// Seal whatever block is open and return all blocks in order
    pub fn finish(mut self) -> Vec<SessionBlock> {
        let state = std::mem::replace(&mut self.state, SegmenterState::NoBlock);
        if let SegmenterState::InBlock { start, facts } = state {
            self.seal(start, facts, CloseReason::EndOfInput);
        }
        self.sealed
    }

    fn open(fact: UsageFact) -> SegmenterState {
        SegmenterState::InBlock {
            start: floor_to_hour(fact.timestamp),
            facts: vec![fact],
        }
    }

    fn seal(&mut self, start: DateTime<Utc>, facts: Vec<UsageFact>, close_reason: CloseReason) {
        self.sealed.push(SessionBlock {
            start,
            facts,
            close_reason,
            duration: self.duration,
        });
    }

    /// Both limits are checked independently; an idle gap is reported over
    /// expiry when both are exceeded.
    fn boundary(
        &self,
        start: DateTime<Utc>,
        last: Option<&UsageFact>,
        fact: &UsageFact,
    ) -> Option<CloseReason> {
        let since_start = fact.timestamp - start;
        let since_last = last
            .map(|l| fact.timestamp - l.timestamp)
            .unwrap_or_else(Duration::zero);

        if since_last > self.duration {
            Some(CloseReason::IdleGap)
        } else if since_start > self.duration {
            Some(CloseReason::Expired)
        } else {
            None
        }
    }
}

/// Partition a time-ordered stream of facts into session blocks
pub fn identify_blocks<I>(facts: I) -> Vec<SessionBlock>
where
    I: IntoIterator<Item = UsageFact>,
{
    let mut segmenter = BlockSegmenter::new();
    for fact in facts {
        segmenter.push(fact);
    }
    segmenter.finish()
}

/// Most recent block whose window has not yet elapsed at `now`
pub fn find_active_block(blocks: &[SessionBlock], now: DateTime<Utc>) -> Option<&SessionBlock> {
    blocks.iter().rev().find(|block| block.is_active_at(now))
}
