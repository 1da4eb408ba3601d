//! Run and page state tracking.

use serde::Serialize;
use tracing::debug;

/// Lifecycle of one crawl run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RunState {
    Idle,
    /// Pages are being fetched; `next_page` is the next one to dispatch.
    Fetching { next_page: usize },
    Aggregating,
    Complete,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Complete | RunState::Cancelled | RunState::Failed
        )
    }

    /// Whether `next` may follow this state.
    pub fn can_advance_to(&self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Idle, Fetching { .. }) => true,
            (Fetching { next_page: a }, Fetching { next_page: b }) => b >= *a,
            (Fetching { .. }, Aggregating) => true,
            (Aggregating, Complete) => true,
            (s, Cancelled | Failed) => !s.is_terminal(),
            _ => false,
        }
    }
}

/// Tracks the state of a run and logs transitions.
#[derive(Debug)]
pub struct RunTracker {
    target: String,
    state: RunState,
}

impl RunTracker {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Move to `next`. Illegal transitions are ignored and logged.
    pub fn advance(&mut self, next: RunState) {
        if self.state == next {
            return;
        }
        if self.state.can_advance_to(next) {
            debug!("{}: {:?} -> {:?}", self.target, self.state, next);
            self.state = next;
        } else {
            debug!(
                "{}: ignoring transition {:?} -> {:?}",
                self.target, self.state, next
            );
        }
    }
}

/// What became of one page of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum PageStatus {
    /// Fetched and extracted.
    Done { records: usize },
    /// Structure present but no comment items: the listing ended here.
    EndOfComments,
    /// Retries exhausted or a non-retryable failure.
    Failed { error: String },
    /// Fetched after an earlier page marked the end; results discarded.
    BeyondEnd,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut tracker = RunTracker::new("comments 1");
        tracker.advance(RunState::Fetching { next_page: 0 });
        tracker.advance(RunState::Fetching { next_page: 3 });
        tracker.advance(RunState::Aggregating);
        tracker.advance(RunState::Complete);
        assert_eq!(tracker.state(), RunState::Complete);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut tracker = RunTracker::new("comments 1");
        tracker.advance(RunState::Fetching { next_page: 0 });
        tracker.advance(RunState::Cancelled);
        tracker.advance(RunState::Aggregating);
        tracker.advance(RunState::Failed);
        assert_eq!(tracker.state(), RunState::Cancelled);
    }

    #[test]
    fn test_cannot_skip_fetching() {
        let mut tracker = RunTracker::new("search");
        tracker.advance(RunState::Complete);
        assert_eq!(tracker.state(), RunState::Idle);
    }
}
