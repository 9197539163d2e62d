//! Refinement iteration bookkeeping.

use tracing::debug;

/// Number of completed feedback-processing cycles for the current agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationRecord {
    pub count: u32,
}

/// Answer to the "iteration complete" prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationDecision {
    /// Dismiss the prompt and allow another improvement round
    ContinueIterating,
    /// Dismiss the prompt and stop refining
    Finish,
}

/// Counts iterations and gates the user through continue-or-finish.
#[derive(Debug, Default)]
pub struct FeedbackIterationFlow {
    record: IterationRecord,
    prompt_visible: bool,
}

impl FeedbackIterationFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed cycle and show the prompt. Returns the new count.
    pub fn on_iteration_complete(&mut self) -> u32 {
        self.record.count += 1;
        self.prompt_visible = true;
        self.record.count
    }

    /// Apply the user's answer. Returns `false` when no prompt was showing.
    pub fn decide(&mut self, decision: IterationDecision) -> bool {
        if !self.prompt_visible {
            return false;
        }
        self.prompt_visible = false;
        debug!(?decision, count = self.record.count, "iteration decision");
        true
    }

    pub fn continue_iterating(&mut self) -> bool {
        self.decide(IterationDecision::ContinueIterating)
    }

    pub fn finish(&mut self) -> bool {
        self.decide(IterationDecision::Finish)
    }

    pub fn record(&self) -> IterationRecord {
        self.record
    }

    pub fn count(&self) -> u32 {
        self.record.count
    }

    pub fn is_prompt_visible(&self) -> bool {
        self.prompt_visible
    }

    /// Start over for a new agent.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_iterations_count_two() {
        let mut flow = FeedbackIterationFlow::new();
        assert_eq!(flow.on_iteration_complete(), 1);
        assert!(flow.continue_iterating());
        assert_eq!(flow.on_iteration_complete(), 2);
        assert_eq!(flow.record(), IterationRecord { count: 2 });
        assert!(flow.is_prompt_visible());
    }

    #[test]
    fn test_finish_keeps_count_and_hides_prompt() {
        let mut flow = FeedbackIterationFlow::new();
        flow.on_iteration_complete();
        assert!(flow.finish());
        assert_eq!(flow.count(), 1);
        assert!(!flow.is_prompt_visible());
    }

    #[test]
    fn test_decisions_without_prompt_are_noops() {
        let mut flow = FeedbackIterationFlow::new();
        assert!(!flow.finish());
        assert!(!flow.continue_iterating());
        assert_eq!(flow.count(), 0);

        flow.on_iteration_complete();
        assert!(flow.continue_iterating());
        assert!(!flow.continue_iterating());
        assert!(!flow.finish());
    }

    #[test]
    fn test_reset() {
        let mut flow = FeedbackIterationFlow::new();
        flow.on_iteration_complete();
        flow.reset();
        assert_eq!(flow.count(), 0);
        assert!(!flow.is_prompt_visible());
    }
}
