use kubejob_model::PodPhase;

/// Remembers the last observed phase and filters out immediate repeats.
///
/// Only the immediately preceding phase is compared, so `A -> B -> A` yields three transitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct PhaseTracker {
    last: Option<PodPhase>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent phase acted on.
    pub fn last(&self) -> Option<PodPhase> {
        self.last
    }

    /// Returns `true` if `phase` is a transition to act on.
    pub fn observe(&mut self, phase: PodPhase) -> bool {
        if self.last == Some(phase) {
            return false;
        }
        self.last = Some(phase);
        true
    }
}
