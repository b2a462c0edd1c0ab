use serde::Serialize;
use std::fmt;

/// Stages of one answer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    RetrievingLocal,
    LocalSufficient,
    LocalInsufficient,
    AnsweringLocal,
    RetrievingFallback,
    AnsweringFallback,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::RetrievingLocal => "retrieving_local",
            Self::LocalSufficient => "local_sufficient",
            Self::LocalInsufficient => "local_insufficient",
            Self::AnsweringLocal => "answering_local",
            Self::RetrievingFallback => "retrieving_fallback",
            Self::AnsweringFallback => "answering_fallback",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn can_advance_to(self, next: PipelineStage) -> bool {
        use PipelineStage::*;

        if next == Failed {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Received, RetrievingLocal)
                | (RetrievingLocal, LocalSufficient)
                | (RetrievingLocal, LocalInsufficient)
                | (LocalSufficient, AnsweringLocal)
                | (LocalInsufficient, RetrievingFallback)
                | (RetrievingFallback, AnsweringFallback)
                | (AnsweringLocal, Done)
                | (AnsweringFallback, Done)
        )
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered record of the stages a run went through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageTrace {
    stages: Vec<PipelineStage>,
}

impl Default for StageTrace {
    fn default() -> Self {
        Self {
            stages: vec![PipelineStage::Received],
        }
    }
}

impl StageTrace {
    pub fn current(&self) -> PipelineStage {
        self.stages
            .last()
            .copied()
            .unwrap_or(PipelineStage::Received)
    }

    /// Records `next`. Illegal transitions are refused and logged; the trace
    /// keeps its current stage.
    pub fn advance(&mut self, next: PipelineStage) -> bool {
        let current = self.current();
        if !current.can_advance_to(next) {
            tracing::error!(from = %current, to = %next, "refused illegal pipeline transition");
            return false;
        }
        tracing::trace!(from = %current, to = %next, "pipeline transition");
        self.stages.push(next);
        true
    }

    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    pub fn contains(&self, stage: PipelineStage) -> bool {
        self.stages.contains(&stage)
    }
}

#[cfg(test)]
mod tests {
    use super::PipelineStage::*;
    use super::*;

    #[test]
    fn local_path_reaches_done() {
        let mut trace = StageTrace::default();
        for stage in [RetrievingLocal, LocalSufficient, AnsweringLocal, Done] {
            assert!(trace.advance(stage));
        }
        assert_eq!(trace.current(), Done);
        assert_eq!(trace.stages().len(), 5);
    }

    #[test]
    fn fallback_path_can_fail_midway() {
        let mut trace = StageTrace::default();
        for stage in [RetrievingLocal, LocalInsufficient, RetrievingFallback, Failed] {
            assert!(trace.advance(stage));
        }
        assert!(trace.contains(RetrievingFallback));
        assert!(!trace.contains(AnsweringFallback));
    }

    #[test]
    fn skipping_the_gate_is_refused() {
        let mut trace = StageTrace::default();
        assert!(trace.advance(RetrievingLocal));
        assert!(!trace.advance(RetrievingFallback));
        assert!(!trace.advance(Done));
        assert_eq!(trace.current(), RetrievingLocal);
    }

    #[test]
    fn terminal_stages_are_final() {
        let mut trace = StageTrace::default();
        assert!(trace.advance(Failed));
        assert!(!trace.advance(Failed));
        assert!(!trace.advance(RetrievingLocal));
        assert_eq!(Failed.to_string(), "failed");
    }
}
