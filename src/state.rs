//! Project lifecycle: the status vocabulary and which operations may start from where.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Uploaded,
    Analyzing,
    Analyzed,
    GeneratingStrategy,
    StrategyGenerated,
    TranslatingSample,
    SampleReady,
    Translating,
    Completed,
    Stopped,
    Error,
}

impl ProjectStatus {
    pub const ALL: [ProjectStatus; 11] = [
        Self::Uploaded,
        Self::Analyzing,
        Self::Analyzed,
        Self::GeneratingStrategy,
        Self::StrategyGenerated,
        Self::TranslatingSample,
        Self::SampleReady,
        Self::Translating,
        Self::Completed,
        Self::Stopped,
        Self::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Analyzing => "analyzing",
            Self::Analyzed => "analyzed",
            Self::GeneratingStrategy => "generating_strategy",
            Self::StrategyGenerated => "strategy_generated",
            Self::TranslatingSample => "translating_sample",
            Self::SampleReady => "sample_ready",
            Self::Translating => "translating",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    /// A background job is expected to own the project while in this status.
    #[must_use]
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            Self::Analyzing | Self::GeneratingStrategy | Self::TranslatingSample | Self::Translating
        )
    }

    /// Whether `self -> to` is a legal edge.
    #[must_use]
    pub fn can_transition_to(self, to: ProjectStatus) -> bool {
        use ProjectStatus::*;
        if self == to {
            return false;
        }
        if to == Error {
            return self.is_in_progress();
        }
        match (self, to) {
            (Uploaded | Analyzed | Error, Analyzing) => true,
            (StrategyGenerated | SampleReady, Analyzing) => true,
            (Analyzing, Analyzed) => true,
            (Analyzed | StrategyGenerated | SampleReady | Error, GeneratingStrategy) => true,
            (GeneratingStrategy, StrategyGenerated) => true,
            (StrategyGenerated | SampleReady | Error, TranslatingSample) => true,
            (TranslatingSample, SampleReady) => true,
            (SampleReady | StrategyGenerated | Stopped | Completed | Error, Translating) => true,
            (Translating, Completed | Stopped) => true,
            _ => false,
        }
    }

    pub fn transition(self, to: ProjectStatus) -> Result<ProjectStatus, EngineError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(EngineError::InvalidTransition { from: self, to })
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry points gated by the project status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Analyze,
    RefineAnalysis,
    GenerateStrategy,
    TranslateSample,
    TranslateAll,
    TranslateChapter,
    RescanNames,
    UnifyName,
    TranslateTitles,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::RefineAnalysis => "refine analysis",
            Self::GenerateStrategy => "generate strategy",
            Self::TranslateSample => "translate sample",
            Self::TranslateAll => "translate all",
            Self::TranslateChapter => "translate chapter",
            Self::RescanNames => "rescan names",
            Self::UnifyName => "unify name",
            Self::TranslateTitles => "translate titles",
        }
    }

    /// Statuses from which the operation may legally start.
    pub fn allowed_from(self) -> &'static [ProjectStatus] {
        use ProjectStatus::*;
        match self {
            Self::Analyze => &[Uploaded, Analyzed, Error],
            Self::RefineAnalysis => &[Analyzed, StrategyGenerated, SampleReady, Error],
            Self::GenerateStrategy => {
                &[Analyzed, GeneratingStrategy, StrategyGenerated, SampleReady, Error]
            }
            Self::TranslateSample => &[StrategyGenerated, SampleReady, Error],
            Self::TranslateAll => &[SampleReady, StrategyGenerated, Stopped, Completed, Error],
            Self::TranslateChapter => &[StrategyGenerated, SampleReady, Stopped, Completed, Error],
            Self::RescanNames | Self::UnifyName => {
                &[SampleReady, StrategyGenerated, Stopped, Completed, Error]
            }
            Self::TranslateTitles => &[
                Uploaded,
                Analyzed,
                StrategyGenerated,
                SampleReady,
                Stopped,
                Completed,
                Error,
            ],
        }
    }

    /// Status the project enters while the operation runs, if it has one.
    pub fn running_status(self) -> Option<ProjectStatus> {
        match self {
            Self::Analyze | Self::RefineAnalysis => Some(ProjectStatus::Analyzing),
            Self::GenerateStrategy => Some(ProjectStatus::GeneratingStrategy),
            Self::TranslateSample => Some(ProjectStatus::TranslatingSample),
            Self::TranslateAll => Some(ProjectStatus::Translating),
            Self::TranslateChapter
            | Self::RescanNames
            | Self::UnifyName
            | Self::TranslateTitles => None,
        }
    }

    /// Reports an illegal start as a user-facing precondition failure.
    pub fn check(self, status: ProjectStatus) -> Result<(), EngineError> {
        if self.allowed_from().contains(&status) {
            Ok(())
        } else {
            Err(EngineError::IllegalState { op: self, status })
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_legal() {
        use ProjectStatus::*;
        let path = [
            Uploaded,
            Analyzing,
            Analyzed,
            GeneratingStrategy,
            StrategyGenerated,
            TranslatingSample,
            SampleReady,
            Translating,
            Completed,
        ];
        for w in path.windows(2) {
            assert!(w[0].can_transition_to(w[1]), "{} -> {}", w[0], w[1]);
        }
    }

    #[test]
    fn error_only_from_in_progress_states() {
        for s in ProjectStatus::ALL {
            assert_eq!(s.can_transition_to(ProjectStatus::Error), s.is_in_progress());
        }
    }

    #[test]
    fn refinement_reenters_analysis_and_strategy() {
        assert!(ProjectStatus::SampleReady.can_transition_to(ProjectStatus::Analyzing));
        assert!(ProjectStatus::SampleReady.can_transition_to(ProjectStatus::GeneratingStrategy));
        assert!(!ProjectStatus::Translating.can_transition_to(ProjectStatus::Analyzing));
    }

    #[test]
    fn translate_all_guard_rejects_uploaded() {
        let err = Operation::TranslateAll
            .check(ProjectStatus::Uploaded)
            .unwrap_err();
        assert!(err.is_user_facing());
        assert!(err.to_string().contains("uploaded"));
        assert!(Operation::TranslateAll.check(ProjectStatus::Stopped).is_ok());
    }

    #[test]
    fn every_running_status_is_reachable_from_allowed_sources() {
        let ops = [
            Operation::Analyze,
            Operation::RefineAnalysis,
            Operation::GenerateStrategy,
            Operation::TranslateSample,
            Operation::TranslateAll,
        ];
        for op in ops {
            let running = op.running_status().unwrap();
            for from in op.allowed_from() {
                if *from == running {
                    continue;
                }
                assert!(from.can_transition_to(running), "{op}: {from} -> {running}");
            }
        }
    }

    #[test]
    fn titles_are_blocked_only_while_a_job_runs() {
        for s in ProjectStatus::ALL {
            assert_eq!(
                Operation::TranslateTitles.check(s).is_ok(),
                !s.is_in_progress(),
                "{s}"
            );
        }
    }

    #[test]
    fn status_serializes_snake_case() {
        let s = serde_json::to_string(&ProjectStatus::StrategyGenerated).unwrap();
        assert_eq!(s, "\"strategy_generated\"");
    }
}
