use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionState {
    Init,
    Stitching,
    Dimensioning,
    Projecting,
    Formatting,
    Scaling,
    Tagging,
    Committing,
    Done,
    Failed,
}

impl ConversionState {
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConversionState::{
            Committing, Dimensioning, Done, Failed, Formatting, Init, Projecting, Scaling,
            Stitching, Tagging,
        };

        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Init, Stitching)
                | (Init, Done)
                | (Stitching, Dimensioning)
                | (Dimensioning, Projecting)
                | (Projecting, Formatting)
                | (Formatting, Scaling)
                | (Formatting, Tagging)
                | (Scaling, Tagging)
                | (Tagging, Committing)
                | (Committing, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Stitching => "stitching",
            Self::Dimensioning => "dimensioning",
            Self::Projecting => "projecting",
            Self::Formatting => "formatting",
            Self::Scaling => "scaling",
            Self::Tagging => "tagging",
            Self::Committing => "committing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConversionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal conversion transition {from} -> {to}")]
pub struct StateTransitionError {
    pub from: ConversionState,
    pub to: ConversionState,
}

/// Tracks one job's walk through the conversion stages.
#[derive(Debug, Clone)]
pub struct ConversionRun {
    label: String,
    state: ConversionState,
    visited: Vec<ConversionState>,
}

impl ConversionRun {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: ConversionState::Init,
            visited: vec![ConversionState::Init],
        }
    }

    pub fn state(&self) -> ConversionState {
        self.state
    }

    pub fn visited(&self) -> &[ConversionState] {
        self.visited.as_slice()
    }

    pub fn advance(&mut self, next: ConversionState) -> Result<(), StateTransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(StateTransitionError {
                from: self.state,
                to: next,
            });
        }
        debug!(base_name = %self.label, from = %self.state, to = %next, "conversion stage");
        self.state = next;
        self.visited.push(next);
        Ok(())
    }

    /// Moves to `Failed` and returns the stage that was running.
    pub fn fail(&mut self) -> ConversionState {
        let failed_at = self.state;
        if !failed_at.is_terminal() {
            self.state = ConversionState::Failed;
            self.visited.push(ConversionState::Failed);
        }
        failed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConversionState::*;

    #[test]
    fn full_path_with_scaling_is_legal() {
        let mut run = ConversionRun::new("pano");
        for next in [
            Stitching,
            Dimensioning,
            Projecting,
            Formatting,
            Scaling,
            Tagging,
            Committing,
            Done,
        ] {
            run.advance(next).expect("legal transition");
        }
        assert_eq!(run.state(), Done);
        assert_eq!(run.visited().len(), 9);
    }

    #[test]
    fn scaling_is_optional() {
        assert!(Formatting.can_transition_to(Tagging));
        assert!(Formatting.can_transition_to(Scaling));
        assert!(!Projecting.can_transition_to(Tagging));
    }

    #[test]
    fn skipping_existing_output_goes_straight_to_done() {
        let mut run = ConversionRun::new("pano");
        run.advance(Done).expect("init may finish immediately");
        assert!(run.state().is_terminal());
    }

    #[test]
    fn every_non_terminal_state_can_fail() {
        for state in [
            Init,
            Stitching,
            Dimensioning,
            Projecting,
            Formatting,
            Scaling,
            Tagging,
            Committing,
        ] {
            assert!(state.can_transition_to(Failed), "{state} should fail");
        }
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Init));
    }

    #[test]
    fn out_of_order_stage_is_rejected() {
        let mut run = ConversionRun::new("pano");
        let err = run.advance(Projecting).expect_err("must stitch first");
        assert_eq!(
            err,
            StateTransitionError {
                from: Init,
                to: Projecting
            }
        );
        assert_eq!(run.state(), Init);
    }

    #[test]
    fn fail_reports_the_running_stage() {
        let mut run = ConversionRun::new("pano");
        run.advance(Stitching).expect("legal");
        assert_eq!(run.fail(), Stitching);
        assert_eq!(run.state(), Failed);
        assert_eq!(run.fail(), Failed);
    }
}
