//! The analysis pipeline: an append-only list of applied steps.
//!
//! Every applied step keeps the snapshots on both sides of it, so undo is a
//! pop and redo a push; no snapshot is ever rebuilt.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use stepsheet_engine::engine::{FormulaEvaluator, RhaiFormulaEvaluator, Table};

use crate::code_chunk::{CodeChunk, transpile_script};
use crate::config::EngineConfig;
use crate::error::{Result, StepError};
use crate::state::State;
use crate::steps::{ExecutionData, ModifiedSheets, Step, StepAction, StepContext};
use crate::summary::SheetSummary;

/// One applied step and the snapshots around it.
#[derive(Clone, Debug)]
pub struct StepRecord {
    pub step: Step,
    pub prev: Arc<State>,
    pub post: Arc<State>,
    pub execution: ExecutionData,
    pub chunks: Vec<CodeChunk>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StepReport {
    pub step_type: &'static str,
    pub modified: ModifiedSheets,
    pub sheets: Vec<SheetSummary>,
    pub processing_time: Duration,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum StepOutcome {
    Applied(StepReport),
    /// The action would not have changed anything and was not recorded.
    NoOp,
}

pub struct Analysis {
    initial: Arc<State>,
    steps: Vec<StepRecord>,
    redo_stack: Vec<StepRecord>,
    config: EngineConfig,
    formulas: Box<dyn FormulaEvaluator>,
}

impl Analysis {
    pub fn new(tables: Vec<Table>, config: EngineConfig) -> Result<Self> {
        Self::with_evaluator(tables, config, Box::new(RhaiFormulaEvaluator::new()))
    }

    pub fn with_evaluator(
        tables: Vec<Table>,
        config: EngineConfig,
        formulas: Box<dyn FormulaEvaluator>,
    ) -> Result<Self> {
        let initial = State::with_options(tables, None, config.ids.legacy);
        initial.check_consistency()?;
        Ok(Analysis {
            initial: Arc::new(initial),
            steps: Vec::new(),
            redo_stack: Vec::new(),
            config,
            formulas,
        })
    }

    /// Rebuild an analysis by applying saved actions in order.
    pub fn replay(tables: Vec<Table>, actions: &[StepAction], config: EngineConfig) -> Result<Self> {
        let mut analysis = Analysis::new(tables, config)?;
        for action in actions {
            analysis.handle_action(action)?;
        }
        Ok(analysis)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn initial_state(&self) -> &Arc<State> {
        &self.initial
    }

    pub fn current_state(&self) -> &Arc<State> {
        self.steps.last().map_or(&self.initial, |record| &record.post)
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// Apply one action. On error the analysis is left as it was.
    pub fn handle_action(&mut self, action: &StepAction) -> Result<StepOutcome> {
        let prev = Arc::clone(self.current_state());
        let step = Step::decode(&prev, action)?.saturate(&prev)?;
        let ctx = StepContext {
            formulas: self.formulas.as_ref(),
            config: &self.config,
        };
        let (post, execution) = step.execute(&prev, &ctx)?;
        let Some(execution) = execution else {
            debug!(step_type = step.step_type(), "step changed nothing");
            return Ok(StepOutcome::NoOp);
        };
        if let Err(e) = post.check_consistency() {
            error!(step_type = step.step_type(), error = %e, "step produced an inconsistent snapshot");
            return Err(e);
        }

        let chunks = step.transpile(&prev, &post, Some(&execution));
        let report = StepReport {
            step_type: step.step_type(),
            modified: step.modified_sheet_indexes(),
            sheets: post.sheet_summaries(),
            processing_time: execution.processing_time,
        };
        debug!(
            step_type = report.step_type,
            modified = ?report.modified,
            elapsed_us = report.processing_time.as_micros() as u64,
            chunks = chunks.len(),
            "applied step"
        );
        self.steps.push(StepRecord {
            step,
            prev,
            post,
            execution,
            chunks,
        });
        self.redo_stack.clear();
        Ok(StepOutcome::Applied(report))
    }

    /// Undo the last step, returning the sheets it had modified.
    pub fn undo(&mut self) -> Result<ModifiedSheets> {
        let record = self.steps.pop().ok_or(StepError::NothingToUndo)?;
        let modified = record.step.modified_sheet_indexes();
        self.redo_stack.push(record);
        Ok(modified)
    }

    pub fn redo(&mut self) -> Result<ModifiedSheets> {
        let record = self.redo_stack.pop().ok_or(StepError::NothingToRedo)?;
        let modified = record.step.modified_sheet_indexes();
        self.steps.push(record);
        Ok(modified)
    }

    pub fn code_chunks(&self) -> Vec<&CodeChunk> {
        self.steps.iter().flat_map(|record| &record.chunks).collect()
    }

    /// The script reproducing every applied step.
    pub fn transpile(&self) -> String {
        let chunks: Vec<CodeChunk> = self.code_chunks().into_iter().cloned().collect();
        transpile_script(&chunks, &self.config.codegen).join("\n")
    }

    /// Applied steps as actions, with saturated parameters.
    pub fn saved_steps(&self) -> Result<Vec<StepAction>> {
        self.steps.iter().map(|record| record.step.to_action()).collect()
    }
}
