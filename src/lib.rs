//! stepsheet - spreadsheet edits as an append-only list of typed steps,
//! each producing a new snapshot and the pandas code that replays it.
//!
//! ```no_run
//! use stepsheet::{Analysis, EngineConfig, StepAction, Table};
//! use stepsheet::serde_json::json;
//!
//! # fn demo(table: Table) -> stepsheet::Result<()> {
//! let mut analysis = Analysis::new(vec![table], EngineConfig::default())?;
//! analysis.handle_action(&StepAction::new(
//!     "sort",
//!     json!({"sheet_index": 0, "column_id": "col-0", "sort_direction": "ascending"}),
//! ))?;
//! println!("{}", analysis.transpile());
//! # Ok(())
//! # }
//! ```

pub use serde_json;
pub use stepsheet_core::*;
pub use stepsheet_engine::engine;
