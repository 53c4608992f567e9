//! Closed-loop quality refinement for generated long-form text.
//!
//! Given a draft and a rubric, the engine scores the draft through an
//! external critic, derives structured corrections, applies them, and
//! repeats until a target score is reached, a regression is detected, or
//! the iteration budget runs out. The critic and the fixer are opaque
//! services behind small traits, so any provider (or a test mock) plugs in.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use prose_refinery::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let client = MessagesClient::builder("your-api-key").build()?;
//!     let shared = Arc::new(client);
//!
//!     let engine = RefinementEngine::builder(shared.clone(), shared).build();
//!
//!     let outcome = engine
//!         .refine(
//!             RefinementRequest::new(draft_text(), rubric(), "profile")
//!                 .with_target_score(9.0)
//!                 .with_max_iterations(5),
//!         )
//!         .await;
//!
//!     println!("final score {:.1} after {} iterations", outcome.score, outcome.history.len());
//!     println!("{}", outcome.text);
//!     Ok(())
//! }
//! # fn draft_text() -> String { String::new() }
//! # fn rubric() -> String { String::new() }
//! ```
//!
//! The loop never surfaces a hard failure: unreachable services degrade to a
//! deterministic heuristic score or a skipped edit for that iteration, and
//! exhaustion returns the best text seen together with its true score.

pub mod engine;
pub mod error;
pub mod parser;
pub mod patching;
pub mod remote;
pub mod report;
pub mod scoring;
pub mod sections;
pub mod services;
pub mod similarity;

pub use engine::{InstructionTemplates, RefinementConfig, RefinementEngine, RefinementEngineBuilder};
pub use error::{RefineError, Result, ResultExt};
pub use remote::{MessagesClient, MessagesClientBuilder};
pub use report::{
    BlockingIssue, EditAction, EditMode, InlineFix, IterationRecord, PatchAction,
    RefinementOutcome, RefinementRequest, RefinementStatus, ScoreReport, SectionPatch, Severity,
};
pub use scoring::{HeuristicProfile, HeuristicRegistry, Scorer};
pub use services::{CriticRequest, CriticService, FixRequest, FixerService};

/// Prelude module for convenient imports.
///
/// ```rust
/// use prose_refinery::prelude::*;
/// ```
pub mod prelude {
    pub use crate::engine::{
        InstructionTemplates, RefinementConfig, RefinementEngine, RefinementEngineBuilder,
    };
    pub use crate::error::{RefineError, Result, ResultExt};
    pub use crate::remote::{MessagesClient, MessagesClientBuilder};
    pub use crate::report::{
        EditAction, EditMode, IterationRecord, RefinementOutcome, RefinementRequest,
        RefinementStatus, ScoreReport,
    };
    pub use crate::scoring::{HeuristicProfile, HeuristicRegistry, Scorer};
    pub use crate::services::{CriticRequest, CriticService, FixRequest, FixerService};
}
