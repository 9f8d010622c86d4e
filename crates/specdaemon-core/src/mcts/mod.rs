//! C7/C8/C10 MCTS Orchestrator (spec.md §4.7-§4.10): a bounded tree search
//! over candidate solution branches for a single spec, where each branch
//! is itself a child spec executed by the ordinary task daemon.
//!
//! Grounded on `original_source/.../mcts/` (`tree.py`, `budget.py`,
//! `scorer.py`, `lesson_extractor.py`, `idea_generator.py`, `debugger.py`,
//! `improver.py`) and this crate's own [`crate::spec_factory`] for branch
//! creation. [`tree`] owns node storage, UCB1 selection, and
//! backpropagation; [`scorer`] turns a finished branch's on-disk artifacts
//! into a [`scorer::BranchScore`]; [`lessons`] is the append-only
//! `mcts_lessons.json` journal; [`agents`] wraps the four LLM-backed roles
//! (idea generator, debugger, improver, lesson extractor) behind a single
//! external-CLI invocation shape; [`orchestrator`] drives the nine-step
//! outer loop that ties them together.

pub mod agents;
pub mod lessons;
pub mod orchestrator;
pub mod scorer;
pub mod tree;

pub use agents::{DebugPlan, Idea, Improvement};
pub use orchestrator::{run_mcts_search, MctsResult};
pub use scorer::{score_branch, BranchScore};
