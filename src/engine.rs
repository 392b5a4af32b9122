//! Grammar analysis engine.
//!
//! This module is the *internal entry point* for all analyses; the public
//! API in `api.rs` is a thin report-shaping layer over it. Each analysis
//! takes an immutable [`Grammar`](crate::Grammar) and derives its own data,
//! so analyses compose without ordering constraints beyond the ones below.
//!
//! ## How the parts work together
//!
//! ```text
//! Grammar (rule table + automaton)
//!       │
//!       ├── RuleGraph::build              (graph.rs)
//!       │     call edges, cycles, fan-in/out, depth, unused rules
//!       │           │
//!       │           v
//!       ├── left_recursion::analyze       (left_recursion.rs)
//!       │     direct / indirect / transformed classification
//!       │           │
//!       │           v
//!       ├── complexity::analyze_rule      (complexity.rs)
//!       │     per-rule metrics + grammar-wide aggregate
//!       │
//!       ├── LookaheadAnalyzer::new        (lookahead.rs)
//!       │     FIRST/FOLLOW fixpoints, decision lookaheads, conflicts
//!       │
//!       ├── report::decision_subgraph     (report.rs)
//!       │     bounded node/edge view of one decision
//!       │
//!       └── profiler::profile             (profiler.rs)
//!             instrumented sample parses via a ParseExecutor,
//!             per-sample timeouts, aggregated ambiguity events
//! ```
//!
//! ## Responsibilities by module
//!
//! - `graph.rs`: rule dependency graph, cycle detection, structural metrics.
//! - `left_recursion.rs`: direct and verified-indirect left recursion, plus
//!   recognition of precedence-transformed rules.
//! - `complexity.rs`: decision/alternative/depth metrics per rule and grammar.
//! - `lookahead.rs`: FIRST/FOLLOW sets and static decision conflicts.
//! - `report.rs`: decision subgraph extraction for visualization.
//! - `profiler.rs`: runtime ambiguity profiling over sample inputs.

#[path = "engine/complexity.rs"]
pub mod complexity;
#[path = "engine/graph.rs"]
mod graph;
#[path = "engine/left_recursion.rs"]
pub mod left_recursion;
#[path = "engine/lookahead.rs"]
mod lookahead;
#[path = "engine/profiler.rs"]
pub mod profiler;
#[path = "engine/report.rs"]
pub mod report;

pub use graph::RuleGraph;
pub use left_recursion::LeftRecursion;
pub use lookahead::{Lookahead, LookaheadAnalyzer, LookaheadSet};
pub use profiler::{Coverage, ProfileOutcome, ProfiledEvent};
pub use report::{DecisionSubgraph, MAX_SUBGRAPH_STATES, SubgraphEdge, SubgraphNode};
