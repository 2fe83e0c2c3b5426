use std::collections::HashMap;
use std::sync::Arc;

use trellis_core::{Result, TrellisError};

use crate::edge::{ConditionalEdge, Next, END};
use crate::node::Step;
use crate::state::FlowState;

/// Default cap on total step invocations per run. Loops are expected to be
/// bounded by their own attempt budgets well before this fires; hitting the
/// cap is reported as a graph defect.
pub const DEFAULT_MAX_HOPS: usize = 64;

/// Builder for a `Workflow`.
///
/// All wiring mistakes — unknown entry, dangling edge, undeclared router
/// target, duplicate step names, a step with both a static and a conditional
/// edge — are rejected by `build()` so they can never surface mid-run.
pub struct GraphBuilder<S: FlowState> {
    steps: HashMap<String, Arc<dyn Step<S>>>,
    duplicates: Vec<String>,
    edges: HashMap<String, String>,
    routers: HashMap<String, ConditionalEdge<S>>,
    entry: Option<String>,
    max_hops: usize,
}

impl<S: FlowState> Default for GraphBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: FlowState> GraphBuilder<S> {
    pub fn new() -> Self {
        Self {
            steps: HashMap::new(),
            duplicates: Vec::new(),
            edges: HashMap::new(),
            routers: HashMap::new(),
            entry: None,
            max_hops: DEFAULT_MAX_HOPS,
        }
    }

    /// Register a step. Names must be unique within the graph.
    pub fn add_step(mut self, step: impl Step<S>) -> Self {
        let name = step.name().to_string();
        if self.steps.insert(name.clone(), Arc::new(step)).is_some() {
            self.duplicates.push(name);
        }
        self
    }

    /// Register an unconditional edge. `to` may be `END`.
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.insert(from.into(), to.into());
        self
    }

    /// Register a conditional edge: after `from` completes, `router` picks
    /// one of `targets` (each a registered step name, or `END`).
    pub fn add_router<F>(
        mut self,
        from: impl Into<String>,
        router: F,
        targets: &[&str],
    ) -> Self
    where
        F: Fn(&S) -> Next + Send + Sync + 'static,
    {
        self.routers.insert(
            from.into(),
            ConditionalEdge {
                router: Box::new(router),
                targets: targets.iter().map(|t| t.to_string()).collect(),
            },
        );
        self
    }

    /// Set the entry step.
    pub fn entry(mut self, name: impl Into<String>) -> Self {
        self.entry = Some(name.into());
        self
    }

    /// Override the global hop cap (mainly for tests).
    pub fn max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// Validate the wiring and freeze the graph.
    pub fn build(self) -> Result<Workflow<S>> {
        if let Some(name) = self.duplicates.first() {
            return Err(TrellisError::Graph(format!(
                "duplicate step name '{}'",
                name
            )));
        }

        let entry = self
            .entry
            .ok_or_else(|| TrellisError::Graph("no entry step set".into()))?;
        if !self.steps.contains_key(&entry) {
            return Err(TrellisError::Graph(format!(
                "entry step '{}' is not registered",
                entry
            )));
        }

        for (from, to) in &self.edges {
            if !self.steps.contains_key(from) {
                return Err(TrellisError::Graph(format!(
                    "edge from unregistered step '{}'",
                    from
                )));
            }
            if to != END && !self.steps.contains_key(to) {
                return Err(TrellisError::Graph(format!(
                    "edge from '{}' targets unregistered step '{}'",
                    from, to
                )));
            }
            if self.routers.contains_key(from) {
                return Err(TrellisError::Graph(format!(
                    "step '{}' has both a static edge and a router",
                    from
                )));
            }
        }

        for (from, cond) in &self.routers {
            if !self.steps.contains_key(from) {
                return Err(TrellisError::Graph(format!(
                    "router from unregistered step '{}'",
                    from
                )));
            }
            if cond.targets.is_empty() {
                return Err(TrellisError::Graph(format!(
                    "router from '{}' declares no targets",
                    from
                )));
            }
            for target in &cond.targets {
                if target != END && !self.steps.contains_key(target) {
                    return Err(TrellisError::Graph(format!(
                        "router from '{}' declares unregistered target '{}'",
                        from, target
                    )));
                }
            }
        }

        Ok(Workflow {
            steps: self.steps,
            edges: self.edges,
            routers: self.routers,
            entry,
            max_hops: self.max_hops,
        })
    }
}

/// An immutable, validated workflow graph.
///
/// Built once via `GraphBuilder`; executed any number of times, each run with
/// its own state (see `Workflow::run` in `executor`).
pub struct Workflow<S: FlowState> {
    pub(crate) steps: HashMap<String, Arc<dyn Step<S>>>,
    pub(crate) edges: HashMap<String, String>,
    pub(crate) routers: HashMap<String, ConditionalEdge<S>>,
    pub(crate) entry: String,
    pub(crate) max_hops: usize,
}

impl<S: FlowState> Workflow<S> {
    pub fn entry_step(&self) -> &str {
        &self.entry
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.keys().map(|s| s.as_str()).collect()
    }
}

// Steps and routers are opaque trait objects; render the wiring instead.
impl<S: FlowState> std::fmt::Debug for Workflow<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut steps: Vec<&str> = self.steps.keys().map(String::as_str).collect();
        steps.sort_unstable();
        f.debug_struct("Workflow")
            .field("entry", &self.entry)
            .field("steps", &steps)
            .field("edges", &self.edges)
            .field("routers", &self.routers.keys().collect::<Vec<_>>())
            .field("max_hops", &self.max_hops)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::FnStep;
    use crate::state::StepFailure;

    #[derive(Debug, Clone, Default)]
    struct Blank {
        failure: Option<StepFailure>,
    }

    impl FlowState for Blank {
        fn record_failure(&mut self, failure: StepFailure) {
            self.failure = Some(failure);
        }

        fn last_failure(&self) -> Option<&StepFailure> {
            self.failure.as_ref()
        }
    }

    fn noop(name: &str) -> FnStep<Blank> {
        FnStep::new(name, |s: Blank| async move { Ok(s) })
    }

    #[test]
    fn test_build_linear_graph() {
        let wf = GraphBuilder::new()
            .add_step(noop("a"))
            .add_step(noop("b"))
            .add_edge("a", "b")
            .add_edge("b", END)
            .entry("a")
            .build()
            .unwrap();
        assert_eq!(wf.entry_step(), "a");
        assert_eq!(wf.step_names().len(), 2);
    }

    #[test]
    fn test_missing_entry_rejected() {
        let err = GraphBuilder::new().add_step(noop("a")).build().unwrap_err();
        assert!(matches!(err, TrellisError::Graph(_)));
    }

    #[test]
    fn test_unregistered_entry_rejected() {
        let err = GraphBuilder::new()
            .add_step(noop("a"))
            .entry("missing")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("entry step 'missing'"));
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let err = GraphBuilder::new()
            .add_step(noop("a"))
            .add_edge("a", "ghost")
            .entry("a")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unregistered step 'ghost'"));
    }

    #[test]
    fn test_undeclared_router_target_rejected() {
        let err = GraphBuilder::new()
            .add_step(noop("a"))
            .add_router("a", |_s: &Blank| Next::End, &["ghost"])
            .entry("a")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unregistered target 'ghost'"));
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let err = GraphBuilder::new()
            .add_step(noop("a"))
            .add_step(noop("a"))
            .entry("a")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate step name 'a'"));
    }

    #[test]
    fn test_static_and_router_conflict_rejected() {
        let err = GraphBuilder::new()
            .add_step(noop("a"))
            .add_step(noop("b"))
            .add_edge("a", "b")
            .add_router("a", |_s: &Blank| Next::End, &[END])
            .entry("a")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("both a static edge and a router"));
    }

    #[test]
    fn test_debug_renders_wiring() {
        let wf = GraphBuilder::new()
            .add_step(noop("a"))
            .add_step(noop("b"))
            .add_edge("a", "b")
            .add_edge("b", END)
            .entry("a")
            .build()
            .unwrap();
        let rendered = format!("{wf:?}");
        assert!(rendered.contains("entry: \"a\""));
        assert!(rendered.contains("max_hops"));
    }

    #[test]
    fn test_router_may_declare_end() {
        let wf = GraphBuilder::new()
            .add_step(noop("a"))
            .add_router("a", |_s: &Blank| Next::End, &[END])
            .entry("a")
            .build();
        assert!(wf.is_ok());
    }
}
