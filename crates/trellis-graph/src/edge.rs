use crate::state::FlowState;

/// Terminal marker. A static edge to `END`, or a router returning
/// `Next::End`, completes the run successfully.
pub const END: &str = "__end__";

/// Routing target returned by a router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    /// Continue at the named step.
    Step(String),
    /// Terminate the run successfully.
    End,
}

impl Next {
    pub fn step(name: impl Into<String>) -> Self {
        Next::Step(name.into())
    }
}

/// A pure routing function: reads state, returns the next step.
///
/// Routers must not mutate anything, must not fail, and must not compute the
/// fields they branch on — that is the producing step's job. Ambiguity is a
/// build-time concern: every target a router can return is declared when the
/// conditional edge is registered and validated by `GraphBuilder::build`.
pub type Router<S> = Box<dyn Fn(&S) -> Next + Send + Sync>;

/// A conditional edge: a router plus its declared set of possible targets.
pub(crate) struct ConditionalEdge<S: FlowState> {
    pub(crate) router: Router<S>,
    pub(crate) targets: Vec<String>,
}

impl<S: FlowState> ConditionalEdge<S> {
    /// Whether `target` was declared when this edge was registered.
    pub(crate) fn declares(&self, target: &str) -> bool {
        self.targets.iter().any(|t| t == target)
    }
}
