//! Flow engine: an ordered list of steps and a cursor into it.
//!
//! Steps are plain identifiers; the caller supplies the closure that runs the
//! step body, so the engine never catches or wraps step failures.

use std::fmt;

use tracing::debug;

use crate::ui::dialogs::PredicateId;

/// Placeholder in flow labels replaced by the resolved release version
pub const VERSION_PLACEHOLDER: &str = "[version]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// The cursor sits one past the last step; there is nothing to invoke
    PastEnd { len: usize },
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowError::PastEnd { len } => write!(f, "flow cursor moved past its last step ({})", len),
        }
    }
}

impl std::error::Error for FlowError {}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowDescriptor<S> {
    pub label: &'static str,
    pub steps: Vec<S>,
    /// Whether the flow can be picked from the menu
    pub enabled: PredicateId,
}

impl<S> FlowDescriptor<S> {
    pub fn new(label: &'static str, steps: Vec<S>, enabled: PredicateId) -> Self {
        Self {
            label,
            steps,
            enabled,
        }
    }

    pub fn render_label(&self, version: Option<&str>) -> String {
        render_version(self.label, version)
    }
}

pub fn render_version(label: &str, version: Option<&str>) -> String {
    label.replace(VERSION_PLACEHOLDER, version.unwrap_or("")).replace("  ", " ")
}

/// Outcome of a cursor move
pub type Advance<R> = Result<Option<R>, FlowError>;

pub struct FlowEngine<S> {
    flow: Option<FlowDescriptor<S>>,
    cursor: usize,
}

impl<S> Default for FlowEngine<S> {
    fn default() -> Self {
        Self {
            flow: None,
            cursor: 0,
        }
    }
}

impl<S: Copy + fmt::Debug> FlowEngine<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn flow(&self) -> Option<&FlowDescriptor<S>> {
        self.flow.as_ref()
    }

    pub fn current_step(&self) -> Option<S> {
        self.flow.as_ref().and_then(|f| f.steps.get(self.cursor).copied())
    }

    /// Make `flow` current, reset the cursor and invoke its first step
    pub fn run<R>(&mut self, flow: FlowDescriptor<S>, invoke: impl FnOnce(S) -> R) -> Advance<R> {
        debug!("Starting flow \"{}\"", flow.label);
        self.flow = Some(flow);
        self.cursor = 0;
        self.invoke_current(invoke)
    }

    /// Drop the current flow; later moves are no-ops
    pub fn stop(&mut self) {
        self.flow = None;
        self.cursor = 0;
    }

    /// Move the cursor by `delta` and invoke the step it lands on.
    ///
    /// Returns `Ok(None)` when no flow is active or the move is refused.
    /// Landing exactly on the step count is accepted and reported as
    /// [`FlowError::PastEnd`].
    pub fn advance<R>(&mut self, delta: isize, invoke: impl FnOnce(S) -> R) -> Advance<R> {
        let Some(flow) = &self.flow else {
            return Ok(None);
        };
        let len = flow.steps.len() as isize;
        let cursor = self.cursor as isize;

        if cursor > len + delta {
            debug!("Refusing to move flow cursor {} by {}", cursor, delta);
            return Ok(None);
        }

        let target = cursor + delta;
        if target < 0 || target > len {
            debug!("Flow cursor {} out of range 0..={}", target, len);
            return Ok(None);
        }

        self.cursor = target as usize;
        self.invoke_current(invoke)
    }

    pub fn next<R>(&mut self, invoke: impl FnOnce(S) -> R) -> Advance<R> {
        match &self.flow {
            Some(flow) if self.cursor < flow.steps.len() => self.advance(1, invoke),
            _ => Ok(None),
        }
    }

    pub fn previous<R>(&mut self, invoke: impl FnOnce(S) -> R) -> Advance<R> {
        if self.flow.is_some() && self.cursor > 0 {
            self.advance(-1, invoke)
        } else {
            Ok(None)
        }
    }

    fn invoke_current<R>(&self, invoke: impl FnOnce(S) -> R) -> Advance<R> {
        let Some(flow) = &self.flow else {
            return Ok(None);
        };
        match flow.steps.get(self.cursor) {
            Some(step) => {
                debug!("Flow step {}: {:?}", self.cursor, step);
                Ok(Some(invoke(*step)))
            }
            None => Err(FlowError::PastEnd {
                len: flow.steps.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(steps: Vec<char>) -> FlowDescriptor<char> {
        FlowDescriptor::new("Test [version] flow", steps, PredicateId::Always)
    }

    #[test]
    fn test_run_invokes_first_step() {
        let mut engine = FlowEngine::new();
        let mut seen = Vec::new();
        engine.run(flow(vec!['a', 'b', 'c']), |s| seen.push(s)).unwrap();
        assert_eq!(seen, vec!['a']);
        assert_eq!(engine.cursor(), 0);
    }

    #[test]
    fn test_no_flow_is_a_silent_noop() {
        let mut engine: FlowEngine<char> = FlowEngine::new();
        assert_eq!(engine.next(|s| s), Ok(None));
        assert_eq!(engine.previous(|s| s), Ok(None));
        assert_eq!(engine.advance(3, |s| s), Ok(None));
    }

    #[test]
    fn test_next_and_previous_walk_the_steps() {
        let mut engine = FlowEngine::new();
        engine.run(flow(vec!['a', 'b', 'c']), |_| ()).unwrap();
        assert_eq!(engine.next(|s| s), Ok(Some('b')));
        assert_eq!(engine.next(|s| s), Ok(Some('c')));
        assert_eq!(engine.previous(|s| s), Ok(Some('b')));
        assert_eq!(engine.previous(|s| s), Ok(Some('a')));
        // Already at the start
        assert_eq!(engine.previous(|s| s), Ok(None));
        assert_eq!(engine.cursor(), 0);
    }

    #[test]
    fn test_next_from_last_step_lands_on_len() {
        let mut engine = FlowEngine::new();
        engine.run(flow(vec!['a', 'b']), |_| ()).unwrap();
        engine.next(|_| ()).unwrap();

        let mut invoked = false;
        assert_eq!(
            engine.next(|_| invoked = true),
            Err(FlowError::PastEnd { len: 2 })
        );
        assert!(!invoked);
        assert_eq!(engine.cursor(), 2);
        assert_eq!(engine.current_step(), None);

        // next() is inert once the cursor reached len
        assert_eq!(engine.next(|s| s), Ok(None));
        assert_eq!(engine.cursor(), 2);
        // and so is previous(): the move guard rejects stepping back from len
        assert_eq!(engine.previous(|s| s), Ok(None));
        assert_eq!(engine.cursor(), 2);
    }

    #[test]
    fn test_advance_never_leaves_bounds() {
        let mut engine = FlowEngine::new();
        engine.run(flow(vec!['a', 'b', 'c']), |_| ()).unwrap();

        assert_eq!(engine.advance(-1, |s| s), Ok(None));
        assert_eq!(engine.cursor(), 0);

        assert_eq!(engine.advance(5, |s| s), Ok(None));
        assert_eq!(engine.cursor(), 0);

        assert_eq!(engine.advance(2, |s| s), Ok(Some('c')));
        // Backward moves larger than the distance to the end are refused
        assert_eq!(engine.advance(-2, |s| s), Ok(None));
        assert_eq!(engine.advance(-1, |s| s), Ok(Some('b')));
        assert_eq!(engine.advance(1, |s| s), Ok(Some('c')));
        assert_eq!(engine.advance(1, |s| s), Err(FlowError::PastEnd { len: 3 }));
        assert_eq!(engine.advance(-3, |s| s), Ok(None));
        assert_eq!(engine.cursor(), 3);
    }

    #[test]
    fn test_run_resets_cursor() {
        let mut engine = FlowEngine::new();
        engine.run(flow(vec!['a', 'b', 'c']), |_| ()).unwrap();
        engine.advance(2, |_| ()).unwrap();
        assert_eq!(engine.run(flow(vec!['x', 'y']), |s| s), Ok(Some('x')));
        assert_eq!(engine.cursor(), 0);

        engine.stop();
        assert_eq!(engine.next(|s| s), Ok(None));
    }

    #[test]
    fn test_render_label() {
        let flow = flow(vec![]);
        assert_eq!(flow.render_label(Some("9.0.0")), "Test 9.0.0 flow");
        assert_eq!(flow.render_label(None), "Test flow");
    }
}
