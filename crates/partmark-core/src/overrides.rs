//! Composable overrides for a part's operations.
//!
//! An operation is a [`Handler`]. Overrides are layered on at construction
//! time, in the order they were added: `instead` replaces the handler so far,
//! `before` runs a hook and then the handler, `after` post-processes the
//! handler's output.

use std::sync::Arc;

/// A part operation.
pub type Handler<I, O> = Arc<dyn Fn(&I) -> O + Send + Sync>;

/// Where an override sits relative to the operation it wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Instead,
    Before,
    After,
}

enum Override<I, O> {
    Instead(Handler<I, O>),
    Before(Arc<dyn Fn(&I) + Send + Sync>),
    After(Arc<dyn Fn(&I, O) -> O + Send + Sync>),
}

impl<I, O> Clone for Override<I, O> {
    fn clone(&self) -> Self {
        match self {
            Override::Instead(f) => Override::Instead(Arc::clone(f)),
            Override::Before(f) => Override::Before(Arc::clone(f)),
            Override::After(f) => Override::After(Arc::clone(f)),
        }
    }
}

/// An ordered list of overrides for one operation.
pub struct OverrideChain<I, O> {
    overrides: Vec<Override<I, O>>,
}

impl<I, O> Default for OverrideChain<I, O> {
    fn default() -> Self {
        Self {
            overrides: Vec::new(),
        }
    }
}

impl<I, O> Clone for OverrideChain<I, O> {
    fn clone(&self) -> Self {
        Self {
            overrides: self.overrides.clone(),
        }
    }
}

impl<I: 'static, O: 'static> OverrideChain<I, O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instead(mut self, f: impl Fn(&I) -> O + Send + Sync + 'static) -> Self {
        self.overrides.push(Override::Instead(Arc::new(f)));
        self
    }

    pub fn before(mut self, f: impl Fn(&I) + Send + Sync + 'static) -> Self {
        self.overrides.push(Override::Before(Arc::new(f)));
        self
    }

    pub fn after(mut self, f: impl Fn(&I, O) -> O + Send + Sync + 'static) -> Self {
        self.overrides.push(Override::After(Arc::new(f)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.overrides
            .iter()
            .map(|o| match o {
                Override::Instead(_) => Phase::Instead,
                Override::Before(_) => Phase::Before,
                Override::After(_) => Phase::After,
            })
            .collect()
    }

    /// Wrap `base` in every override, first-added innermost.
    pub fn compose(&self, base: Handler<I, O>) -> Handler<I, O> {
        self.overrides
            .iter()
            .fold(base, |inner: Handler<I, O>, layer| -> Handler<I, O> {
                match layer.clone() {
                    Override::Instead(f) => f,
                    Override::Before(hook) => Arc::new(move |input: &I| {
                        hook(input);
                        inner(input)
                    }),
                    Override::After(post) => Arc::new(move |input: &I| post(input, inner(input))),
                }
            })
    }
}
