//! Ordered actions paired with the compensations that undo them.
//!
//! Each successful step pushes its compensation. When a later step fails,
//! the recorded compensations run newest-first, so a failure at step N
//! undoes steps N-1 down to 1 before the error is returned.

use tracing::{debug, error};

use crate::error::{LifecycleError, PromotionStep, Result};

type Undo<'a> = Box<dyn FnOnce() -> Result<()> + 'a>;

#[derive(Default)]
pub struct Compensations<'a> {
    undo: Vec<(PromotionStep, Undo<'a>)>,
}

impl<'a> Compensations<'a> {
    pub fn new() -> Self {
        Self { undo: Vec::new() }
    }

    /// Runs `action`. On success, records `compensate` (fed a copy of the
    /// action's output) and returns the output. On failure, rolls back every
    /// earlier step and returns a `Promotion` error naming `step`, unless the
    /// action already reported a more specific one.
    pub fn run<T, A, C>(&mut self, step: PromotionStep, action: A, compensate: C) -> Result<T>
    where
        T: Clone + 'a,
        A: FnOnce() -> Result<T>,
        C: FnOnce(T) -> Result<()> + 'a,
    {
        match action() {
            Ok(output) => {
                let for_undo = output.clone();
                self.undo.push((step, Box::new(move || compensate(for_undo))));
                debug!(%step, "step succeeded");
                Ok(output)
            }
            Err(e) => {
                let (step, reason) = match e {
                    LifecycleError::Promotion { step, reason } => (step, reason),
                    other => (step, other.to_string()),
                };
                self.rollback();
                Err(LifecycleError::promotion(step, reason))
            }
        }
    }

    /// Like [`run`](Self::run) for steps that need no undo of their own.
    pub fn run_plain<T, A>(&mut self, step: PromotionStep, action: A) -> Result<T>
    where
        T: Clone + 'a,
        A: FnOnce() -> Result<T>,
    {
        self.run(step, action, |_| Ok(()))
    }

    pub fn len(&self) -> usize {
        self.undo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    /// Undoes every recorded step, newest first. A failing compensation is
    /// logged and the remaining ones still run.
    pub fn rollback(&mut self) {
        while let Some((step, undo)) = self.undo.pop() {
            if let Err(e) = undo() {
                error!(%step, error = %e, "compensation failed");
            }
        }
    }

    /// Keeps everything that was done. Compensations are dropped unrun.
    pub fn commit(mut self) {
        self.undo.clear();
    }
}
