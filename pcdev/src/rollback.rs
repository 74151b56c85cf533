//! Ordered acquisition with reverse-order release
//!
//! A [`Transaction`] runs steps one after another. Every successful step
//! leaves an undo action behind; when a later step fails, or the transaction
//! is dropped before [`Transaction::commit`], the undo actions run in reverse
//! order. A committed transaction hands its undo actions over as an
//! [`UndoLog`] so the resources can be released later in the same order.

use std::fmt;

use tracing::{trace, warn};

use crate::error::{Error, Result};

type UndoFn<C> = Box<dyn FnOnce(&C) -> Result<()> + Send>;

struct Undo<C> {
    name: &'static str,
    action: UndoFn<C>,
}

/// Undo actions of completed steps, most recent last
pub struct UndoLog<C> {
    entries: Vec<Undo<C>>,
}

impl<C> UndoLog<C> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of the recorded steps, oldest first
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|undo| undo.name).collect()
    }

    /// Undo only the most recent step
    ///
    /// Returns `None` when the log is empty.
    pub fn undo_last(&mut self, ctx: &C) -> Option<Result<()>> {
        let undo = self.entries.pop()?;
        trace!(step = undo.name, "undo");
        let result = (undo.action)(ctx);
        if let Err(e) = &result {
            warn!(step = undo.name, error = %e, "undo failed");
        }
        Some(result)
    }

    /// Undo every step in reverse order, collecting failures
    ///
    /// A failing undo does not stop the remaining ones.
    pub fn unwind(&mut self, ctx: &C) -> Vec<Error> {
        let mut failures = Vec::new();
        while let Some(result) = self.undo_last(ctx) {
            if let Err(e) = result {
                failures.push(e);
            }
        }
        failures
    }
}

impl<C> fmt::Debug for UndoLog<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Sequence of reversible steps over a shared context
pub struct Transaction<'c, C> {
    ctx: &'c C,
    log: UndoLog<C>,
}

impl<'c, C> Transaction<'c, C> {
    #[must_use]
    pub fn new(ctx: &'c C) -> Self {
        Self {
            ctx,
            log: UndoLog::new(),
        }
    }

    /// Run `apply`; on success remember `undo` with a copy of its output
    ///
    /// On failure every earlier step is undone before the error is returned.
    ///
    /// # Errors
    /// The error of `apply`, or `RollbackFailed` wrapping it when an undo
    /// action failed as well.
    pub fn step<T, A, U>(&mut self, name: &'static str, apply: A, undo: U) -> Result<T>
    where
        T: Clone + Send + 'static,
        A: FnOnce(&C) -> Result<T>,
        U: FnOnce(&C, T) -> Result<()> + Send + 'static,
    {
        match apply(self.ctx) {
            Ok(output) => {
                trace!(step = name, "applied");
                let saved = output.clone();
                self.log.entries.push(Undo {
                    name,
                    action: Box::new(move |ctx| undo(ctx, saved)),
                });
                Ok(output)
            }
            Err(e) => {
                warn!(step = name, error = %e, "step failed, rolling back");
                let undo = self.log.unwind(self.ctx);
                if undo.is_empty() {
                    Err(e)
                } else {
                    Err(Error::RollbackFailed {
                        cause: Box::new(e),
                        undo,
                    })
                }
            }
        }
    }

    /// Keep every step and return the undo actions for a later release
    #[must_use]
    pub fn commit(mut self) -> UndoLog<C> {
        std::mem::replace(&mut self.log, UndoLog::new())
    }

    /// Keep every step for good, dropping the undo actions
    pub fn finish(mut self) {
        let log = std::mem::replace(&mut self.log, UndoLog::new());
        trace!(steps = ?log.names(), "transaction finished");
    }
}

impl<C> Drop for Transaction<'_, C> {
    fn drop(&mut self) {
        // Nobody is left to report to; failures are logged by `undo_last`
        if !self.log.is_empty() {
            let failures = self.log.unwind(self.ctx);
            if !failures.is_empty() {
                warn!(failures = failures.len(), "rollback on drop incomplete");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Journal(Mutex<Vec<String>>);

    impl Journal {
        fn push(&self, entry: impl Into<String>) {
            self.0.lock().push(entry.into());
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().clone()
        }
    }

    fn ok_step(tx: &mut Transaction<'_, Journal>, name: &'static str) -> Result<()> {
        tx.step(
            name,
            |j| {
                j.push(format!("do {name}"));
                Ok(())
            },
            move |j, ()| {
                j.push(format!("undo {name}"));
                Ok(())
            },
        )
    }

    #[test]
    fn test_failure_undoes_in_reverse() {
        let journal = Journal::default();
        let mut tx = Transaction::new(&journal);
        ok_step(&mut tx, "a").unwrap();
        ok_step(&mut tx, "b").unwrap();
        let result: Result<()> = tx.step("c", |_| Err(Error::Busy), |_, ()| Ok(()));
        assert_eq!(result, Err(Error::Busy));
        drop(tx);
        assert_eq!(
            journal.entries(),
            vec!["do a", "do b", "undo b", "undo a"]
        );
    }

    #[test]
    fn test_drop_without_commit_rolls_back() {
        let journal = Journal::default();
        {
            let mut tx = Transaction::new(&journal);
            ok_step(&mut tx, "a").unwrap();
        }
        assert_eq!(journal.entries(), vec!["do a", "undo a"]);
    }

    #[test]
    fn test_commit_keeps_steps() {
        let journal = Journal::default();
        let mut tx = Transaction::new(&journal);
        ok_step(&mut tx, "a").unwrap();
        ok_step(&mut tx, "b").unwrap();
        let mut log = tx.commit();
        assert_eq!(log.names(), vec!["a", "b"]);
        assert_eq!(journal.entries(), vec!["do a", "do b"]);

        assert_eq!(log.undo_last(&journal), Some(Ok(())));
        assert!(log.unwind(&journal).is_empty());
        assert_eq!(
            journal.entries(),
            vec!["do a", "do b", "undo b", "undo a"]
        );
    }

    #[test]
    fn test_unwind_continues_after_failure() {
        let journal = Journal::default();
        let mut tx = Transaction::new(&journal);
        ok_step(&mut tx, "a").unwrap();
        tx.step("b", |_| Ok(()), |_, ()| Err(Error::Busy)).unwrap();
        ok_step(&mut tx, "c").unwrap();
        let mut log = tx.commit();

        assert_eq!(log.unwind(&journal), vec![Error::Busy]);
        assert_eq!(
            journal.entries(),
            vec!["do a", "do c", "undo c", "undo a"]
        );
    }

    #[test]
    fn test_failed_undo_is_reported_with_cause() {
        let journal = Journal::default();
        let mut tx = Transaction::new(&journal);
        ok_step(&mut tx, "a").unwrap();
        tx.step("b", |_| Ok(()), |_, ()| Err(Error::Busy)).unwrap();

        let result: Result<()> = tx.step("c", |_| Err(Error::OutOfSpace), |_, ()| Ok(()));
        assert_eq!(
            result,
            Err(Error::RollbackFailed {
                cause: Box::new(Error::OutOfSpace),
                undo: vec![Error::Busy],
            })
        );
        // The undo of "a" still ran after "b" failed to undo
        assert_eq!(journal.entries(), vec!["do a", "undo a"]);
    }

    #[test]
    fn test_finish_keeps_steps() {
        let journal = Journal::default();
        let mut tx = Transaction::new(&journal);
        ok_step(&mut tx, "a").unwrap();
        tx.finish();
        assert_eq!(journal.entries(), vec!["do a"]);
    }

    #[test]
    fn test_undo_receives_step_output() {
        let journal = Journal::default();
        let mut tx = Transaction::new(&journal);
        let value = tx
            .step(
                "alloc",
                |_| Ok(42u32),
                |j, v| {
                    j.push(format!("free {v}"));
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(value, 42);
        drop(tx);
        assert_eq!(journal.entries(), vec!["free 42"]);
    }
}
