//! Ordered steps with compensations.
//!
//! A [`Saga`] runs steps one at a time. Every step that acquires something
//! registers how to give it back; when a later step fails, the registered
//! compensations run newest first and the failing step's error is returned.
//! A compensation that fails stops the unwinding and its error is returned
//! instead.

use crate::error::BmiResult;
use log::{error, warn};

type Compensation<'a> = Box<dyn FnOnce() -> BmiResult<()> + 'a>;

pub struct Saga<'a> {
    name: String,
    compensations: Vec<(String, Compensation<'a>)>,
}

impl<'a> Saga<'a> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compensations: Vec::new(),
        }
    }

    /// Run `action`, unwinding every registered compensation if it fails.
    pub fn step<T>(
        &mut self,
        label: &str,
        action: impl FnOnce() -> BmiResult<T>,
    ) -> BmiResult<T> {
        match action() {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!("[{}] step `{label}` failed: {err}", self.name);
                self.unwind()?;
                Err(err)
            }
        }
    }

    /// Register the undo for the step that just succeeded.
    pub fn on_failure(
        &mut self,
        label: impl Into<String>,
        compensation: impl FnOnce() -> BmiResult<()> + 'a,
    ) {
        self.compensations
            .push((label.into(), Box::new(compensation)));
    }

    /// Number of compensations currently registered.
    pub fn depth(&self) -> usize {
        self.compensations.len()
    }

    /// Finish successfully, discarding all compensations.
    pub fn complete(self) {
        log::debug!("[{}] completed {} step(s)", self.name, self.compensations.len());
    }

    fn unwind(&mut self) -> BmiResult<()> {
        while let Some((label, compensation)) = self.compensations.pop() {
            warn!("[{}] compensating `{label}`", self.name);
            if let Err(err) = compensation() {
                error!(
                    "[{}] compensation `{label}` failed: {err}; {} compensation(s) skipped",
                    self.name,
                    self.compensations.len()
                );
                self.compensations.clear();
                return Err(err);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BmiError, ErrorKind};
    use std::cell::RefCell;

    #[test]
    fn failure_unwinds_in_reverse_order() {
        let log = RefCell::new(Vec::new());
        let mut saga = Saga::new("test");

        saga.step("one", || Ok(())).unwrap();
        saga.on_failure("undo one", || {
            log.borrow_mut().push("undo one");
            Ok(())
        });
        saga.step("two", || Ok(())).unwrap();
        saga.on_failure("undo two", || {
            log.borrow_mut().push("undo two");
            Ok(())
        });

        let err = saga
            .step("three", || -> BmiResult<()> {
                Err(BmiError::Storage("clone failed".into()))
            })
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(*log.borrow(), vec!["undo two", "undo one"]);
        assert_eq!(saga.depth(), 0);
    }

    #[test]
    fn compensation_error_aborts_unwinding() {
        let log = RefCell::new(Vec::new());
        let mut saga = Saga::new("test");
        saga.on_failure("first", || {
            log.borrow_mut().push("first");
            Ok(())
        });
        saga.on_failure("second", || Err(BmiError::Fabric("detach refused".into())));

        let err = saga
            .step("third", || -> BmiResult<()> {
                Err(BmiError::Storage("boom".into()))
            })
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Fabric);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn success_returns_value_and_keeps_compensations() {
        let mut saga = Saga::new("test");
        saga.on_failure("noop", || Ok(()));
        assert_eq!(saga.step("value", || Ok(7)).unwrap(), 7);
        assert_eq!(saga.depth(), 1);
        saga.complete();
    }
}
