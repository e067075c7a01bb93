//! The common result cell: storage for "value or error, exactly once".
//!
//! Grounded on CppAsync's `util/EitherData.h` + `impl/CommonAwaitable.h`. The original hand-rolls
//! a tagged union and accesses the error slot via pointer arithmetic so that the task state
//! machine can report an error without knowing the concrete value type; in Rust a plain `enum`
//! gives the same "exactly one variant initialized at a time" guarantee for free.

use crate::error::Error;

/// Tagged storage holding exactly one of: blank, a value, or an error.
///
/// `R = ()` is the valid specialization for operations that only ever carry "done" or "failed"
/// (§3: "the cell only carries error-or-nothing").
#[derive(Debug)]
pub enum ResultCell<R> {
    /// Not yet completed.
    Blank,
    /// Completed successfully.
    Value(R),
    /// Completed with failure.
    Error(Error),
    /// Moved-from sentinel. Any further use is a contract violation.
    Moved,
}

impl<R> ResultCell<R> {
    /// A fresh, not-yet-completed cell.
    pub fn new() -> Self {
        ResultCell::Blank
    }

    /// True once the cell holds a value or an error.
    pub fn is_ready(&self) -> bool {
        matches!(self, ResultCell::Value(_) | ResultCell::Error(_))
    }

    /// True only when ready and the outcome is an error.
    pub fn has_error(&self) -> bool {
        matches!(self, ResultCell::Error(_))
    }

    /// Store a value. The cell must currently be `Blank`.
    ///
    /// Unlike the original's `initializeResult`, an ordinary move into an `enum` variant cannot
    /// fail in Rust, so this always succeeds (see `SPEC_FULL.md` §4.2's Rust specialization
    /// note). Use [`ResultCell::try_complete`] for a fallible constructor.
    pub fn complete(&mut self, value: R) {
        debug_assert!(matches!(self, ResultCell::Blank), "cell already completed");
        *self = ResultCell::Value(value);
    }

    /// Store a value produced by a fallible constructor.
    ///
    /// If `make` fails, the failure is stored as the cell's error instead — this is the one
    /// path in this port where "construction failure becomes the result" (§4.2) is observable.
    pub fn try_complete<F>(&mut self, make: F)
    where
        F: FnOnce() -> Result<R, Error>,
    {
        debug_assert!(matches!(self, ResultCell::Blank), "cell already completed");
        match make() {
            Ok(value) => *self = ResultCell::Value(value),
            Err(err) => *self = ResultCell::Error(err),
        }
    }

    /// Store an error. The cell must currently be `Blank`.
    pub fn fail(&mut self, error: Error) {
        debug_assert!(matches!(self, ResultCell::Blank), "cell already completed");
        *self = ResultCell::Error(error);
    }

    /// Move the value out. Panics (contract violation) if not ready-with-value.
    pub fn take_value(&mut self) -> R {
        match std::mem::replace(self, ResultCell::Moved) {
            ResultCell::Value(v) => v,
            ResultCell::Error(_) => crate::error::contract_violation(
                "take_value() called on a cell holding an error",
            ),
            ResultCell::Blank | ResultCell::Moved => {
                crate::error::contract_violation("take_value() called before the cell was ready")
            }
        }
    }

    /// Move the error out. Panics (contract violation) if not ready-with-error.
    pub fn take_error(&mut self) -> Error {
        match std::mem::replace(self, ResultCell::Moved) {
            ResultCell::Error(e) => e,
            ResultCell::Value(_) => {
                crate::error::contract_violation("take_error() called on a cell holding a value")
            }
            ResultCell::Blank | ResultCell::Moved => {
                crate::error::contract_violation("take_error() called before the cell was ready")
            }
        }
    }

    /// Read the cell, surfacing the stored error if failed, or `Error::ContractViolation` if
    /// not yet ready. Matches the original's `get()`.
    pub fn get(self) -> Result<R, Error> {
        match self {
            ResultCell::Value(v) => Ok(v),
            ResultCell::Error(e) => Err(e),
            ResultCell::Blank => Err(Error::ContractViolation("result cell not ready")),
            ResultCell::Moved => Err(Error::ContractViolation("result cell already moved from")),
        }
    }
}

impl<R> Default for ResultCell<R> {
    fn default() -> Self {
        ResultCell::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_is_not_ready() {
        let cell: ResultCell<i32> = ResultCell::new();
        assert!(!cell.is_ready());
        assert!(!cell.has_error());
    }

    #[test]
    fn complete_then_take_value() {
        let mut cell = ResultCell::new();
        cell.complete(42);
        assert!(cell.is_ready());
        assert!(!cell.has_error());
        assert_eq!(cell.take_value(), 42);
    }

    #[test]
    fn fail_then_take_error() {
        let mut cell: ResultCell<i32> = ResultCell::new();
        cell.fail(Error::Allocation);
        assert!(cell.is_ready());
        assert!(cell.has_error());
        assert!(matches!(cell.take_error(), Error::Allocation));
    }

    #[test]
    fn try_complete_failure_becomes_error() {
        let mut cell: ResultCell<i32> = ResultCell::new();
        cell.try_complete(|| Err(Error::Allocation));
        assert!(cell.has_error());
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn take_value_before_ready_panics() {
        let mut cell: ResultCell<i32> = ResultCell::new();
        cell.take_value();
    }

    #[test]
    fn get_surfaces_error() {
        let mut cell: ResultCell<i32> = ResultCell::new();
        cell.fail(Error::Allocation);
        assert!(cell.get().is_err());
    }
}
