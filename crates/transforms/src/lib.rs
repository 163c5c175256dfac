pub mod constant_return;
pub mod excise_region;
pub mod goal;
pub mod neutralize_guard;
pub mod patcher;
pub mod replace_operand;
pub mod report;
pub mod synthesize;

pub use constant_return::{Constant, ConstantReturn};
pub use excise_region::ExciseRegion;
pub use goal::{GoalAction, OnAmbiguous, PatchConfig, PatchGoal};
pub use neutralize_guard::{GuardSite, NeutralizeGuard};
pub use patcher::Patcher;
pub use replace_operand::ReplaceOperand;
pub use report::{GoalReport, Outcome, PatchSummary, RejectReason, Verdict};
pub use synthesize::DefineFlag;

use sigpatch_core::{MethodDecl, MethodId, TypeDecl};
use sigpatch_core::module::MethodBody;
use sigpatch_core::validator::{self, ValidationError};
use thiserror::Error;

/// Transform error type encompassing all patch module errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Core operation failed.
    #[error("core operation failed: {0}")]
    Core(#[from] sigpatch_core::result::Error),

    /// Locator configuration is invalid.
    #[error("locator configuration: {0}")]
    Locator(#[from] sigpatch_analysis::Error),

    /// Goal file could not be parsed.
    #[error("goal configuration: {0}")]
    Config(String),

    /// The method has no body to patch.
    #[error("method has no body")]
    NoBody,

    /// The operation's precondition does not hold for this method.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// The computed body does not verify; nothing was committed.
    #[error("postcondition violated: {0}")]
    Postcondition(#[from] ValidationError),
}

/// Transform result type
pub type Result<T> = std::result::Result<T, Error>;

/// What a patch operation computed for a method.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchState {
    /// New body, not yet committed.
    Pending(MethodBody),
    /// The body already has the patched shape; nothing to do.
    AlreadyApplied,
}

/// A change computed against a module but not yet written into it.
#[derive(Debug, Clone, PartialEq)]
pub enum Staged {
    /// Replacement body for one method.
    Body { method: MethodId, body: MethodBody },
    /// Replacement for `types[index]`, or a new type when `index` is `None`.
    Type { index: Option<usize>, decl: TypeDecl },
}

/// A body-level patch operation. Operations read the method and return a new body; they never
/// mutate the module.
pub trait Patch {
    /// Returns the operation's name for logging and reports.
    fn name(&self) -> &'static str;
    /// Computes the patched body of `method`.
    fn plan(&self, method: &MethodDecl) -> Result<PatchState>;
}

/// Borrows the body of `method` or fails with [`Error::NoBody`].
pub(crate) fn body_of(method: &MethodDecl) -> Result<&MethodBody> {
    method.body.as_ref().ok_or(Error::NoBody)
}

/// Verifies a computed body against the method's return arity.
pub(crate) fn postcondition(method: &MethodDecl, body: &MethodBody) -> Result<()> {
    validator::validate_body(&method.name, body, method.return_arity())?;
    Ok(())
}
