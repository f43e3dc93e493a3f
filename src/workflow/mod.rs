//! Package verification: sandbox seam, file seam, report building and the
//! workflow that ties them together.

mod files;
mod sandbox;
mod summary;
mod verifier;

pub use files::{FileStore, LocalFileStore};
pub use sandbox::{FailureSignatures, ResultMessage, SandboxDriver, SandboxRunResult};
pub use summary::{
    RunReport, FILES_SNAPSHOT_LOG, INSTALL_LOG, REGISTRY_SNAPSHOT_LOG, SUMMARY_LOG, UNINSTALL_LOG,
};
pub use verifier::{
    AbortReason, PackageVerifier, VerificationOutcome, VerifierSettings, WorkflowState,
    SANDBOX_LOCK, VERIFY_WORK,
};
