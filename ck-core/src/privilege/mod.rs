//! Elevation, the sudoers policy and installation integrity

pub mod auditor;
pub mod elevate;
pub mod owner;
pub mod policy;

pub use auditor::{verify_elevated_paths, AuditReport, InstallLayout, InstallationAuditor};
pub use elevate::{is_root, Elevator, PrivilegedOp, SudoElevator};
pub use owner::{resolve_owner, Owner};
pub use policy::{render_policy, PolicyInstaller, PolicyOutcome, PolicyValidator, Visudo};
