//! Diagnostics reported on hierarchy and configuration objects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a reported condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConditionCode {
    /// The declared parent namespace does not exist
    CritParentMissing,
    /// The declared parent would close a cycle
    CritCycle,
    /// An ancestor has a critical condition; propagation into this subtree is halted
    CritAncestor,
    /// The namespace is managed by an external hierarchy owner
    CritExternalManager,
    /// A subnamespace whose anchor is gone
    SubnamespaceAnchorMissing,
    /// Illegal managed metadata or an otherwise invalid declaration
    BadConfiguration,
    /// An object could not be propagated (shadowed, filtered or rejected)
    CannotPropagate,
    /// A propagated copy could not be written
    CannotUpdate,
    /// A configured kind could not be started
    ObjectReconcilerCreationFailed,
}

impl ConditionCode {
    /// Critical conditions halt propagation in the affected subtree
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            ConditionCode::CritParentMissing
                | ConditionCode::CritCycle
                | ConditionCode::CritAncestor
                | ConditionCode::CritExternalManager
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionCode::CritParentMissing => "CritParentMissing",
            ConditionCode::CritCycle => "CritCycle",
            ConditionCode::CritAncestor => "CritAncestor",
            ConditionCode::CritExternalManager => "CritExternalManager",
            ConditionCode::SubnamespaceAnchorMissing => "SubnamespaceAnchorMissing",
            ConditionCode::BadConfiguration => "BadConfiguration",
            ConditionCode::CannotPropagate => "CannotPropagate",
            ConditionCode::CannotUpdate => "CannotUpdate",
            ConditionCode::ObjectReconcilerCreationFailed => "ObjectReconcilerCreationFailed",
        }
    }
}

impl fmt::Display for ConditionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single condition as it appears in an object's status
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub code: ConditionCode,

    /// Short machine-readable reason
    #[serde(default)]
    pub reason: String,

    #[serde(default)]
    pub message: String,
}

impl Condition {
    pub fn new(code: ConditionCode, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn is_critical(&self) -> bool {
        self.code.is_critical()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.reason, self.message)
    }
}
