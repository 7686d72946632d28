//! Normalized lifecycle status derived from orchestrator condition/phase tokens.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ServiceStatus {
    #[default]
    Unknown,
    Starting,
    Running,
    Stopped,
    Error,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Unknown => "unknown",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Running => "running",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Error => "error",
        }
    }

    /// Precedence when several pods report on the same logical service.
    pub fn rank(&self) -> u8 {
        match self {
            ServiceStatus::Unknown => 0,
            ServiceStatus::Stopped => 1,
            ServiceStatus::Running => 2,
            ServiceStatus::Starting => 3,
            ServiceStatus::Error => 4,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Map a deployment condition type or pod phase to a `ServiceStatus`.
/// Total and case-insensitive; unrecognized tokens are `Unknown`.
pub fn transform_status(token: &str) -> ServiceStatus {
    match token.to_ascii_lowercase().as_str() {
        "pending" | "containercreating" | "waiting" => ServiceStatus::Starting,
        "running" | "available" => ServiceStatus::Running,
        "succeeded" | "terminated" => ServiceStatus::Stopped,
        "imagepullbackoff" | "crashloopbackoff" | "error" | "failed" => ServiceStatus::Error,
        _ => ServiceStatus::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_tokens_case_insensitively() {
        assert_eq!(transform_status("ImagePullBackOff"), ServiceStatus::Error);
        assert_eq!(transform_status("CrashLoopBackOff"), ServiceStatus::Error);
        assert_eq!(transform_status("Available"), ServiceStatus::Running);
        assert_eq!(transform_status("RUNNING"), ServiceStatus::Running);
        assert_eq!(transform_status("ContainerCreating"), ServiceStatus::Starting);
        assert_eq!(transform_status("Pending"), ServiceStatus::Starting);
        assert_eq!(transform_status("waiting"), ServiceStatus::Starting);
        assert_eq!(transform_status("Succeeded"), ServiceStatus::Stopped);
        assert_eq!(transform_status("Terminated"), ServiceStatus::Stopped);
        assert_eq!(transform_status("Failed"), ServiceStatus::Error);
    }

    #[test]
    fn unknown_tokens_fall_through() {
        assert_eq!(transform_status("bogus"), ServiceStatus::Unknown);
        assert_eq!(transform_status(""), ServiceStatus::Unknown);
        assert_eq!(transform_status("Progressing"), ServiceStatus::Unknown);
    }

    #[test]
    fn rank_orders_error_highest() {
        let mut all = vec![ServiceStatus::Running, ServiceStatus::Error, ServiceStatus::Unknown, ServiceStatus::Starting, ServiceStatus::Stopped];
        all.sort_by_key(|s| s.rank());
        assert_eq!(all.first(), Some(&ServiceStatus::Unknown));
        assert_eq!(all.last(), Some(&ServiceStatus::Error));
    }
}
