use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::error::Error;

/// Estado de un HostRoleCommand.
///
/// `PENDING -> QUEUED -> IN_PROGRESS -> {COMPLETED | FAILED | TIMEDOUT | ABORTED}`.
/// Desde PENDING/QUEUED se puede pasar directo a TIMEDOUT o ABORTED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostRoleStatus {
    Pending,
    Queued,
    InProgress,
    Completed,
    Failed,
    Timedout,
    Aborted,
}

impl HostRoleStatus {
    /// PENDING, QUEUED o IN_PROGRESS.
    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Pending | Self::Queued | Self::InProgress)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_in_progress()
    }

    pub fn is_failed_state(self) -> bool {
        matches!(self, Self::Failed | Self::Timedout | Self::Aborted)
    }

    /// Todavía no llegó al agente (candidato a timeout/reintento).
    pub fn is_schedulable(self) -> bool {
        matches!(self, Self::Pending | Self::Queued)
    }

    /// Un terminal no se mueve más y el resto solo avanza; repetir el
    /// mismo estado vale (un IN_PROGRESS nuevo refresca la salida).
    pub fn can_move_to(self, next: HostRoleStatus) -> bool {
        self.is_in_progress() && next.rank() >= self.rank()
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Queued => 1,
            Self::InProgress => 2,
            _ => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Queued => "QUEUED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Timedout => "TIMEDOUT",
            Self::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for HostRoleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostRoleStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "QUEUED" => Ok(Self::Queued),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "TIMEDOUT" => Ok(Self::Timedout),
            "ABORTED" => Ok(Self::Aborted),
            _ => Err(Error::InvalidStatus(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_report_status_names() {
        assert_eq!("COMPLETED".parse::<HostRoleStatus>().unwrap(), HostRoleStatus::Completed);
        assert_eq!("in_progress".parse::<HostRoleStatus>().unwrap(), HostRoleStatus::InProgress);
        assert!("DONE".parse::<HostRoleStatus>().is_err());
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&HostRoleStatus::Timedout).unwrap();
        assert_eq!(json, "\"TIMEDOUT\"");
        let back: HostRoleStatus = serde_json::from_str("\"IN_PROGRESS\"").unwrap();
        assert_eq!(back, HostRoleStatus::InProgress);
    }

    #[test]
    fn classifies_states() {
        assert!(HostRoleStatus::Queued.is_in_progress());
        assert!(HostRoleStatus::Completed.is_terminal());
        assert!(!HostRoleStatus::Completed.is_failed_state());
        assert!(HostRoleStatus::Aborted.is_failed_state());
        assert!(!HostRoleStatus::InProgress.is_schedulable());
    }

    #[test]
    fn transitions_only_move_forward() {
        use HostRoleStatus::*;

        assert!(Pending.can_move_to(Queued));
        assert!(Queued.can_move_to(Completed));
        assert!(InProgress.can_move_to(InProgress));
        assert!(InProgress.can_move_to(Failed));
        assert!(!InProgress.can_move_to(Queued));
        assert!(!InProgress.can_move_to(Pending));
        assert!(!Timedout.can_move_to(Completed));
        assert!(!Completed.can_move_to(Timedout));
        assert!(!Aborted.can_move_to(InProgress));
    }
}
