use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::view::View;

/// Capability tiers, lowest first. Stored by the backend as lowercase strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Staff,
    AssistantManager,
    Manager,
    Hr,
    Ceo,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0:?}")]
pub struct UnknownRole(pub String);

impl Role {
    pub const ALL: [Role; 5] = [Role::Staff, Role::AssistantManager, Role::Manager, Role::Hr, Role::Ceo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Staff => "staff",
            Role::AssistantManager => "assistant_manager",
            Role::Manager => "manager",
            Role::Hr => "hr",
            Role::Ceo => "ceo",
        }
    }

    /// Landing view used by the dashboard redirector.
    pub fn dashboard_view(&self) -> View {
        match self {
            Role::Ceo => View::Ceo,
            Role::Hr => View::Hr,
            Role::Manager | Role::AssistantManager => View::Manager,
            Role::Staff => View::Staff,
        }
    }

    /// Where a route guard sends a user whose role was found but not admitted.
    /// `None` covers both "no row" and a value that is not a role.
    pub fn denied_fallback(found: Option<Role>) -> View {
        match found {
            Some(Role::Staff) | Some(Role::AssistantManager) => View::Staff,
            Some(Role::Manager) => View::Manager,
            _ => View::Home,
        }
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase();
        Role::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == norm)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("HR".parse::<Role>(), Ok(Role::Hr));
        assert_eq!(" assistant_manager ".parse::<Role>(), Ok(Role::AssistantManager));
        assert!("admin".parse::<Role>().is_err());
        assert!("".parse::<Role>().is_err());
        for r in Role::ALL {
            assert_eq!(r.as_str().parse::<Role>(), Ok(r));
        }
    }

    #[test]
    fn dashboard_dispatch() {
        assert_eq!(Role::Ceo.dashboard_view(), View::Ceo);
        assert_eq!(Role::Hr.dashboard_view(), View::Hr);
        assert_eq!(Role::Manager.dashboard_view(), View::Manager);
        assert_eq!(Role::AssistantManager.dashboard_view(), View::Manager);
        assert_eq!(Role::Staff.dashboard_view(), View::Staff);
    }

    #[test]
    fn denied_fallback_mapping() {
        assert_eq!(Role::denied_fallback(Some(Role::Staff)), View::Staff);
        assert_eq!(Role::denied_fallback(Some(Role::AssistantManager)), View::Staff);
        assert_eq!(Role::denied_fallback(Some(Role::Manager)), View::Manager);
        assert_eq!(Role::denied_fallback(Some(Role::Hr)), View::Home);
        assert_eq!(Role::denied_fallback(Some(Role::Ceo)), View::Home);
        assert_eq!(Role::denied_fallback(None), View::Home);
    }

    #[test]
    fn serde_uses_snake_case() {
        assert_eq!(serde_json::to_value(Role::AssistantManager).unwrap(), "assistant_manager");
        let r: Role = serde_json::from_value(serde_json::json!("ceo")).unwrap();
        assert_eq!(r, Role::Ceo);
    }
}
