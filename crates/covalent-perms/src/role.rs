//! Roles a member can hold in a group.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PermsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Admin,
    Writer,
    WriteOnly,
    Reader,
    Revoked,
    AdminInvite,
    WriterInvite,
    WriteOnlyInvite,
    ReaderInvite,
}

impl Role {
    pub const ALL: [Role; 9] = [
        Role::Admin,
        Role::Writer,
        Role::WriteOnly,
        Role::Reader,
        Role::Revoked,
        Role::AdminInvite,
        Role::WriterInvite,
        Role::WriteOnlyInvite,
        Role::ReaderInvite,
    ];

    /// Ranking used when several roles apply to one member.
    pub fn rank(self) -> u8 {
        match self {
            Role::Admin => 5,
            Role::Writer => 4,
            Role::WriteOnly => 3,
            Role::Reader => 2,
            _ => 0,
        }
    }

    pub fn can_write(self) -> bool {
        matches!(self, Role::Admin | Role::Writer | Role::WriteOnly)
    }

    /// Whether the role gets the group's read key.
    pub fn can_read(self) -> bool {
        matches!(self, Role::Admin | Role::Writer | Role::Reader)
    }

    pub fn is_invite(self) -> bool {
        self.invite_target().is_some()
    }

    /// The role an invite of this kind hands out.
    pub fn invite_target(self) -> Option<Role> {
        match self {
            Role::AdminInvite => Some(Role::Admin),
            Role::WriterInvite => Some(Role::Writer),
            Role::WriteOnlyInvite => Some(Role::WriteOnly),
            Role::ReaderInvite => Some(Role::Reader),
            _ => None,
        }
    }

    /// The invite role handing out `self`.
    pub fn invite(self) -> Option<Role> {
        Role::ALL.into_iter().find(|r| r.invite_target() == Some(self))
    }

    /// Roles that may be granted to `everyone`.
    pub fn allowed_for_everyone(self) -> bool {
        matches!(
            self,
            Role::Reader | Role::Writer | Role::WriteOnly | Role::Revoked
        )
    }

    /// Roles passed down from a parent group by `extend`.
    pub fn inheritable(self) -> bool {
        matches!(self, Role::Admin | Role::Writer | Role::Reader)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Writer => "writer",
            Role::WriteOnly => "writeOnly",
            Role::Reader => "reader",
            Role::Revoked => "revoked",
            Role::AdminInvite => "adminInvite",
            Role::WriterInvite => "writerInvite",
            Role::WriteOnlyInvite => "writeOnlyInvite",
            Role::ReaderInvite => "readerInvite",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = PermsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| PermsError::InvalidRole(s.to_string()))
    }
}

/// The higher-ranked of two optional roles; ties keep `a`.
pub fn higher(a: Option<Role>, b: Option<Role>) -> Option<Role> {
    match (a, b) {
        (Some(x), Some(y)) if y.rank() > x.rank() => Some(y),
        (Some(x), _) => Some(x),
        (None, y) => y,
    }
}

/// How members of a parent group relate to a child group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentRole {
    /// Members keep their inheritable parent role.
    Extend,
    /// Readers of the parent get this role; `Revoked` cuts the link.
    Fixed(Role),
}

impl ParentRole {
    /// The role a member with `parent_role` in the parent gets through this link.
    pub fn derive(self, parent_role: Role) -> Option<Role> {
        match self {
            ParentRole::Extend => parent_role.inheritable().then_some(parent_role),
            ParentRole::Fixed(Role::Revoked) => None,
            ParentRole::Fixed(role) => parent_role.can_read().then_some(role),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParentRole::Extend => "extend",
            ParentRole::Fixed(role) => role.as_str(),
        }
    }
}

impl FromStr for ParentRole {
    type Err = PermsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "extend" {
            return Ok(ParentRole::Extend);
        }
        match s.parse::<Role>()? {
            role @ (Role::Admin | Role::Writer | Role::WriteOnly | Role::Reader | Role::Revoked) => {
                Ok(ParentRole::Fixed(role))
            }
            other => Err(PermsError::InvalidRole(format!(
                "{other} cannot be used for a parent group"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_roundtrip() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{}\"", role.as_str()));
        }
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn test_ranking() {
        assert_eq!(higher(Some(Role::Reader), Some(Role::Writer)), Some(Role::Writer));
        assert_eq!(higher(Some(Role::Admin), Some(Role::WriteOnly)), Some(Role::Admin));
        assert_eq!(higher(Some(Role::Revoked), Some(Role::ReaderInvite)), Some(Role::Revoked));
        assert_eq!(higher(None, Some(Role::Reader)), Some(Role::Reader));
        assert!(Role::WriteOnly.can_write() && !Role::WriteOnly.can_read());
    }

    #[test]
    fn test_invites() {
        assert_eq!(Role::WriterInvite.invite_target(), Some(Role::Writer));
        assert_eq!(Role::Reader.invite(), Some(Role::ReaderInvite));
        assert_eq!(Role::Revoked.invite(), None);
    }

    #[test]
    fn test_parent_roles() {
        assert_eq!(ParentRole::Extend.derive(Role::Writer), Some(Role::Writer));
        assert_eq!(ParentRole::Extend.derive(Role::WriteOnly), None);
        assert_eq!(
            ParentRole::Fixed(Role::Reader).derive(Role::Admin),
            Some(Role::Reader)
        );
        assert_eq!(ParentRole::Fixed(Role::Writer).derive(Role::WriteOnly), None);
        assert_eq!(ParentRole::Fixed(Role::Revoked).derive(Role::Admin), None);
        assert!("readerInvite".parse::<ParentRole>().is_err());
    }
}
