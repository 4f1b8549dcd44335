//! Groups, roles, and key distribution.
//!
//! A group is itself a CoValue whose map entries assign roles, link parent
//! groups and carry sealed copies of read keys. This crate replays group
//! logs into [`GroupState`] and provides the validators that decide which
//! transactions of group-owned CoValues are valid.
//!
//! ## Modules
//!
//! - [`role`]: Roles, ranking and parent-link semantics
//! - [`state`]: Role timelines and group values
//! - [`validator`]: Transaction validators for each ruleset
//! - [`keys`]: Key reveals and the [`KeyFinder`]

pub mod error;
pub mod keys;
pub mod role;
pub mod state;
pub mod validator;

pub use error::{PermsError, Result};
pub use keys::{
    parse_reveal, reveal_name, reveal_to_everyone, seal_key, unseal_key, unwrap_key, wrap_key,
    KeyFinder, RevealTarget,
};
pub use role::{higher, ParentRole, Role};
pub use state::{GroupResolver, GroupState, LinkOrder, NoGroups, ParentLink, RoleAssignment};
pub use validator::{
    compute_member_state, resolve_transactor, AllowAllValidator, GroupValidator, OwnedValidator,
};
