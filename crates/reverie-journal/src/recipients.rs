//! Resolution of POV recipient names and the friendship gate.

use std::collections::HashSet;
use std::fmt;

use reverie_shared::UserId;
use reverie_store::{Database, StoreError};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Username lookup.
pub trait UserDirectory {
    /// Case-insensitive lookup.
    fn resolve_username(&self, name: &str) -> std::result::Result<Option<UserId>, StoreError>;
}

/// Symmetric friendship lookup.
pub trait FriendGraph {
    fn are_friends(&self, a: UserId, b: UserId) -> std::result::Result<bool, StoreError>;
}

impl UserDirectory for Database {
    fn resolve_username(&self, name: &str) -> std::result::Result<Option<UserId>, StoreError> {
        Ok(self.find_user_by_username(name)?.map(|user| user.id))
    }
}

impl FriendGraph for Database {
    fn are_friends(&self, a: UserId, b: UserId) -> std::result::Result<bool, StoreError> {
        Database::are_friends(self, a, b)
    }
}

/// A recipient name that is unknown or not a friend of the author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientError {
    pub name: String,
}

impl fmt::Display for RecipientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is not friends or does not exist", self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Name as written, with the user it resolved to.
    pub valid: Vec<(String, UserId)>,
    pub invalid: Vec<RecipientError>,
}

impl Resolution {
    pub fn user_ids(&self) -> HashSet<UserId> {
        self.valid.iter().map(|(_, id)| *id).collect()
    }

    /// Add the friends of `other` not already present. Its invalid names are
    /// dropped; the caller reports them when `other` is resolved.
    pub fn merge(&mut self, other: Resolution) {
        for (name, id) in other.valid {
            if !self.valid.iter().any(|(_, v)| *v == id) {
                self.valid.push((name, id));
            }
        }
    }
}

pub struct RecipientValidator<'a, D> {
    directory: &'a D,
}

impl<'a, D> RecipientValidator<'a, D>
where
    D: UserDirectory + FriendGraph,
{
    pub fn new(directory: &'a D) -> Self {
        Self { directory }
    }

    /// Split `names` into friends of `author` and everything else. Unknown
    /// users and non-friends are reported the same way, including the
    /// author naming themself.
    pub fn resolve(&self, author: UserId, names: &[String]) -> Result<Resolution> {
        let mut resolution = Resolution::default();

        for name in names {
            let friend = match self.directory.resolve_username(name)? {
                Some(id) if self.directory.are_friends(author, id)? => Some(id),
                _ => None,
            };

            match friend {
                Some(id) if !resolution.valid.iter().any(|(_, v)| *v == id) => {
                    resolution.valid.push((name.clone(), id));
                }
                Some(_) => {}
                None => resolution.invalid.push(RecipientError { name: name.clone() }),
            }
        }

        Ok(resolution)
    }
}
