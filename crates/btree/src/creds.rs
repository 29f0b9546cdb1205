//! User/password storage on top of a string tree.

use std::path::PathBuf;

use common::{Config, StoreError, StoreResult};

use crate::tree::{BTree, Inserted};

/// A `<user, password>` map with the two operations a login flow needs.
pub struct CredentialStore {
    tree: BTree<String, String>,
}

impl CredentialStore {
    /// Start an empty store.
    pub fn bare(identifier: impl Into<PathBuf>, config: &Config) -> StoreResult<Self> {
        Ok(Self {
            tree: BTree::bare(identifier, config)?,
        })
    }

    /// Open a previously saved store.
    pub fn open(identifier: impl Into<PathBuf>, config: &Config) -> StoreResult<Self> {
        Ok(Self {
            tree: BTree::open(identifier, config)?,
        })
    }

    /// Whether `user` exists and `pass` matches the stored password.
    pub fn authenticate(&mut self, user: &str, pass: &str) -> StoreResult<bool> {
        Ok(self
            .tree
            .get(&user.to_string())?
            .is_some_and(|stored| stored == pass))
    }

    /// Add a new user; refuses to overwrite an existing one.
    pub fn register(&mut self, user: &str, pass: &str) -> StoreResult<()> {
        match self.tree.insert(user.to_string(), pass.to_string())? {
            Inserted::Entry => Ok(()),
            Inserted::Nothing => Err(StoreError::Insert(format!(
                "user {user} already registered"
            ))),
        }
    }

    pub fn save(&mut self) -> StoreResult<()> {
        self.tree.save()
    }

    pub fn load(&mut self) -> StoreResult<()> {
        self.tree.load()
    }
}
