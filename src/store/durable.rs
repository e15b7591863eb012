//! Durable instance documents backed by redb.
//!
//! One bincode-encoded document per identity in a single B-tree table, so
//! identity → document lookup is logarithmic. All writes go through
//! transactions; reads use MVCC snapshots.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};

use crate::error::StoreError;
use crate::identity::Identity;
use crate::instance::Instance;

use super::StoreResult;

/// Table mapping identity tokens to instance documents.
const INSTANCE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// ACID-durable instance document store.
pub struct DurableStore {
    db: Arc<Database>,
}

impl DurableStore {
    /// Open or create a durable store in the given directory.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io { source: e })?;
        let db_path = data_dir.join("semblance.redb");
        let db = Database::create(&db_path).map_err(|e| StoreError::Database {
            message: format!("failed to open redb at {}: {e}", db_path.display()),
        })?;
        // Make sure the table exists so first reads don't fail.
        let txn = db.begin_write().map_err(|e| StoreError::Database {
            message: format!("begin_write failed: {e}"),
        })?;
        txn.open_table(INSTANCE_TABLE)
            .map_err(|e| StoreError::Database {
                message: format!("open_table failed: {e}"),
            })?;
        txn.commit().map_err(|e| StoreError::Database {
            message: format!("commit failed: {e}"),
        })?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Persist an instance document under its identity.
    pub fn put(&self, instance: &Instance) -> StoreResult<()> {
        let bytes = bincode::serialize(instance).map_err(|e| StoreError::Serialization {
            message: e.to_string(),
        })?;
        let txn = self.db.begin_write().map_err(|e| StoreError::Database {
            message: format!("begin_write failed: {e}"),
        })?;
        {
            let mut table = txn
                .open_table(INSTANCE_TABLE)
                .map_err(|e| StoreError::Database {
                    message: format!("open_table failed: {e}"),
                })?;
            table
                .insert(instance.identity().as_str(), bytes.as_slice())
                .map_err(|e| StoreError::Database {
                    message: format!("insert failed: {e}"),
                })?;
        }
        txn.commit().map_err(|e| StoreError::Database {
            message: format!("commit failed: {e}"),
        })?;
        Ok(())
    }

    /// Read an instance document. Returns `Ok(None)` if the identity is absent.
    pub fn get(&self, identity: &Identity) -> StoreResult<Option<Instance>> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Database {
            message: format!("begin_read failed: {e}"),
        })?;
        let table = txn
            .open_table(INSTANCE_TABLE)
            .map_err(|e| StoreError::Database {
                message: format!("open_table failed: {e}"),
            })?;
        let result = table
            .get(identity.as_str())
            .map_err(|e| StoreError::Database {
                message: format!("get failed: {e}"),
            })?;
        match result {
            Some(guard) => {
                let instance =
                    bincode::deserialize(guard.value()).map_err(|e| StoreError::Serialization {
                        message: e.to_string(),
                    })?;
                Ok(Some(instance))
            }
            None => Ok(None),
        }
    }

    /// Delete an identity's document. Returns whether it existed.
    pub fn remove(&self, identity: &Identity) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(|e| StoreError::Database {
            message: format!("begin_write failed: {e}"),
        })?;
        let existed = {
            let mut table = txn
                .open_table(INSTANCE_TABLE)
                .map_err(|e| StoreError::Database {
                    message: format!("open_table failed: {e}"),
                })?;
            table
                .remove(identity.as_str())
                .map_err(|e| StoreError::Database {
                    message: format!("remove failed: {e}"),
                })?
                .is_some()
        };
        txn.commit().map_err(|e| StoreError::Database {
            message: format!("commit failed: {e}"),
        })?;
        Ok(existed)
    }

    /// Load every persisted instance (startup replay).
    pub fn all(&self) -> StoreResult<Vec<Instance>> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Database {
            message: format!("begin_read failed: {e}"),
        })?;
        let table = txn
            .open_table(INSTANCE_TABLE)
            .map_err(|e| StoreError::Database {
                message: format!("open_table failed: {e}"),
            })?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(|e| StoreError::Database {
            message: format!("iter failed: {e}"),
        })? {
            let (_, value) = entry.map_err(|e| StoreError::Database {
                message: format!("cursor failed: {e}"),
            })?;
            let instance =
                bincode::deserialize(value.value()).map_err(|e| StoreError::Serialization {
                    message: e.to_string(),
                })?;
            out.push(instance);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore").finish()
    }
}
