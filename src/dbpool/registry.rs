//! Database registry: tracks the databases and collections shared by the
//! HTTP listener (spec §4.F), plus the keyspace name rules carried over from
//! `original_source/REST/DatabaseRegistry.hh` (spec SPEC_FULL §10.5).
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

use super::pool::{map_not_found, DatabasePool};

pub const DEFAULT_SCOPE_OR_COLLECTION: &str = "_default";
const MAX_DATABASE_NAME_LEN: usize = 240;
const DEFAULT_MAX_READERS: usize = 4;

/// `dbName`, or `dbName.scope.collection` when either differs from `_default`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub scope: String,
    pub collection: String,
}

impl Default for CollectionSpec {
    fn default() -> Self {
        CollectionSpec {
            scope: DEFAULT_SCOPE_OR_COLLECTION.into(),
            collection: DEFAULT_SCOPE_OR_COLLECTION.into(),
        }
    }
}

/// `DatabaseRegistry::makeKeyspace`: omits the scope when it's `_default`,
/// omits both scope and collection when both are `_default`.
pub fn make_keyspace(db_name: &str, spec: &CollectionSpec) -> String {
    if spec.scope == DEFAULT_SCOPE_OR_COLLECTION && spec.collection == DEFAULT_SCOPE_OR_COLLECTION {
        db_name.to_string()
    } else if spec.scope == DEFAULT_SCOPE_OR_COLLECTION {
        format!("{db_name}.{}", spec.collection)
    } else {
        format!("{db_name}.{}.{}", spec.scope, spec.collection)
    }
}

/// `DatabaseRegistry::parseKeyspace`, the inverse of [`make_keyspace`].
pub fn parse_keyspace(keyspace: &str) -> (String, CollectionSpec) {
    let mut parts = keyspace.splitn(3, '.');
    let db_name = parts.next().unwrap_or_default().to_string();
    match (parts.next(), parts.next()) {
        (Some(collection), None) => {
            (db_name, CollectionSpec { scope: DEFAULT_SCOPE_OR_COLLECTION.into(), collection: collection.into() })
        }
        (Some(scope), Some(collection)) => {
            (db_name, CollectionSpec { scope: scope.into(), collection: collection.into() })
        }
        _ => (db_name, CollectionSpec::default()),
    }
}

/// `DatabaseRegistry::isValidDatabaseName`: nonempty, <=240 bytes, no leading
/// underscore, no control characters.
pub fn is_valid_database_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_DATABASE_NAME_LEN
        && !name.starts_with('_')
        && !name.chars().any(|c| c.is_control())
}

struct DbShare {
    pool: Arc<DatabasePool>,
    keyspaces: BTreeSet<String>,
}

/// Holds the mapping `name -> pool` and each database's set of registered
/// keyspaces. Registering or unregistering locks the whole registry
/// exclusively, as the original does with its single mutex.
pub struct DatabaseRegistry {
    databases: RwLock<HashMap<String, DbShare>>,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        DatabaseRegistry { databases: RwLock::new(HashMap::new()) }
    }

    /// Registers a database's default collection under `name`. Fails if the
    /// name is already in use or invalid.
    pub fn register_database(&self, name: &str) -> Result<()> {
        if !is_valid_database_name(name) {
            return Err(Error::invalid_parameter(format!("invalid database name: {name}")));
        }
        let mut databases = self.databases.write().unwrap();
        if databases.contains_key(name) {
            return Err(Error::conflict(format!("database already registered: {name}")));
        }
        let mut keyspaces = BTreeSet::new();
        keyspaces.insert(make_keyspace(name, &CollectionSpec::default()));
        databases.insert(
            name.to_string(),
            DbShare { pool: DatabasePool::new(name, DEFAULT_MAX_READERS), keyspaces },
        );
        Ok(())
    }

    pub fn unregister_database(&self, name: &str) -> Result<()> {
        let mut databases = self.databases.write().unwrap();
        databases.remove(name).map(|_| ()).ok_or_else(|| map_not_found(name))
    }

    pub fn register_collection(&self, name: &str, spec: &CollectionSpec) -> Result<()> {
        let mut databases = self.databases.write().unwrap();
        let share = databases.get_mut(name).ok_or_else(|| map_not_found(name))?;
        share.keyspaces.insert(make_keyspace(name, spec));
        Ok(())
    }

    pub fn unregister_collection(&self, name: &str, spec: &CollectionSpec) -> Result<()> {
        let mut databases = self.databases.write().unwrap();
        let share = databases.get_mut(name).ok_or_else(|| map_not_found(name))?;
        if !share.keyspaces.remove(&make_keyspace(name, spec)) {
            return Err(Error::not_found(format!("keyspace not registered under {name}")));
        }
        Ok(())
    }

    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Succeeds iff `keyspace`'s database is registered and the keyspace
    /// itself has been explicitly registered (spec §4.F).
    pub fn borrow_collection(&self, keyspace: &str, writeable: bool) -> Result<super::pool::Borrowed> {
        let (db_name, _spec) = parse_keyspace(keyspace);
        let databases = self.databases.read().unwrap();
        let share = databases.get(&db_name).ok_or_else(|| map_not_found(&db_name))?;
        if !share.keyspaces.contains(keyspace) {
            return Err(Error::not_found(format!("keyspace not registered: {keyspace}")));
        }
        if writeable {
            share.pool.borrow_writeable()
        } else {
            share.pool.borrow()
        }
    }

    pub fn borrow_database_named(&self, name: &str, writeable: bool) -> Result<super::pool::Borrowed> {
        let databases = self.databases.read().unwrap();
        let share = databases.get(name).ok_or_else(|| map_not_found(name))?;
        if writeable {
            share.pool.borrow_writeable()
        } else {
            share.pool.borrow()
        }
    }
}

impl Default for DatabaseRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keyspace_omits_default_scope_and_collection() {
        assert_eq!(make_keyspace("db", &CollectionSpec::default()), "db");
        assert_eq!(
            make_keyspace("db", &CollectionSpec { scope: "_default".into(), collection: "widgets".into() }),
            "db.widgets"
        );
        assert_eq!(
            make_keyspace("db", &CollectionSpec { scope: "s1".into(), collection: "widgets".into() }),
            "db.s1.widgets"
        );
    }

    #[test]
    fn parse_keyspace_is_the_inverse_of_make_keyspace() {
        assert_eq!(parse_keyspace("db"), ("db".to_string(), CollectionSpec::default()));
        assert_eq!(
            parse_keyspace("db.s1.widgets"),
            ("db".to_string(), CollectionSpec { scope: "s1".into(), collection: "widgets".into() })
        );
    }

    #[test]
    fn validates_database_names() {
        assert!(is_valid_database_name("mydb"));
        assert!(!is_valid_database_name(""));
        assert!(!is_valid_database_name("_hidden"));
        assert!(!is_valid_database_name(&"x".repeat(241)));
        assert!(!is_valid_database_name("bad\u{0007}name"));
    }

    #[test]
    fn borrow_collection_requires_explicit_registration() {
        let registry = DatabaseRegistry::new();
        registry.register_database("db").unwrap();
        assert!(registry.borrow_collection("db", false).is_ok());
        assert!(registry.borrow_collection("db.scope.other", false).is_err());
        registry
            .register_collection("db", &CollectionSpec { scope: "scope".into(), collection: "other".into() })
            .unwrap();
        assert!(registry.borrow_collection("db.scope.other", false).is_ok());
    }

    #[test]
    fn duplicate_registration_conflicts() {
        let registry = DatabaseRegistry::new();
        registry.register_database("db").unwrap();
        assert!(registry.register_database("db").is_err());
    }
}
