//! SQLite implementation of the GraphStore trait.
//!
//! This is the persistent storage backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via tokio::spawn_blocking. Property maps are
//! stored as CBOR blobs; the `name` property is copied into its own column
//! so lookups by type and name can use an index.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use graft_core::{keys, EntityId, PropertyMap, PropertyValue};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{GraphStore, StoredNode, StoredRelationship, Visibility};

const NODE_COLUMNS: &str = "id, origin_id, type_name, properties, hidden, deleted";
const RELATIONSHIP_COLUMNS: &str = "id, origin_id, type_name, properties, start_id, end_id";

/// SQLite-based graph store.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime. Transactions are held on the single
/// connection, so one store serves one apply session at a time.
pub struct SqliteGraphStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteGraphStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn encode_properties(properties: &PropertyMap) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(properties, &mut buf)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_properties(blob: &[u8]) -> Result<PropertyMap> {
    ciborium::from_reader(blob).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Raw node row; properties are decoded outside the rusqlite row callback.
struct NodeRow {
    id: String,
    origin_id: Option<String>,
    type_name: String,
    properties: Vec<u8>,
    hidden: bool,
    deleted: bool,
}

impl NodeRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            origin_id: row.get(1)?,
            type_name: row.get(2)?,
            properties: row.get(3)?,
            hidden: row.get(4)?,
            deleted: row.get(5)?,
        })
    }

    fn into_node(self) -> Result<StoredNode> {
        Ok(StoredNode {
            id: EntityId::new(self.id),
            origin_id: self.origin_id.map(EntityId::new),
            type_name: self.type_name,
            properties: decode_properties(&self.properties)?,
            hidden: self.hidden,
            deleted: self.deleted,
        })
    }
}

struct RelationshipRow {
    id: String,
    origin_id: Option<String>,
    type_name: String,
    properties: Vec<u8>,
    start_id: String,
    end_id: String,
}

impl RelationshipRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            origin_id: row.get(1)?,
            type_name: row.get(2)?,
            properties: row.get(3)?,
            start_id: row.get(4)?,
            end_id: row.get(5)?,
        })
    }

    fn into_relationship(self) -> Result<StoredRelationship> {
        Ok(StoredRelationship {
            id: EntityId::new(self.id),
            origin_id: self.origin_id.map(EntityId::new),
            type_name: self.type_name,
            properties: decode_properties(&self.properties)?,
            start_id: EntityId::new(self.start_id),
            end_id: EntityId::new(self.end_id),
        })
    }
}

fn query_nodes(
    conn: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<StoredNode>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(args, NodeRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(NodeRow::into_node).collect()
}

fn query_relationships(
    conn: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<StoredRelationship>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(args, RelationshipRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter()
        .map(RelationshipRow::into_relationship)
        .collect()
}

/// `?, ?, ?` for an IN clause of `n` parameters.
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn load_node_properties(conn: &Connection, id: &str) -> Result<PropertyMap> {
    let blob: Option<Vec<u8>> = conn
        .query_row(
            "SELECT properties FROM nodes WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    match blob {
        Some(blob) => decode_properties(&blob),
        None => Err(StoreError::NotFound(id.to_string())),
    }
}

fn node_exists(conn: &Connection, id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT seq FROM nodes WHERE id = ?1", params![id], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

fn require_updated(changed: usize, id: &str) -> Result<()> {
    if changed == 0 {
        return Err(StoreError::NotFound(id.to_string()));
    }
    Ok(())
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn find_node(&self, id: &EntityId, visibility: Visibility) -> Result<Option<StoredNode>> {
        let id = id.to_string();

        self.blocking(move |conn| {
            // An exact id match wins over an origin match.
            let sql = format!(
                "SELECT {} FROM nodes WHERE id = ?1 OR origin_id = ?1
                 ORDER BY (id = ?1) DESC, seq LIMIT 1",
                NODE_COLUMNS
            );
            let node = query_nodes(conn, &sql, params![id])?.into_iter().next();
            Ok(node.filter(|n| visibility.admits(n.hidden, n.deleted)))
        })
        .await
    }

    async fn find_relationship(&self, id: &EntityId) -> Result<Option<StoredRelationship>> {
        let id = id.to_string();

        self.blocking(move |conn| {
            let sql = format!(
                "SELECT {} FROM relationships WHERE id = ?1 OR origin_id = ?1
                 ORDER BY (id = ?1) DESC, seq LIMIT 1",
                RELATIONSHIP_COLUMNS
            );
            Ok(query_relationships(conn, &sql, params![id])?
                .into_iter()
                .next())
        })
        .await
    }

    async fn find_node_by_type_and_name(
        &self,
        type_name: &str,
        name: &str,
    ) -> Result<Option<StoredNode>> {
        let type_name = type_name.to_string();
        let name = name.to_string();

        self.blocking(move |conn| {
            let sql = format!(
                "SELECT {} FROM nodes
                 WHERE type_name = ?1 AND name = ?2 AND hidden = 0 AND deleted = 0
                 ORDER BY seq LIMIT 1",
                NODE_COLUMNS
            );
            Ok(query_nodes(conn, &sql, params![type_name, name])?
                .into_iter()
                .next())
        })
        .await
    }

    async fn list_nodes(&self, types: &[String]) -> Result<Vec<StoredNode>> {
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let types = types.to_vec();

        self.blocking(move |conn| {
            let sql = format!(
                "SELECT {} FROM nodes
                 WHERE type_name IN ({}) AND hidden = 0 AND deleted = 0
                 ORDER BY seq",
                NODE_COLUMNS,
                placeholders(types.len())
            );
            query_nodes(conn, &sql, params_from_iter(types.iter()))
        })
        .await
    }

    async fn list_relationships(&self, types: &[String]) -> Result<Vec<StoredRelationship>> {
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let types = types.to_vec();

        self.blocking(move |conn| {
            let sql = format!(
                "SELECT {} FROM relationships WHERE type_name IN ({}) ORDER BY seq",
                RELATIONSHIP_COLUMNS,
                placeholders(types.len())
            );
            query_relationships(conn, &sql, params_from_iter(types.iter()))
        })
        .await
    }

    async fn outgoing_relationships(&self, node: &EntityId) -> Result<Vec<StoredRelationship>> {
        let node = node.to_string();

        self.blocking(move |conn| {
            let sql = format!(
                "SELECT {} FROM relationships WHERE start_id = ?1 ORDER BY seq",
                RELATIONSHIP_COLUMNS
            );
            query_relationships(conn, &sql, params![node])
        })
        .await
    }

    async fn get_property(&self, id: &EntityId, key: &str) -> Result<Option<PropertyValue>> {
        let id = id.to_string();
        let key = key.to_string();

        self.blocking(move |conn| {
            let blob: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT properties FROM nodes WHERE id = ?1
                     UNION ALL
                     SELECT properties FROM relationships WHERE id = ?1
                     LIMIT 1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;

            match blob {
                Some(blob) => Ok(decode_properties(&blob)?.get(&key).cloned()),
                None => Err(StoreError::NotFound(id)),
            }
        })
        .await
    }

    async fn create_node(
        &self,
        type_name: &str,
        properties: &PropertyMap,
        origin: Option<&EntityId>,
    ) -> Result<EntityId> {
        let type_name = type_name.to_string();
        let name = properties.name().map(str::to_string);
        let blob = encode_properties(properties)?;
        let origin = origin.map(|o| o.to_string());

        self.blocking(move |conn| {
            let id = EntityId::generate();
            conn.execute(
                "INSERT INTO nodes (id, origin_id, type_name, name, properties)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id.as_str(), origin, type_name, name, blob],
            )?;
            Ok(id)
        })
        .await
    }

    async fn create_relationship(
        &self,
        type_name: &str,
        start: &EntityId,
        end: &EntityId,
        properties: &PropertyMap,
        origin: Option<&EntityId>,
    ) -> Result<EntityId> {
        let type_name = type_name.to_string();
        let start = start.to_string();
        let end = end.to_string();
        let blob = encode_properties(properties)?;
        let origin = origin.map(|o| o.to_string());

        self.blocking(move |conn| {
            for endpoint in [&start, &end] {
                if !node_exists(conn, endpoint)? {
                    return Err(StoreError::NotFound(endpoint.clone()));
                }
            }

            let id = EntityId::generate();
            conn.execute(
                "INSERT INTO relationships (id, origin_id, type_name, start_id, end_id, properties)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id.as_str(), origin, type_name, start, end, blob],
            )?;
            Ok(id)
        })
        .await
    }

    async fn set_node_properties(&self, id: &EntityId, properties: &PropertyMap) -> Result<()> {
        let id = id.to_string();
        let update = properties.clone();

        self.blocking(move |conn| {
            let mut merged = load_node_properties(conn, &id)?;
            merged.merge(&update);
            let name = merged.get(keys::NAME).and_then(|v| v.as_str()).map(str::to_string);

            let changed = conn.execute(
                "UPDATE nodes SET properties = ?1, name = ?2 WHERE id = ?3",
                params![encode_properties(&merged)?, name, id],
            )?;
            require_updated(changed, &id)
        })
        .await
    }

    async fn set_relationship_properties(
        &self,
        id: &EntityId,
        properties: &PropertyMap,
    ) -> Result<()> {
        let id = id.to_string();
        let update = properties.clone();

        self.blocking(move |conn| {
            let blob: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT properties FROM relationships WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let mut merged = match blob {
                Some(blob) => decode_properties(&blob)?,
                None => return Err(StoreError::NotFound(id)),
            };
            merged.merge(&update);

            conn.execute(
                "UPDATE relationships SET properties = ?1 WHERE id = ?2",
                params![encode_properties(&merged)?, id],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_node_hidden(&self, id: &EntityId, hidden: bool) -> Result<()> {
        let id = id.to_string();

        self.blocking(move |conn| {
            let changed = conn.execute(
                "UPDATE nodes SET hidden = ?1 WHERE id = ?2",
                params![hidden, id],
            )?;
            require_updated(changed, &id)
        })
        .await
    }

    async fn soft_delete_node(&self, id: &EntityId) -> Result<()> {
        let id = id.to_string();

        self.blocking(move |conn| {
            let changed = conn.execute("UPDATE nodes SET deleted = 1 WHERE id = ?1", params![id])?;
            require_updated(changed, &id)
        })
        .await
    }

    async fn begin_transaction(&self) -> Result<()> {
        self.blocking(|conn| {
            if !conn.is_autocommit() {
                return Err(StoreError::Transaction(
                    "transaction already open".to_string(),
                ));
            }
            conn.execute_batch("BEGIN IMMEDIATE")?;
            Ok(())
        })
        .await
    }

    async fn commit_transaction(&self) -> Result<()> {
        self.blocking(|conn| {
            if conn.is_autocommit() {
                return Err(StoreError::Transaction("no open transaction".to_string()));
            }
            conn.execute_batch("COMMIT")?;
            Ok(())
        })
        .await
    }

    async fn rollback_transaction(&self) -> Result<()> {
        self.blocking(|conn| {
            if conn.is_autocommit() {
                return Err(StoreError::Transaction("no open transaction".to_string()));
            }
            conn.execute_batch("ROLLBACK")?;
            Ok(())
        })
        .await
    }

    async fn in_transaction(&self) -> Result<bool> {
        self.blocking(|conn| Ok(!conn.is_autocommit())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> PropertyMap {
        PropertyMap::new().with("name", name)
    }

    #[tokio::test]
    async fn test_create_and_find_node() {
        let store = SqliteGraphStore::open_memory().unwrap();
        let origin = EntityId::new("src-1");
        let id = store
            .create_node("Page", &named("home").with("rank", 3i64), Some(&origin))
            .await
            .unwrap();

        let node = store
            .find_node(&origin, Visibility::Visible)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(node.id, id);
        assert_eq!(node.origin_id, Some(origin));
        assert_eq!(node.properties.get("rank"), Some(&PropertyValue::Integer(3)));
    }

    #[tokio::test]
    async fn test_find_by_type_and_name_tracks_updates() {
        let store = SqliteGraphStore::open_memory().unwrap();
        let id = store.create_node("Page", &named("draft"), None).await.unwrap();

        store
            .set_node_properties(&id, &named("final"))
            .await
            .unwrap();

        assert!(store
            .find_node_by_type_and_name("Page", "draft")
            .await
            .unwrap()
            .is_none());
        let found = store
            .find_node_by_type_and_name("Page", "final")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);
    }

    #[tokio::test]
    async fn test_hidden_node_visibility() {
        let store = SqliteGraphStore::open_memory().unwrap();
        let id = store.create_node("Page", &named("secret"), None).await.unwrap();
        store.set_node_hidden(&id, true).await.unwrap();

        assert!(store
            .find_node(&id, Visibility::Visible)
            .await
            .unwrap()
            .is_none());
        let node = store.find_node(&id, Visibility::All).await.unwrap().unwrap();
        assert!(node.hidden);
    }

    #[tokio::test]
    async fn test_list_by_types() {
        let store = SqliteGraphStore::open_memory().unwrap();
        store.create_node("Page", &named("a"), None).await.unwrap();
        store.create_node("Folder", &named("b"), None).await.unwrap();
        store.create_node("File", &named("c"), None).await.unwrap();

        let nodes = store
            .list_nodes(&["Page".to_string(), "File".to_string()])
            .await
            .unwrap();
        let names: Vec<_> = nodes.iter().filter_map(|n| n.name()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert!(store.list_nodes(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_relationships_and_rollback() {
        let store = SqliteGraphStore::open_memory().unwrap();
        let a = store.create_node("Page", &named("a"), None).await.unwrap();
        let b = store.create_node("Page", &named("b"), None).await.unwrap();

        store.begin_transaction().await.unwrap();
        assert!(store.in_transaction().await.unwrap());
        store
            .create_relationship("LINK", &a, &b, &PropertyMap::new(), None)
            .await
            .unwrap();
        assert_eq!(store.outgoing_relationships(&a).await.unwrap().len(), 1);
        store.rollback_transaction().await.unwrap();

        assert!(store.outgoing_relationships(&a).await.unwrap().is_empty());
        assert!(matches!(
            store.rollback_transaction().await,
            Err(StoreError::Transaction(_))
        ));
    }

    #[tokio::test]
    async fn test_relationship_property_merge() {
        let store = SqliteGraphStore::open_memory().unwrap();
        let a = store.create_node("Page", &named("a"), None).await.unwrap();
        let b = store.create_node("Page", &named("b"), None).await.unwrap();
        let origin = EntityId::new("rel-src");
        let rel = store
            .create_relationship(
                "LINK",
                &a,
                &b,
                &PropertyMap::new().with("weight", 1i64),
                Some(&origin),
            )
            .await
            .unwrap();

        store
            .set_relationship_properties(&rel, &PropertyMap::new().with("label", "x"))
            .await
            .unwrap();

        let found = store.find_relationship(&origin).await.unwrap().unwrap();
        assert_eq!(found.id, rel);
        assert_eq!(found.properties.len(), 2);
        assert_eq!(
            store.get_property(&rel, "weight").await.unwrap(),
            Some(PropertyValue::Integer(1))
        );
    }

    #[tokio::test]
    async fn test_persistent_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");

        let id = {
            let store = SqliteGraphStore::open(&path).unwrap();
            store.create_node("Page", &named("durable"), None).await.unwrap()
        };

        let store = SqliteGraphStore::open(&path).unwrap();
        assert!(store
            .find_node(&id, Visibility::Visible)
            .await
            .unwrap()
            .is_some());
    }
}
