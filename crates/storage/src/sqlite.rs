use rusqlite::{Connection, OptionalExtension};

use crate::error::StorageError;
use crate::traits::KeyValueStorage;

fn checksum(value: &str) -> [u8; 32] {
    *blake3::hash(value.as_bytes()).as_bytes()
}

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut stmt = self.conn.prepare("SELECT key FROM kv ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl KeyValueStorage for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row: Option<(String, Vec<u8>)> = self
            .conn
            .query_row(
                "SELECT value, checksum FROM kv WHERE key = ?1",
                rusqlite::params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((value, stored)) => {
                if stored.as_slice() != checksum(&value).as_slice() {
                    return Err(StorageError::ChecksumMismatch {
                        key: key.to_string(),
                    });
                }
                Ok(Some(value))
            }
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO kv (key, value, checksum) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, checksum = excluded.checksum,
             updated_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)",
            rusqlite::params![key, value, checksum(value).as_slice()],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", rusqlite::params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        assert_eq!(storage.get("k").unwrap(), None);
        storage.set("k", "one").unwrap();
        storage.set("k", "two").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("two"));
        assert!(storage.contains("k").unwrap());
        storage.remove("k").unwrap();
        assert!(!storage.contains("k").unwrap());
        storage.remove("k").unwrap();
    }

    #[test]
    fn tampered_value_fails_checksum() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        storage.set("k", "[]").unwrap();
        storage
            .conn()
            .execute("UPDATE kv SET value = '[1]' WHERE key = 'k'", [])
            .unwrap();
        match storage.get("k") {
            Err(StorageError::ChecksumMismatch { key }) => assert_eq!(key, "k"),
            other => panic!("expected checksum mismatch, got {other:?}"),
        }
    }

    #[test]
    fn file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uwan.db");
        let path = path.to_str().unwrap();
        {
            let mut storage = SqliteStorage::open(path).unwrap();
            storage.set("a", "1").unwrap();
            storage.set("b", "2").unwrap();
        }
        let storage = SqliteStorage::open(path).unwrap();
        assert_eq!(storage.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(storage.get("b").unwrap().as_deref(), Some("2"));
    }
}
