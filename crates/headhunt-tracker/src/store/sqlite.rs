//! Durable snapshot store using SQLite.
//!
//! Layout: `global_stats` holds exactly one row (id = 1) with the global
//! triple, `banner_stats` one row per banner name. Only the latest values are
//! kept; every write overwrites.

use super::SnapshotStore;
use crate::error::TrackerError;
use crate::model::{BannerSnapshot, GlobalSnapshot, Metrics, Snapshot};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS global_stats (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        total_pulls TEXT,
        six_star_rate TEXT,
        users TEXT,
        scraped_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS banner_stats (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        banner_name TEXT UNIQUE NOT NULL,
        pulls TEXT,
        six_star_rate TEXT,
        users TEXT,
        scraped_at TEXT NOT NULL
    );
";

/// SQLite-backed store. The global upsert and every banner upsert of one
/// write commit in a single transaction.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, TrackerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TrackerError::Storage(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        let db = Connection::open(path)?;
        db.execute_batch(SCHEMA)?;
        debug!("opened snapshot database at {}", path.display());

        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, TrackerError> {
        self.db
            .lock()
            .map_err(|_| TrackerError::Storage("database lock poisoned".into()))
    }

    fn names(db: &Connection) -> Result<Vec<String>, TrackerError> {
        let mut stmt = db.prepare("SELECT banner_name FROM banner_stats ORDER BY banner_name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn read_banners(db: &Connection) -> Result<BTreeMap<String, BannerSnapshot>, TrackerError> {
        let mut stmt = db.prepare(
            "SELECT banner_name, pulls, six_star_rate, users, scraped_at FROM banner_stats",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    Metrics {
                        pulls: row.get(1)?,
                        six_star_rate: row.get(2)?,
                        users: row.get(3)?,
                    },
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(name, metrics, scraped_at)| -> Result<_, TrackerError> {
                let banner = BannerSnapshot {
                    name: name.clone(),
                    metrics,
                    captured_at: parse_timestamp(&scraped_at)?,
                };
                Ok((name, banner))
            })
            .collect()
    }
}

impl SnapshotStore for SqliteStore {
    fn write(&self, snapshot: &Snapshot) -> Result<(), TrackerError> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;

        let global = &snapshot.global.metrics;
        tx.execute(
            "INSERT INTO global_stats (id, total_pulls, six_star_rate, users, scraped_at)
             VALUES (1, ?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                total_pulls = excluded.total_pulls,
                six_star_rate = excluded.six_star_rate,
                users = excluded.users,
                scraped_at = excluded.scraped_at",
            params![
                global.pulls,
                global.six_star_rate,
                global.users,
                format_timestamp(&snapshot.captured_at)
            ],
        )?;

        {
            let mut upsert = tx.prepare(
                "INSERT INTO banner_stats (banner_name, pulls, six_star_rate, users, scraped_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(banner_name) DO UPDATE SET
                    pulls = excluded.pulls,
                    six_star_rate = excluded.six_star_rate,
                    users = excluded.users,
                    scraped_at = excluded.scraped_at",
            )?;
            for banner in snapshot.banners.values() {
                upsert.execute(params![
                    banner.name,
                    banner.metrics.pulls,
                    banner.metrics.six_star_rate,
                    banner.metrics.users,
                    format_timestamp(&banner.captured_at)
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn read(&self) -> Result<Arc<Snapshot>, TrackerError> {
        let db = self.conn()?;

        let global = db
            .query_row(
                "SELECT total_pulls, six_star_rate, users, scraped_at FROM global_stats WHERE id = 1",
                [],
                |row| {
                    Ok((
                        Metrics {
                            pulls: row.get(0)?,
                            six_star_rate: row.get(1)?,
                            users: row.get(2)?,
                        },
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((metrics, scraped_at)) = global else {
            return Err(TrackerError::StoreUnavailable);
        };

        Ok(Arc::new(Snapshot {
            global: GlobalSnapshot { metrics },
            banners: Self::read_banners(&db)?,
            captured_at: parse_timestamp(&scraped_at)?,
        }))
    }

    fn read_banner(&self, name: &str) -> Result<BannerSnapshot, TrackerError> {
        let db = self.conn()?;

        let row = db
            .query_row(
                "SELECT pulls, six_star_rate, users, scraped_at FROM banner_stats
                 WHERE banner_name = ?1",
                params![name],
                |row| {
                    Ok((
                        Metrics {
                            pulls: row.get(0)?,
                            six_star_rate: row.get(1)?,
                            users: row.get(2)?,
                        },
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        if let Some((metrics, scraped_at)) = row {
            return Ok(BannerSnapshot {
                name: name.to_string(),
                metrics,
                captured_at: parse_timestamp(&scraped_at)?,
            });
        }

        // same guard, so the miss and the name list see one state
        let populated = db
            .query_row("SELECT 1 FROM global_stats WHERE id = 1", [], |_| Ok(()))
            .optional()?
            .is_some();
        if !populated {
            return Err(TrackerError::StoreUnavailable);
        }
        Err(TrackerError::UnknownBanner {
            name: name.to_string(),
            available: Self::names(&db)?,
        })
    }

    fn banner_names(&self) -> Result<Vec<String>, TrackerError> {
        Self::names(&*self.conn()?)
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, TrackerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| TrackerError::Storage(format!("bad timestamp {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(global: &str, banners: &[(&str, Option<&str>)], second: u32) -> Snapshot {
        Snapshot::from_extraction(
            Metrics {
                pulls: Some(global.to_string()),
                six_star_rate: Some("0.80%".into()),
                users: Some("12,345".into()),
            },
            banners
                .iter()
                .map(|(name, pulls)| {
                    (
                        name.to_string(),
                        Metrics {
                            pulls: pulls.map(String::from),
                            six_star_rate: None,
                            users: None,
                        },
                    )
                })
                .collect(),
            Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, second).unwrap()
                + chrono::Duration::nanoseconds(123_456_789),
        )
    }

    #[test]
    fn test_empty_database_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("stats.db")).unwrap();

        assert_eq!(store.read().unwrap_err(), TrackerError::StoreUnavailable);
        assert!(store.banner_names().unwrap().is_empty());
    }

    #[test]
    fn test_roundtrip_preserves_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("stats.db")).unwrap();

        let snap = snapshot("1,234,567", &[("Basic Headhunting", Some("98,765"))], 0);
        store.write(&snap).unwrap();
        assert_eq!(*store.read().unwrap(), snap);
    }

    #[test]
    fn test_upsert_overwrites_whole_triple() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("stats.db")).unwrap();

        store
            .write(&snapshot("1", &[("A", Some("10")), ("B", Some("20"))], 0))
            .unwrap();
        store.write(&snapshot("2", &[("B", None)], 30)).unwrap();

        let current = store.read().unwrap();
        assert_eq!(current.global.metrics.pulls.as_deref(), Some("2"));
        assert_eq!(current.banners["A"].metrics.pulls.as_deref(), Some("10"));
        assert_eq!(current.banners["B"].metrics.pulls, None);
        assert_eq!(current.banners.len(), 2);
    }

    #[test]
    fn test_write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("stats.db")).unwrap();

        let snap = snapshot("7", &[("A", Some("1"))], 5);
        store.write(&snap).unwrap();
        let once = store.read().unwrap();
        store.write(&snap).unwrap();
        assert_eq!(store.read().unwrap(), once);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("stats.db");

        let snap = snapshot("42", &[("Hues of Passion", Some("3"))], 9);
        SqliteStore::open(&path).unwrap().write(&snap).unwrap();

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(*reopened.read().unwrap(), snap);
    }

    #[test]
    fn test_read_banner() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("stats.db")).unwrap();
        assert_eq!(store.read_banner("A").unwrap_err(), TrackerError::StoreUnavailable);

        store
            .write(&snapshot("1", &[("B", Some("2")), ("A", Some("1"))], 0))
            .unwrap();

        assert_eq!(store.read_banner("B").unwrap().metrics.pulls.as_deref(), Some("2"));
        assert_eq!(
            store.read_banner("Nope").unwrap_err(),
            TrackerError::UnknownBanner {
                name: "Nope".into(),
                available: vec!["A".into(), "B".into()],
            }
        );
    }
}
