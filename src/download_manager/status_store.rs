//! Album and track status persistence.
//!
//! Provides the store trait consumed by the download manager and its SQLite
//! implementation.

use super::models::*;
use super::schema::DOWNLOAD_STATUS_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::{read_schema_version, BASE_DB_VERSION};
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// Storage for album/track lifecycle state.
///
/// Writes are per row; aggregates are always computed from the rows at the
/// time of the call.
pub trait DownloadStatusStore: Send + Sync {
    // === Records ===

    /// Inserts or replaces an album with its artist and tracks. The album and
    /// every track start over as `Pending` with no handle or local path.
    fn queue_album(&self, request: &QueueAlbumRequest) -> Result<()>;

    fn get_album(&self, album_id: &str) -> Result<Option<AlbumRecord>>;

    /// Tracks of an album ordered by disc and position.
    fn get_tracks(&self, album_id: &str) -> Result<Vec<TrackRecord>>;

    /// Albums in the given status, oldest first.
    fn list_albums_by_status(&self, status: DownloadStatus) -> Result<Vec<AlbumRecord>>;

    /// Removes the album and everything attached to it.
    /// Returns false when the album was not tracked.
    fn delete_album(&self, album_id: &str) -> Result<bool>;

    // === Status Updates ===

    /// Sets the album status; `Completed` also stamps the download time.
    fn set_album_status(&self, album_id: &str, status: DownloadStatus) -> Result<()>;

    fn set_album_source(&self, album_id: &str, username: Option<&str>) -> Result<()>;

    /// Records the network filename assigned to a track.
    fn set_track_remote_id(&self, album_id: &str, track_id: &str, remote_id: &str)
        -> Result<()>;

    /// Updates a track status. `local_path` is only written when given;
    /// `Completed` also stamps the download time.
    fn update_track_status(
        &self,
        album_id: &str,
        track_id: &str,
        status: DownloadStatus,
        local_path: Option<&str>,
    ) -> Result<()>;

    /// Puts the album and all of its tracks back to `Pending`, clearing
    /// handles, local paths, source and timestamps.
    fn reset_album(&self, album_id: &str) -> Result<()>;

    // === Aggregates ===

    fn get_album_status(&self, album_id: &str) -> Result<Option<AlbumStatusSummary>>;

    fn count_albums_by_status(&self) -> Result<StatusCounts>;

    /// Tracked albums grouped by artist, optionally for a single artist.
    fn list_library(&self, artist_id: Option<&str>) -> Result<Vec<LibraryArtist>>;

    // === Source Blacklist ===

    fn blacklist_source(&self, album_id: &str, username: &str) -> Result<()>;

    fn blacklisted_sources(&self, album_id: &str) -> Result<Vec<String>>;
}

pub struct SqliteDownloadStatusStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDownloadStatusStore {
    /// Opens an existing database or creates a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            Connection::open_with_flags(
                &db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            let conn = Connection::open(&db_path)?;
            DOWNLOAD_STATUS_VERSIONED_SCHEMAS
                .last()
                .context("No schemas defined")?
                .create(&conn)?;
            info!("Created new download status database at {:?}", db_path.as_ref());
            conn
        };

        conn.execute("PRAGMA foreign_keys = ON;", [])?;

        let version = read_schema_version(&conn, DOWNLOAD_STATUS_VERSIONED_SCHEMAS.len())
            .context("Unsupported download status database")?;

        DOWNLOAD_STATUS_VERSIONED_SCHEMAS
            .get(version)
            .context("Failed to get schema")?
            .validate(&conn)?;

        Self::migrate_if_needed(&conn, version)?;

        Ok(SqliteDownloadStatusStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store for testing.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        DOWNLOAD_STATUS_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;

        Ok(SqliteDownloadStatusStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate_if_needed(conn: &Connection, current_version: usize) -> Result<()> {
        let target_version = DOWNLOAD_STATUS_VERSIONED_SCHEMAS.len() - 1;
        if current_version >= target_version {
            return Ok(());
        }

        info!(
            "Migrating download status database from version {} to {}",
            current_version, target_version
        );
        for schema in DOWNLOAD_STATUS_VERSIONED_SCHEMAS
            .iter()
            .skip(current_version + 1)
        {
            if let Some(migration_fn) = schema.migration {
                migration_fn(conn)?;
            }
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + target_version),
            [],
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Download status database lock poisoned"))
    }

    fn row_to_album(row: &rusqlite::Row) -> rusqlite::Result<AlbumRecord> {
        Ok(AlbumRecord {
            id: row.get("id")?,
            artist_id: row.get("artist_id")?,
            artist_name: row.get("artist_name")?,
            title: row.get("title")?,
            release_date: row.get("release_date")?,
            cover_url: row.get("cover_url")?,
            status: DownloadStatus::from_db_str(&row.get::<_, String>("status")?),
            added_at: row.get("added_at")?,
            downloaded_at: row.get("downloaded_at")?,
            source_username: row.get("source_username")?,
        })
    }

    fn row_to_track(row: &rusqlite::Row) -> rusqlite::Result<TrackRecord> {
        Ok(TrackRecord {
            id: row.get("id")?,
            album_id: row.get("album_id")?,
            title: row.get("title")?,
            position: row.get("position")?,
            length_secs: row.get("length_secs")?,
            disc_number: row.get("disc_number")?,
            status: DownloadStatus::from_db_str(&row.get::<_, String>("status")?),
            added_at: row.get("added_at")?,
            downloaded_at: row.get("downloaded_at")?,
            local_path: row.get("local_path")?,
            remote_id: row.get("remote_id")?,
        })
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

const ALBUM_SELECT: &str = r#"SELECT al.id, al.artist_id, ar.name AS artist_name, al.title,
       al.release_date, al.cover_url, al.status, al.added_at, al.downloaded_at,
       al.source_username
  FROM albums al
  JOIN artists ar ON ar.id = al.artist_id"#;

impl DownloadStatusStore for SqliteDownloadStatusStore {
    // === Records ===

    fn queue_album(&self, request: &QueueAlbumRequest) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Self::now();

        tx.execute(
            r#"INSERT INTO artists (id, name, added_at) VALUES (?1, ?2, ?3)
               ON CONFLICT(id) DO UPDATE SET name = excluded.name"#,
            params![request.artist_id, request.artist_name, now],
        )?;

        tx.execute(
            r#"INSERT INTO albums (id, artist_id, title, release_date, cover_url, status, added_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
               ON CONFLICT(id) DO UPDATE SET
                   artist_id = excluded.artist_id,
                   title = excluded.title,
                   release_date = excluded.release_date,
                   cover_url = excluded.cover_url,
                   status = excluded.status,
                   downloaded_at = NULL,
                   source_username = NULL"#,
            params![
                request.album_id,
                request.artist_id,
                request.title,
                request.release_date,
                request.cover_url,
                DownloadStatus::Pending.as_db_str(),
                now,
            ],
        )?;

        tx.execute(
            "DELETE FROM tracks WHERE album_id = ?1",
            params![request.album_id],
        )?;
        {
            let mut insert = tx.prepare(
                r#"INSERT INTO tracks (id, album_id, title, position, length_secs, disc_number, status, added_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            )?;
            for track in &request.tracks {
                insert.execute(params![
                    track.id,
                    request.album_id,
                    track.title,
                    track.position,
                    track.length_secs,
                    track.disc_number,
                    DownloadStatus::Pending.as_db_str(),
                    now,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn get_album(&self, album_id: &str) -> Result<Option<AlbumRecord>> {
        let conn = self.lock()?;
        let album = conn
            .query_row(
                &format!("{} WHERE al.id = ?1", ALBUM_SELECT),
                [album_id],
                Self::row_to_album,
            )
            .optional()?;
        Ok(album)
    }

    fn get_tracks(&self, album_id: &str) -> Result<Vec<TrackRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"SELECT * FROM tracks WHERE album_id = ?1
               ORDER BY COALESCE(disc_number, 1), CAST(position AS INTEGER), position, row_id"#,
        )?;
        let tracks = stmt
            .query_map([album_id], Self::row_to_track)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tracks)
    }

    fn list_albums_by_status(&self, status: DownloadStatus) -> Result<Vec<AlbumRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE al.status = ?1 ORDER BY al.added_at ASC, al.rowid ASC",
            ALBUM_SELECT
        ))?;
        let albums = stmt
            .query_map([status.as_db_str()], Self::row_to_album)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(albums)
    }

    fn delete_album(&self, album_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM albums WHERE id = ?1", [album_id])?;
        Ok(deleted > 0)
    }

    // === Status Updates ===

    fn set_album_status(&self, album_id: &str, status: DownloadStatus) -> Result<()> {
        let conn = self.lock()?;
        if status == DownloadStatus::Completed {
            conn.execute(
                "UPDATE albums SET status = ?1, downloaded_at = ?2 WHERE id = ?3",
                params![status.as_db_str(), Self::now(), album_id],
            )?;
        } else {
            conn.execute(
                "UPDATE albums SET status = ?1 WHERE id = ?2",
                params![status.as_db_str(), album_id],
            )?;
        }
        Ok(())
    }

    fn set_album_source(&self, album_id: &str, username: Option<&str>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE albums SET source_username = ?1 WHERE id = ?2",
            params![username, album_id],
        )?;
        Ok(())
    }

    fn set_track_remote_id(
        &self,
        album_id: &str,
        track_id: &str,
        remote_id: &str,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE tracks SET remote_id = ?1 WHERE album_id = ?2 AND id = ?3",
            params![remote_id, album_id, track_id],
        )?;
        Ok(())
    }

    fn update_track_status(
        &self,
        album_id: &str,
        track_id: &str,
        status: DownloadStatus,
        local_path: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock()?;
        let downloaded_at = (status == DownloadStatus::Completed).then(Self::now);
        conn.execute(
            r#"UPDATE tracks SET
                   status = ?1,
                   local_path = COALESCE(?2, local_path),
                   downloaded_at = COALESCE(?3, downloaded_at)
               WHERE album_id = ?4 AND id = ?5"#,
            params![status.as_db_str(), local_path, downloaded_at, album_id, track_id],
        )?;
        Ok(())
    }

    fn reset_album(&self, album_id: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            r#"UPDATE albums SET status = ?1, downloaded_at = NULL, source_username = NULL
               WHERE id = ?2"#,
            params![DownloadStatus::Pending.as_db_str(), album_id],
        )?;
        tx.execute(
            r#"UPDATE tracks SET status = ?1, downloaded_at = NULL, local_path = NULL, remote_id = NULL
               WHERE album_id = ?2"#,
            params![DownloadStatus::Pending.as_db_str(), album_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    // === Aggregates ===

    fn get_album_status(&self, album_id: &str) -> Result<Option<AlbumStatusSummary>> {
        let conn = self.lock()?;
        let summary = conn
            .query_row(
                r#"SELECT al.id, al.title, al.status,
                          COUNT(t.row_id) AS total_tracks,
                          COALESCE(SUM(CASE WHEN t.status = 'completed' THEN 1 ELSE 0 END), 0) AS completed_tracks
                     FROM albums al
                     LEFT JOIN tracks t ON t.album_id = al.id
                    WHERE al.id = ?1
                    GROUP BY al.id"#,
                [album_id],
                |row| {
                    Ok(AlbumStatusSummary {
                        id: row.get("id")?,
                        title: row.get("title")?,
                        status: DownloadStatus::from_db_str(&row.get::<_, String>("status")?),
                        total_tracks: row.get::<_, i64>("total_tracks")? as usize,
                        completed_tracks: row.get::<_, i64>("completed_tracks")? as usize,
                    })
                },
            )
            .optional()?;
        Ok(summary)
    }

    fn count_albums_by_status(&self) -> Result<StatusCounts> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM albums GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            counts.add(DownloadStatus::from_db_str(&status), count as usize);
        }
        Ok(counts)
    }

    fn list_library(&self, artist_id: Option<&str>) -> Result<Vec<LibraryArtist>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"SELECT ar.id AS artist_id, ar.name AS artist_name,
                      al.id, al.title, al.release_date, al.cover_url, al.status,
                      al.added_at, al.downloaded_at,
                      COUNT(t.row_id) AS total_tracks,
                      COALESCE(SUM(CASE WHEN t.status = 'completed' THEN 1 ELSE 0 END), 0) AS completed_tracks
                 FROM albums al
                 JOIN artists ar ON ar.id = al.artist_id
                 LEFT JOIN tracks t ON t.album_id = al.id
                WHERE ?1 IS NULL OR ar.id = ?1
                GROUP BY al.id
                ORDER BY ar.name COLLATE NOCASE, al.release_date, al.title"#,
        )?;

        let rows = stmt
            .query_map([artist_id], |row| {
                Ok((
                    row.get::<_, String>("artist_id")?,
                    row.get::<_, String>("artist_name")?,
                    LibraryAlbum {
                        id: row.get("id")?,
                        title: row.get("title")?,
                        release_date: row.get("release_date")?,
                        cover_url: row.get("cover_url")?,
                        status: DownloadStatus::from_db_str(&row.get::<_, String>("status")?),
                        total_tracks: row.get::<_, i64>("total_tracks")? as usize,
                        completed_tracks: row.get::<_, i64>("completed_tracks")? as usize,
                        added_at: row.get("added_at")?,
                        downloaded_at: row.get("downloaded_at")?,
                    },
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        // Keep the SQL ordering of artists while grouping
        let mut order: Vec<String> = Vec::new();
        let mut grouped: BTreeMap<String, LibraryArtist> = BTreeMap::new();
        for (artist_id, artist_name, album) in rows {
            grouped
                .entry(artist_id.clone())
                .or_insert_with(|| {
                    order.push(artist_id.clone());
                    LibraryArtist {
                        artist_id: artist_id.clone(),
                        artist_name,
                        albums: Vec::new(),
                    }
                })
                .albums
                .push(album);
        }

        Ok(order
            .into_iter()
            .filter_map(|id| grouped.remove(&id))
            .collect())
    }

    // === Source Blacklist ===

    fn blacklist_source(&self, album_id: &str, username: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"INSERT INTO album_source_blacklist (album_id, username, added_at)
               VALUES (?1, ?2, ?3)
               ON CONFLICT(album_id, username) DO NOTHING"#,
            params![album_id, username, Self::now()],
        )?;
        Ok(())
    }

    fn blacklisted_sources(&self, album_id: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT username FROM album_source_blacklist WHERE album_id = ?1 ORDER BY added_at, username",
        )?;
        let users = stmt
            .query_map([album_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(users)
    }
}
