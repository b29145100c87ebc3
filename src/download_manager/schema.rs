//! Database schema for the download status store.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP,
};

// =============================================================================
// Version 0
// =============================================================================

const ARTISTS_TABLE_V0: Table = Table {
    name: "artists",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!(
            "added_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[],
    unique_constraints: &[],
};

const ALBUMS_TABLE_V0: Table = Table {
    name: "albums",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!(
            "artist_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "artists",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("release_date", &SqlType::Text),
        sqlite_column!("cover_url", &SqlType::Text),
        sqlite_column!(
            "status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'pending'")
        ),
        sqlite_column!(
            "added_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!("downloaded_at", &SqlType::Integer),
        sqlite_column!("source_username", &SqlType::Text),
    ],
    indices: &[
        ("idx_albums_status", "status"),
        ("idx_albums_artist", "artist_id"),
    ],
    unique_constraints: &[],
};

/// Track ids are only unique within their album, hence the surrogate key.
const TRACKS_TABLE_V0: Table = Table {
    name: "tracks",
    columns: &[
        sqlite_column!("row_id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("id", &SqlType::Text, non_null = true),
        sqlite_column!(
            "album_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "albums",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("position", &SqlType::Text, non_null = true),
        sqlite_column!("length_secs", &SqlType::Integer),
        sqlite_column!("disc_number", &SqlType::Integer),
        sqlite_column!(
            "status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'pending'")
        ),
        sqlite_column!(
            "added_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!("downloaded_at", &SqlType::Integer),
        sqlite_column!("local_path", &SqlType::Text),
        sqlite_column!("remote_id", &SqlType::Text),
    ],
    indices: &[("idx_tracks_album", "album_id")],
    unique_constraints: &[&["album_id", "id"]],
};

/// Peers that must not be picked again for an album.
const ALBUM_SOURCE_BLACKLIST_TABLE_V0: Table = Table {
    name: "album_source_blacklist",
    columns: &[
        sqlite_column!(
            "album_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "albums",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!("username", &SqlType::Text, non_null = true),
        sqlite_column!(
            "added_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[],
    unique_constraints: &[&["album_id", "username"]],
};

pub const DOWNLOAD_STATUS_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        ARTISTS_TABLE_V0,
        ALBUMS_TABLE_V0,
        TRACKS_TABLE_V0,
        ALBUM_SOURCE_BLACKLIST_TABLE_V0,
    ],
    migration: None,
}];
