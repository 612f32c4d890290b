//! SQLite persistence for index snapshots
//!
//! A snapshot is written to a temporary database next to the served file,
//! validated, then renamed over it. Readers therefore see either the old
//! artifact or the complete new one.

use super::{bytes_to_embedding, embedding_to_bytes, IndexSnapshot, SnapshotMeta};
use crate::error::{CodeQaError, Result};
use crate::extract::{Chunk, ChunkKind, SkippedFile};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const SCHEMA_VERSION: i64 = 1;

/// File name of the served artifact inside an index directory
pub const INDEX_FILE: &str = "index.sqlite";

const CREATE_TABLES: &str = r#"
CREATE TABLE meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE chunks (
    seq INTEGER PRIMARY KEY,
    id TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    qualified_name TEXT NOT NULL,
    file_path TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    signature TEXT NOT NULL,
    docstring TEXT,
    source_text TEXT NOT NULL,
    parent_id TEXT,
    degraded INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE vectors (
    seq INTEGER PRIMARY KEY REFERENCES chunks(seq),
    embedding BLOB NOT NULL
);
"#;

/// Index directory of one repository under the index root
pub fn index_dir_for(index_root: &Path, repo_root: &Path) -> PathBuf {
    let hash = blake3::hash(repo_root.to_string_lossy().as_bytes());
    index_root.join(&hash.to_hex()[..16])
}

/// Write a snapshot to a temporary database inside `dir`.
///
/// The returned file is deleted on drop unless handed to [`commit`].
pub fn write_temp(snapshot: &IndexSnapshot, dir: &Path) -> Result<NamedTempFile> {
    std::fs::create_dir_all(dir)?;
    let temp = NamedTempFile::new_in(dir)?;

    let mut conn = Connection::open(temp.path())?;
    conn.execute_batch("PRAGMA journal_mode = DELETE; PRAGMA synchronous = FULL;")?;
    conn.execute_batch(CREATE_TABLES)?;

    let tx = conn.transaction()?;
    {
        let mut meta = tx.prepare("INSERT INTO meta (key, value) VALUES (?1, ?2)")?;
        let skipped = serde_json::to_string(&snapshot.skipped_files)?;
        let entries = [
            ("schema_version", SCHEMA_VERSION.to_string()),
            ("repo_root", snapshot.repo_root.to_string_lossy().to_string()),
            ("fingerprint", snapshot.fingerprint.clone()),
            ("model", snapshot.model.clone()),
            ("dimensions", snapshot.dimensions.to_string()),
            ("built_at", snapshot.built_at.to_rfc3339()),
            ("file_count", snapshot.file_count.to_string()),
            ("chunk_count", snapshot.chunks.len().to_string()),
            ("skipped_files", skipped),
        ];
        for (key, value) in entries {
            meta.execute(params![key, value])?;
        }

        let mut chunk_stmt = tx.prepare(
            "INSERT INTO chunks (
                seq, id, kind, qualified_name, file_path, start_line, end_line,
                signature, docstring, source_text, parent_id, degraded
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        let mut vector_stmt = tx.prepare("INSERT INTO vectors (seq, embedding) VALUES (?1, ?2)")?;

        for (seq, (chunk, vector)) in snapshot
            .chunks
            .iter()
            .zip(snapshot.store.vectors())
            .enumerate()
        {
            chunk_stmt.execute(params![
                seq as i64,
                chunk.id,
                chunk.kind.as_str(),
                chunk.qualified_name,
                chunk.file_path,
                chunk.start_line as i64,
                chunk.end_line as i64,
                chunk.signature,
                chunk.docstring,
                chunk.source_text,
                chunk.parent_id,
                chunk.degraded,
            ])?;
            vector_stmt.execute(params![seq as i64, embedding_to_bytes(vector)])?;
        }
    }
    tx.commit()?;

    let chunk_rows: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
    let vector_rows: i64 = conn.query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get(0))?;
    if chunk_rows as usize != snapshot.chunks.len() || vector_rows != chunk_rows {
        return Err(CodeQaError::storage(
            temp.path(),
            format!(
                "wrote {chunk_rows} chunks and {vector_rows} vectors for {} chunks",
                snapshot.chunks.len()
            ),
        ));
    }

    conn.close().map_err(|(_, e)| CodeQaError::Database(e))?;
    Ok(temp)
}

/// Atomically replace the served artifact with a written temp file
pub fn commit(temp: NamedTempFile, dir: &Path) -> Result<()> {
    let target = dir.join(INDEX_FILE);
    temp.persist(&target)
        .map_err(|e| CodeQaError::storage(&target, e.error.to_string()))?;
    Ok(())
}

/// Read only the stored fingerprint, if a readable artifact exists
pub fn read_fingerprint(dir: &Path) -> Result<Option<String>> {
    let Some(conn) = open_existing(dir)? else {
        return Ok(None);
    };
    read_meta(&conn, "fingerprint")
}

/// Load the persisted snapshot of `dir`.
///
/// Returns `Ok(None)` when no artifact exists or it fails validation
/// (schema version, chunk/vector parity, vector dimensions).
pub fn load(dir: &Path) -> Result<Option<IndexSnapshot>> {
    let Some(conn) = open_existing(dir)? else {
        return Ok(None);
    };

    let version: Option<i64> = read_meta(&conn, "schema_version")?.and_then(|v| v.parse().ok());
    if version != Some(SCHEMA_VERSION) {
        tracing::warn!(
            dir = %dir.display(),
            ?version,
            "ignoring index with unknown schema version"
        );
        return Ok(None);
    }

    let meta = match read_snapshot_meta(&conn)? {
        Some(meta) => meta,
        None => {
            tracing::warn!(dir = %dir.display(), "ignoring index with incomplete metadata");
            return Ok(None);
        }
    };
    let expected_chunks: Option<usize> =
        read_meta(&conn, "chunk_count")?.and_then(|v| v.parse().ok());

    let chunks = read_chunks(&conn)?;
    let vectors: Vec<Vec<f32>> = {
        let mut stmt = conn.prepare("SELECT embedding FROM vectors ORDER BY seq")?;
        let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
        rows.map(|r| r.map(|bytes| bytes_to_embedding(&bytes)))
            .collect::<std::result::Result<_, _>>()?
    };

    if expected_chunks != Some(chunks.len())
        || vectors.len() != chunks.len()
        || vectors.iter().any(|v| v.len() != meta.dimensions)
    {
        tracing::warn!(dir = %dir.display(), "ignoring index that failed validation");
        return Ok(None);
    }

    IndexSnapshot::new(meta, chunks, vectors).map(Some)
}

/// Delete the artifact of `dir`, if any
pub fn remove(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn open_existing(dir: &Path) -> Result<Option<Connection>> {
    let path = dir.join(INDEX_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let conn = Connection::open_with_flags(
        &path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    let has_meta: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'meta'",
            [],
            |_| Ok(true),
        )
        .optional()?
        .unwrap_or(false);
    Ok(has_meta.then_some(conn))
}

fn read_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| row.get(0))
        .optional()?)
}

fn read_snapshot_meta(conn: &Connection) -> Result<Option<SnapshotMeta>> {
    let get = |key: &str| read_meta(conn, key);

    let (Some(repo_root), Some(fingerprint), Some(model), Some(dimensions), Some(built_at)) = (
        get("repo_root")?,
        get("fingerprint")?,
        get("model")?,
        get("dimensions")?.and_then(|v| v.parse::<usize>().ok()),
        get("built_at")?.and_then(|v| DateTime::parse_from_rfc3339(&v).ok()),
    ) else {
        return Ok(None);
    };

    let skipped_files: Vec<SkippedFile> = match get("skipped_files")? {
        Some(json) => serde_json::from_str(&json)?,
        None => Vec::new(),
    };

    Ok(Some(SnapshotMeta {
        repo_root: PathBuf::from(repo_root),
        fingerprint,
        built_at: built_at.with_timezone(&Utc),
        model,
        dimensions,
        file_count: get("file_count")?.and_then(|v| v.parse().ok()).unwrap_or(0),
        skipped_files,
    }))
}

fn read_chunks(conn: &Connection) -> Result<Vec<Chunk>> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, qualified_name, file_path, start_line, end_line,
                signature, docstring, source_text, parent_id, degraded
         FROM chunks ORDER BY seq",
    )?;

    let rows = stmt.query_map([], |row| {
        let kind: String = row.get(1)?;
        Ok((
            kind,
            Chunk {
                id: row.get(0)?,
                kind: ChunkKind::Module,
                qualified_name: row.get(2)?,
                file_path: row.get(3)?,
                start_line: row.get::<_, i64>(4)? as usize,
                end_line: row.get::<_, i64>(5)? as usize,
                signature: row.get(6)?,
                docstring: row.get(7)?,
                source_text: row.get(8)?,
                parent_id: row.get(9)?,
                degraded: row.get(10)?,
            },
        ))
    })?;

    let mut chunks = Vec::new();
    for row in rows {
        let (kind, mut chunk) = row?;
        chunk.kind = kind.parse().map_err(CodeQaError::InvalidInput)?;
        chunks.push(chunk);
    }
    Ok(chunks)
}
