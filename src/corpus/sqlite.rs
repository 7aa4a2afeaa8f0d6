//! SQLite-based corpus implementation.
//!
//! Uses SQLite with cosine similarity computed in Rust for simplicity.
//! For large corpora, consider the sqlite-vec extension or a dedicated
//! vector database behind the same traits.

use super::{
    cosine_similarity, ChunkHit, ChunkIndex, ChunkRecord, VideoCatalog, VideoChapter, VideoMeta,
};
use crate::error::{KlippError, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS videos (
    id TEXT PRIMARY KEY,
    asset_id TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    topics TEXT NOT NULL,
    chapters TEXT NOT NULL,
    transcript_vtt TEXT
);

CREATE TABLE IF NOT EXISTS video_chunks (
    id TEXT PRIMARY KEY,
    video_id TEXT NOT NULL,
    asset_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    chunk_text TEXT NOT NULL,
    visual_description TEXT,
    start_seconds REAL NOT NULL,
    end_seconds REAL NOT NULL,
    embedding BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_video_chunks_video_id ON video_chunks(video_id);

CREATE TABLE IF NOT EXISTS assets (
    id TEXT PRIMARY KEY,
    playback_ids TEXT NOT NULL
);
"#;

/// SQLite-backed chunk index and video catalog.
pub struct SqliteCorpus {
    conn: Mutex<Connection>,
}

impl SqliteCorpus {
    /// Open (or create) a corpus database at the given path.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Opened SQLite corpus at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory corpus (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| KlippError::Corpus(format!("Failed to acquire lock: {}", e)))
    }

    /// Serialize embedding to bytes.
    fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Deserialize embedding from bytes.
    fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| {
                let arr: [u8; 4] = chunk.try_into().unwrap_or_default();
                f32::from_le_bytes(arr)
            })
            .collect()
    }
}

#[async_trait]
impl ChunkIndex for SqliteCorpus {
    #[instrument(skip(self, chunks))]
    async fn upsert_chunks(&self, chunks: &[ChunkRecord]) -> Result<usize> {
        let conn = self.lock_conn()?;
        let tx = conn.unchecked_transaction()?;

        for chunk in chunks {
            let embedding_bytes = Self::embedding_to_bytes(&chunk.embedding);

            tx.execute(
                r#"
                INSERT OR REPLACE INTO video_chunks
                (id, video_id, asset_id, chunk_index, chunk_text, visual_description,
                 start_seconds, end_seconds, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    chunk.chunk_id.to_string(),
                    chunk.video_id,
                    chunk.asset_id,
                    chunk.chunk_index,
                    chunk.text,
                    chunk.visual_description,
                    chunk.start_seconds,
                    chunk.end_seconds,
                    embedding_bytes,
                ],
            )?;
        }

        tx.commit()?;
        info!("Upserted {} chunks", chunks.len());
        Ok(chunks.len())
    }

    #[instrument(skip(self, query_embedding))]
    async fn similarity_search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<ChunkHit>> {
        let conn = self.lock_conn()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, video_id, asset_id, chunk_text, visual_description,
                   start_seconds, end_seconds, embedding
            FROM video_chunks
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            let id_str: String = row.get(0)?;
            let embedding_bytes: Vec<u8> = row.get(7)?;

            Ok((
                id_str,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, f64>(6)?,
                Self::bytes_to_embedding(&embedding_bytes),
            ))
        })?;

        let mut hits: Vec<ChunkHit> = rows
            .filter_map(|row| row.ok())
            .map(
                |(id_str, video_id, asset_id, text, visual_description, start, end, embedding)| ChunkHit {
                    chunk_id: uuid::Uuid::parse_str(&id_str).unwrap_or_default(),
                    video_id,
                    asset_id,
                    text,
                    visual_description,
                    start_seconds: start,
                    end_seconds: end,
                    similarity: cosine_similarity(query_embedding, &embedding),
                },
            )
            .filter(|hit| hit.similarity >= min_similarity)
            .collect();

        // Sort by similarity descending
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);

        debug!("Found {} matching chunks", hits.len());
        Ok(hits)
    }

    async fn chunk_count(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM video_chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[async_trait]
impl VideoCatalog for SqliteCorpus {
    #[instrument(skip(self, meta, transcript_vtt))]
    async fn upsert_video(&self, meta: &VideoMeta, transcript_vtt: Option<&str>) -> Result<()> {
        let conn = self.lock_conn()?;

        let topics_json = serde_json::to_string(&meta.topics)?;
        let chapters_json = serde_json::to_string(&meta.chapters)?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO videos
            (id, asset_id, title, description, topics, chapters, transcript_vtt)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                meta.video_id,
                meta.asset_id,
                meta.title,
                meta.description,
                topics_json,
                chapters_json,
                transcript_vtt,
            ],
        )?;

        debug!("Upserted video {}", meta.video_id);
        Ok(())
    }

    async fn set_playback_ids(&self, asset_id: &str, playback_ids: &[String]) -> Result<()> {
        let conn = self.lock_conn()?;
        let ids_json = serde_json::to_string(playback_ids)?;

        conn.execute(
            "INSERT OR REPLACE INTO assets (id, playback_ids) VALUES (?1, ?2)",
            params![asset_id, ids_json],
        )?;

        Ok(())
    }

    #[instrument(skip(self, video_ids), fields(count = video_ids.len()))]
    async fn videos_by_ids(&self, video_ids: &[String]) -> Result<Vec<VideoMeta>> {
        let conn = self.lock_conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, asset_id, title, description, topics, chapters FROM videos WHERE id = ?1",
        )?;

        let mut metas = Vec::new();
        for video_id in video_ids {
            let row = stmt.query_row(params![video_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            });

            match row {
                Ok((id, asset_id, title, description, topics_json, chapters_json)) => {
                    let topics: Vec<String> =
                        serde_json::from_str(&topics_json).unwrap_or_default();
                    let chapters: Vec<VideoChapter> =
                        serde_json::from_str(&chapters_json).unwrap_or_default();

                    metas.push(VideoMeta {
                        video_id: id,
                        asset_id,
                        title,
                        description,
                        topics,
                        chapters,
                    });
                }
                Err(rusqlite::Error::QueryReturnedNoRows) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(metas)
    }

    async fn playback_id(&self, asset_id: &str) -> Result<Option<String>> {
        let conn = self.lock_conn()?;

        let result = conn.query_row(
            "SELECT playback_ids FROM assets WHERE id = ?1",
            params![asset_id],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(ids_json) => {
                let ids: Vec<String> = serde_json::from_str(&ids_json).unwrap_or_default();
                Ok(ids.into_iter().next())
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn transcript_vtt(&self, video_id: &str) -> Result<Option<String>> {
        let conn = self.lock_conn()?;

        let result = conn.query_row(
            "SELECT transcript_vtt FROM videos WHERE id = ?1",
            params![video_id],
            |row| row.get::<_, Option<String>>(0),
        );

        match result {
            Ok(vtt) => Ok(vtt),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
