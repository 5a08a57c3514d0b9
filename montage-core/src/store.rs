use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::TryStreamExt;
use mongodb::bson::spec::BinarySubtype;
use mongodb::bson::{doc, oid::ObjectId, Binary};
use mongodb::options::{ClientOptions, FindOptions, UpdateOptions};
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};

use crate::errors::{MontageError, Result};
use crate::models::{ChunkSession, MediaRecord};

/// Insert/delete/list access to the hosted metadata table. The
/// pipeline only needs insert-returning-id, delete-by-id and a
/// per-project listing.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn insert(&self, record: MediaRecord) -> Result<String>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn list_project(&self, project_id: &str) -> Result<Vec<MediaRecord>>;
}

/// Chunked-upload session state. Phase calls for one session are not
/// guaranteed to hit the same process, so implementations back this
/// with storage that outlives a single request.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: ChunkSession) -> Result<()>;
    async fn get(&self, session_id: &str) -> Result<Option<ChunkSession>>;
    /// Stores one chunk payload. Re-sending an index overwrites it.
    async fn put_chunk(&self, session_id: &str, index: u32, data: Bytes) -> Result<()>;
    async fn received_count(&self, session_id: &str) -> Result<u32>;
    /// Concatenates the stored chunks in index order.
    async fn assemble(&self, session_id: &str) -> Result<Bytes>;
    async fn remove(&self, session_id: &str) -> Result<()>;
}

// =======================================================================
// Mongo-backed store
// =======================================================================

#[derive(Debug, Serialize, Deserialize)]
struct ChunkDoc {
    session_id: String,
    index: u32,
    data: Binary,
}

#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db_name: String,
}

impl MongoStore {
    pub async fn new(uri: &str) -> Result<Self> {
        let mut client_options = ClientOptions::parse(uri).await?;
        client_options.app_name = Some("montage".to_string());
        let client = Client::with_options(client_options)?;

        Ok(Self {
            client,
            db_name: "montage".to_string(),
        })
    }

    fn media_files(&self) -> Collection<MediaRecord> {
        self.client.database(&self.db_name).collection("media_files")
    }

    fn sessions(&self) -> Collection<ChunkSession> {
        self.client
            .database(&self.db_name)
            .collection("upload_sessions")
    }

    fn chunks(&self) -> Collection<ChunkDoc> {
        self.client
            .database(&self.db_name)
            .collection("upload_chunks")
    }
}

#[async_trait]
impl MediaStore for MongoStore {
    async fn insert(&self, record: MediaRecord) -> Result<String> {
        let result = self.media_files().insert_one(record, None).await?;
        result
            .inserted_id
            .as_object_id()
            .map(|id| id.to_hex())
            .ok_or_else(|| MontageError::Unknown("failed to get inserted id".to_string()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let oid = ObjectId::parse_str(id)
            .map_err(|_| MontageError::ValidationError(format!("invalid record id: {}", id)))?;
        let result = self.media_files().delete_one(doc! { "_id": oid }, None).await?;
        if result.deleted_count == 0 {
            return Err(MontageError::Unknown(format!("no record with id {}", id)));
        }
        Ok(())
    }

    async fn list_project(&self, project_id: &str) -> Result<Vec<MediaRecord>> {
        let mut cursor = self
            .media_files()
            .find(doc! { "project_id": project_id }, None)
            .await?;
        let mut records = Vec::new();
        while let Some(record) = cursor.try_next().await? {
            records.push(record);
        }
        Ok(records)
    }
}

#[async_trait]
impl SessionStore for MongoStore {
    async fn create(&self, session: ChunkSession) -> Result<()> {
        self.sessions().insert_one(session, None).await?;
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<ChunkSession>> {
        Ok(self
            .sessions()
            .find_one(doc! { "session_id": session_id }, None)
            .await?)
    }

    async fn put_chunk(&self, session_id: &str, index: u32, data: Bytes) -> Result<()> {
        let payload = Binary {
            subtype: BinarySubtype::Generic,
            bytes: data.to_vec(),
        };
        self.chunks()
            .update_one(
                doc! { "session_id": session_id, "index": index },
                doc! { "$set": { "data": payload } },
                UpdateOptions::builder().upsert(true).build(),
            )
            .await?;
        Ok(())
    }

    async fn received_count(&self, session_id: &str) -> Result<u32> {
        let count = self
            .chunks()
            .count_documents(doc! { "session_id": session_id }, None)
            .await?;
        Ok(count as u32)
    }

    async fn assemble(&self, session_id: &str) -> Result<Bytes> {
        let options = FindOptions::builder().sort(doc! { "index": 1 }).build();
        let mut cursor = self
            .chunks()
            .find(doc! { "session_id": session_id }, options)
            .await?;
        let mut assembled = BytesMut::new();
        let mut found = false;
        while let Some(chunk) = cursor.try_next().await? {
            assembled.extend_from_slice(&chunk.data.bytes);
            found = true;
        }
        if !found {
            return Err(MontageError::SessionNotFound(session_id.to_string()));
        }
        Ok(assembled.freeze())
    }

    async fn remove(&self, session_id: &str) -> Result<()> {
        self.chunks()
            .delete_many(doc! { "session_id": session_id }, None)
            .await?;
        self.sessions()
            .delete_one(doc! { "session_id": session_id }, None)
            .await?;
        Ok(())
    }
}

// =======================================================================
// In-memory session store
// =======================================================================

struct SessionEntry {
    session: ChunkSession,
    chunks: BTreeMap<u32, Bytes>,
}

/// Fallback session store used when no database is configured. State
/// lives only as long as the process, which is fine for a single-node
/// deployment but loses resumability across restarts.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<HashMap<String, SessionEntry>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, SessionEntry>>> {
        self.inner
            .lock()
            .map_err(|_| MontageError::Unknown("session store lock poisoned".to_string()))
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: ChunkSession) -> Result<()> {
        self.lock()?.insert(
            session.session_id.clone(),
            SessionEntry {
                session,
                chunks: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<ChunkSession>> {
        Ok(self.lock()?.get(session_id).map(|e| e.session.clone()))
    }

    async fn put_chunk(&self, session_id: &str, index: u32, data: Bytes) -> Result<()> {
        let mut guard = self.lock()?;
        let entry = guard
            .get_mut(session_id)
            .ok_or_else(|| MontageError::SessionNotFound(session_id.to_string()))?;
        entry.chunks.insert(index, data);
        Ok(())
    }

    async fn received_count(&self, session_id: &str) -> Result<u32> {
        Ok(self
            .lock()?
            .get(session_id)
            .map(|e| e.chunks.len() as u32)
            .unwrap_or(0))
    }

    async fn assemble(&self, session_id: &str) -> Result<Bytes> {
        let guard = self.lock()?;
        let entry = guard
            .get(session_id)
            .ok_or_else(|| MontageError::SessionNotFound(session_id.to_string()))?;
        let mut assembled = BytesMut::new();
        for data in entry.chunks.values() {
            assembled.extend_from_slice(data);
        }
        Ok(assembled.freeze())
    }

    async fn remove(&self, session_id: &str) -> Result<()> {
        self.lock()?.remove(session_id);
        Ok(())
    }
}
