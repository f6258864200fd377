//! Blob operations for queue item storage.
//!
//! Each queue item is stored as a separate JSON file whose name is the
//! zero-padded sequence number. The JSON carries the sequence number again
//! so a misplaced blob is detected on read.

use serde::{Deserialize, Serialize};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlobId, ItemPath, ItemSeq, QueueName};

/// a single entry written to a queue
///
/// The internal format stored in Git:
/// ```text
/// {
///   "_seq": 1,
///   "_tx": "01hx...",
///   "_written_at": "xxxx-xx-xxT00:00:00Z",
///   "payload": "hello CICS"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// position within the queue
    pub seq: ItemSeq,
    /// transaction that wrote the item, if any
    pub tx_id: Option<String>,
    /// write timestamp
    pub written_at: String,
    /// the written string
    pub payload: String,
}

impl QueueItem {
    /// creates an item stamped with the current time
    pub fn new(seq: ItemSeq, payload: impl Into<String>, tx_id: Option<&str>) -> Self {
        Self {
            seq,
            tx_id: tx_id.map(str::to_string),
            written_at: chrono::Utc::now().to_rfc3339(),
            payload: payload.into(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct QueueItemJson {
    #[serde(rename = "_seq")]
    seq: u64,
    #[serde(rename = "_tx", default, skip_serializing_if = "Option::is_none")]
    tx_id: Option<String>,
    #[serde(rename = "_written_at")]
    written_at: String,
    payload: String,
}

/// serialize an item to JSON bytes
pub fn serialize_item(item: &QueueItem) -> StorageResult<Vec<u8>> {
    let json = QueueItemJson {
        seq: item.seq.get(),
        tx_id: item.tx_id.clone(),
        written_at: item.written_at.clone(),
        payload: item.payload.clone(),
    };

    Ok(serde_json::to_vec_pretty(&json)?)
}

/// deserialize an item from JSON bytes
///
/// validates that the sequence number in the JSON matches the file it came from
pub fn deserialize_item(bytes: &[u8], queue: &QueueName, expected: ItemSeq) -> StorageResult<QueueItem> {
    let json: QueueItemJson = serde_json::from_slice(bytes)?;

    if json.seq != expected.get() {
        return Err(StorageError::CorruptedData {
            path: ItemPath::new(queue.clone(), expected).to_path_buf(),
            reason: format!(
                "sequence mismatch: file name suggests {} but content has {}",
                expected, json.seq
            ),
        });
    }

    Ok(QueueItem {
        seq: expected,
        tx_id: json.tx_id,
        written_at: json.written_at,
        payload: json.payload,
    })
}

/// write an item as a blob to the repository
pub fn write_blob(repo: &git2::Repository, item: &QueueItem) -> StorageResult<BlobId> {
    let bytes = serialize_item(item)?;
    let oid = repo.blob(&bytes)?;
    Ok(BlobId::new(oid))
}

/// read a blob's content from the repository
pub fn read_blob(repo: &git2::Repository, blob_id: BlobId) -> StorageResult<Vec<u8>> {
    let blob = repo.find_blob(blob_id.raw())?;
    Ok(blob.content().to_vec())
}
