//! The document collection seam and its MongoDB implementation.
//!
//! [`MongoStore`](crate::MongoStore) talks to storage only through
//! [`DocumentCollection`], which names the handful of single-document
//! operations the update loop needs. [`MongoCollection`] implements it on the
//! official driver; tests use the in-process `testutil::MemoryCollection`.
//!
//! # Document layout
//!
//! ```text
//! { _id: <key>, value: BinData(0, <bytes>), expire: ISODate(...) }
//! ```
//!
//! `expire` is omitted for entries that never expire. A TTL index on
//! `expire` lets the server delete expired documents in the background.
//! A `value` that is null or missing reads back as empty bytes.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    Client, ClientSession, Collection, IndexModel,
    bson::{Binary, Bson, DateTime as BsonDateTime, Document, doc, spec::BinarySubtype},
    options::IndexOptions,
};
use simplekv::{Expiry, normalize_value};

use crate::error::{DocResult, DocumentError};

/// Grace period the TTL index waits past `expire` before deleting.
pub const EXPIRE_AFTER: Duration = Duration::from_secs(1);

/// One key-value entry as stored in the collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    /// The `_id`.
    pub key: String,
    /// The value bytes.
    pub value: Vec<u8>,
    /// When the entry expires.
    pub expire: Expiry,
}

impl StoredDocument {
    /// Creates a document.
    #[must_use]
    pub fn new(key: impl Into<String>, value: Vec<u8>, expire: Expiry) -> Self {
        Self { key: key.into(), value, expire }
    }
}

/// Single-document operations over a collection of key-value entries.
#[async_trait]
pub trait DocumentCollection: Send + Sync + 'static {
    /// Session pinned for a scope to give read-your-writes.
    type Session: Send + 'static;

    /// Starts a session.
    async fn start_session(&self) -> DocResult<Self::Session>;

    /// Creates the TTL index on `expire` if missing.
    async fn ensure_expiry_index(&self) -> DocResult<()>;

    /// Reads the document for `key`, expired or not.
    async fn find(&self, session: &mut Self::Session, key: &str) -> DocResult<Option<StoredDocument>>;

    /// Inserts a new document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::DuplicateKey`] if `_id` already exists.
    async fn insert(&self, session: &mut Self::Session, doc: &StoredDocument) -> DocResult<()>;

    /// Replaces value and expiry of `doc.key` only if its stored value is
    /// still `expected`. Returns whether a document matched.
    async fn update_if_value(
        &self,
        session: &mut Self::Session,
        expected: &[u8],
        doc: &StoredDocument,
    ) -> DocResult<bool>;

    /// Writes `doc` whether or not `doc.key` exists.
    async fn upsert(&self, session: &mut Self::Session, doc: &StoredDocument) -> DocResult<()>;

    /// Lists the keys of documents not expired at `now`, in order.
    async fn keys(
        &self,
        session: &mut Self::Session,
        now: chrono::DateTime<chrono::Utc>,
    ) -> DocResult<Vec<String>>;
}

/// [`DocumentCollection`] over a MongoDB collection.
#[derive(Debug, Clone)]
pub struct MongoCollection {
    client: Client,
    collection: Collection<Document>,
}

impl MongoCollection {
    /// Uses `collection` in `database` on an existing client.
    #[must_use]
    pub fn new(client: &Client, database: &str, collection: &str) -> Self {
        Self { client: client.clone(), collection: client.database(database).collection(collection) }
    }

    /// Connects to `uri` and uses `collection` in `database`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection string is invalid.
    pub async fn connect(uri: &str, database: &str, collection: &str) -> DocResult<Self> {
        let client = Client::with_uri_str(uri).await?;
        Ok(Self::new(&client, database, collection))
    }

    /// Returns the underlying collection.
    #[must_use]
    pub fn collection(&self) -> &Collection<Document> {
        &self.collection
    }
}

fn binary(bytes: &[u8]) -> Binary {
    Binary { subtype: BinarySubtype::Generic, bytes: bytes.to_vec() }
}

fn set_update(doc: &StoredDocument) -> Document {
    match doc.expire.unix_millis() {
        Some(millis) => doc! {
            "$set": { "value": binary(&doc.value), "expire": BsonDateTime::from_millis(millis) },
        },
        None => doc! {
            "$set": { "value": binary(&doc.value) },
            "$unset": { "expire": "" },
        },
    }
}

fn to_document(doc: &StoredDocument) -> Document {
    let mut document = doc! { "_id": doc.key.as_str(), "value": binary(&doc.value) };
    if let Some(millis) = doc.expire.unix_millis() {
        document.insert("expire", BsonDateTime::from_millis(millis));
    }
    document
}

fn from_document(key: &str, document: &Document) -> DocResult<StoredDocument> {
    let malformed = |message: &str| DocumentError::Malformed {
        key: key.to_owned(),
        message: message.to_owned(),
    };
    let value = match document.get("value") {
        Some(Bson::Binary(binary)) => binary.bytes.clone(),
        Some(Bson::Null) | None => normalize_value(None).to_vec(),
        Some(_) => return Err(malformed("value is not binary")),
    };
    let expire = match document.get("expire") {
        Some(Bson::DateTime(at)) => Expiry::from_unix_millis(Some(at.timestamp_millis())),
        Some(Bson::Null) | None => Expiry::Never,
        Some(_) => return Err(malformed("expire is not a date")),
    };
    Ok(StoredDocument { key: key.to_owned(), value, expire })
}

#[async_trait]
impl DocumentCollection for MongoCollection {
    type Session = ClientSession;

    async fn start_session(&self) -> DocResult<ClientSession> {
        Ok(self.client.start_session().causal_consistency(true).await?)
    }

    async fn ensure_expiry_index(&self) -> DocResult<()> {
        let index = IndexModel::builder()
            .keys(doc! { "expire": 1 })
            .options(IndexOptions::builder().expire_after(EXPIRE_AFTER).build())
            .build();
        self.collection.create_index(index).await?;
        Ok(())
    }

    async fn find(&self, session: &mut ClientSession, key: &str) -> DocResult<Option<StoredDocument>> {
        let found = self.collection.find_one(doc! { "_id": key }).session(&mut *session).await?;
        found.map(|document| from_document(key, &document)).transpose()
    }

    async fn insert(&self, session: &mut ClientSession, doc: &StoredDocument) -> DocResult<()> {
        self.collection
            .insert_one(to_document(doc))
            .session(&mut *session)
            .await
            .map_err(|err| DocumentError::from_insert(&doc.key, err))?;
        Ok(())
    }

    async fn update_if_value(
        &self,
        session: &mut ClientSession,
        expected: &[u8],
        doc: &StoredDocument,
    ) -> DocResult<bool> {
        let result = self
            .collection
            .update_one(doc! { "_id": doc.key.as_str(), "value": binary(expected) }, set_update(doc))
            .session(&mut *session)
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn upsert(&self, session: &mut ClientSession, doc: &StoredDocument) -> DocResult<()> {
        self.collection
            .update_one(doc! { "_id": doc.key.as_str() }, set_update(doc))
            .upsert(true)
            .session(&mut *session)
            .await
            .map_err(|err| DocumentError::from_insert(&doc.key, err))?;
        Ok(())
    }

    async fn keys(
        &self,
        session: &mut ClientSession,
        now: chrono::DateTime<chrono::Utc>,
    ) -> DocResult<Vec<String>> {
        let filter = doc! {
            "$or": [
                { "expire": { "$exists": false } },
                { "expire": { "$gt": BsonDateTime::from_millis(now.timestamp_millis()) } },
            ],
        };
        let mut cursor = self
            .collection
            .find(filter)
            .projection(doc! { "_id": 1 })
            .sort(doc! { "_id": 1 })
            .session(&mut *session)
            .await?;
        let documents: Vec<Document> = cursor.stream(&mut *session).try_collect().await?;
        documents
            .iter()
            .map(|document| {
                document.get_str("_id").map(str::to_owned).map_err(|_| DocumentError::Malformed {
                    key: format!("{document}"),
                    message: "_id is not a string".to_owned(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn document_roundtrip_keeps_expiry() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let stored = StoredDocument::new("k", vec![0, 1, 2], Expiry::at(at));
        let document = to_document(&stored);
        assert_eq!(document.get_str("_id").unwrap(), "k");
        assert_eq!(from_document("k", &document).unwrap(), stored);
    }

    #[test]
    fn never_expiring_document_omits_expire() {
        let stored = StoredDocument::new("k", Vec::new(), Expiry::Never);
        let document = to_document(&stored);
        assert!(!document.contains_key("expire"));
        assert_eq!(from_document("k", &document).unwrap().value, Vec::<u8>::new());
    }

    #[test]
    fn update_unsets_expire_for_never() {
        let update = set_update(&StoredDocument::new("k", b"v".to_vec(), Expiry::Never));
        assert!(update.contains_key("$unset"));
        let update = set_update(&StoredDocument::new("k", b"v".to_vec(), Expiry::after(EXPIRE_AFTER)));
        assert!(!update.contains_key("$unset"));
    }

    #[test]
    fn null_or_missing_value_reads_as_empty() {
        let null = from_document("k", &doc! { "_id": "k", "value": Bson::Null }).unwrap();
        assert_eq!(null.value, Vec::<u8>::new());
        assert_eq!(null.expire, Expiry::Never);

        let missing = from_document("k", &doc! { "_id": "k" }).unwrap();
        assert_eq!(missing.value, Vec::<u8>::new());
    }

    #[test]
    fn non_binary_value_is_malformed() {
        let err = from_document("k", &doc! { "_id": "k", "value": "text" }).unwrap_err();
        assert!(matches!(err, DocumentError::Malformed { .. }));
    }
}
