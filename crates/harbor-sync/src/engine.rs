//! Reconciliation engine.
//!
//! Each call walks `begin → remote call → {success, offline, error} →
//! local mutation → done`. The engine keeps no state between calls: the
//! descriptor lives on the handle, the data lives in the store.
//!
//! ## Outcomes
//!
//! | remote outcome | caller sees | local effect |
//! |----------------|-------------|--------------|
//! | success        | `Ok`, confirmed | payload merged |
//! | not modified   | `Ok`, confirmed | local write persisted as-is |
//! | offline        | `Ok`, unconfirmed | local write persisted as-is |
//! | error          | `Err` with fallback | local write persisted if `save_on_error` |
//!
//! Deletes are always applied locally, whatever the server says.

use std::collections::HashSet;
use std::fmt::Write as _;

use chrono::Utc;
use harbor_core::{
    generate_identity, identity_of, is_tombstone, CoreError, EntityDescriptor, Filter, Identity,
    Record,
};
use harbor_store::{Store, StoreError, StoreExt, WriteBatch};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::handle::{Collection, Model};
use crate::options::{ErrorFallback, SyncConfig, SyncOptions};
use crate::transport::{Method, RemoteFailure, RemoteOutcome, Transport, TransportRequest};

/// The data a call delivers.
///
/// A local read yielding exactly one row is delivered as [`Payload::One`],
/// anything else as [`Payload::Many`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    One(Record),
    Many(Vec<Record>),
}

impl Payload {
    pub fn from_rows(mut rows: Vec<Record>) -> Self {
        if rows.len() == 1 {
            Payload::One(rows.remove(0))
        } else {
            Payload::Many(rows)
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::Empty => 0,
            Payload::One(_) => 1,
            Payload::Many(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_records(self) -> Vec<Record> {
        match self {
            Payload::Empty => Vec::new(),
            Payload::One(record) => vec![record],
            Payload::Many(rows) => rows,
        }
    }
}

/// Where the delivered data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Remote,
    NotModified,
    Offline,
    LocalOnly,
}

/// Per-record classification counts of a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Records skipped by strict validation.
    pub rejected: usize,
}

/// A call that reached the caller's success path.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncResult {
    pub payload: Payload,
    pub source: Source,
    /// Whether the server has seen this state.
    pub confirmed: bool,
    pub merge: MergeReport,
}

/// A call that reached the caller's error path.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct SyncFailure {
    #[source]
    pub error: SyncError,
    /// Local data to fall back on, per [`ErrorFallback`].
    pub fallback: Option<Payload>,
}

impl From<SyncError> for SyncFailure {
    fn from(error: SyncError) -> Self {
        Self {
            error,
            fallback: None,
        }
    }
}

impl From<StoreError> for SyncFailure {
    fn from(err: StoreError) -> Self {
        SyncError::from(err).into()
    }
}

/// Outcome of one sync call.
pub type SyncOutcome = std::result::Result<SyncResult, SyncFailure>;

/// The operation a caller asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOp {
    Create,
    Read,
    Update,
    Delete,
}

impl SyncOp {
    pub fn method(&self) -> Method {
        match self {
            SyncOp::Create => Method::Post,
            SyncOp::Read => Method::Get,
            SyncOp::Update => Method::Put,
            SyncOp::Delete => Method::Delete,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SyncOp::Create => "create",
            SyncOp::Read => "read",
            SyncOp::Update => "update",
            SyncOp::Delete => "delete",
        }
    }
}

/// The handle an operation works on.
pub enum SyncTarget<'a> {
    Model(&'a mut Model),
    Collection(&'a mut Collection),
}

/// Remote outcome after body parsing.
enum Reply {
    Data(Option<Value>),
    NotModified,
    Offline,
    LocalOnly,
    Failed(RemoteFailure),
}

impl Reply {
    fn source(&self) -> Source {
        match self {
            Reply::Data(_) | Reply::Failed(_) => Source::Remote,
            Reply::NotModified => Source::NotModified,
            Reply::Offline => Source::Offline,
            Reply::LocalOnly => Source::LocalOnly,
        }
    }
}

/// A record shaped for the entity's table.
struct Prepared {
    row: Record,
    capture_id: bool,
}

/// Reconciles a local store with a remote REST collection.
pub struct SyncEngine<S: Store, T: Transport> {
    store: S,
    transport: T,
    config: SyncConfig,
}

impl<S: Store, T: Transport> SyncEngine<S, T> {
    pub fn new(store: S, transport: T, config: SyncConfig) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Dispatch `op` on `target`.
    ///
    /// Create, update and delete need a model; read accepts either handle.
    pub async fn sync(&self, op: SyncOp, target: SyncTarget<'_>, options: SyncOptions) -> SyncOutcome {
        match (op, target) {
            (SyncOp::Create, SyncTarget::Model(model)) => self.create(model, options).await,
            (SyncOp::Read, SyncTarget::Model(model)) => self.read_model(model, options).await,
            (SyncOp::Read, SyncTarget::Collection(c)) => self.read(c, options).await,
            (SyncOp::Update, SyncTarget::Model(model)) => self.update(model, options).await,
            (SyncOp::Delete, SyncTarget::Model(model)) => self.delete(model, options).await,
            (op, SyncTarget::Collection(_)) => Err(SyncError::UnsupportedTarget {
                op: op.name(),
                target: "collection",
            }
            .into()),
        }
    }

    /// POST the model, then persist the server's version of it.
    pub async fn create(&self, model: &mut Model, options: SyncOptions) -> SyncOutcome {
        let entity = model.entity().clone();
        let body = model.to_json().to_string();
        let reply = self
            .remote(&entity, Method::Post, None, Some(body), &options)
            .await?;
        self.finish_write(model, reply, &options).await
    }

    /// PUT the model, then persist the server's version of it.
    pub async fn update(&self, model: &mut Model, options: SyncOptions) -> SyncOutcome {
        let entity = model.entity().clone();
        let id = model
            .id()
            .ok_or_else(|| SyncError::MissingIdentity(entity.name().to_string()))?;
        let body = model.to_json().to_string();
        let reply = self
            .remote(&entity, Method::Put, Some(&id), Some(body), &options)
            .await?;
        self.finish_write(model, reply, &options).await
    }

    /// DELETE the model remotely and locally.
    ///
    /// The local row is removed and the handle's identity cleared whatever
    /// the remote outcome.
    pub async fn delete(&self, model: &mut Model, options: SyncOptions) -> SyncOutcome {
        let entity = model.entity().clone();
        let id = model
            .id()
            .ok_or_else(|| SyncError::MissingIdentity(entity.name().to_string()))?;
        let reply = self
            .remote(&entity, Method::Delete, Some(&id), None, &options)
            .await?;

        let mut batch = WriteBatch::for_entity(&entity);
        batch.delete(id.to_sql());
        let outcome = self.store.apply(batch).await?;
        model.clear_id();
        debug!(entity = entity.name(), %id, changes = outcome.changes, "deleted locally");

        let merge = MergeReport {
            deleted: outcome.changes,
            ..MergeReport::default()
        };
        let payload = Payload::One(model.attributes().clone());
        match reply {
            Reply::Failed(failure) => Err(SyncFailure {
                error: failure.into(),
                fallback: self.fallback(|| Some(payload)),
            }),
            reply => Ok(SyncResult {
                confirmed: matches!(reply, Reply::Data(_) | Reply::NotModified),
                source: reply.source(),
                payload,
                merge,
            }),
        }
    }

    /// GET one model by identity and merge whatever comes back.
    pub async fn read_model(&self, model: &mut Model, mut options: SyncOptions) -> SyncOutcome {
        let entity = model.entity().clone();
        let id = model
            .id()
            .ok_or_else(|| SyncError::MissingIdentity(entity.name().to_string()))?;

        self.deliver_local_first(&entity, Some(&id), &mut options)
            .await;
        let reply = self
            .remote(&entity, Method::Get, Some(&id), None, &options)
            .await?;
        let (source, confirmed, merge) = self.merge_reply(&entity, reply, &options, Some(&id)).await?;

        let payload = Payload::from_rows(self.local_read(&entity, Some(&id), &options).await?);
        if let Payload::One(record) = &payload {
            model.replace(record.clone());
        }
        Ok(SyncResult {
            payload,
            source,
            confirmed,
            merge,
        })
    }

    /// GET the collection, merge it as one batch, and deliver the local view.
    pub async fn read(&self, collection: &mut Collection, mut options: SyncOptions) -> SyncOutcome {
        let entity = collection.entity().clone();

        self.deliver_local_first(&entity, None, &mut options).await;
        let reply = self
            .remote(&entity, Method::Get, None, None, &options)
            .await?;
        let (source, confirmed, merge) = self.merge_reply(&entity, reply, &options, None).await?;

        let rows = self.local_read(&entity, None, &options).await?;
        collection.replace(rows.clone());
        Ok(SyncResult {
            payload: Payload::from_rows(rows),
            source,
            confirmed,
            merge,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Remote
    // ─────────────────────────────────────────────────────────────────────────

    async fn remote(
        &self,
        entity: &EntityDescriptor,
        method: Method,
        id: Option<&Identity>,
        body: Option<String>,
        options: &SyncOptions,
    ) -> Result<Reply, SyncError> {
        if options.local_only {
            return Ok(Reply::LocalOnly);
        }

        let base = options
            .url
            .clone()
            .or_else(|| entity.base_url())
            .ok_or_else(|| SyncError::MissingBaseUrl(entity.name().to_string()))?;
        let url = match id {
            Some(id) => format!("{}/{}", base.trim_end_matches('/'), id),
            None => base,
        };

        let mut request = TransportRequest::new(method, url, options.resolve_timeout(&self.config));
        request.query = entity
            .url_params()
            .iter()
            .chain(options.url_params.iter())
            .cloned()
            .collect();
        request.headers = entity
            .headers()
            .iter()
            .chain(options.headers.iter())
            .cloned()
            .collect();
        if request.header("Content-Type").is_none() {
            request
                .headers
                .push(("Content-Type".to_string(), "application/json".to_string()));
        }
        request.body = body;
        if options.emulate_http {
            request = request.emulate_http();
        }

        debug!(
            entity = entity.name(),
            method = request.method.as_str(),
            url = %request.url,
            "remote call"
        );

        Ok(match self.transport.call(request).await {
            RemoteOutcome::Success(response) => match response.json() {
                Ok(data) => Reply::Data(data),
                Err(e) => Reply::Failed(RemoteFailure {
                    status: Some(response.status),
                    reason: format!("invalid JSON: {}", e),
                    body: Some(response.body),
                }),
            },
            RemoteOutcome::NotModified => Reply::NotModified,
            RemoteOutcome::Offline => Reply::Offline,
            RemoteOutcome::Error(failure) => Reply::Failed(failure),
        })
    }

    fn fallback(&self, local: impl FnOnce() -> Option<Payload>) -> Option<Payload> {
        match self.config.error_fallback {
            ErrorFallback::LocalData => local(),
            ErrorFallback::RawFailure => None,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Settle a create or update once the server has answered.
    async fn finish_write(&self, model: &mut Model, reply: Reply, options: &SyncOptions) -> SyncOutcome {
        let entity = model.entity().clone();
        let source = reply.source();

        let incoming = match reply {
            Reply::Data(None) => model.attributes().clone(),
            Reply::Data(Some(Value::Object(server))) => {
                // the server's fields win over what was sent
                let mut merged = model.attributes().clone();
                merged.extend(server);
                merged
            }
            Reply::Data(Some(other)) => {
                return Err(SyncError::InvalidPayload(format!(
                    "expected an object, got {}",
                    kind_of(&other)
                ))
                .into())
            }
            Reply::NotModified | Reply::Offline | Reply::LocalOnly => model.attributes().clone(),
            Reply::Failed(failure) => {
                warn!(entity = entity.name(), reason = %failure.reason, "write rejected by server");
                let saved = if options.resolve_save_on_error(&entity, &self.config) {
                    match self.persist_one(&entity, &model.attributes().clone(), options).await {
                        Ok((stored, _)) => {
                            model.replace(stored.clone());
                            Some(Payload::One(stored))
                        }
                        Err(e) => {
                            warn!(entity = entity.name(), error = %e, "could not save locally after server error");
                            None
                        }
                    }
                } else {
                    None
                };
                return Err(SyncFailure {
                    error: failure.into(),
                    fallback: self.fallback(|| saved),
                });
            }
        };

        let (stored, merge) = self.persist_one(&entity, &incoming, options).await?;
        model.replace(stored.clone());
        if merge.deleted > 0 {
            model.clear_id();
        }
        Ok(SyncResult {
            payload: Payload::One(stored),
            confirmed: matches!(source, Source::Remote | Source::NotModified),
            source,
            merge,
        })
    }

    /// Insert, update or delete one record, returning the stored row.
    async fn persist_one(
        &self,
        entity: &EntityDescriptor,
        incoming: &Record,
        options: &SyncOptions,
    ) -> Result<(Record, MergeReport), SyncError> {
        let id_attribute = entity.id_attribute();
        let id = identity_of(incoming, id_attribute);
        let mut merge = MergeReport::default();
        let mut batch = WriteBatch::for_entity(entity);

        if self.is_tombstone(entity, incoming) {
            if let Some(id) = &id {
                batch.delete(id.to_sql());
                merge.deleted = self.store.apply(batch).await?.changes;
            }
            return Ok((incoming.clone(), merge));
        }

        let known = match &id {
            Some(id) => self.store.contains(entity, &id.to_sql()).await?,
            None => false,
        };

        let prepared = if let (true, Some(id)) = (known, &id) {
            let prepared = self.prepare_row(entity, incoming, options, false)?;
            batch.update(prepared.row.clone(), id.to_sql());
            merge.updated = 1;
            prepared
        } else {
            let prepared = match self.prepare_row(entity, incoming, options, true) {
                Ok(prepared) => prepared,
                Err(SyncError::Validation { missing }) => {
                    warn!(entity = entity.name(), ?missing, "strict validation rejected record");
                    return Err(SyncError::Validation { missing });
                }
                Err(e) => return Err(e),
            };
            batch.insert(prepared.row.clone(), prepared.capture_id);
            merge.inserted = 1;
            prepared
        };

        let outcome = self.store.apply(batch).await?;
        let mut row = prepared.row;
        if let Some(Some(rowid)) = outcome.ids.first() {
            row.insert(id_attribute.to_string(), Value::from(*rowid));
        }

        let stored = match identity_of(&row, id_attribute) {
            Some(id) => self
                .store
                .find(entity.table(), id_attribute, &id.to_sql())
                .await?
                .unwrap_or(row),
            None => row,
        };
        Ok((stored, merge))
    }

    /// Shape an incoming record into the entity's declared columns.
    ///
    /// Structured values become JSON text and the last-modified column is
    /// stamped. Inserts also get an identity and pass strict validation.
    fn prepare_row(
        &self,
        entity: &EntityDescriptor,
        incoming: &Record,
        options: &SyncOptions,
        insert: bool,
    ) -> Result<Prepared, SyncError> {
        let id_attribute = entity.id_attribute();
        let stamp = entity
            .last_modified()
            .filter(|_| !options.suppress_last_modified);

        if insert && options.resolve_strict(entity) {
            let missing: Vec<String> = entity
                .column_names()
                .filter(|c| *c != id_attribute)
                .filter(|c| stamp.map_or(true, |lm| lm.column != *c))
                .filter(|c| !incoming.contains_key(*c))
                .map(String::from)
                .collect();
            if !missing.is_empty() {
                return Err(SyncError::Validation { missing });
            }
        }

        let mut row = Record::new();
        for column in entity.column_names() {
            let value = match incoming.get(column) {
                Some(v @ (Value::Array(_) | Value::Object(_))) => Value::String(v.to_string()),
                Some(v) => v.clone(),
                None => Value::Null,
            };
            row.insert(column.to_string(), value);
        }

        if let Some(lm) = stamp {
            let mut now = String::new();
            write!(now, "{}", Utc::now().format(&lm.format)).map_err(|_| {
                CoreError::InvalidDescriptor(format!("bad last-modified format {:?}", lm.format))
            })?;
            row.insert(lm.column.clone(), Value::String(now));
        }

        let mut capture_id = false;
        if insert && identity_of(&row, id_attribute).is_none() {
            if entity.uses_generated_identity() {
                row.insert(id_attribute.to_string(), Value::String(generate_identity()));
            } else {
                row.insert(id_attribute.to_string(), Value::Null);
                capture_id = true;
            }
        }

        Ok(Prepared { row, capture_id })
    }

    fn is_tombstone(&self, entity: &EntityDescriptor, record: &Record) -> bool {
        entity
            .deleted_marker()
            .map_or(false, |marker| is_tombstone(record, marker))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Merge a read reply, or turn a failed one into the error path.
    async fn merge_reply(
        &self,
        entity: &EntityDescriptor,
        reply: Reply,
        options: &SyncOptions,
        id: Option<&Identity>,
    ) -> Result<(Source, bool, MergeReport), SyncFailure> {
        let source = reply.source();
        let error = match reply {
            Reply::Data(data) => match records_of(data) {
                Ok(records) => {
                    let merge = self.merge_batch(entity, records, options).await?;
                    return Ok((source, true, merge));
                }
                Err(e) => e,
            },
            Reply::NotModified => return Ok((source, true, MergeReport::default())),
            Reply::Offline | Reply::LocalOnly => {
                return Ok((source, false, MergeReport::default()))
            }
            Reply::Failed(failure) => failure.into(),
        };

        warn!(entity = entity.name(), %error, "read failed");
        let local = match self.config.error_fallback {
            ErrorFallback::LocalData => self
                .local_read(entity, id, options)
                .await
                .ok()
                .map(Payload::from_rows),
            ErrorFallback::RawFailure => None,
        };
        Err(SyncFailure {
            error,
            fallback: local,
        })
    }

    /// Classify every incoming record against the local identity set and
    /// commit the resulting writes as one transaction.
    ///
    /// Classification yields to the scheduler every `chunk_size` records.
    /// Records rejected by strict validation are skipped; the rest proceed.
    pub async fn merge_batch(
        &self,
        entity: &EntityDescriptor,
        records: Vec<Record>,
        options: &SyncOptions,
    ) -> Result<MergeReport, SyncError> {
        let id_attribute = entity.id_attribute();
        let mut batch = WriteBatch::for_entity(entity);
        let mut known: HashSet<Identity> = if options.reset_before_merge {
            batch.clear();
            HashSet::new()
        } else {
            self.store.identities(entity.table(), id_attribute).await?
        };

        let mut merge = MergeReport::default();
        let chunk_size = self.config.chunk_size.max(1);

        for (i, record) in records.iter().enumerate() {
            if i > 0 && i % chunk_size == 0 {
                tokio::task::yield_now().await;
            }

            let id = identity_of(record, id_attribute);
            if self.is_tombstone(entity, record) {
                if let Some(id) = id {
                    if known.remove(&id) {
                        batch.delete(id.to_sql());
                        merge.deleted += 1;
                    }
                }
                continue;
            }

            match id {
                Some(id) if known.contains(&id) => {
                    let prepared = self.prepare_row(entity, record, options, false)?;
                    batch.update(prepared.row, id.to_sql());
                    merge.updated += 1;
                }
                _ => match self.prepare_row(entity, record, options, true) {
                    Ok(prepared) => {
                        if let Some(new_id) = identity_of(&prepared.row, id_attribute) {
                            known.insert(new_id);
                        }
                        batch.insert(prepared.row, prepared.capture_id);
                        merge.inserted += 1;
                    }
                    Err(SyncError::Validation { missing }) => {
                        warn!(entity = entity.name(), ?missing, "strict validation rejected record");
                        merge.rejected += 1;
                    }
                    Err(e) => return Err(e),
                },
            }
        }

        self.store.apply(batch).await?;
        info!(
            entity = entity.name(),
            received = records.len(),
            inserted = merge.inserted,
            updated = merge.updated,
            deleted = merge.deleted,
            rejected = merge.rejected,
            "merged"
        );
        Ok(merge)
    }

    /// The local rows a read delivers.
    async fn local_read(
        &self,
        entity: &EntityDescriptor,
        id: Option<&Identity>,
        options: &SyncOptions,
    ) -> Result<Vec<Record>, SyncError> {
        if let Some(raw) = &options.raw_query {
            return Ok(self.store.query_raw(raw).await?);
        }
        let mut filter = options.filter.clone().unwrap_or_else(Filter::new);
        if let Some(id) = id {
            filter = filter.where_eq(entity.id_attribute(), id.to_sql());
        }
        Ok(self.store.query(entity.table(), &filter).await?)
    }

    async fn deliver_local_first(
        &self,
        entity: &EntityDescriptor,
        id: Option<&Identity>,
        options: &mut SyncOptions,
    ) {
        let Some(tx) = options.fetch_local_first.take() else {
            return;
        };
        match self.local_read(entity, id, options).await {
            Ok(rows) => {
                // the receiver may have given up; that is not our concern
                let _ = tx.send(Payload::from_rows(rows));
            }
            Err(e) => warn!(entity = entity.name(), error = %e, "local-first read failed"),
        }
    }
}

/// Normalise a read body into records.
fn records_of(data: Option<Value>) -> Result<Vec<Record>, SyncError> {
    match data {
        None => Ok(Vec::new()),
        Some(Value::Object(record)) => Ok(vec![record]),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(record) => Ok(record),
                other => Err(SyncError::InvalidPayload(format!(
                    "expected objects, got {}",
                    kind_of(&other)
                ))),
            })
            .collect(),
        Some(other) => Err(SyncError::InvalidPayload(format!(
            "expected an object or a list, got {}",
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use harbor_core::SqlValue;
    use harbor_store::SqliteStore;
    use serde_json::json;
    use tokio::sync::oneshot;

    use crate::transport::memory::ScriptedTransport;
    use crate::transport::{RemoteResponse, METHOD_OVERRIDE_HEADER};

    type Engine = SyncEngine<SqliteStore, ScriptedTransport>;

    fn record(v: Value) -> Record {
        match v {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn wine() -> Arc<EntityDescriptor> {
        Arc::new(
            EntityDescriptor::builder("wine")
                .column("id", "INTEGER PRIMARY KEY AUTOINCREMENT")
                .column("name", "text")
                .column("year", "integer")
                .column("grapes", "text")
                .id_attribute("id")
                .base_url("https://api.example.com/wines")
                .build()
                .unwrap(),
        )
    }

    async fn engine_for(entity: &EntityDescriptor) -> Engine {
        let store = SqliteStore::open_memory().unwrap();
        store.migrate(entity).await.unwrap();
        SyncEngine::new(store, ScriptedTransport::new(), SyncConfig::default())
    }

    async fn seed(engine: &Engine, entity: &EntityDescriptor, ids: &[i64]) {
        let mut batch = WriteBatch::for_entity(entity);
        for id in ids {
            batch.insert(
                record(json!({"id": id, "name": format!("wine {}", id), "year": 2000 + id})),
                false,
            );
        }
        engine.store().apply(batch).await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_merge_classification() {
        let entity = wine();
        let engine = engine_for(&entity).await;
        seed(&engine, &entity, &[1, 2, 3]).await;

        engine
            .transport()
            .push_json(json!([
                {"id": 2, "name": "renamed", "year": 2002},
                {"id": 4, "name": "new", "year": 2004},
                {"id": 3, "is_deleted": true}
            ]))
            .await;

        let mut collection = Collection::new(entity.clone());
        let result = engine.read(&mut collection, SyncOptions::new()).await.unwrap();

        assert_eq!(
            result.merge,
            MergeReport {
                inserted: 1,
                updated: 1,
                deleted: 1,
                rejected: 0
            }
        );
        assert_eq!(result.source, Source::Remote);
        assert!(result.confirmed);

        let names: Vec<(i64, String)> = collection
            .iter()
            .map(|r| {
                (
                    r["id"].as_i64().unwrap(),
                    r["name"].as_str().unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(
            names,
            vec![
                (1, "wine 1".to_string()),
                (2, "renamed".to_string()),
                (4, "new".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_string_identities_match_integer_rows() {
        let entity = wine();
        let engine = engine_for(&entity).await;
        seed(&engine, &entity, &[4]).await;

        engine
            .transport()
            .push_json(json!([{"id": "4", "name": "same row", "year": 2004}]))
            .await;
        let result = engine
            .read(&mut Collection::new(entity.clone()), SyncOptions::new())
            .await
            .unwrap();
        assert_eq!(result.merge.updated, 1);
        assert_eq!(result.merge.inserted, 0);
    }

    #[tokio::test]
    async fn test_offline_read_equals_local_read() {
        let entity = wine();
        let engine = engine_for(&entity).await;
        seed(&engine, &entity, &[1, 2]).await;

        let mut collection = Collection::new(entity.clone());
        let result = engine.read(&mut collection, SyncOptions::new()).await.unwrap();

        assert_eq!(result.source, Source::Offline);
        assert!(!result.confirmed);
        let local = engine.store().all(&entity).await.unwrap();
        assert_eq!(result.payload, Payload::Many(local));
    }

    #[tokio::test]
    async fn test_single_row_read_is_bare_record() {
        let entity = wine();
        let engine = engine_for(&entity).await;
        seed(&engine, &entity, &[1, 2]).await;

        let result = engine
            .read(
                &mut Collection::new(entity.clone()),
                SyncOptions::new()
                    .local_only()
                    .filter(Filter::new().where_eq("id", 2)),
            )
            .await
            .unwrap();
        assert_eq!(result.source, Source::LocalOnly);
        assert!(matches!(result.payload, Payload::One(ref r) if r["id"] == json!(2)));
        assert!(engine.transport().requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_strict_rejects_and_continues() {
        let entity = wine();
        let engine = engine_for(&entity).await;

        engine
            .transport()
            .push_json(json!([
                {"id": 1, "name": "complete", "year": 2001, "grapes": "Merlot"},
                {"id": 2, "name": "no grapes", "year": 2002},
                {"id": 3, "name": "also complete", "year": 2003, "grapes": "Syrah"}
            ]))
            .await;

        let result = engine
            .read(&mut Collection::new(entity.clone()), SyncOptions::new().strict(true))
            .await
            .unwrap();
        assert_eq!(result.merge.inserted, 2);
        assert_eq!(result.merge.rejected, 1);
        assert_eq!(result.payload.len(), 2);
    }

    #[tokio::test]
    async fn test_reset_before_merge() {
        let entity = wine();
        let engine = engine_for(&entity).await;
        seed(&engine, &entity, &[1, 2, 3]).await;

        engine
            .transport()
            .push_json(json!([{"id": 2, "name": "kept", "year": 2002}]))
            .await;
        let result = engine
            .read(
                &mut Collection::new(entity.clone()),
                SyncOptions::new().reset_before_merge(),
            )
            .await
            .unwrap();
        assert_eq!(result.merge.inserted, 1);
        assert!(matches!(result.payload, Payload::One(ref r) if r["name"] == json!("kept")));
    }

    #[tokio::test]
    async fn test_read_error_falls_back_to_local_data() {
        let entity = wine();
        let engine = engine_for(&entity).await;
        seed(&engine, &entity, &[1]).await;

        engine
            .transport()
            .push(RemoteOutcome::Error(RemoteFailure {
                status: Some(500),
                body: Some("boom".into()),
                reason: "Internal Server Error".into(),
            }))
            .await;
        let failure = engine
            .read(&mut Collection::new(entity.clone()), SyncOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(
            failure.error,
            SyncError::Remote {
                status: Some(500),
                ..
            }
        ));
        assert_eq!(failure.fallback.map(|p| p.len()), Some(1));
    }

    #[tokio::test]
    async fn test_unparseable_body_is_an_error() {
        let entity = wine();
        let store = SqliteStore::open_memory().unwrap();
        store.migrate(&entity).await.unwrap();
        let config = SyncConfig {
            error_fallback: ErrorFallback::RawFailure,
            ..SyncConfig::default()
        };
        let engine = SyncEngine::new(store, ScriptedTransport::new(), config);

        engine
            .transport()
            .push(RemoteOutcome::Success(RemoteResponse {
                status: 200,
                body: "<html>oops</html>".into(),
            }))
            .await;
        let failure = engine
            .read(&mut Collection::new(entity.clone()), SyncOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(failure.error, SyncError::Remote { .. }));
        assert!(failure.fallback.is_none());
    }

    #[tokio::test]
    async fn test_fetch_local_first_delivers_before_remote() {
        let entity = wine();
        let engine = engine_for(&entity).await;
        seed(&engine, &entity, &[1]).await;
        engine
            .transport()
            .push_json(json!([{"id": 2, "name": "remote", "year": 2002}]))
            .await;

        let (tx, rx) = oneshot::channel();
        let result = engine
            .read(
                &mut Collection::new(entity.clone()),
                SyncOptions::new().fetch_local_first(tx),
            )
            .await
            .unwrap();

        let provisional = rx.await.unwrap();
        assert_eq!(provisional.len(), 1);
        assert_eq!(result.payload.len(), 2);
    }

    #[tokio::test]
    async fn test_create_offline_captures_rowid() {
        let entity = wine();
        let engine = engine_for(&entity).await;

        let mut model = Model::new(
            entity.clone(),
            record(json!({"name": "Margaux", "year": 2009, "grapes": "Merlot"})),
        );
        let result = engine.create(&mut model, SyncOptions::new()).await.unwrap();

        assert_eq!(result.source, Source::Offline);
        assert!(!result.confirmed);
        assert_eq!(model.id(), Some(Identity::Integer(1)));
        assert_eq!(result.merge.inserted, 1);
    }

    #[tokio::test]
    async fn test_create_merges_server_identity() {
        let entity = wine();
        let engine = engine_for(&entity).await;
        engine.transport().push_json(json!({"id": 42})).await;

        let mut model = Model::new(
            entity.clone(),
            record(json!({"name": "Barolo", "year": 2012})),
        );
        let result = engine.create(&mut model, SyncOptions::new()).await.unwrap();

        assert!(result.confirmed);
        assert_eq!(model.id(), Some(Identity::Integer(42)));
        let stored = engine
            .store()
            .find("wine", "id", &harbor_core::SqlValue::Integer(42))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["name"], json!("Barolo"));

        let requests = engine.transport().requests().await;
        assert_eq!(requests[0].method, Method::Post);
        assert_eq!(requests[0].header("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn test_create_tombstone_deletes() {
        let entity = wine();
        let engine = engine_for(&entity).await;
        seed(&engine, &entity, &[7]).await;
        engine
            .transport()
            .push_json(json!({"id": 7, "is_deleted": 1}))
            .await;

        let mut model = Model::new(entity.clone(), record(json!({"name": "gone"})));
        let result = engine.create(&mut model, SyncOptions::new()).await.unwrap();
        assert_eq!(result.merge.deleted, 1);
        assert!(engine.store().all(&entity).await.unwrap().is_empty());
        assert_eq!(model.id(), None);
        assert_eq!(model.get("name"), Some(&json!("gone")));
    }

    #[tokio::test]
    async fn test_create_server_error_respects_save_on_error() {
        let entity = wine();
        let engine = engine_for(&entity).await;
        let failure = || {
            RemoteOutcome::Error(RemoteFailure {
                status: Some(422),
                body: None,
                reason: "Unprocessable Entity".into(),
            })
        };

        engine.transport().push(failure()).await;
        let mut model = Model::new(entity.clone(), record(json!({"name": "unsaved"})));
        let err = engine
            .create(&mut model, SyncOptions::new().save_on_error(false))
            .await
            .unwrap_err();
        assert!(err.fallback.is_none());
        assert!(engine.store().all(&entity).await.unwrap().is_empty());

        engine.transport().push(failure()).await;
        let mut model = Model::new(entity.clone(), record(json!({"name": "saved"})));
        let err = engine.create(&mut model, SyncOptions::new()).await.unwrap_err();
        assert!(matches!(err.fallback, Some(Payload::One(_))));
        assert_eq!(engine.store().all(&entity).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_requires_identity() {
        let entity = wine();
        let engine = engine_for(&entity).await;

        let mut model = Model::new(entity.clone(), record(json!({"name": "anonymous"})));
        let err = engine.update(&mut model, SyncOptions::new()).await.unwrap_err();
        assert!(matches!(err.error, SyncError::MissingIdentity(_)));
        assert!(engine.transport().requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_with_method_override() {
        let entity = wine();
        let engine = engine_for(&entity).await;
        seed(&engine, &entity, &[5]).await;
        engine.transport().push_json(json!({"id": 5, "name": "updated", "year": 2005})).await;

        let mut model = Model::new(entity.clone(), record(json!({"id": 5, "name": "updated"})));
        let result = engine
            .update(
                &mut model,
                SyncOptions::new()
                    .emulate_http()
                    .url_param("api_key", "k")
                    .timeout(Duration::from_secs(2)),
            )
            .await
            .unwrap();
        assert_eq!(result.merge.updated, 1);

        let request = &engine.transport().requests().await[0];
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.header(METHOD_OVERRIDE_HEADER), Some("PUT"));
        assert_eq!(request.url, "https://api.example.com/wines/5");
        assert_eq!(request.query, vec![("api_key".to_string(), "k".to_string())]);
        assert_eq!(request.timeout, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_delete_is_local_even_on_error() {
        let entity = wine();
        let engine = engine_for(&entity).await;
        seed(&engine, &entity, &[1, 2]).await;
        engine
            .transport()
            .push(RemoteOutcome::Error(RemoteFailure {
                status: Some(503),
                body: None,
                reason: "Service Unavailable".into(),
            }))
            .await;

        let mut model = Model::new(entity.clone(), record(json!({"id": 1, "name": "wine 1"})));
        let err = engine.delete(&mut model, SyncOptions::new()).await.unwrap_err();
        assert!(matches!(err.error, SyncError::Remote { .. }));
        assert_eq!(model.id(), None);
        assert_eq!(engine.store().all(&entity).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_base_url() {
        let entity = Arc::new(
            EntityDescriptor::builder("note")
                .column("body", "text")
                .build()
                .unwrap(),
        );
        let engine = engine_for(&entity).await;

        let err = engine
            .read(&mut Collection::new(entity.clone()), SyncOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err.error, SyncError::MissingBaseUrl(_)));

        // local-only calls never need one
        let mut model = Model::new(entity.clone(), record(json!({"body": "hi"})));
        let ok = engine
            .create(&mut model, SyncOptions::new().local_only())
            .await
            .unwrap();
        assert!(matches!(model.id(), Some(Identity::Text(_))));
        assert_eq!(ok.source, Source::LocalOnly);
    }

    #[tokio::test]
    async fn test_last_modified_overwrites_incoming() {
        let entity = Arc::new(
            EntityDescriptor::builder("wine")
                .column("name", "text")
                .column("updated", "datetime")
                .last_modified("updated")
                .build()
                .unwrap(),
        );
        let engine = engine_for(&entity).await;

        let mut model = Model::new(
            entity.clone(),
            record(json!({"name": "Rioja", "updated": "1999-01-01 00:00:00"})),
        );
        let result = engine
            .create(&mut model, SyncOptions::new().local_only())
            .await
            .unwrap();
        let Payload::One(stored) = result.payload else {
            panic!("expected one record");
        };
        assert_ne!(stored["updated"], json!("1999-01-01 00:00:00"));
        assert_eq!(stored["updated"].as_str().unwrap().len(), 19);

        let mut kept = Model::new(
            entity.clone(),
            record(json!({"name": "Rioja", "updated": "1999-01-01 00:00:00"})),
        );
        let result = engine
            .create(&mut kept, SyncOptions::new().local_only().suppress_last_modified())
            .await
            .unwrap();
        assert!(matches!(result.payload, Payload::One(ref r) if r["updated"] == json!("1999-01-01 00:00:00")));
    }

    #[tokio::test]
    async fn test_dispatcher_rejects_collection_writes() {
        let entity = wine();
        let engine = engine_for(&entity).await;
        let mut collection = Collection::new(entity.clone());

        let err = engine
            .sync(
                SyncOp::Delete,
                SyncTarget::Collection(&mut collection),
                SyncOptions::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err.error, SyncError::UnsupportedTarget { .. }));
    }

    #[tokio::test]
    async fn test_read_model_by_identity() {
        let entity = wine();
        let engine = engine_for(&entity).await;
        seed(&engine, &entity, &[1, 2]).await;
        engine
            .transport()
            .push_json(json!({"id": 2, "name": "fresh", "year": 2002}))
            .await;

        let mut model = Model::new(entity.clone(), record(json!({"id": 2})));
        let result = engine
            .sync(SyncOp::Read, SyncTarget::Model(&mut model), SyncOptions::new())
            .await
            .unwrap();

        assert!(matches!(result.payload, Payload::One(_)));
        assert_eq!(model.get("name"), Some(&json!("fresh")));
        assert_eq!(
            engine.transport().requests().await[0].url,
            "https://api.example.com/wines/2"
        );
    }

    #[derive(Clone, Default)]
    struct Logs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Logs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Logs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn test_strict_single_write_is_logged_and_skipped() {
        let logs = Logs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let entity = wine();
        let engine = engine_for(&entity).await;
        let mut model = Model::new(entity.clone(), record(json!({"name": "no grapes"})));

        let failure = engine
            .create(&mut model, SyncOptions::new().local_only().strict(true))
            .await
            .unwrap_err();

        assert!(matches!(failure.error, SyncError::Validation { ref missing } if missing == &["year", "grapes"]));
        assert!(engine.store().all(&entity).await.unwrap().is_empty());
        assert!(logs.contents().contains("strict validation rejected record"));
    }

    #[tokio::test]
    async fn test_padded_text_identities_update_their_row() {
        let entity = Arc::new(
            EntityDescriptor::builder("bin")
                .column("code", "text PRIMARY KEY")
                .column("name", "text")
                .id_attribute("code")
                .base_url("https://api.example.com/bins")
                .build()
                .unwrap(),
        );
        let engine = engine_for(&entity).await;
        let mut batch = WriteBatch::for_entity(&entity);
        batch.insert(record(json!({"code": "0042", "name": "old"})), false);
        engine.store().apply(batch).await.unwrap();

        engine
            .transport()
            .push_json(json!([
                {"code": "0042", "name": "new"},
                {"code": "42", "name": "other"}
            ]))
            .await;
        let result = engine
            .read(&mut Collection::new(entity.clone()), SyncOptions::new())
            .await
            .unwrap();
        assert_eq!(result.merge.updated, 1);
        assert_eq!(result.merge.inserted, 1);

        let padded = engine
            .store()
            .find("bin", "code", &SqlValue::Text("0042".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(padded["name"], json!("new"));

        engine
            .transport()
            .push_json(json!([{"code": "0042", "is_deleted": true}]))
            .await;
        let result = engine
            .read(&mut Collection::new(entity.clone()), SyncOptions::new())
            .await
            .unwrap();
        assert_eq!(result.merge.deleted, 1);
        assert!(matches!(result.payload, Payload::One(ref r) if r["code"] == json!("42")));
    }

    fn labelled_wine() -> Arc<EntityDescriptor> {
        Arc::new(
            EntityDescriptor::builder("wine")
                .column("id", "INTEGER PRIMARY KEY")
                .column("name", "text UNIQUE")
                .id_attribute("id")
                .base_url("https://api.example.com/wines")
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_batch_spanning_chunks_commits_once() {
        let entity = labelled_wine();
        let store = SqliteStore::open_memory().unwrap();
        store.migrate(&entity).await.unwrap();
        let config = SyncConfig {
            chunk_size: 2,
            ..SyncConfig::default()
        };
        let engine = SyncEngine::new(store, ScriptedTransport::new(), config);

        let mut batch = WriteBatch::for_entity(&entity);
        batch.insert(record(json!({"id": 1, "name": "Barolo"})), false);
        batch.insert(record(json!({"id": 2, "name": "Rioja"})), false);
        engine.store().apply(batch).await.unwrap();

        let records: Vec<Record> = (1..=5)
            .map(|id| record(json!({"id": id, "name": format!("label {}", id)})))
            .collect();
        let merge = engine
            .merge_batch(&entity, records, &SyncOptions::new())
            .await
            .unwrap();
        assert_eq!(
            merge,
            MergeReport {
                inserted: 3,
                updated: 2,
                deleted: 0,
                rejected: 0
            }
        );
        assert_eq!(engine.store().all(&entity).await.unwrap().len(), 5);

        // the last insert collides with the first, so nothing lands
        let records: Vec<Record> = (6..=10)
            .map(|id| {
                let label = if id == 10 { 6 } else { id };
                record(json!({"id": id, "name": format!("label {}", label)}))
            })
            .collect();
        let err = engine
            .merge_batch(&entity, records, &SyncOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Store(_)));

        let ids: Vec<i64> = engine
            .store()
            .all(&entity)
            .await
            .unwrap()
            .iter()
            .map(|r| r["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }
}
