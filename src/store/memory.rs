//! In-memory store for unit tests
//!
//! Speaks the subset of the CouchDB HTTP protocol the client uses: revision
//! trees with open leaves, `_bulk_docs`, `open_revs=all`, design documents with
//! the conflict view, `_replicate` and `_active_tasks`. Fault injection covers
//! offline transports, refused replications, rejected document writes and
//! stores that do not honour `all_or_nothing`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::{json, Map, Value};
use url::Url;
use uuid::Uuid;

use crate::error::{CouchError, Result};

use super::server::{Credentials, Server};
use super::transport::{StoreRequest, StoreResponse, Transport};

const BASE_URL: &str = "http://couch.test/";

pub(crate) struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    databases: BTreeMap<String, MemDatabase>,
    tasks: Vec<Value>,
    denied_sources: BTreeSet<String>,
    offline: bool,
    requests: Vec<(Method, String)>,
    replicate_bodies: Vec<Value>,
    rejected_ids: BTreeSet<String>,
    ignore_all_or_nothing: bool,
}

#[derive(Debug, Clone, Default)]
struct MemDatabase {
    docs: BTreeMap<String, RevTree>,
}

#[derive(Debug, Clone)]
struct RevNode {
    parent: Option<String>,
    body: Map<String, Value>,
    deleted: bool,
}

/// Revision tree of one document key
#[derive(Debug, Clone, Default)]
struct RevTree {
    nodes: BTreeMap<String, RevNode>,
}

fn generation(rev: &str) -> u64 {
    rev.split('-')
        .next()
        .and_then(|gen| gen.parse().ok())
        .unwrap_or(0)
}

impl RevTree {
    fn leaves(&self) -> Vec<&str> {
        let parents: BTreeSet<&str> = self
            .nodes
            .values()
            .filter_map(|node| node.parent.as_deref())
            .collect();

        self.nodes
            .keys()
            .map(String::as_str)
            .filter(|rev| !parents.contains(rev))
            .collect()
    }

    fn open_leaves(&self) -> Vec<&str> {
        self.leaves()
            .into_iter()
            .filter(|rev| !self.nodes[*rev].deleted)
            .collect()
    }

    /// Deterministic winner: open leaves beat deleted ones, then the longest branch
    fn winner(&self) -> Option<&str> {
        self.leaves().into_iter().max_by(|a, b| {
            let (na, nb) = (&self.nodes[*a], &self.nodes[*b]);
            (!na.deleted, generation(a), *a).cmp(&(!nb.deleted, generation(b), *b))
        })
    }

    fn is_leaf(&self, rev: &str) -> bool {
        self.leaves().contains(&rev)
    }

    fn add_child(&mut self, parent: Option<&str>, body: Map<String, Value>, deleted: bool) -> String {
        let gen = parent.map(generation).unwrap_or(0) + 1;
        let rev = format!("{gen}-{}", Uuid::new_v4().simple());
        self.nodes.insert(
            rev.clone(),
            RevNode {
                parent: parent.map(str::to_string),
                body,
                deleted,
            },
        );
        rev
    }

    fn merge(&mut self, other: &RevTree) {
        for (rev, node) in &other.nodes {
            self.nodes.entry(rev.clone()).or_insert_with(|| node.clone());
        }
    }

    fn render(&self, id: &str, rev: &str) -> Option<Value> {
        let node = self.nodes.get(rev)?;
        let mut doc = node.body.clone();
        doc.insert("_id".to_string(), json!(id));
        doc.insert("_rev".to_string(), json!(rev));
        if node.deleted {
            doc.insert("_deleted".to_string(), json!(true));
        }
        Some(Value::Object(doc))
    }
}

type Reply = std::result::Result<Value, (u16, Value)>;

fn error_body(status: u16, error: &str, reason: &str) -> (u16, Value) {
    (status, json!({ "error": error, "reason": reason }))
}

fn conflict() -> (u16, Value) {
    error_body(409, "conflict", "Document update conflict.")
}

fn forbidden(id: &str) -> (u16, Value) {
    error_body(403, "forbidden", &format!("writes to {id} are not allowed"))
}

fn missing_db() -> (u16, Value) {
    error_body(404, "not_found", "Database does not exist.")
}

/// Database name from a replication endpoint URL
fn db_name(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    urlencoding::decode(segment).ok().map(|name| name.into_owned())
}

fn strip_credentials(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut url) => {
            let _ = url.set_username("");
            let _ = url.set_password(None);
            url.to_string()
        }
        Err(_) => url.to_string(),
    }
}

impl MemDatabase {
    /// Apply one document write, returning the new revision
    fn write(&mut self, id: &str, mut body: Map<String, Value>) -> std::result::Result<String, (u16, Value)> {
        let rev = body
            .remove("_rev")
            .and_then(|rev| rev.as_str().map(str::to_string))
            .unwrap_or_default();
        let deleted = body
            .remove("_deleted")
            .and_then(|deleted| deleted.as_bool())
            .unwrap_or(false);
        body.remove("_id");

        let tree = self.docs.entry(id.to_string()).or_default();
        let parent = if rev.is_empty() {
            match tree.winner() {
                Some(winner) if !tree.nodes[winner].deleted => return Err(conflict()),
                winner => winner.map(str::to_string),
            }
        } else if tree.is_leaf(&rev) {
            Some(rev)
        } else {
            return Err(conflict());
        };

        Ok(tree.add_child(parent.as_deref(), body, deleted))
    }

    fn conflicted_keys(&self) -> Vec<&str> {
        self.docs
            .iter()
            .filter(|(id, tree)| !id.starts_with("_design/") && tree.open_leaves().len() > 1)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    fn live_keys(&self) -> Vec<&str> {
        self.docs
            .iter()
            .filter(|(id, tree)| !id.starts_with("_design/") && !tree.open_leaves().is_empty())
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

impl MemoryStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
        })
    }

    /// Server handle routed through this store
    pub(crate) fn server(self: &Arc<Self>) -> Server {
        Server::with_transport(BASE_URL, None, self.clone()).unwrap()
    }

    pub(crate) fn server_with_credentials(self: &Arc<Self>, credentials: Credentials) -> Server {
        Server::with_transport(BASE_URL, Some(credentials), self.clone()).unwrap()
    }

    /// Register a background task unrelated to the client
    pub(crate) fn push_task(&self, task: Value) {
        self.state.lock().tasks.push(task);
    }

    /// Refuse replications reading from `db`
    pub(crate) fn deny_replication_from(&self, db: &str) {
        self.state.lock().denied_sources.insert(db.to_string());
    }

    /// While offline every request fails at the transport level
    pub(crate) fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Stop replication tasks out-of-band, as an administrator would
    pub(crate) fn drop_task(&self, replication_id_prefix: &str) {
        self.state.lock().tasks.retain(|task| {
            !task["replication_id"]
                .as_str()
                .map(|id| id.starts_with(replication_id_prefix))
                .unwrap_or(false)
        });
    }

    /// Reject every write to `id` as a validation function would
    pub(crate) fn reject_writes_to(&self, id: &str) {
        self.state.lock().rejected_ids.insert(id.to_string());
    }

    pub(crate) fn allow_writes_to(&self, id: &str) {
        self.state.lock().rejected_ids.remove(id);
    }

    /// Apply `_bulk_docs` entries one by one even when `all_or_nothing` is
    /// requested, as clustered stores do
    pub(crate) fn ignore_all_or_nothing(&self) {
        self.state.lock().ignore_all_or_nothing = true;
    }

    pub(crate) fn count_requests(&self, method: Method, path_suffix: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|(m, path)| *m == method && path.ends_with(path_suffix))
            .count()
    }

    pub(crate) fn last_replicate_request(&self) -> Option<Value> {
        self.state.lock().replicate_bodies.last().cloned()
    }

    /// Create a competing leaf for `id`, a sibling of the current winner,
    /// as replication of a concurrent edit would
    pub(crate) fn fork(&self, db: &str, id: &str, fields: Value) -> String {
        let mut state = self.state.lock();
        let tree = state
            .databases
            .get_mut(db)
            .and_then(|db| db.docs.get_mut(id))
            .unwrap();
        let winner = tree.winner().unwrap().to_string();
        let parent = tree.nodes[&winner].parent.clone();
        let body = fields.as_object().cloned().unwrap_or_default();
        tree.add_child(parent.as_deref(), body, false)
    }

    fn respond(&self, request: &StoreRequest) -> Result<StoreResponse> {
        let mut state = self.state.lock();
        if state.offline {
            return Err(CouchError::Transport("connection refused".to_string()));
        }
        state
            .requests
            .push((request.method.clone(), request.url.path().to_string()));

        let reply = state.route(request);
        Ok(match reply {
            Ok(body) => {
                let status = if request.method == Method::PUT || request.method == Method::POST {
                    201
                } else {
                    200
                };
                StoreResponse::new(status, Some(body))
            }
            Err((status, body)) => StoreResponse::new(status, Some(body)),
        })
    }
}

impl State {
    fn route(&mut self, request: &StoreRequest) -> Reply {
        let segments: Vec<String> = request
            .url
            .path_segments()
            .map(|segments| {
                segments
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        urlencoding::decode(s)
                            .map(|s| s.into_owned())
                            .unwrap_or_else(|_| s.to_string())
                    })
                    .collect()
            })
            .unwrap_or_default();
        let params: BTreeMap<String, String> = request.url.query_pairs().into_owned().collect();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
        let body = request.body.clone().unwrap_or(Value::Null);
        let method = request.method.clone();

        match segments.as_slice() {
            ["_active_tasks"] if method == Method::GET => Ok(Value::Array(self.tasks.clone())),
            ["_replicate"] if method == Method::POST => self.replicate(body),
            [db] => self.database_op(&method, db, body),
            [db, "_bulk_docs"] if method == Method::POST => self.bulk_docs(db, body),
            [db, "_design", design, "_view", view] if method == Method::GET => {
                self.query_view(db, design, view, &params)
            }
            [db, "_design", design] => {
                let id = format!("_design/{design}");
                self.document_op(&method, db, &id, body, &params)
            }
            [db, id] => self.document_op(&method, db, id, body, &params),
            _ => Err(error_body(400, "bad_request", "Unsupported request")),
        }
    }

    fn db_mut(&mut self, db: &str) -> std::result::Result<&mut MemDatabase, (u16, Value)> {
        self.databases.get_mut(db).ok_or_else(missing_db)
    }

    fn database_op(&mut self, method: &Method, db: &str, body: Value) -> Reply {
        match *method {
            Method::PUT => {
                if self.databases.contains_key(db) {
                    return Err(error_body(412, "file_exists", "The database could not be created, the file already exists."));
                }
                self.databases.insert(db.to_string(), MemDatabase::default());
                Ok(json!({ "ok": true }))
            }
            Method::DELETE => {
                self.databases.remove(db).ok_or_else(missing_db)?;
                Ok(json!({ "ok": true }))
            }
            Method::GET => {
                let database = self.db_mut(db)?;
                Ok(json!({ "db_name": db, "doc_count": database.live_keys().len() }))
            }
            Method::POST => {
                let database = self.db_mut(db)?;
                let mut fields = body.as_object().cloned().unwrap_or_default();
                let id = fields
                    .remove("_id")
                    .and_then(|id| id.as_str().map(str::to_string))
                    .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
                let rev = database.write(&id, fields)?;
                Ok(json!({ "ok": true, "id": id, "rev": rev }))
            }
            _ => Err(error_body(405, "method_not_allowed", "Only GET,HEAD,POST,PUT,DELETE allowed")),
        }
    }

    fn document_op(
        &mut self,
        method: &Method,
        db: &str,
        id: &str,
        body: Value,
        params: &BTreeMap<String, String>,
    ) -> Reply {
        let rejected = *method != Method::GET && self.rejected_ids.contains(id);
        let database = self.db_mut(db)?;
        if rejected {
            return Err(forbidden(id));
        }

        match *method {
            Method::GET => {
                let tree = database
                    .docs
                    .get(id)
                    .ok_or_else(|| error_body(404, "not_found", "missing"))?;

                if params.get("open_revs").map(String::as_str) == Some("all") {
                    let leaves: Vec<Value> = tree
                        .leaves()
                        .into_iter()
                        .filter_map(|rev| tree.render(id, rev))
                        .map(|doc| json!({ "ok": doc }))
                        .collect();
                    return Ok(Value::Array(leaves));
                }

                if let Some(rev) = params.get("rev") {
                    return tree
                        .render(id, rev)
                        .ok_or_else(|| error_body(404, "not_found", "missing"));
                }

                match tree.winner() {
                    Some(rev) if !tree.nodes[rev].deleted => tree
                        .render(id, rev)
                        .ok_or_else(|| error_body(404, "not_found", "missing")),
                    _ => Err(error_body(404, "not_found", "deleted")),
                }
            }
            Method::PUT => {
                let fields = body.as_object().cloned().unwrap_or_default();
                let rev = database.write(id, fields)?;
                Ok(json!({ "ok": true, "id": id, "rev": rev }))
            }
            Method::DELETE => {
                let mut fields = Map::new();
                if let Some(rev) = params.get("rev") {
                    fields.insert("_rev".to_string(), json!(rev));
                }
                fields.insert("_deleted".to_string(), json!(true));
                let rev = database.write(id, fields)?;
                Ok(json!({ "ok": true, "id": id, "rev": rev }))
            }
            _ => Err(error_body(405, "method_not_allowed", "Only GET,HEAD,PUT,DELETE allowed")),
        }
    }

    fn bulk_docs(&mut self, db: &str, body: Value) -> Reply {
        let all_or_nothing =
            body["all_or_nothing"].as_bool().unwrap_or(false) && !self.ignore_all_or_nothing;
        let docs = body["docs"].as_array().cloned().unwrap_or_default();
        let rejected_ids = self.rejected_ids.clone();

        let database = self.db_mut(db)?;
        let mut staged = database.clone();
        let mut results = Vec::with_capacity(docs.len());
        let mut failed = false;

        for doc in docs {
            let fields = doc.as_object().cloned().unwrap_or_default();
            let id = fields
                .get("_id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

            let written = if rejected_ids.contains(&id) {
                Err(forbidden(&id))
            } else {
                staged.write(&id, fields)
            };
            match written {
                Ok(rev) => results.push(json!({ "ok": true, "id": id, "rev": rev })),
                Err((_, error)) => {
                    failed = true;
                    results.push(json!({
                        "id": id,
                        "error": error["error"],
                        "reason": error["reason"],
                    }));
                }
            }
        }

        if all_or_nothing && failed {
            let rejected = results
                .into_iter()
                .map(|result| {
                    if result.get("error").is_some() {
                        result
                    } else {
                        json!({
                            "id": result["id"],
                            "error": "aborted",
                            "reason": "all_or_nothing write rejected",
                        })
                    }
                })
                .collect();
            return Err((417, Value::Array(rejected)));
        }

        *database = staged;
        Ok(Value::Array(results))
    }

    fn query_view(
        &mut self,
        db: &str,
        design: &str,
        view: &str,
        params: &BTreeMap<String, String>,
    ) -> Reply {
        let database = self.db_mut(db)?;
        let design_id = format!("_design/{design}");

        let definition = database
            .docs
            .get(&design_id)
            .and_then(|tree| {
                let rev = tree.winner()?;
                let node = &tree.nodes[rev];
                if node.deleted {
                    None
                } else {
                    node.body.get("views").cloned()
                }
            })
            .ok_or_else(|| error_body(404, "not_found", "missing"))?;
        let definition = definition
            .get(view)
            .cloned()
            .ok_or_else(|| error_body(404, "not_found", "missing_named_view"))?;

        let map = definition["map"].as_str().unwrap_or_default();
        let keys = if map.contains("_conflicts") {
            database.conflicted_keys()
        } else {
            database.live_keys()
        };

        let reduce_requested = params.get("reduce").map(String::as_str) != Some("false");
        if reduce_requested {
            if let Some(reduce) = definition["reduce"].as_str() {
                if reduce != "_count" {
                    return Err(error_body(400, "query_parse_error", "Only _count is supported"));
                }
                let rows = if keys.is_empty() {
                    vec![]
                } else {
                    vec![json!({ "key": null, "value": keys.len() })]
                };
                return Ok(json!({ "rows": rows }));
            }
        }

        let total = keys.len();
        let limit = params
            .get("limit")
            .and_then(|limit| limit.parse().ok())
            .unwrap_or(usize::MAX);
        let rows: Vec<Value> = keys
            .into_iter()
            .take(limit)
            .map(|id| {
                if map.contains("_conflicts") {
                    json!({ "id": id, "key": null, "value": null })
                } else {
                    json!({ "id": id, "key": id, "value": null })
                }
            })
            .collect();

        Ok(json!({ "total_rows": total, "offset": 0, "rows": rows }))
    }

    fn replicate(&mut self, body: Value) -> Reply {
        self.replicate_bodies.push(body.clone());

        let source_url = body["source"].as_str().unwrap_or_default().to_string();
        let target_url = body["target"].as_str().unwrap_or_default().to_string();
        let continuous = body["continuous"].as_bool().unwrap_or(false);
        let (source, target) = match (db_name(&source_url), db_name(&target_url)) {
            (Some(source), Some(target)) => (source, target),
            _ => return Err(error_body(400, "bad_request", "Invalid source or target")),
        };

        if body["cancel"].as_bool().unwrap_or(false) {
            let position = self.tasks.iter().position(|task| {
                task["source"].as_str().and_then(db_name).as_deref() == Some(source.as_str())
                    && task["target"].as_str().and_then(db_name).as_deref() == Some(target.as_str())
                    && task["continuous"].as_bool() == Some(continuous)
            });
            return match position {
                Some(i) => {
                    let task = self.tasks.remove(i);
                    Ok(json!({ "ok": true, "_local_id": task["replication_id"] }))
                }
                None => Err(error_body(404, "not_found", "missing")),
            };
        }

        if self.denied_sources.contains(&source) {
            return Err(error_body(401, "unauthorized", "You are not a server admin."));
        }

        let source_db = self
            .databases
            .get(&source)
            .cloned()
            .ok_or_else(|| error_body(404, "db_not_found", &format!("could not open {source}")))?;

        if !self.databases.contains_key(&target) {
            if body["create_target"].as_bool().unwrap_or(false) {
                self.databases.insert(target.clone(), MemDatabase::default());
            } else {
                return Err(error_body(404, "db_not_found", &format!("could not open {target}")));
            }
        }
        let target_db = self.db_mut(&target)?;
        for (id, tree) in &source_db.docs {
            target_db.docs.entry(id.clone()).or_default().merge(tree);
        }

        let session_id = Uuid::new_v4().simple().to_string();
        let source_last_seq = source_db.docs.len();

        if continuous {
            self.tasks.push(json!({
                "type": "replication",
                "replication_id": format!("{session_id}+continuous"),
                "source": strip_credentials(&source_url),
                "target": strip_credentials(&target_url),
                "continuous": true,
                "started_on": chrono::Utc::now().timestamp(),
            }));
        }

        Ok(json!({
            "ok": true,
            "session_id": session_id,
            "source_last_seq": source_last_seq,
        }))
    }
}

#[async_trait]
impl Transport for MemoryStore {
    async fn execute(&self, request: StoreRequest) -> Result<StoreResponse> {
        self.respond(&request)
    }

    async fn head(&self, url: &Url, credentials: Option<&Credentials>) -> Result<bool> {
        let request = StoreRequest::new(Method::GET, url.clone()).with_credentials(credentials);
        let response = self.respond(&request)?;
        Ok(response.is_success())
    }
}
