//! Concrete REST handlers (spec §6 "HTTP server surface"). Document-level
//! storage is out of scope (spec §1 Non-goals), so the doc handlers report
//! `Unimplemented` rather than fake a storage engine; the database and task
//! surfaces are fully implemented against [`DatabaseRegistry`]/[`TaskRegistry`].
use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::dbpool::{CollectionSpec, DatabaseRegistry};
use crate::error::Error;

use super::request::{Method, Request};
use super::response::Response;
use super::router::Router;
use super::tasks::TaskRegistry;

pub const VENDOR_NAME: &str = "peersync-core";

pub struct AppState {
    pub registry: Arc<DatabaseRegistry>,
    pub tasks: Arc<TaskRegistry>,
    pub allow_create_dbs: bool,
    pub allow_delete_dbs: bool,
}

/// `GET /`.
pub fn server_info(_req: &Request, _params: &HashMap<String, String>) -> Response {
    Response::json(&json!({
        "couchdb": "Welcome",
        "vendor": {"name": VENDOR_NAME, "version": env!("CARGO_PKG_VERSION")},
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub fn all_dbs(state: &AppState) -> Response {
    Response::json(&state.registry.database_names())
}

pub fn active_tasks(state: &AppState) -> Response {
    Response::json(&state.tasks.all())
}

#[derive(Debug, Deserialize)]
pub struct ReplicateRequest {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub continuous: bool,
    #[serde(default)]
    pub bidi: bool,
    #[serde(default)]
    pub cancel: bool,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// `POST /_replicate`. Registers a task and returns `{ok, session_id}`; the
/// actual replication engine (BLIP) is out of scope here (spec §1), so the
/// task is registered and immediately marked finished.
pub fn replicate(state: &AppState, body: &[u8]) -> Response {
    let req: ReplicateRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return Response::from_error(&Error::invalid_parameter(format!("bad replicate body: {e}"))),
    };
    if req.cancel {
        return Response::json(&json!({"ok": true}));
    }
    let task = state.tasks.register("replicate");
    let session_id = task.id.to_string();
    state.tasks.unregister(&task, None);
    Response::json(&json!({"ok": true, "session_id": session_id}))
}

pub fn get_db(state: &AppState, db: &str) -> Response {
    if state.registry.database_names().iter().any(|n| n == db) {
        Response::json(&json!({"db_name": db}))
    } else {
        Response::from_error(&Error::not_found(format!("no such database: {db}")))
    }
}

pub fn put_db(state: &AppState, db: &str) -> Response {
    if !state.allow_create_dbs {
        return Response::from_error(&Error::LiteCore {
            code: crate::error::LiteCoreCode::Unsupported,
            message: "database creation is disabled".into(),
        });
    }
    match state.registry.register_database(db) {
        Ok(()) => Response::json_status(201, &json!({"ok": true})),
        Err(e) => Response::from_error(&e),
    }
}

pub fn delete_db(state: &AppState, db: &str) -> Response {
    if !state.allow_delete_dbs {
        return Response::from_error(&Error::LiteCore {
            code: crate::error::LiteCoreCode::Unsupported,
            message: "database deletion is disabled".into(),
        });
    }
    match state.registry.unregister_database(db) {
        Ok(()) => Response::json(&json!({"ok": true})),
        Err(e) => Response::from_error(&e),
    }
}

/// `GET /{db}/_all_docs`. Document storage is a non-goal (spec §1), so this
/// reports an empty page rather than simulate real rows.
pub fn all_docs(state: &AppState, db: &str) -> Response {
    match state.registry.borrow_database_named(db, false) {
        Ok(_handle) => Response::json(&json!({"total_rows": 0, "rows": []})),
        Err(e) => Response::from_error(&e),
    }
}

pub fn doc_unimplemented(_state: &AppState, _db: &str, _doc_id: &str) -> Response {
    Response::from_error(&Error::unimplemented("document storage is outside this crate's scope"))
}

/// Wires every handler in this module onto its path (spec §6's server
/// surface beyond the three top-level routes `dispatch_rest` special-cases).
/// `/{db}/_all_docs` is registered ahead of `/{db}/{docID}` so the literal
/// segment wins first-match, per [`Router::dispatch`]'s contract.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new();

    router.add(&[Method::Get], "/", Arc::new(|req, params| server_info(req, params)));

    {
        let state = state.clone();
        router.add(&[Method::Get], "/{db}/_all_docs", Arc::new(move |_req, params| all_docs(&state, &params["db"])));
    }
    {
        let state = state.clone();
        router.add(
            &[Method::Get, Method::Put, Method::Delete],
            "/{db}/{docID}",
            Arc::new(move |_req, params| doc_unimplemented(&state, &params["db"], &params["docID"])),
        );
    }
    {
        let state = state.clone();
        router.add(&[Method::Get], "/{db}", Arc::new(move |_req, params| get_db(&state, &params["db"])));
    }
    {
        let state = state.clone();
        router.add(&[Method::Put], "/{db}", Arc::new(move |_req, params| put_db(&state, &params["db"])));
    }
    {
        let state = state.clone();
        router.add(&[Method::Delete], "/{db}", Arc::new(move |_req, params| delete_db(&state, &params["db"])));
    }

    router
}

pub fn parse_collection_spec(req: &Request) -> CollectionSpec {
    let scope = req.query_param("scope").map(str::to_string);
    let collection = req.query_param("collection").map(str::to_string);
    match (scope, collection) {
        (Some(s), Some(c)) => CollectionSpec { scope: s, collection: c },
        (None, Some(c)) => CollectionSpec { scope: "_default".into(), collection: c },
        _ => CollectionSpec::default(),
    }
}
