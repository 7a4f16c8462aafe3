//! Resource endpoints: autocomplete and async-query cancellation.
//!
//! The embedding transport mounts this router wherever it serves plugin
//! resources. Autocomplete routes are backed by the driver's [`Completable`]
//! capability; a driver without it answers 400. Plugin-defined custom routes
//! are accepted as long as they do not collide with the reserved paths.

use crate::datasource::SqlDatasource;
use crate::driver::Driver;
use crate::error::{SqlError, SqlResult};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{post, MethodRouter};
use axum::{Json, Router};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Options bag sent in autocomplete request bodies,
/// e.g. `{"database": "mydb"}`.
pub type CompletionOptions = HashMap<String, String>;

/// Autocomplete capability for schemas, tables and columns.
#[async_trait]
pub trait Completable: Send + Sync {
    async fn schemas(&self, options: &CompletionOptions) -> SqlResult<Vec<String>>;

    async fn tables(&self, options: &CompletionOptions) -> SqlResult<Vec<String>>;

    async fn columns(&self, options: &CompletionOptions) -> SqlResult<Vec<String>>;
}

/// Paths owned by the framework; custom routes may not redefine them.
pub const RESERVED_ROUTES: &[&str] = &["/schemas", "/tables", "/columns", "/cancel"];

#[derive(Debug, Clone, Copy)]
enum CompletionKind {
    Schemas,
    Tables,
    Columns,
}

/// Build the resource router for a datasource.
pub fn resource_router<D: Driver>(
    datasource: Arc<SqlDatasource<D>>,
    custom_routes: Vec<(String, MethodRouter<Arc<SqlDatasource<D>>>)>,
) -> SqlResult<Router> {
    for (path, _) in &custom_routes {
        if RESERVED_ROUTES.contains(&path.as_str()) {
            return Err(SqlError::Resource(format!(
                "unable to redefine {}, use the Completable capability instead",
                path
            )));
        }
    }

    let mut router: Router<Arc<SqlDatasource<D>>> = Router::new()
        .route("/schemas", post(schemas::<D>))
        .route("/tables", post(tables::<D>))
        .route("/columns", post(columns::<D>))
        .route("/cancel", post(cancel::<D>));
    for (path, method_router) in custom_routes {
        debug!(path = %path, "registering custom resource route");
        router = router.route(&path, method_router);
    }

    Ok(router.with_state(datasource))
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, message).into_response()
}

fn parse_options(body: &Bytes) -> Result<CompletionOptions, serde_json::Error> {
    if body.is_empty() {
        Ok(CompletionOptions::new())
    } else {
        serde_json::from_slice(body)
    }
}

async fn complete<D: Driver>(
    datasource: &SqlDatasource<D>,
    kind: CompletionKind,
    body: Bytes,
) -> Response {
    let Some(completable) = datasource.driver().completable() else {
        return bad_request("not implemented".into());
    };

    let options = match parse_options(&body) {
        Ok(options) => options,
        Err(e) => return bad_request(format!("error reading query options: {}", e)),
    };

    let result = match kind {
        CompletionKind::Schemas => completable.schemas(&options).await,
        CompletionKind::Tables => completable.tables(&options).await,
        CompletionKind::Columns => completable.columns(&options).await,
    };

    match result {
        Ok(names) => Json(names).into_response(),
        Err(e) => bad_request(e.to_string()),
    }
}

async fn schemas<D: Driver>(
    State(datasource): State<Arc<SqlDatasource<D>>>,
    body: Bytes,
) -> Response {
    complete(&datasource, CompletionKind::Schemas, body).await
}

async fn tables<D: Driver>(
    State(datasource): State<Arc<SqlDatasource<D>>>,
    body: Bytes,
) -> Response {
    complete(&datasource, CompletionKind::Tables, body).await
}

async fn columns<D: Driver>(
    State(datasource): State<Arc<SqlDatasource<D>>>,
    body: Bytes,
) -> Response {
    complete(&datasource, CompletionKind::Columns, body).await
}

async fn cancel<D: Driver>(
    State(datasource): State<Arc<SqlDatasource<D>>>,
    body: Bytes,
) -> Response {
    let options = match parse_options(&body) {
        Ok(options) => options,
        Err(e) => return bad_request(format!("error reading query options: {}", e)),
    };

    let query_id = options.get("queryId").map(String::as_str).unwrap_or("");
    if query_id.is_empty() {
        return bad_request("missing queryId in request".into());
    }

    match datasource.cancel_async_query(query_id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => bad_request(e.to_string()),
    }
}
