use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;

use crate::db;
use crate::error::{ErrorKind, LibError};
use crate::models::{OrphanPolicy, PlantId, RebuildPayload, UpdateNodePayload};

#[derive(Debug)]
pub struct AppError(pub LibError);

impl From<LibError> for AppError {
    fn from(value: LibError) -> Self {
        Self(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ErrorKind::Database => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!(kind = ?self.0.kind, error = %self.0.source, "hierarchy api request failed");
        (status, self.0.public).into_response()
    }
}

pub trait HasPool {
    fn pool(&self) -> Arc<sqlx::PgPool>;
}

pub trait HierarchyApp: HasPool {
    fn orphan_policy(&self) -> OrphanPolicy {
        OrphanPolicy::default()
    }
}

fn parse_plant(raw: &str) -> Result<PlantId, AppError> {
    PlantId::from_str(raw).map_err(AppError)
}

async fn rebuild_handler<S>(
    State(app): State<S>,
    Path(plant_id): Path<String>,
    Json(payload): Json<RebuildPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: HierarchyApp + Clone + Send + Sync + 'static,
{
    let plant = parse_plant(&plant_id)?;
    let result =
        db::rebuild_hierarchy(&app.pool(), &plant, &payload.paths, app.orphan_policy()).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

async fn list_nodes_handler<S>(
    State(app): State<S>,
    Path(plant_id): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: HierarchyApp + Clone + Send + Sync + 'static,
{
    let plant = parse_plant(&plant_id)?;
    let nodes = db::get_all_nodes(&app.pool(), &plant).await?;
    Ok(Json(json!({
        "totalRecords": nodes.len(),
        "nodes": nodes
    })))
}

async fn clear_handler<S>(
    State(app): State<S>,
    Path(plant_id): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: HierarchyApp + Clone + Send + Sync + 'static,
{
    let plant = parse_plant(&plant_id)?;
    let deleted = db::clear_hierarchy(&app.pool(), &plant).await?;
    Ok(Json(json!({ "deletedCount": deleted })))
}

async fn tree_handler<S>(
    State(app): State<S>,
    Path(plant_id): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: HierarchyApp + Clone + Send + Sync + 'static,
{
    let plant = parse_plant(&plant_id)?;
    let roots = db::get_tree(&app.pool(), &plant).await?;
    Ok(Json(json!({
        "totalRoots": roots.len(),
        "tree": roots
    })))
}

async fn validate_handler<S>(
    State(app): State<S>,
    Path(plant_id): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: HierarchyApp + Clone + Send + Sync + 'static,
{
    let plant = parse_plant(&plant_id)?;
    let report = db::validate_hierarchy(&app.pool(), &plant).await?;
    Ok(Json(report))
}

async fn repair_handler<S>(
    State(app): State<S>,
    Path(plant_id): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: HierarchyApp + Clone + Send + Sync + 'static,
{
    let plant = parse_plant(&plant_id)?;
    let outcome = db::repair_hierarchy(&app.pool(), &plant, app.orphan_policy()).await?;
    Ok(Json(outcome))
}

async fn get_node_handler<S>(
    State(app): State<S>,
    Path((plant_id, label)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError>
where
    S: HierarchyApp + Clone + Send + Sync + 'static,
{
    let plant = parse_plant(&plant_id)?;
    let node = db::get_node_by_label(&app.pool(), &plant, &label).await?;
    Ok(Json(node))
}

async fn update_node_handler<S>(
    State(app): State<S>,
    Path((plant_id, label)): Path<(String, String)>,
    Json(payload): Json<UpdateNodePayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: HierarchyApp + Clone + Send + Sync + 'static,
{
    let plant = parse_plant(&plant_id)?;
    let updated_fields = db::update_node(&app.pool(), &plant, &label, payload).await?;
    Ok(Json(json!({
        "label": label,
        "updatedFields": updated_fields
    })))
}

async fn delete_node_handler<S>(
    State(app): State<S>,
    Path((plant_id, label)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError>
where
    S: HierarchyApp + Clone + Send + Sync + 'static,
{
    let plant = parse_plant(&plant_id)?;
    let deleted = db::delete_node(&app.pool(), &plant, &label).await?;
    Ok(Json(json!({ "deletedCount": deleted })))
}

async fn children_handler<S>(
    State(app): State<S>,
    Path((plant_id, label)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError>
where
    S: HierarchyApp + Clone + Send + Sync + 'static,
{
    let plant = parse_plant(&plant_id)?;
    let children = db::get_children(&app.pool(), &plant, &label).await?;
    Ok(Json(json!({
        "totalChildren": children.len(),
        "children": children
    })))
}

pub fn routes<S>() -> Router<S>
where
    S: HierarchyApp + Clone + Send + Sync + 'static,
{
    tracing::info!("Registering route /plants/{{plant_id}}/hierarchy [GET,POST,DELETE]");
    tracing::info!("Registering route /plants/{{plant_id}}/hierarchy/tree [GET]");
    tracing::info!("Registering route /plants/{{plant_id}}/hierarchy/validate [GET]");
    tracing::info!("Registering route /plants/{{plant_id}}/hierarchy/repair [POST]");
    tracing::info!(
        "Registering route /plants/{{plant_id}}/hierarchy/nodes/{{label}} [GET,PATCH,DELETE]"
    );
    tracing::info!(
        "Registering route /plants/{{plant_id}}/hierarchy/nodes/{{label}}/children [GET]"
    );

    Router::new()
        .route(
            "/plants/{plant_id}/hierarchy",
            get(list_nodes_handler::<S>)
                .post(rebuild_handler::<S>)
                .delete(clear_handler::<S>),
        )
        .route("/plants/{plant_id}/hierarchy/tree", get(tree_handler::<S>))
        .route(
            "/plants/{plant_id}/hierarchy/validate",
            get(validate_handler::<S>),
        )
        .route(
            "/plants/{plant_id}/hierarchy/repair",
            post(repair_handler::<S>),
        )
        .route(
            "/plants/{plant_id}/hierarchy/nodes/{label}",
            get(get_node_handler::<S>)
                .patch(update_node_handler::<S>)
                .delete(delete_node_handler::<S>),
        )
        .route(
            "/plants/{plant_id}/hierarchy/nodes/{label}/children",
            get(children_handler::<S>),
        )
}
