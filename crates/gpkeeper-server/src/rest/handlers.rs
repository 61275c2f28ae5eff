use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use gpkeeper_core::AdminError;
use gpkeeper_core::acl::{self, PermissionRule};
use gpkeeper_core::catalog::{
    MembershipGraph, ObjectAcl, ResourceGroup, ResourceGroupLimits, RoleNode, RoleRef,
};
use gpkeeper_core::engine::{
    DefaultPrivilegeEntry, ObjectSelector, OwnerEntityUpdate, ResourceGroupSpec,
    ResourceGroupUpdate, RevokeDefaultPrivileges, RoleSpec,
};
use gpkeeper_core::session::{SessionError, SessionProvider};

use crate::error::ApiError;
use crate::service::GrantRequest;

use super::AppState;
use super::types::*;

type HandlerResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn api_error_to_response(err: ApiError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        ApiError::Admin(AdminError::NotFound(_))
        | ApiError::Admin(AdminError::Session(SessionError::UnknownContext(_))) => {
            StatusCode::NOT_FOUND
        }
        ApiError::Admin(AdminError::AlreadyExists(_))
        | ApiError::Admin(AdminError::DropFailed(_)) => StatusCode::CONFLICT,
        ApiError::Admin(AdminError::PartiallyFailed { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
        ApiError::Admin(AdminError::Acl(_))
        | ApiError::Admin(AdminError::UnsupportedEntityType(_))
        | ApiError::Admin(AdminError::InvalidRequest(_))
        | ApiError::UnknownGrantTarget(_)
        | ApiError::InvalidBody(_) => StatusCode::BAD_REQUEST,
        ApiError::Admin(AdminError::Session(SessionError::Connect(_))) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ApiError::Admin(AdminError::MembershipCycle(_))
        | ApiError::Admin(AdminError::Session(SessionError::Execution(_))) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

fn applied(result: Result<(), ApiError>) -> HandlerResult<AppliedResponse> {
    result
        .map(|()| Json(AppliedResponse::applied()))
        .map_err(api_error_to_response)
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

pub async fn decode_rule(Query(query): Query<DecodeRuleQuery>) -> HandlerResult<PermissionRule> {
    acl::decode(&query.rule)
        .map(Json)
        .map_err(|e| api_error_to_response(e.into()))
}

pub async fn decode_rules(
    Json(req): Json<DecodeRulesRequest>,
) -> HandlerResult<DecodeRulesResponse> {
    let decoded = if req.aggregate {
        acl::aggregate(&req.rules).map(DecodeRulesResponse::Aggregated)
    } else {
        acl::decode_many(&req.rules).map(DecodeRulesResponse::Rules)
    };
    decoded
        .map(Json)
        .map_err(|e| api_error_to_response(e.into()))
}

pub async fn list_databases<P: SessionProvider + 'static>(
    State(state): State<AppState<P>>,
    Path(ctx): Path<String>,
) -> HandlerResult<Vec<ObjectAcl>> {
    state
        .service
        .list_databases(&ctx)
        .await
        .map(Json)
        .map_err(api_error_to_response)
}

pub async fn list_schemas<P: SessionProvider + 'static>(
    State(state): State<AppState<P>>,
    Path((ctx, db)): Path<(String, String)>,
) -> HandlerResult<Vec<ObjectAcl>> {
    state
        .service
        .list_schemas(&ctx, &db)
        .await
        .map(Json)
        .map_err(api_error_to_response)
}

pub async fn list_tables<P: SessionProvider + 'static>(
    State(state): State<AppState<P>>,
    Path((ctx, db, schema)): Path<(String, String, String)>,
) -> HandlerResult<Vec<ObjectAcl>> {
    state
        .service
        .list_tables(&ctx, &db, &schema)
        .await
        .map(Json)
        .map_err(api_error_to_response)
}

pub async fn grant<P: SessionProvider + 'static>(
    State(state): State<AppState<P>>,
    Path((ctx, kind)): Path<(String, String)>,
    Json(body): Json<serde_json::Value>,
) -> HandlerResult<AppliedResponse> {
    let request = GrantRequest::parse(&kind, body).map_err(api_error_to_response)?;
    applied(state.service.grant(&ctx, &request).await)
}

pub async fn effective_permissions<P: SessionProvider + 'static>(
    State(state): State<AppState<P>>,
    Path(ctx): Path<String>,
    Json(selector): Json<ObjectSelector>,
) -> HandlerResult<Vec<PermissionRule>> {
    state
        .service
        .effective_permissions(&ctx, &selector)
        .await
        .map(Json)
        .map_err(api_error_to_response)
}

pub async fn list_default_privileges<P: SessionProvider + 'static>(
    State(state): State<AppState<P>>,
    Path((ctx, db)): Path<(String, String)>,
) -> HandlerResult<Vec<DefaultPrivilegeEntry>> {
    state
        .service
        .list_default_privileges(&ctx, &db)
        .await
        .map(Json)
        .map_err(api_error_to_response)
}

pub async fn revoke_default_privileges<P: SessionProvider + 'static>(
    State(state): State<AppState<P>>,
    Path(ctx): Path<String>,
    Json(payload): Json<RevokeDefaultPrivileges>,
) -> HandlerResult<AppliedResponse> {
    applied(state.service.revoke_default_privileges(&ctx, &payload).await)
}

pub async fn list_roles<P: SessionProvider + 'static>(
    State(state): State<AppState<P>>,
    Path(ctx): Path<String>,
) -> HandlerResult<Vec<RoleNode>> {
    state
        .service
        .list_roles(&ctx)
        .await
        .map(Json)
        .map_err(api_error_to_response)
}

pub async fn get_role<P: SessionProvider + 'static>(
    State(state): State<AppState<P>>,
    Path((ctx, name)): Path<(String, String)>,
) -> HandlerResult<RoleNode> {
    state
        .service
        .get_role(&ctx, &name)
        .await
        .map(Json)
        .map_err(api_error_to_response)
}

pub async fn create_role<P: SessionProvider + 'static>(
    State(state): State<AppState<P>>,
    Path(ctx): Path<String>,
    Json(spec): Json<RoleSpec>,
) -> HandlerResult<AppliedResponse> {
    applied(state.service.create_role(&ctx, &spec).await)
}

pub async fn update_role<P: SessionProvider + 'static>(
    State(state): State<AppState<P>>,
    Path((ctx, name)): Path<(String, String)>,
    Json(spec): Json<RoleSpec>,
) -> HandlerResult<AppliedResponse> {
    applied(state.service.update_role(&ctx, &name, &spec).await)
}

pub async fn drop_role<P: SessionProvider + 'static>(
    State(state): State<AppState<P>>,
    Path((ctx, name)): Path<(String, String)>,
) -> HandlerResult<AppliedResponse> {
    applied(state.service.drop_role(&ctx, &name).await)
}

pub async fn list_members<P: SessionProvider + 'static>(
    State(state): State<AppState<P>>,
    Path((ctx, name)): Path<(String, String)>,
) -> HandlerResult<Vec<RoleRef>> {
    state
        .service
        .list_members(&ctx, &name)
        .await
        .map(Json)
        .map_err(api_error_to_response)
}

pub async fn add_member<P: SessionProvider + 'static>(
    State(state): State<AppState<P>>,
    Path((ctx, name, member)): Path<(String, String, String)>,
    Query(query): Query<MemberQuery>,
) -> HandlerResult<AppliedResponse> {
    applied(
        state
            .service
            .add_member(&ctx, &name, &member, query.with_admin_option)
            .await,
    )
}

pub async fn remove_member<P: SessionProvider + 'static>(
    State(state): State<AppState<P>>,
    Path((ctx, name, member)): Path<(String, String, String)>,
) -> HandlerResult<AppliedResponse> {
    applied(state.service.remove_member(&ctx, &name, &member).await)
}

pub async fn role_graph<P: SessionProvider + 'static>(
    State(state): State<AppState<P>>,
    Path(ctx): Path<String>,
) -> HandlerResult<MembershipGraph> {
    state
        .service
        .role_graph(&ctx)
        .await
        .map(Json)
        .map_err(api_error_to_response)
}

pub async fn list_resource_groups<P: SessionProvider + 'static>(
    State(state): State<AppState<P>>,
    Path(ctx): Path<String>,
) -> HandlerResult<Vec<ResourceGroup>> {
    state
        .service
        .list_resource_groups(&ctx)
        .await
        .map(Json)
        .map_err(api_error_to_response)
}

pub async fn resource_group_limits<P: SessionProvider + 'static>(
    State(state): State<AppState<P>>,
    Path(ctx): Path<String>,
) -> HandlerResult<ResourceGroupLimits> {
    state
        .service
        .resource_group_limits(&ctx)
        .await
        .map(Json)
        .map_err(api_error_to_response)
}

pub async fn create_resource_group<P: SessionProvider + 'static>(
    State(state): State<AppState<P>>,
    Path(ctx): Path<String>,
    Json(spec): Json<ResourceGroupSpec>,
) -> HandlerResult<AppliedResponse> {
    applied(state.service.create_resource_group(&ctx, &spec).await)
}

pub async fn update_resource_group<P: SessionProvider + 'static>(
    State(state): State<AppState<P>>,
    Path((ctx, name)): Path<(String, String)>,
    Json(update): Json<ResourceGroupUpdate>,
) -> HandlerResult<AppliedResponse> {
    applied(state.service.update_resource_group(&ctx, &name, &update).await)
}

pub async fn delete_resource_group<P: SessionProvider + 'static>(
    State(state): State<AppState<P>>,
    Path((ctx, name)): Path<(String, String)>,
) -> HandlerResult<AppliedResponse> {
    applied(state.service.delete_resource_group(&ctx, &name).await)
}

pub async fn transfer_owner<P: SessionProvider + 'static>(
    State(state): State<AppState<P>>,
    Path(ctx): Path<String>,
    Json(update): Json<OwnerEntityUpdate>,
) -> HandlerResult<AppliedResponse> {
    applied(state.service.transfer_owner(&ctx, &update).await)
}
