mod handlers;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};

use gpkeeper_core::session::SessionProvider;

use crate::service::AdminService;

const MAX_REQUEST_BODY_SIZE: usize = 1024 * 1024; // 1 MB

pub struct AppState<P: SessionProvider> {
    pub service: Arc<AdminService<P>>,
}

impl<P: SessionProvider> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
        }
    }
}

pub fn create_router<P>(state: AppState<P>) -> Router
where
    P: SessionProvider + 'static,
{
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route(
            "/v1/acl/decode",
            get(handlers::decode_rule).post(handlers::decode_rules),
        )
        .route("/v1/{ctx}/databases", get(handlers::list_databases::<P>))
        .route(
            "/v1/{ctx}/databases/{db}/schemas",
            get(handlers::list_schemas::<P>),
        )
        .route(
            "/v1/{ctx}/databases/{db}/schemas/{schema}/tables",
            get(handlers::list_tables::<P>),
        )
        .route(
            "/v1/{ctx}/databases/{db}/default-privileges",
            get(handlers::list_default_privileges::<P>),
        )
        .route(
            "/v1/{ctx}/default-privileges/revoke",
            put(handlers::revoke_default_privileges::<P>),
        )
        .route("/v1/{ctx}/grant/{kind}", put(handlers::grant::<P>))
        .route(
            "/v1/{ctx}/permissions/effective",
            post(handlers::effective_permissions::<P>),
        )
        .route(
            "/v1/{ctx}/roles",
            get(handlers::list_roles::<P>).post(handlers::create_role::<P>),
        )
        .route(
            "/v1/{ctx}/roles/{name}",
            get(handlers::get_role::<P>)
                .put(handlers::update_role::<P>)
                .delete(handlers::drop_role::<P>),
        )
        .route(
            "/v1/{ctx}/roles/{name}/members",
            get(handlers::list_members::<P>),
        )
        .route(
            "/v1/{ctx}/roles/{name}/members/{member}",
            put(handlers::add_member::<P>).delete(handlers::remove_member::<P>),
        )
        .route("/v1/{ctx}/role-graph", get(handlers::role_graph::<P>))
        .route(
            "/v1/{ctx}/resource-groups",
            get(handlers::list_resource_groups::<P>).post(handlers::create_resource_group::<P>),
        )
        .route(
            "/v1/{ctx}/resource-groups/limits",
            get(handlers::resource_group_limits::<P>),
        )
        .route(
            "/v1/{ctx}/resource-groups/{name}",
            put(handlers::update_resource_group::<P>).delete(handlers::delete_resource_group::<P>),
        )
        .route("/v1/{ctx}/owner", put(handlers::transfer_owner::<P>))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_SIZE))
        .with_state(state)
}
