/// Role listing
///
/// `GET /v1/roles` returns the roles of the clinic the request was resolved
/// to. The query is unqualified; the connection comes from the schema router
/// and is already bound to `tenant_{id}`.

use axum::{extract::State, Extension, Json};
use clinicore_shared::models::role::Role;

use crate::{app::AppState, error::ApiResult, middleware::auth::AuthContext};

pub async fn list_roles(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Vec<Role>>> {
    auth.require_role(&["super_admin", "clinic_admin"])?;

    let mut conn = state.router.acquire().await?;
    let roles = Role::list(&mut conn).await?;

    Ok(Json(roles))
}
