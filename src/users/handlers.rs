use axum::{
    extract::{DefaultBodyLimit, FromRef, Multipart, OriginalUri, Path, Query, State},
    http::{Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::jwt::{AuthUser, JwtKeys};
use crate::auth::password::{hash_password, verify_password};
use crate::crud;
use crate::error::HttpError;
use crate::state::AppState;
use crate::uploads;
use crate::users::dto::{LoginDto, TokenResponse, UserCreateDto, UserUpdateDto};
use crate::users::model::{MeetKind, User, UserSummary, UserWithMeets};

/// Fields a client may change through PATCH; everything else (role,
/// timestamps, relations) is dropped before validation.
const ALLOWED_UPDATE_FIELDS: &[&str] = &[
    "username",
    "email",
    "password",
    "avatar",
    "location",
    "birthDate",
    "bio",
];

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/register", post(register))
        .route("/users/login", post(login))
        .route("/users", get(get_all))
        .route("/users/search", get(search))
        .route(
            "/users/:user_id",
            get(get_by_id).patch(update).delete(delete_user),
        )
        .route(
            "/users/:user_id/saved-meets/:meet_id",
            post(manage_meet).delete(manage_meet),
        )
        .route(
            "/users/:user_id/joined-meets/:meet_id",
            post(manage_meet).delete(manage_meet),
        )
        .route(
            "/users/:user_id/add-friend/:friend_id",
            post(add_friend).delete(delete_friend),
        )
        .route("/users/:user_id/friends", get(get_friends))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB, covers avatar uploads
}

#[instrument(skip(state))]
pub async fn get_all(State(state): State<AppState>) -> Result<Json<Vec<User>>, HttpError> {
    crud::get_all(&state.users).await
}

#[instrument(skip(state))]
pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<User>, HttpError> {
    crud::get_by_id(&state.users, id).await
}

#[instrument(skip(state, multipart))]
pub async fn register(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<User>), HttpError> {
    let mut body = uploads::collect(&state, multipart, "avatar").await?;

    let password = match body.get("password").and_then(Value::as_str) {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => {
            return Err(HttpError::bad_request(
                "Password is required and must be a string",
            ))
        }
    };
    let hash = hash_password(&password).map_err(|e| HttpError::internal(e.to_string()))?;
    body.insert("password".into(), Value::String(hash));

    remap_image_to_avatar(&mut body);

    let dto: UserCreateDto = serde_json::from_value(Value::Object(body))
        .map_err(|e| HttpError::not_acceptable(e.to_string()))?;
    let created = crud::create(&state.users, dto).await?;
    info!("user registered");
    Ok(created)
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginDto>,
) -> Result<Json<TokenResponse>, HttpError> {
    let email = payload.email.as_deref().filter(|v| !v.is_empty());
    let username = payload.username.as_deref().filter(|v| !v.is_empty());
    let password = payload.password.as_deref().filter(|v| !v.is_empty());

    let (Some(password), Some((key, value))) = (
        password,
        email
            .map(|e| ("email", e))
            .or_else(|| username.map(|u| ("username", u))),
    ) else {
        return Err(HttpError::bad_request(
            "Email/username and password are required",
        ));
    };

    let user = state
        .users
        .search_for_login(key, value)
        .await
        .map_err(login_rejection)?;

    let ok = verify_password(password, &user.password_hash)
        .map_err(|e| HttpError::internal(e.to_string()))?;
    if !ok {
        return Err(invalid_credentials());
    }

    let keys = JwtKeys::from_ref(&state);
    let token = keys
        .sign(user.id, &user.role)
        .map_err(|e| HttpError::internal(e.to_string()))?;

    info!(user_id = %user.id, "user logged in");
    Ok(Json(TokenResponse { token }))
}

#[instrument(skip(state, multipart))]
pub async fn update(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Json<User>, HttpError> {
    let mut body = uploads::collect(&state, multipart, "avatar").await?;

    // Remap before the allow-list pass so an uploaded avatar survives it.
    remap_image_to_avatar(&mut body);
    let mut body = filter_allowed(body);

    rehash_password_field(&mut body)?;

    let dto: UserUpdateDto = serde_json::from_value(Value::Object(body))
        .map_err(|e| HttpError::not_acceptable(e.to_string()))?;
    crud::update(&state.users, id, dto).await
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<User>, HttpError> {
    crud::delete(&state.users, id).await
}

#[instrument(skip(state))]
pub async fn manage_meet(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
    Path((user_id, meet_id)): Path<(Uuid, Uuid)>,
    method: Method,
    OriginalUri(uri): OriginalUri,
) -> Result<Json<UserWithMeets>, HttpError> {
    let Some(kind) = MeetKind::from_path(uri.path()) else {
        return Err(HttpError::bad_request("Unknown meet relation in path"));
    };
    let user = state
        .users
        .manage_meet(user_id, meet_id, method.as_str(), kind)
        .await?;
    Ok(Json(user))
}

#[instrument(skip(state))]
pub async fn add_friend(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
    Path((user_id, friend_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, HttpError> {
    state.users.add_friend(user_id, friend_id).await?;
    Ok(StatusCode::OK)
}

#[instrument(skip(state))]
pub async fn delete_friend(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
    Path((user_id, friend_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, HttpError> {
    state.users.delete_friend(user_id, friend_id).await?;
    Ok(StatusCode::OK)
}

#[instrument(skip(state))]
pub async fn get_friends(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<UserSummary>>, HttpError> {
    Ok(Json(state.users.get_friends(user_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub username: String,
}

#[instrument(skip(state))]
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<UserSummary>>, HttpError> {
    Ok(Json(state.users.search_by_username(&params.username).await?))
}

/// The answer for any failed credential check; unknown identity and wrong
/// password must be indistinguishable.
fn invalid_credentials() -> HttpError {
    HttpError::unauthorized("Email/username and password invalid")
}

/// Lookup misses are client-shaped 400s and collapse into the unified 401;
/// infrastructure failures pass through untouched.
fn login_rejection(err: HttpError) -> HttpError {
    if err.status.is_client_error() {
        invalid_credentials()
    } else {
        err
    }
}

/// Hashes a pending plaintext password in the update body. An empty value is
/// dropped entirely so it can never overwrite the stored hash.
fn rehash_password_field(body: &mut Map<String, Value>) -> Result<(), HttpError> {
    let Some(password) = body.get("password").and_then(Value::as_str).map(str::to_string)
    else {
        return Ok(());
    };
    if password.is_empty() {
        body.remove("password");
        return Ok(());
    }
    let hash = hash_password(&password).map_err(|e| HttpError::internal(e.to_string()))?;
    body.insert("password".into(), Value::String(hash));
    Ok(())
}

fn remap_image_to_avatar(body: &mut Map<String, Value>) {
    if let Some(image) = body.remove("image") {
        body.insert("avatar".into(), image);
    }
}

fn filter_allowed(body: Map<String, Value>) -> Map<String, Value> {
    body.into_iter()
        .filter(|(key, _)| ALLOWED_UPDATE_FIELDS.contains(&key.as_str()))
        .collect()
}
