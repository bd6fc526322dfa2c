use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use log::info;

use crate::app::AppState;
use crate::auth::{create_token, CurrentUser};
use crate::db;
use crate::errors::ApiError;
use crate::models::{NewUser, ProfileChanges, RegisterRequest, RegisterResponse, User, UserProfile};
use crate::schema::users;
use crate::validation::{normalize_email, Validator, HOSTEL_BLOCK_MAX_CHARS, NAME_MAX_CHARS};

const INSTITUTIONAL_SUFFIXES: [&str; 2] = [".edu", ".ac.in"];

/// Campus addresses are verified automatically.
pub fn is_institutional_email(email: &str) -> bool {
    let email = email.trim().to_lowercase();
    INSTITUTIONAL_SUFFIXES.iter().any(|suffix| email.ends_with(suffix))
}

fn check_profile_fields(v: &mut Validator, first_name: Option<&str>, last_name: Option<&str>, hostel_block: Option<&str>) {
    if let Some(first_name) = first_name {
        v.max_length("first_name", first_name, NAME_MAX_CHARS);
    }
    if let Some(last_name) = last_name {
        v.max_length("last_name", last_name, NAME_MAX_CHARS);
    }
    if let Some(hostel_block) = hostel_block {
        v.max_length("hostel_block", hostel_block, HOSTEL_BLOCK_MAX_CHARS);
    }
}

/// Creates an account and returns its profile along with an access token.
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let mut v = Validator::new();
    let email = match normalize_email(&request.email) {
        Ok(email) => Some(email),
        Err(message) => {
            v.add("email", message);
            None
        }
    };
    check_profile_fields(
        &mut v,
        Some(&request.first_name),
        Some(&request.last_name),
        Some(&request.hostel_block),
    );
    v.finish()?;
    let Some(email) = email else {
        return Err(ApiError::field("email", "Enter a valid email address."));
    };

    let new_user = NewUser {
        is_verified: is_institutional_email(&email),
        email,
        first_name: request.first_name.trim().to_string(),
        last_name: request.last_name.trim().to_string(),
        hostel_block: request.hostel_block.trim().to_string(),
    };

    let user = db::run(&state.pool, move |conn| -> Result<User, ApiError> {
        diesel::insert_into(users::table)
            .values(&new_user)
            .returning(User::as_returning())
            .get_result(conn)
            .map_err(|e| match e {
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    ApiError::field("email", "user with this email address already exists.")
                }
                other => other.into(),
            })
    })
    .await?;

    let access = create_token(user.id, &state.config.jwt_secret, state.config.token_ttl_hours)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    info!("Registered user {} (verified: {})", user.id, user.is_verified);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            profile: user.into(),
            access,
        }),
    ))
}

pub async fn get_profile(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<UserProfile>, ApiError> {
    let user = db::run(&state.pool, move |conn| -> Result<User, ApiError> {
        users::table
            .find(current.id)
            .select(User::as_select())
            .first(conn)
            .map_err(unknown_user)
    })
    .await?;
    Ok(Json(user.into()))
}

/// Updates the caller's names and hostel block. Email and verification are read-only.
pub async fn update_profile(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(changes): Json<ProfileChanges>,
) -> Result<Json<UserProfile>, ApiError> {
    let mut v = Validator::new();
    check_profile_fields(
        &mut v,
        changes.first_name.as_deref(),
        changes.last_name.as_deref(),
        changes.hostel_block.as_deref(),
    );
    v.finish()?;

    let user = db::run(&state.pool, move |conn| -> Result<User, ApiError> {
        conn.transaction::<_, DieselError, _>(|conn| {
            let existing: User = users::table.find(current.id).select(User::as_select()).first(conn)?;
            let verified = is_institutional_email(&existing.email);
            diesel::update(users::table.find(current.id))
                .set((&changes, users::is_verified.eq(verified)))
                .returning(User::as_returning())
                .get_result(conn)
        })
        .map_err(unknown_user)
    })
    .await?;
    info!("Updated profile for user {}", user.id);
    Ok(Json(user.into()))
}

// A valid token for a deleted account is treated as bad credentials.
fn unknown_user(err: DieselError) -> ApiError {
    match err {
        DieselError::NotFound => ApiError::Unauthorized("User not found".to_string()),
        other => other.into(),
    }
}
