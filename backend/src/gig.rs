use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use log::info;
use rust_decimal::Decimal;

use crate::app::AppState;
use crate::auth::{ensure_owner, CurrentUser};
use crate::db;
use crate::errors::ApiError;
use crate::models::{Gig, GigChanges, GigPayload, GigResponse, ListFilter, NewGig, User};
use crate::schema::{gigs, users};
use crate::validation::{to_money, Validator, PHONE_MAX_CHARS, TITLE_MAX_CHARS};

fn check_gig(
    v: &mut Validator,
    title: Option<&str>,
    description: Option<&str>,
    budget: Option<&Decimal>,
    contact_phone: Option<&str>,
) {
    if let Some(title) = title {
        v.required_text("title", title, TITLE_MAX_CHARS);
    }
    if let Some(description) = description {
        v.required_text("description", description, usize::MAX);
    }
    if let Some(budget) = budget {
        v.money("budget", budget);
    }
    if let Some(contact_phone) = contact_phone {
        v.required_text("contact_phone", contact_phone, PHONE_MAX_CHARS);
    }
}

fn load_with_poster(conn: &mut PgConnection, gig_id: i32) -> Result<(Gig, User), DieselError> {
    gigs::table
        .inner_join(users::table)
        .filter(gigs::id.eq(gig_id))
        .select((Gig::as_select(), User::as_select()))
        .first(conn)
}

/// Lists gigs newest first; `?my_gigs=true` limits the list to the caller's own.
pub async fn list_gigs(
    State(state): State<AppState>,
    Query(filter): Query<ListFilter>,
    current: Option<CurrentUser>,
) -> Result<Json<Vec<GigResponse>>, ApiError> {
    let poster = if filter.mine_gigs() {
        Some(current.ok_or_else(|| {
            ApiError::Unauthorized("Authentication credentials were not provided.".to_string())
        })?)
    } else {
        None
    };

    let rows = db::run(&state.pool, move |conn| -> Result<Vec<(Gig, User)>, ApiError> {
        let mut query = gigs::table
            .inner_join(users::table)
            .select((Gig::as_select(), User::as_select()))
            .order((gigs::created_at.desc(), gigs::id.desc()))
            .into_boxed();
        if let Some(poster) = poster {
            query = query.filter(gigs::poster_id.eq(poster.id));
        }
        Ok(query.load(conn)?)
    })
    .await?;

    info!("Fetched {} gigs", rows.len());
    Ok(Json(rows.into_iter().map(GigResponse::from).collect()))
}

pub async fn get_gig(
    State(state): State<AppState>,
    Path(gig_id): Path<i32>,
) -> Result<Json<GigResponse>, ApiError> {
    let row = db::run(&state.pool, move |conn| -> Result<(Gig, User), ApiError> {
        Ok(load_with_poster(conn, gig_id)?)
    })
    .await?;
    Ok(Json(row.into()))
}

pub async fn create_gig(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(payload): Json<GigPayload>,
) -> Result<(StatusCode, Json<GigResponse>), ApiError> {
    let mut v = Validator::new();
    check_gig(
        &mut v,
        Some(&payload.title),
        Some(&payload.description),
        Some(&payload.budget),
        Some(&payload.contact_phone),
    );
    v.finish()?;

    let new_gig = NewGig {
        poster_id: current.id,
        title: payload.title.trim().to_string(),
        description: payload.description,
        budget: to_money(payload.budget),
        contact_phone: payload.contact_phone.trim().to_string(),
        is_active: payload.is_active,
    };

    let row = db::run(&state.pool, move |conn| -> Result<(Gig, User), ApiError> {
        let gig: Gig = diesel::insert_into(gigs::table)
            .values(&new_gig)
            .returning(Gig::as_returning())
            .get_result(conn)?;
        let poster: User = users::table.find(gig.poster_id).select(User::as_select()).first(conn)?;
        Ok((gig, poster))
    })
    .await?;

    info!("User {} posted gig {} ('{}')", current.id, row.0.id, row.0.title);
    Ok((StatusCode::CREATED, Json(row.into())))
}

pub async fn replace_gig(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(gig_id): Path<i32>,
    Json(payload): Json<GigPayload>,
) -> Result<Json<GigResponse>, ApiError> {
    apply_changes(state, current, gig_id, payload.into()).await
}

pub async fn update_gig(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(gig_id): Path<i32>,
    Json(changes): Json<GigChanges>,
) -> Result<Json<GigResponse>, ApiError> {
    apply_changes(state, current, gig_id, changes).await
}

async fn apply_changes(
    state: AppState,
    current: CurrentUser,
    gig_id: i32,
    mut changes: GigChanges,
) -> Result<Json<GigResponse>, ApiError> {
    let mut v = Validator::new();
    check_gig(
        &mut v,
        changes.title.as_deref(),
        changes.description.as_deref(),
        changes.budget.as_ref(),
        changes.contact_phone.as_deref(),
    );
    v.finish()?;
    changes.title = changes.title.map(|t| t.trim().to_string());
    changes.contact_phone = changes.contact_phone.map(|p| p.trim().to_string());
    changes.budget = changes.budget.map(to_money);

    let row = db::run(&state.pool, move |conn| -> Result<(Gig, User), ApiError> {
        conn.transaction::<_, ApiError, _>(|conn| {
            let (gig, poster) = load_with_poster(conn, gig_id)?;
            ensure_owner(gig.poster_id, &current)?;
            if changes.is_empty() {
                return Ok((gig, poster));
            }
            let updated: Gig = diesel::update(gigs::table.find(gig_id))
                .set(&changes)
                .returning(Gig::as_returning())
                .get_result(conn)?;
            Ok((updated, poster))
        })
    })
    .await?;

    info!("User {} updated gig {}", current.id, gig_id);
    Ok(Json(row.into()))
}

pub async fn delete_gig(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(gig_id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    db::run(&state.pool, move |conn| -> Result<(), ApiError> {
        conn.transaction::<_, ApiError, _>(|conn| {
            let poster_id: i32 = gigs::table.find(gig_id).select(gigs::poster_id).first(conn)?;
            ensure_owner(poster_id, &current)?;
            diesel::delete(gigs::table.find(gig_id)).execute(conn)?;
            Ok(())
        })
    })
    .await?;

    info!("User {} deleted gig {}", current.id, gig_id);
    Ok(StatusCode::NO_CONTENT)
}
