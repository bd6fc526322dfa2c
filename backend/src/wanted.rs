use axum::extract::{Path, State};
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
use crate::models::{NewWantedItem, User, WantedItem, WantedItemChanges, WantedItemPayload, WantedItemResponse};
use crate::schema::{users, wanted_items};
use crate::validation::{to_money, Validator, TITLE_MAX_CHARS};

fn check_wanted(v: &mut Validator, title: Option<&str>, min_price: Option<&Decimal>, max_price: Option<&Decimal>) {
    if let Some(title) = title {
        v.required_text("title", title, TITLE_MAX_CHARS);
    }
    if let Some(min_price) = min_price {
        v.money("min_price", min_price);
    }
    if let Some(max_price) = max_price {
        v.money("max_price", max_price);
    }
}

fn load_with_owner(conn: &mut PgConnection, wanted_id: i32) -> Result<(WantedItem, User), DieselError> {
    wanted_items::table
        .inner_join(users::table)
        .filter(wanted_items::id.eq(wanted_id))
        .select((WantedItem::as_select(), User::as_select()))
        .first(conn)
}

pub async fn list_wanted(State(state): State<AppState>) -> Result<Json<Vec<WantedItemResponse>>, ApiError> {
    let rows = db::run(&state.pool, |conn| -> Result<Vec<(WantedItem, User)>, ApiError> {
        Ok(wanted_items::table
            .inner_join(users::table)
            .select((WantedItem::as_select(), User::as_select()))
            .order((wanted_items::created_at.desc(), wanted_items::id.desc()))
            .load(conn)?)
    })
    .await?;
    info!("Fetched {} wanted items", rows.len());
    Ok(Json(rows.into_iter().map(WantedItemResponse::from).collect()))
}

pub async fn get_wanted(
    State(state): State<AppState>,
    Path(wanted_id): Path<i32>,
) -> Result<Json<WantedItemResponse>, ApiError> {
    let row = db::run(&state.pool, move |conn| -> Result<(WantedItem, User), ApiError> {
        Ok(load_with_owner(conn, wanted_id)?)
    })
    .await?;
    Ok(Json(row.into()))
}

/// Posts a wanted request. A band with `min_price` above `max_price` is rejected.
pub async fn create_wanted(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(payload): Json<WantedItemPayload>,
) -> Result<(StatusCode, Json<WantedItemResponse>), ApiError> {
    let mut v = Validator::new();
    check_wanted(&mut v, Some(&payload.title), payload.min_price.as_ref(), payload.max_price.as_ref());
    v.price_band(payload.min_price.as_ref(), payload.max_price.as_ref());
    v.finish()?;

    let new_wanted = NewWantedItem {
        user_id: current.id,
        title: payload.title.trim().to_string(),
        min_price: payload.min_price.map(to_money),
        max_price: payload.max_price.map(to_money),
    };

    let row = db::run(&state.pool, move |conn| -> Result<(WantedItem, User), ApiError> {
        let wanted: WantedItem = diesel::insert_into(wanted_items::table)
            .values(&new_wanted)
            .returning(WantedItem::as_returning())
            .get_result(conn)?;
        let owner: User = users::table.find(wanted.user_id).select(User::as_select()).first(conn)?;
        Ok((wanted, owner))
    })
    .await?;

    info!("User {} posted wanted item {} ('{}')", current.id, row.0.id, row.0.title);
    Ok((StatusCode::CREATED, Json(row.into())))
}

pub async fn replace_wanted(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(wanted_id): Path<i32>,
    Json(payload): Json<WantedItemPayload>,
) -> Result<Json<WantedItemResponse>, ApiError> {
    apply_changes(state, current, wanted_id, payload.into()).await
}

pub async fn update_wanted(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(wanted_id): Path<i32>,
    Json(changes): Json<WantedItemChanges>,
) -> Result<Json<WantedItemResponse>, ApiError> {
    apply_changes(state, current, wanted_id, changes).await
}

async fn apply_changes(
    state: AppState,
    current: CurrentUser,
    wanted_id: i32,
    mut changes: WantedItemChanges,
) -> Result<Json<WantedItemResponse>, ApiError> {
    let mut v = Validator::new();
    check_wanted(
        &mut v,
        changes.title.as_deref(),
        changes.min_price.as_ref().and_then(Option::as_ref),
        changes.max_price.as_ref().and_then(Option::as_ref),
    );
    v.finish()?;
    changes.title = changes.title.map(|t| t.trim().to_string());
    changes.min_price = changes.min_price.map(|p| p.map(to_money));
    changes.max_price = changes.max_price.map(|p| p.map(to_money));

    let row = db::run(&state.pool, move |conn| -> Result<(WantedItem, User), ApiError> {
        conn.transaction::<_, ApiError, _>(|conn| {
            let (wanted, owner) = load_with_owner(conn, wanted_id)?;
            ensure_owner(wanted.user_id, &current)?;

            // The band is checked against the merged record, not just the patch.
            let min_price = changes.min_price.unwrap_or(wanted.min_price);
            let max_price = changes.max_price.unwrap_or(wanted.max_price);
            let mut v = Validator::new();
            v.price_band(min_price.as_ref(), max_price.as_ref());
            v.finish()?;

            if changes.is_empty() {
                return Ok((wanted, owner));
            }
            let updated: WantedItem = diesel::update(wanted_items::table.find(wanted_id))
                .set(&changes)
                .returning(WantedItem::as_returning())
                .get_result(conn)?;
            Ok((updated, owner))
        })
    })
    .await?;

    info!("User {} updated wanted item {}", current.id, wanted_id);
    Ok(Json(row.into()))
}

pub async fn delete_wanted(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(wanted_id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    db::run(&state.pool, move |conn| -> Result<(), ApiError> {
        conn.transaction::<_, ApiError, _>(|conn| {
            let owner_id: i32 = wanted_items::table
                .find(wanted_id)
                .select(wanted_items::user_id)
                .first(conn)?;
            ensure_owner(owner_id, &current)?;
            diesel::delete(wanted_items::table.find(wanted_id)).execute(conn)?;
            Ok(())
        })
    })
    .await?;

    info!("User {} deleted wanted item {}", current.id, wanted_id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_band_is_rejected_on_create() {
        let mut v = Validator::new();
        let (min, max) = (Decimal::from(30000), Decimal::from(20000));
        check_wanted(&mut v, Some("iphone"), Some(&min), Some(&max));
        v.price_band(Some(&min), Some(&max));
        assert!(matches!(v.finish(), Err(ApiError::Fields(e)) if e.contains_key("min_price")));
    }

    #[test]
    fn open_bands_are_fine() {
        let mut v = Validator::new();
        let min = Decimal::from(100);
        check_wanted(&mut v, Some("calculator"), Some(&min), None);
        v.price_band(Some(&min), None);
        assert!(v.finish().is_ok());
    }
}
