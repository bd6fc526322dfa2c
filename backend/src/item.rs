use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use log::{error, info};
use rust_decimal::Decimal;

use crate::app::AppState;
use crate::auth::{ensure_owner, CurrentUser};
use crate::db;
use crate::errors::ApiError;
use crate::models::{Item, ItemChanges, ItemPayload, ItemResponse, ListFilter, NewItem, User};
use crate::schema::{items, users};
use crate::validation::{to_money, Validator, CATEGORY_MAX_CHARS, TITLE_MAX_CHARS};

fn check_item(
    v: &mut Validator,
    title: Option<&str>,
    description: Option<&str>,
    price: Option<&Decimal>,
    category: Option<&str>,
) {
    if let Some(title) = title {
        v.required_text("title", title, TITLE_MAX_CHARS);
    }
    if let Some(description) = description {
        v.required_text("description", description, usize::MAX);
    }
    if let Some(price) = price {
        v.money("price", price);
    }
    if let Some(category) = category {
        v.required_text("category", category, CATEGORY_MAX_CHARS);
    }
}

fn normalize_image(image: Option<String>) -> Option<String> {
    image.map(|i| i.trim().to_string()).filter(|i| !i.is_empty())
}

fn load_with_seller(conn: &mut PgConnection, item_id: i32) -> Result<(Item, User), DieselError> {
    items::table
        .inner_join(users::table)
        .filter(items::id.eq(item_id))
        .select((Item::as_select(), User::as_select()))
        .first(conn)
}

/// Lists items newest first; `?my_items=true` limits the list to the caller's own.
pub async fn list_items(
    State(state): State<AppState>,
    Query(filter): Query<ListFilter>,
    current: Option<CurrentUser>,
) -> Result<Json<Vec<ItemResponse>>, ApiError> {
    let seller = if filter.mine_items() {
        Some(current.ok_or_else(|| {
            ApiError::Unauthorized("Authentication credentials were not provided.".to_string())
        })?)
    } else {
        None
    };

    let rows = db::run(&state.pool, move |conn| -> Result<Vec<(Item, User)>, ApiError> {
        let mut query = items::table
            .inner_join(users::table)
            .select((Item::as_select(), User::as_select()))
            .order((items::created_at.desc(), items::id.desc()))
            .into_boxed();
        if let Some(seller) = seller {
            query = query.filter(items::seller_id.eq(seller.id));
        }
        Ok(query.load(conn)?)
    })
    .await?;

    info!("Fetched {} items", rows.len());
    Ok(Json(rows.into_iter().map(ItemResponse::from).collect()))
}

pub async fn get_item(
    State(state): State<AppState>,
    Path(item_id): Path<i32>,
) -> Result<Json<ItemResponse>, ApiError> {
    let row = db::run(&state.pool, move |conn| -> Result<(Item, User), ApiError> {
        Ok(load_with_seller(conn, item_id)?)
    })
    .await?;
    Ok(Json(row.into()))
}

/// Lists a new item for the caller and schedules a scan of the wanted board.
pub async fn create_item(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(payload): Json<ItemPayload>,
) -> Result<(StatusCode, Json<ItemResponse>), ApiError> {
    let mut v = Validator::new();
    check_item(
        &mut v,
        Some(&payload.title),
        Some(&payload.description),
        Some(&payload.price),
        Some(&payload.category),
    );
    v.finish()?;

    let new_item = NewItem {
        seller_id: current.id,
        title: payload.title.trim().to_string(),
        description: payload.description,
        price: to_money(payload.price),
        category: payload.category.trim().to_string(),
        image: normalize_image(payload.image),
    };

    let row = db::run(&state.pool, move |conn| -> Result<(Item, User), ApiError> {
        let item: Item = diesel::insert_into(items::table)
            .values(&new_item)
            .returning(Item::as_returning())
            .get_result(conn)?;
        let seller: User = users::table.find(item.seller_id).select(User::as_select()).first(conn)?;
        Ok((item, seller))
    })
    .await
    .map_err(|e| {
        error!("Failed to create item: {}", e);
        e
    })?;

    info!("User {} listed item {} ('{}')", current.id, row.0.id, row.0.title);
    // Committed; matching happens off the request path.
    state.matches.enqueue(row.0.id);

    Ok((StatusCode::CREATED, Json(row.into())))
}

pub async fn replace_item(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(item_id): Path<i32>,
    Json(payload): Json<ItemPayload>,
) -> Result<Json<ItemResponse>, ApiError> {
    apply_changes(state, current, item_id, payload.into()).await
}

pub async fn update_item(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(item_id): Path<i32>,
    Json(changes): Json<ItemChanges>,
) -> Result<Json<ItemResponse>, ApiError> {
    apply_changes(state, current, item_id, changes).await
}

async fn apply_changes(
    state: AppState,
    current: CurrentUser,
    item_id: i32,
    mut changes: ItemChanges,
) -> Result<Json<ItemResponse>, ApiError> {
    let mut v = Validator::new();
    check_item(
        &mut v,
        changes.title.as_deref(),
        changes.description.as_deref(),
        changes.price.as_ref(),
        changes.category.as_deref(),
    );
    v.finish()?;
    changes.title = changes.title.map(|t| t.trim().to_string());
    changes.category = changes.category.map(|c| c.trim().to_string());
    changes.price = changes.price.map(to_money);
    changes.image = changes.image.map(normalize_image);

    let row = db::run(&state.pool, move |conn| -> Result<(Item, User), ApiError> {
        conn.transaction::<_, ApiError, _>(|conn| {
            let (item, seller) = load_with_seller(conn, item_id)?;
            ensure_owner(item.seller_id, &current)?;
            if changes.is_empty() {
                return Ok((item, seller));
            }
            let updated: Item = diesel::update(items::table.find(item_id))
                .set(&changes)
                .returning(Item::as_returning())
                .get_result(conn)?;
            Ok((updated, seller))
        })
    })
    .await?;

    info!("User {} updated item {}", current.id, item_id);
    Ok(Json(row.into()))
}

pub async fn delete_item(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(item_id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    db::run(&state.pool, move |conn| -> Result<(), ApiError> {
        conn.transaction::<_, ApiError, _>(|conn| {
            let seller_id: i32 = items::table.find(item_id).select(items::seller_id).first(conn)?;
            ensure_owner(seller_id, &current)?;
            diesel::delete(items::table.find(item_id)).execute(conn)?;
            Ok(())
        })
    })
    .await?;

    info!("User {} deleted item {}", current.id, item_id);
    Ok(StatusCode::NO_CONTENT)
}
