use chrono::{DateTime, Utc};
use diesel::prelude::*; // Import Diesel prelude for Queryable and Insertable
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::schema::{gigs, items, match_notifications, users, wanted_items};

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub hostel_block: String,
    pub is_verified: bool,
    pub date_joined: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub hostel_block: String,
    pub is_verified: bool,
}

#[derive(Debug, Default, Deserialize, AsChangeset)]
#[diesel(table_name = users)]
pub struct ProfileChanges {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub hostel_block: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: i32,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub hostel_block: String,
    pub is_verified: bool,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            hostel_block: user.hostel_block,
            is_verified: user.is_verified,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub hostel_block: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub access: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Associations)]
#[diesel(belongs_to(User, foreign_key = seller_id))]
#[diesel(table_name = items)]
pub struct Item {
    pub id: i32,
    pub seller_id: i32,
    pub title: String,
    pub description: String,
    pub price: Decimal,
    pub category: String,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = items)]
pub struct NewItem {
    pub seller_id: i32,
    pub title: String,
    pub description: String,
    pub price: Decimal,
    pub category: String,
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ItemPayload {
    pub title: String,
    pub description: String,
    pub price: Decimal,
    pub category: String,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Default, Deserialize, AsChangeset)]
#[diesel(table_name = items)]
pub struct ItemChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub category: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub image: Option<Option<String>>,
}

impl ItemChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.price.is_none()
            && self.category.is_none()
            && self.image.is_none()
    }
}

impl From<ItemPayload> for ItemChanges {
    fn from(payload: ItemPayload) -> Self {
        Self {
            title: Some(payload.title),
            description: Some(payload.description),
            price: Some(payload.price),
            category: Some(payload.category),
            image: Some(payload.image),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ItemResponse {
    pub id: i32,
    pub seller: i32,
    pub seller_name: String,
    pub seller_email: String,
    pub title: String,
    pub description: String,
    pub price: Decimal,
    pub category: String,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<(Item, User)> for ItemResponse {
    fn from((item, seller): (Item, User)) -> Self {
        Self {
            id: item.id,
            seller: item.seller_id,
            seller_name: seller.full_name(),
            seller_email: seller.email,
            title: item.title,
            description: item.description,
            price: item.price,
            category: item.category,
            image: item.image,
            created_at: item.created_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Associations)]
#[diesel(belongs_to(User, foreign_key = user_id))]
#[diesel(table_name = wanted_items)]
pub struct WantedItem {
    pub id: i32,
    pub user_id: i32,
    pub title: String,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = wanted_items)]
pub struct NewWantedItem {
    pub user_id: i32,
    pub title: String,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct WantedItemPayload {
    pub title: String,
    #[serde(default)]
    pub min_price: Option<Decimal>,
    #[serde(default)]
    pub max_price: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize, AsChangeset)]
#[diesel(table_name = wanted_items)]
pub struct WantedItemChanges {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub min_price: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "double_option")]
    pub max_price: Option<Option<Decimal>>,
}

impl WantedItemChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.min_price.is_none() && self.max_price.is_none()
    }
}

impl From<WantedItemPayload> for WantedItemChanges {
    fn from(payload: WantedItemPayload) -> Self {
        Self {
            title: Some(payload.title),
            min_price: Some(payload.min_price),
            max_price: Some(payload.max_price),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WantedItemResponse {
    pub id: i32,
    pub user: i32,
    pub user_email: String,
    pub title: String,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl From<(WantedItem, User)> for WantedItemResponse {
    fn from((wanted, owner): (WantedItem, User)) -> Self {
        Self {
            id: wanted.id,
            user: wanted.user_id,
            user_email: owner.email,
            title: wanted.title,
            min_price: wanted.min_price,
            max_price: wanted.max_price,
            created_at: wanted.created_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Associations)]
#[diesel(belongs_to(User, foreign_key = poster_id))]
#[diesel(table_name = gigs)]
pub struct Gig {
    pub id: i32,
    pub poster_id: i32,
    pub title: String,
    pub description: String,
    pub budget: Decimal,
    pub contact_phone: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = gigs)]
pub struct NewGig {
    pub poster_id: i32,
    pub title: String,
    pub description: String,
    pub budget: Decimal,
    pub contact_phone: String,
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct GigPayload {
    pub title: String,
    pub description: String,
    pub budget: Decimal,
    pub contact_phone: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Debug, Default, Deserialize, AsChangeset)]
#[diesel(table_name = gigs)]
pub struct GigChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub budget: Option<Decimal>,
    pub contact_phone: Option<String>,
    pub is_active: Option<bool>,
}

impl GigChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.budget.is_none()
            && self.contact_phone.is_none()
            && self.is_active.is_none()
    }
}

impl From<GigPayload> for GigChanges {
    fn from(payload: GigPayload) -> Self {
        Self {
            title: Some(payload.title),
            description: Some(payload.description),
            budget: Some(payload.budget),
            contact_phone: Some(payload.contact_phone),
            is_active: Some(payload.is_active),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GigResponse {
    pub id: i32,
    pub poster: i32,
    pub poster_name: String,
    pub poster_email: String,
    pub poster_verified: bool,
    pub title: String,
    pub description: String,
    pub budget: Decimal,
    pub contact_phone: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<(Gig, User)> for GigResponse {
    fn from((gig, poster): (Gig, User)) -> Self {
        Self {
            id: gig.id,
            poster: gig.poster_id,
            poster_name: poster.full_name(),
            poster_verified: poster.is_verified,
            poster_email: poster.email,
            title: gig.title,
            description: gig.description,
            budget: gig.budget,
            contact_phone: gig.contact_phone,
            is_active: gig.is_active,
            created_at: gig.created_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = match_notifications)]
pub struct MatchNotification {
    pub id: i32,
    pub item_id: i32,
    pub wanted_item_id: i32,
    pub buyer_id: i32,
    pub buyer_email: String,
    pub seller_id: i32,
    pub seller_email: String,
    pub item_title: String,
    pub item_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = match_notifications)]
pub struct NewMatchNotification<'a> {
    pub item_id: i32,
    pub wanted_item_id: i32,
    pub buyer_id: i32,
    pub buyer_email: &'a str,
    pub seller_id: i32,
    pub seller_email: &'a str,
    pub item_title: &'a str,
    pub item_price: Decimal,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListFilter {
    #[serde(default)]
    pub my_items: Option<String>,
    #[serde(default)]
    pub my_gigs: Option<String>,
}

impl ListFilter {
    // Any non-empty value counts, matching `?my_items=true` and `?my_items=1`.
    fn flag(value: &Option<String>) -> bool {
        value
            .as_deref()
            .map(|v| !v.is_empty() && !v.eq_ignore_ascii_case("false") && v != "0")
            .unwrap_or(false)
    }

    pub fn mine_items(&self) -> bool {
        Self::flag(&self.my_items)
    }

    pub fn mine_gigs(&self) -> bool {
        Self::flag(&self.my_gigs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_name_trims_missing_parts() {
        let user = User {
            id: 1,
            email: "a@b.edu".to_string(),
            first_name: "Asha".to_string(),
            last_name: String::new(),
            hostel_block: String::new(),
            is_verified: true,
            date_joined: Utc::now(),
        };
        assert_eq!(user.full_name(), "Asha");
    }

    #[test]
    fn patch_distinguishes_null_from_absent() {
        let changes: WantedItemChanges = serde_json::from_str(r#"{"min_price": null}"#).unwrap();
        assert_eq!(changes.min_price, Some(None));
        assert_eq!(changes.max_price, None);
        assert!(!changes.is_empty());

        let empty: WantedItemChanges = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn prices_accept_numbers_and_strings() {
        let payload: ItemPayload = serde_json::from_str(
            r#"{"title":"Desk","description":"Oak","price":"1200.50","category":"Furniture"}"#,
        )
        .unwrap();
        assert_eq!(payload.price.to_string(), "1200.50");

        let payload: ItemPayload = serde_json::from_str(
            r#"{"title":"Desk","description":"Oak","price":1200,"category":"Furniture"}"#,
        )
        .unwrap();
        assert_eq!(payload.price, Decimal::from(1200));
    }

    #[test]
    fn gig_defaults_to_active() {
        let payload: GigPayload = serde_json::from_str(
            r#"{"title":"Move boxes","description":"Two hours","budget":"300","contact_phone":"9876543210"}"#,
        )
        .unwrap();
        assert!(payload.is_active);
    }

    #[test]
    fn list_filter_flags() {
        let filter = ListFilter { my_items: Some("true".to_string()), my_gigs: Some("false".to_string()) };
        assert!(filter.mine_items());
        assert!(!filter.mine_gigs());
        assert!(!ListFilter::default().mine_items());
    }
}
