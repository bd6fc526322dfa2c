//! Matching of newly listed items against the wanted board.
//!
//! A wanted request matches a listing when its title, compared
//! case-insensitively, occurs inside the listing's title and the listing's
//! price falls inside the request's optional price band (bounds inclusive).
//! Only that one direction is checked: a wanted title of "iphone" matches a
//! listing called "iPhone 13", but a wanted title of "iPhone 13 Pro" does not
//! match a listing called "iPhone".

use rust_decimal::Decimal;
use serde::Serialize;

/// The parts of a listing the matcher looks at.
#[derive(Debug, Clone, PartialEq)]
pub struct ListedItem {
    pub id: i32,
    pub title: String,
    pub price: Decimal,
    pub seller_id: i32,
    pub seller_email: String,
}

/// A buyer's outstanding wanted request.
#[derive(Debug, Clone, PartialEq)]
pub struct WantedRequest {
    pub id: i32,
    pub title: String,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub buyer_id: i32,
    pub buyer_email: String,
}

/// A wanted request satisfied by a listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchEvent {
    pub item_id: i32,
    pub wanted_item_id: i32,
    pub buyer_id: i32,
    pub buyer_email: String,
    pub seller_id: i32,
    pub seller_email: String,
    pub item_title: String,
    pub price: Decimal,
}

impl WantedRequest {
    pub fn title_matches(&self, item_title: &str) -> bool {
        item_title.to_lowercase().contains(&self.title.to_lowercase())
    }

    pub fn admits_price(&self, price: &Decimal) -> bool {
        if matches!(self.min_price, Some(min) if *price < min) {
            return false;
        }
        if matches!(self.max_price, Some(max) if *price > max) {
            return false;
        }
        true
    }
}

/// Returns one event per wanted request satisfied by `item`, in input order.
pub fn find_matches(item: &ListedItem, wanted: &[WantedRequest]) -> Vec<MatchEvent> {
    let item_title = item.title.to_lowercase();
    wanted
        .iter()
        .filter(|w| item_title.contains(&w.title.to_lowercase()))
        .filter(|w| w.admits_price(&item.price))
        .map(|w| MatchEvent {
            item_id: item.id,
            wanted_item_id: w.id,
            buyer_id: w.buyer_id,
            buyer_email: w.buyer_email.clone(),
            seller_id: item.seller_id,
            seller_email: item.seller_email.clone(),
            item_title: item.title.clone(),
            price: item.price,
        })
        .collect()
}
