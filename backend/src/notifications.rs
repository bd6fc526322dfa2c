//! Delivery of match events off the request path.
//!
//! The item handler only enqueues the new item's id. A background
//! [`MatchDispatcher`] runs the matcher, records each (item, wanted item)
//! pair once in `match_notifications`, stamps the item as scanned, and then
//! hands newly recorded pairs to a [`Notifier`].
//!
//! Both halves are durable. An item without a scan stamp is rescanned on the
//! next pass, and a recorded pair stays pending until the notifier succeeds.
//! Delivery is therefore at-least-once, while a pair recorded twice never
//! produces a second notification.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::db::{DbError, DbPool};
use crate::matching::{find_matches, ListedItem, MatchEvent, WantedRequest};
use crate::models::{MatchNotification, NewMatchNotification};
use crate::schema::{items, match_notifications, users, wanted_items};

/// Sending half of the match queue, held by the item handlers.
#[derive(Clone, Debug)]
pub struct MatchQueue {
    sender: mpsc::UnboundedSender<i32>,
}

impl MatchQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<i32>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Schedules a match scan for `item_id`. Never blocks and never fails the caller.
    pub fn enqueue(&self, item_id: i32) {
        if self.sender.send(item_id).is_err() {
            warn!("Match dispatcher is not running; item {} will not be scanned", item_id);
        }
    }
}

/// Persistence needed by the dispatcher. Implementations block.
pub trait MatchStore: Send + Sync {
    fn listed_item(&self, item_id: i32) -> Result<Option<ListedItem>, DbError>;
    fn wanted_requests(&self) -> Result<Vec<WantedRequest>, DbError>;
    /// Records the pair, returning `false` when it was already recorded.
    fn record(&self, event: &MatchEvent) -> Result<bool, DbError>;
    fn pending(&self) -> Result<Vec<MatchEvent>, DbError>;
    fn mark_delivered(&self, item_id: i32, wanted_item_id: i32) -> Result<(), DbError>;
    /// Items whose match scan has not completed yet, oldest first.
    fn unscanned_items(&self) -> Result<Vec<i32>, DbError>;
    fn mark_scanned(&self, item_id: i32) -> Result<(), DbError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Delivers a match to the people involved.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &MatchEvent) -> Result<(), NotifyError>;
}

/// Writes each match to the application log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &MatchEvent) -> Result<(), NotifyError> {
        info!(
            "MATCH FOUND! Seller {} listed '{}' (item {}) which buyer {} wanted (wanted item {})",
            event.seller_email, event.item_title, event.item_id, event.buyer_email, event.wanted_item_id
        );
        Ok(())
    }
}

pub struct PgMatchStore {
    pool: DbPool,
}

impl PgMatchStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl MatchStore for PgMatchStore {
    fn listed_item(&self, item_id: i32) -> Result<Option<ListedItem>, DbError> {
        let mut conn = self.pool.get()?;
        let row = items::table
            .inner_join(users::table)
            .filter(items::id.eq(item_id))
            .select((items::id, items::title, items::price, items::seller_id, users::email))
            .first::<(i32, String, Decimal, i32, String)>(&mut conn)
            .optional()?;
        Ok(row.map(|(id, title, price, seller_id, seller_email)| ListedItem {
            id,
            title,
            price,
            seller_id,
            seller_email,
        }))
    }

    fn wanted_requests(&self) -> Result<Vec<WantedRequest>, DbError> {
        let mut conn = self.pool.get()?;
        let rows = wanted_items::table
            .inner_join(users::table)
            .select((
                wanted_items::id,
                wanted_items::title,
                wanted_items::min_price,
                wanted_items::max_price,
                wanted_items::user_id,
                users::email,
            ))
            .load::<(i32, String, Option<Decimal>, Option<Decimal>, i32, String)>(&mut conn)?;
        Ok(rows
            .into_iter()
            .map(|(id, title, min_price, max_price, buyer_id, buyer_email)| WantedRequest {
                id,
                title,
                min_price,
                max_price,
                buyer_id,
                buyer_email,
            })
            .collect())
    }

    fn record(&self, event: &MatchEvent) -> Result<bool, DbError> {
        let mut conn = self.pool.get()?;
        let inserted = diesel::insert_into(match_notifications::table)
            .values(NewMatchNotification {
                item_id: event.item_id,
                wanted_item_id: event.wanted_item_id,
                buyer_id: event.buyer_id,
                buyer_email: &event.buyer_email,
                seller_id: event.seller_id,
                seller_email: &event.seller_email,
                item_title: &event.item_title,
                item_price: event.price,
            })
            .on_conflict((match_notifications::item_id, match_notifications::wanted_item_id))
            .do_nothing()
            .execute(&mut conn)?;
        Ok(inserted == 1)
    }

    fn pending(&self) -> Result<Vec<MatchEvent>, DbError> {
        let mut conn = self.pool.get()?;
        let rows = match_notifications::table
            .filter(match_notifications::delivered_at.is_null())
            .order(match_notifications::id.asc())
            .select(MatchNotification::as_select())
            .load(&mut conn)?;
        Ok(rows.into_iter().map(MatchEvent::from).collect())
    }

    fn mark_delivered(&self, item_id: i32, wanted_item_id: i32) -> Result<(), DbError> {
        let mut conn = self.pool.get()?;
        diesel::update(
            match_notifications::table
                .filter(match_notifications::item_id.eq(item_id))
                .filter(match_notifications::wanted_item_id.eq(wanted_item_id)),
        )
        .set(match_notifications::delivered_at.eq(Utc::now()))
        .execute(&mut conn)?;
        Ok(())
    }

    fn unscanned_items(&self) -> Result<Vec<i32>, DbError> {
        let mut conn = self.pool.get()?;
        Ok(items::table
            .filter(items::matched_at.is_null())
            .order(items::id.asc())
            .select(items::id)
            .load(&mut conn)?)
    }

    fn mark_scanned(&self, item_id: i32) -> Result<(), DbError> {
        let mut conn = self.pool.get()?;
        diesel::update(items::table.find(item_id))
            .set(items::matched_at.eq(Utc::now()))
            .execute(&mut conn)?;
        Ok(())
    }
}

impl From<MatchNotification> for MatchEvent {
    fn from(row: MatchNotification) -> Self {
        Self {
            item_id: row.item_id,
            wanted_item_id: row.wanted_item_id,
            buyer_id: row.buyer_id,
            buyer_email: row.buyer_email,
            seller_id: row.seller_id,
            seller_email: row.seller_email,
            item_title: row.item_title,
            price: row.item_price,
        }
    }
}

pub struct MatchDispatcher {
    store: Arc<dyn MatchStore>,
    notifier: Arc<dyn Notifier>,
    retry_interval: Duration,
}

impl MatchDispatcher {
    pub fn new(store: Arc<dyn MatchStore>, notifier: Arc<dyn Notifier>, retry_interval: Duration) -> Self {
        Self {
            store,
            notifier,
            retry_interval,
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&dyn MatchStore) -> Result<T, DbError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref())).await?
    }

    /// Scans the wanted board for `item_id` and notifies newly recorded matches.
    /// Returns how many notifications were delivered.
    ///
    /// Every pair is recorded before anyone is notified and the item is only
    /// stamped once all pairs are recorded. A scan that fails part way leaves
    /// the item unstamped, so [`resume`](Self::resume) runs it again and the
    /// unique pair record keeps the rerun from notifying anyone twice.
    pub async fn process_item(&self, item_id: i32) -> Result<usize, DbError> {
        let Some(item) = self.blocking(move |store| store.listed_item(item_id)).await? else {
            debug!("Item {} no longer exists; skipping match scan", item_id);
            return Ok(0);
        };
        let wanted = self.blocking(|store| store.wanted_requests()).await?;
        let matches = find_matches(&item, &wanted);
        info!("Checked item {} against {} wanted requests: {} matches", item_id, wanted.len(), matches.len());

        let mut fresh = Vec::with_capacity(matches.len());
        for event in matches {
            let recorded = event.clone();
            if self.blocking(move |store| store.record(&recorded)).await? {
                fresh.push(event);
            } else {
                debug!("Match item {} / wanted {} already recorded", event.item_id, event.wanted_item_id);
            }
        }
        self.blocking(move |store| store.mark_scanned(item_id)).await?;

        let mut delivered = 0;
        for event in &fresh {
            if self.deliver(event).await {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Finishes interrupted work: rescans every unstamped item, then retries
    /// undelivered notifications. Returns how many notifications were delivered.
    pub async fn resume(&self) -> Result<usize, DbError> {
        let unscanned = self.blocking(|store| store.unscanned_items()).await?;
        let mut delivered = 0;
        for item_id in unscanned {
            match self.process_item(item_id).await {
                Ok(n) => delivered += n,
                Err(e) => warn!("Match scan for item {} failed again, will retry: {}", item_id, e),
            }
        }
        Ok(delivered + self.redeliver_pending().await?)
    }

    /// Retries every recorded match that has not been delivered yet.
    pub async fn redeliver_pending(&self) -> Result<usize, DbError> {
        let pending = self.blocking(|store| store.pending()).await?;
        if !pending.is_empty() {
            info!("Retrying {} undelivered match notifications", pending.len());
        }
        let mut delivered = 0;
        for event in pending {
            if self.deliver(&event).await {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    async fn deliver(&self, event: &MatchEvent) -> bool {
        if let Err(e) = self.notifier.notify(event).await {
            warn!(
                "Notification for item {} / wanted {} failed, will retry: {}",
                event.item_id, event.wanted_item_id, e
            );
            return false;
        }
        let (item_id, wanted_item_id) = (event.item_id, event.wanted_item_id);
        match self.blocking(move |store| store.mark_delivered(item_id, wanted_item_id)).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to mark match item {} / wanted {} delivered: {}", item_id, wanted_item_id, e);
                false
            }
        }
    }

    /// Consumes the queue until every sender is dropped.
    pub async fn run(self, mut receiver: mpsc::UnboundedReceiver<i32>) {
        if let Err(e) = self.resume().await {
            error!("Failed to resume pending match work: {}", e);
        }
        let mut retry = tokio::time::interval_at(
            tokio::time::Instant::now() + self.retry_interval,
            self.retry_interval,
        );
        loop {
            tokio::select! {
                next = receiver.recv() => match next {
                    Some(item_id) => {
                        if let Err(e) = self.process_item(item_id).await {
                            error!("Match scan for item {} failed, will retry: {}", item_id, e);
                        }
                    }
                    None => break,
                },
                _ = retry.tick() => {
                    if let Err(e) = self.resume().await {
                        error!("Match retry pass failed: {}", e);
                    }
                }
            }
        }
        info!("Match dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        items: Vec<ListedItem>,
        wanted: Vec<WantedRequest>,
        // (event, delivered)
        recorded: Mutex<Vec<(MatchEvent, bool)>>,
        scanned: Mutex<Vec<i32>>,
        record_failures: AtomicUsize,
    }

    impl MatchStore for MemoryStore {
        fn listed_item(&self, item_id: i32) -> Result<Option<ListedItem>, DbError> {
            Ok(self.items.iter().find(|i| i.id == item_id).cloned())
        }

        fn wanted_requests(&self) -> Result<Vec<WantedRequest>, DbError> {
            Ok(self.wanted.clone())
        }

        fn record(&self, event: &MatchEvent) -> Result<bool, DbError> {
            if self
                .record_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(DbError::Query(diesel::result::Error::BrokenTransactionManager));
            }
            let mut recorded = self.recorded.lock().unwrap();
            let exists = recorded
                .iter()
                .any(|(e, _)| e.item_id == event.item_id && e.wanted_item_id == event.wanted_item_id);
            if exists {
                return Ok(false);
            }
            recorded.push((event.clone(), false));
            Ok(true)
        }

        fn pending(&self) -> Result<Vec<MatchEvent>, DbError> {
            Ok(self
                .recorded
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, delivered)| !delivered)
                .map(|(e, _)| e.clone())
                .collect())
        }

        fn mark_delivered(&self, item_id: i32, wanted_item_id: i32) -> Result<(), DbError> {
            for (event, delivered) in self.recorded.lock().unwrap().iter_mut() {
                if event.item_id == item_id && event.wanted_item_id == wanted_item_id {
                    *delivered = true;
                }
            }
            Ok(())
        }

        fn unscanned_items(&self) -> Result<Vec<i32>, DbError> {
            let scanned = self.scanned.lock().unwrap();
            Ok(self.items.iter().map(|i| i.id).filter(|id| !scanned.contains(id)).collect())
        }

        fn mark_scanned(&self, item_id: i32) -> Result<(), DbError> {
            self.scanned.lock().unwrap().push(item_id);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(i32, i32)>>,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, event: &MatchEvent) -> Result<(), NotifyError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(NotifyError::Delivery("mail server down".to_string()));
            }
            self.sent.lock().unwrap().push((event.item_id, event.wanted_item_id));
            Ok(())
        }
    }

    fn store() -> MemoryStore {
        MemoryStore {
            items: vec![ListedItem {
                id: 1,
                title: "iPhone 13".to_string(),
                price: Decimal::from(25000),
                seller_id: 10,
                seller_email: "seller@iitb.ac.in".to_string(),
            }],
            wanted: vec![
                WantedRequest {
                    id: 5,
                    title: "iphone".to_string(),
                    min_price: Some(Decimal::from(20000)),
                    max_price: Some(Decimal::from(30000)),
                    buyer_id: 20,
                    buyer_email: "buyer@mit.edu".to_string(),
                },
                WantedRequest {
                    id: 6,
                    title: "iphone".to_string(),
                    min_price: Some(Decimal::from(26000)),
                    max_price: None,
                    buyer_id: 21,
                    buyer_email: "other@mit.edu".to_string(),
                },
            ],
            ..Default::default()
        }
    }

    fn buyer(id: i32) -> WantedRequest {
        WantedRequest {
            id,
            title: "iphone".to_string(),
            min_price: None,
            max_price: None,
            buyer_id: 100 + id,
            buyer_email: format!("buyer{}@mit.edu", id),
        }
    }

    fn dispatcher(store: Arc<MemoryStore>, notifier: Arc<RecordingNotifier>) -> MatchDispatcher {
        MatchDispatcher::new(store, notifier, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn repeated_scans_notify_each_pair_once() {
        let store = Arc::new(store());
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher(store.clone(), notifier.clone());

        assert_eq!(dispatcher.process_item(1).await.unwrap(), 1);
        assert_eq!(dispatcher.process_item(1).await.unwrap(), 0);
        assert_eq!(*notifier.sent.lock().unwrap(), vec![(1, 5)]);
        assert!(store.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_delivery_stays_pending_until_retried() {
        let store = Arc::new(store());
        let notifier = Arc::new(RecordingNotifier {
            failures_left: AtomicUsize::new(1),
            ..Default::default()
        });
        let dispatcher = dispatcher(store.clone(), notifier.clone());

        assert_eq!(dispatcher.process_item(1).await.unwrap(), 0);
        assert_eq!(store.pending().unwrap().len(), 1);

        assert_eq!(dispatcher.redeliver_pending().await.unwrap(), 1);
        assert!(store.pending().unwrap().is_empty());
        assert_eq!(*notifier.sent.lock().unwrap(), vec![(1, 5)]);
    }

    #[tokio::test]
    async fn scan_interrupted_by_a_store_error_is_finished_later() {
        let store = Arc::new(MemoryStore {
            wanted: vec![buyer(7), buyer(8), buyer(9)],
            record_failures: AtomicUsize::new(1),
            ..store()
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher(store.clone(), notifier.clone());

        assert!(dispatcher.process_item(1).await.is_err());
        assert_eq!(store.unscanned_items().unwrap(), vec![1]);
        assert!(notifier.sent.lock().unwrap().is_empty());

        assert_eq!(dispatcher.resume().await.unwrap(), 3);
        assert!(store.unscanned_items().unwrap().is_empty());
        assert!(store.pending().unwrap().is_empty());
        let mut sent = notifier.sent.lock().unwrap().clone();
        sent.sort();
        assert_eq!(sent, vec![(1, 7), (1, 8), (1, 9)]);

        assert_eq!(dispatcher.resume().await.unwrap(), 0);
        assert_eq!(notifier.sent.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn pairs_recorded_before_a_failure_are_delivered_on_resume() {
        let store = Arc::new(MemoryStore {
            wanted: vec![buyer(7), buyer(8), buyer(9)],
            ..store()
        });
        // Simulate a pass that recorded the first pair and then died.
        let first = find_matches(&store.items[0], &store.wanted).remove(0);
        assert!(store.record(&first).unwrap());

        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher(store.clone(), notifier.clone());
        assert_eq!(dispatcher.resume().await.unwrap(), 3);
        let mut sent = notifier.sent.lock().unwrap().clone();
        sent.sort();
        assert_eq!(sent, vec![(1, 7), (1, 8), (1, 9)]);
    }

    #[tokio::test]
    async fn missing_item_is_skipped() {
        let store = Arc::new(store());
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher(store, notifier.clone());
        assert_eq!(dispatcher.process_item(99).await.unwrap(), 0);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_drains_queue_and_stops_when_senders_drop() {
        let store = Arc::new(store());
        let notifier = Arc::new(RecordingNotifier::default());
        let (queue, receiver) = MatchQueue::channel();
        queue.enqueue(1);
        queue.enqueue(1);
        drop(queue);

        dispatcher(store, notifier.clone()).run(receiver).await;
        assert_eq!(*notifier.sent.lock().unwrap(), vec![(1, 5)]);
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_does_not_panic() {
        let (queue, receiver) = MatchQueue::channel();
        drop(receiver);
        queue.enqueue(1);
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        let event = MatchEvent {
            item_id: 1,
            wanted_item_id: 2,
            buyer_id: 3,
            buyer_email: "b@x.edu".to_string(),
            seller_id: 4,
            seller_email: "s@x.edu".to_string(),
            item_title: "Chair".to_string(),
            price: Decimal::from(100),
        };
        assert!(LogNotifier.notify(&event).await.is_ok());
    }
}
