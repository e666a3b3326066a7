// Usage Limiter
//
// Capacity checks during evaluation and the atomic reserve-and-record step at
// commit time. The store performs the conditional increment and the ledger insert
// as one unit of work; commits for the same promotion are additionally
// serialized in-process.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::persistence::{
    decode, decode_all, CommitOutcome, Filter, PersistenceError, PersistenceService, Table,
    UsageReservation,
};
use crate::promotions::error::{PromoResult, PromotionError};
use crate::promotions::models::{AppliedPromotion, Promotion, PromotionUsageLimit};

/// Current usage of one promotion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageCounts {
    pub global: i64,
    pub customer: i64,
}

impl UsageCounts {
    /// True when another application would stay within both caps
    pub fn within(&self, promotion: &Promotion) -> bool {
        let global_ok = promotion
            .usage_limit
            .map_or(true, |limit| self.global < i64::from(limit));
        let customer_ok = promotion
            .usage_limit_per_customer
            .map_or(true, |limit| self.customer < i64::from(limit));
        global_ok && customer_ok
    }
}

/// Guards usage caps for every promotion
pub struct UsageLimiter {
    store: Arc<dyn PersistenceService>,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl UsageLimiter {
    /// Create a new UsageLimiter
    pub fn new(store: Arc<dyn PersistenceService>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Read the global and per-customer counters, never cached
    pub async fn usage_counts(&self, promotion_id: Uuid, customer_id: Uuid) -> PromoResult<UsageCounts> {
        let global = self
            .counter_total(&[
                Filter::eq("promotion_id", promotion_id),
                Filter::is_null("customer_id"),
            ])
            .await?;
        let customer = self
            .counter_total(&[
                Filter::eq("promotion_id", promotion_id),
                Filter::eq("customer_id", customer_id),
            ])
            .await?;
        Ok(UsageCounts { global, customer })
    }

    async fn counter_total(&self, filters: &[Filter]) -> PromoResult<i64> {
        let rows = self
            .store
            .list(Table::PromotionUsageLimits, filters, &[])
            .await?;
        let rows: Vec<PromotionUsageLimit> = decode_all(rows)?;
        Ok(rows.iter().map(|row| i64::from(row.usage_count)).sum())
    }

    /// Non-binding capacity check used while evaluating an order
    pub async fn has_capacity(&self, promotion: &Promotion, customer_id: Uuid) -> PromoResult<bool> {
        if promotion.usage_limit.is_none() && promotion.usage_limit_per_customer.is_none() {
            return Ok(true);
        }
        let counts = self.usage_counts(promotion.id, customer_id).await?;
        Ok(counts.within(promotion))
    }

    /// Atomically check both caps, increment the counters and record the application
    pub async fn try_reserve(
        &self,
        promotion: &Promotion,
        order_id: Uuid,
        customer_id: Uuid,
        discount_amount: Decimal,
        applied_by: Option<Uuid>,
    ) -> PromoResult<AppliedPromotion> {
        let lock = self.lock_for(promotion.id).await;
        let result = {
            let _guard = lock.lock().await;
            self.reserve(promotion, order_id, customer_id, discount_amount, applied_by)
                .await
        };
        self.release_lock(promotion.id, lock).await;
        result
    }

    async fn reserve(
        &self,
        promotion: &Promotion,
        order_id: Uuid,
        customer_id: Uuid,
        discount_amount: Decimal,
        applied_by: Option<Uuid>,
    ) -> PromoResult<AppliedPromotion> {
        let reservation = UsageReservation {
            promotion_id: promotion.id,
            order_id,
            customer_id,
            discount_amount,
            applied_by,
            usage_limit: promotion.usage_limit,
            usage_limit_per_customer: promotion.usage_limit_per_customer,
        };

        match self.store.commit_application(&reservation).await {
            Ok(CommitOutcome::Committed(row)) => {
                let applied: AppliedPromotion = decode(row)?;
                tracing::info!(
                    "Applied promotion {} to order {} (discount {})",
                    promotion.id,
                    order_id,
                    applied.discount_amount
                );
                Ok(applied)
            }
            Ok(CommitOutcome::LimitReached) => {
                tracing::warn!(
                    "Usage limit reached for promotion {} (customer {})",
                    promotion.id,
                    customer_id
                );
                Err(PromotionError::LimitExceeded(promotion.id))
            }
            Err(PersistenceError::SerializationConflict(msg)) => {
                tracing::warn!("Reservation for promotion {} lost a race: {}", promotion.id, msg);
                Err(PromotionError::ConcurrencyConflict(promotion.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn lock_for(&self, promotion_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(promotion_id).or_default().clone()
    }

    /// Drop the caller's handle and evict the entry once no task holds or awaits it
    async fn release_lock(&self, promotion_id: Uuid, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        drop(lock);
        // Handles are only cloned under the map lock, so a count of one is final
        let idle = locks
            .get(&promotion_id)
            .map_or(false, |held| Arc::strong_count(held) == 1);
        if idle {
            locks.remove(&promotion_id);
        }
    }

    #[cfg(test)]
    async fn tracked_locks(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryStore;
    use crate::promotions::models::fixtures::promotion;
    use rust_decimal_macros::dec;

    fn limiter() -> (InMemoryStore, UsageLimiter) {
        let store = InMemoryStore::new();
        let limiter = UsageLimiter::new(Arc::new(store.clone()));
        (store, limiter)
    }

    #[tokio::test]
    async fn test_unlimited_promotion_has_capacity() {
        let (_, limiter) = limiter();
        assert!(limiter.has_capacity(&promotion(), Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_reserve_records_and_counts() {
        let (store, limiter) = limiter();
        let mut promo = promotion();
        promo.usage_limit = Some(5);
        let customer = Uuid::new_v4();

        let applied = limiter
            .try_reserve(&promo, Uuid::new_v4(), customer, dec!(12.50), None)
            .await
            .unwrap();
        assert_eq!(applied.promotion_id, promo.id);
        assert_eq!(applied.discount_amount, dec!(12.50));

        let counts = limiter.usage_counts(promo.id, customer).await.unwrap();
        assert_eq!(counts, UsageCounts { global: 1, customer: 1 });
        assert_eq!(store.count(Table::AppliedPromotions).await, 1);
    }

    #[tokio::test]
    async fn test_per_customer_limit() {
        let (_, limiter) = limiter();
        let mut promo = promotion();
        promo.usage_limit_per_customer = Some(1);
        let customer = Uuid::new_v4();

        limiter
            .try_reserve(&promo, Uuid::new_v4(), customer, dec!(1), None)
            .await
            .unwrap();
        assert!(!limiter.has_capacity(&promo, customer).await.unwrap());
        assert!(limiter.has_capacity(&promo, Uuid::new_v4()).await.unwrap());

        let err = limiter
            .try_reserve(&promo, Uuid::new_v4(), customer, dec!(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PromotionError::LimitExceeded(id) if id == promo.id));
    }

    #[tokio::test]
    async fn test_zero_limit_never_reserves() {
        let (store, limiter) = limiter();
        let mut promo = promotion();
        promo.usage_limit = Some(0);

        assert!(!limiter.has_capacity(&promo, Uuid::new_v4()).await.unwrap());
        let err = limiter
            .try_reserve(&promo, Uuid::new_v4(), Uuid::new_v4(), dec!(1), None)
            .await
            .unwrap_err();
        assert!(err.is_limit());
        assert_eq!(store.count(Table::AppliedPromotions).await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_reservations_respect_limit() {
        let (store, limiter) = limiter();
        let limiter = Arc::new(limiter);
        let mut promo = promotion();
        promo.usage_limit = Some(3);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let limiter = limiter.clone();
            let promo = promo.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .try_reserve(&promo, Uuid::new_v4(), Uuid::new_v4(), dec!(1), None)
                    .await
            }));
        }

        let mut committed = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                committed += 1;
            }
        }
        assert_eq!(committed, 3);
        assert_eq!(store.count(Table::AppliedPromotions).await, 3);
        assert_eq!(limiter.tracked_locks().await, 0);
    }

    #[tokio::test]
    async fn test_lock_entries_are_evicted_after_commit() {
        let (_, limiter) = limiter();
        for _ in 0..3 {
            let promo = promotion();
            limiter
                .try_reserve(&promo, Uuid::new_v4(), Uuid::new_v4(), dec!(1), None)
                .await
                .unwrap();
        }
        assert_eq!(limiter.tracked_locks().await, 0);

        // Failed reservations release their entry too
        let mut promo = promotion();
        promo.usage_limit = Some(0);
        assert!(limiter
            .try_reserve(&promo, Uuid::new_v4(), Uuid::new_v4(), dec!(1), None)
            .await
            .is_err());
        assert_eq!(limiter.tracked_locks().await, 0);
    }

    #[tokio::test]
    async fn test_counts_ignore_other_customers() {
        let (_, limiter) = limiter();
        let promo = promotion();
        let (me, someone) = (Uuid::new_v4(), Uuid::new_v4());
        for customer in [me, someone, someone] {
            limiter
                .try_reserve(&promo, Uuid::new_v4(), customer, dec!(1), None)
                .await
                .unwrap();
        }

        let counts = limiter.usage_counts(promo.id, me).await.unwrap();
        assert_eq!(counts, UsageCounts { global: 3, customer: 1 });
    }
}
