// Promotion Catalog
//
// Loads promotion definitions (promotion row plus rules, actions and eligibility
// rows) from the persistence service and caches the active set per tenant with a
// time-based TTL. Usage counters are never cached.
//
// Also hosts catalog administration: create, deactivate and delete.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;
use validator::Validate;

use crate::persistence::{decode, Filter, OrderBy, PersistenceService, Table};
use crate::promotions::error::{PromoResult, PromotionError};
use crate::promotions::metrics::PromotionMetrics;
use crate::promotions::models::{
    CategoryEligibility, CustomerEligibility, NewPromotion, ProductEligibility, Promotion,
    PromotionAction, PromotionDefinition, PromotionRule,
};

/// Time-to-live for cached tenant catalogs (60 seconds)
pub const CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CachedTenant {
    definitions: Arc<Vec<PromotionDefinition>>,
    loaded_at: Instant,
}

impl CachedTenant {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.loaded_at.elapsed() > ttl
    }
}

/// Promotion definitions, cached per tenant
pub struct PromotionCatalog {
    store: Arc<dyn PersistenceService>,
    cache: Arc<RwLock<HashMap<Uuid, CachedTenant>>>,
    cache_ttl: Duration,
    metrics: PromotionMetrics,
}

impl PromotionCatalog {
    /// Create a new PromotionCatalog
    pub fn new(store: Arc<dyn PersistenceService>, metrics: PromotionMetrics) -> Self {
        Self::with_cache_ttl(store, metrics, CACHE_TTL)
    }

    pub fn with_cache_ttl(
        store: Arc<dyn PersistenceService>,
        metrics: PromotionMetrics,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache: Arc::new(RwLock::new(HashMap::new())),
            cache_ttl,
            metrics,
        }
    }

    /// Active promotions of a tenant in precedence order
    ///
    /// Returns cached data if fresh, otherwise reloads from the store.
    pub async fn load_active(&self, tenant_id: Uuid) -> PromoResult<Arc<Vec<PromotionDefinition>>> {
        // Fast path under the read lock
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&tenant_id) {
                if !entry.is_stale(self.cache_ttl) {
                    self.metrics.record_cache_hit();
                    return Ok(entry.definitions.clone());
                }
            }
        }

        self.metrics.record_cache_miss();
        let mut cache = self.cache.write().await;

        // Another task may have refreshed while we waited
        if let Some(entry) = cache.get(&tenant_id) {
            if !entry.is_stale(self.cache_ttl) {
                return Ok(entry.definitions.clone());
            }
        }

        let definitions = Arc::new(self.fetch(tenant_id, true).await?);
        tracing::debug!(
            "Loaded {} active promotion(s) for tenant {}",
            definitions.len(),
            tenant_id
        );
        cache.insert(
            tenant_id,
            CachedTenant {
                definitions: definitions.clone(),
                loaded_at: Instant::now(),
            },
        );
        Ok(definitions)
    }

    /// Every valid promotion of a tenant, active or not, uncached
    pub async fn list_all(&self, tenant_id: Uuid) -> PromoResult<Vec<PromotionDefinition>> {
        self.fetch(tenant_id, false).await
    }

    /// A single promotion read fresh from the store
    pub async fn get_definition(&self, promotion_id: Uuid) -> PromoResult<PromotionDefinition> {
        let row = self
            .store
            .get(Table::Promotions, promotion_id)
            .await?
            .ok_or(PromotionError::PromotionNotFound(promotion_id))?;
        let promotion: Promotion = decode(row)?;
        promotion
            .check_invariants()
            .map_err(PromotionError::InvalidPromotion)?;

        let definition = self
            .attach_children(vec![promotion])
            .await?
            .pop()
            .ok_or_else(|| {
                PromotionError::InvalidPromotion(format!(
                    "promotion {} has malformed child rows",
                    promotion_id
                ))
            })?;
        definition
            .check_invariants()
            .map_err(PromotionError::InvalidPromotion)?;
        Ok(definition)
    }

    /// Validate and store a promotion with all of its child rows
    pub async fn create_promotion(&self, request: NewPromotion) -> PromoResult<PromotionDefinition> {
        request.validate()?;
        let definition = request.into_definition(Utc::now());
        definition
            .check_invariants()
            .map_err(PromotionError::InvalidPromotion)?;

        let promotion_id = definition.promotion.id;
        if let Err(e) = self.insert_definition(&definition).await {
            tracing::error!("Failed to store promotion {}: {}", promotion_id, e);
            // Best-effort removal of whatever made it in
            if let Err(cleanup) = self.remove_rows(promotion_id).await {
                tracing::error!("Cleanup of promotion {} failed: {}", promotion_id, cleanup);
            }
            return Err(e);
        }

        self.invalidate(definition.promotion.tenant_id).await;
        tracing::info!(
            "Created promotion {} ({}) for tenant {}",
            promotion_id,
            definition.promotion.name,
            definition.promotion.tenant_id
        );
        Ok(definition)
    }

    /// Tenant that owns a stored promotion, read from the raw row
    pub async fn owner_of(&self, promotion_id: Uuid) -> PromoResult<Uuid> {
        let row = self
            .store
            .get(Table::Promotions, promotion_id)
            .await?
            .ok_or(PromotionError::PromotionNotFound(promotion_id))?;
        row_tenant(&row).ok_or_else(|| {
            PromotionError::InvalidPromotion(format!("promotion {} has no tenant", promotion_id))
        })
    }

    /// Mark a promotion inactive; it stops being evaluated once the cache refreshes
    pub async fn deactivate_promotion(&self, promotion_id: Uuid) -> PromoResult<Promotion> {
        if self.store.get(Table::Promotions, promotion_id).await?.is_none() {
            return Err(PromotionError::PromotionNotFound(promotion_id));
        }

        let row = self
            .store
            .update(
                Table::Promotions,
                promotion_id,
                json!({ "is_active": false, "updated_at": Utc::now() }),
            )
            .await?;
        let promotion: Promotion = decode(row)?;

        self.invalidate(promotion.tenant_id).await;
        tracing::info!("Deactivated promotion {}", promotion_id);
        Ok(promotion)
    }

    /// Remove a promotion with its rules, actions and eligibility rows
    ///
    /// Usage counters and ledger entries are kept.
    pub async fn delete_promotion(&self, promotion_id: Uuid) -> PromoResult<()> {
        let row = self
            .store
            .get(Table::Promotions, promotion_id)
            .await?
            .ok_or(PromotionError::PromotionNotFound(promotion_id))?;
        let tenant_id = row_tenant(&row);

        self.remove_rows(promotion_id).await?;

        match tenant_id {
            Some(tenant_id) => self.invalidate(tenant_id).await,
            None => self.invalidate_all().await,
        }
        tracing::info!("Deleted promotion {}", promotion_id);
        Ok(())
    }

    /// Drop the cached catalog of one tenant
    pub async fn invalidate(&self, tenant_id: Uuid) {
        let mut cache = self.cache.write().await;
        cache.remove(&tenant_id);
    }

    pub async fn invalidate_all(&self) {
        let mut cache = self.cache.write().await;
        cache.clear();
    }

    async fn insert_definition(&self, definition: &PromotionDefinition) -> PromoResult<()> {
        self.store
            .insert(Table::Promotions, serde_json::to_value(&definition.promotion).map_err(to_persistence)?)
            .await?;
        self.insert_rows(Table::PromotionRules, &definition.rules).await?;
        self.insert_rows(Table::PromotionActions, &definition.actions).await?;
        self.insert_rows(Table::PromotionCategoryEligibility, &definition.category_eligibility)
            .await?;
        self.insert_rows(Table::PromotionCustomerEligibility, &definition.customer_eligibility)
            .await?;
        self.insert_rows(Table::PromotionProductEligibility, &definition.product_eligibility)
            .await?;
        Ok(())
    }

    async fn insert_rows<T: serde::Serialize>(&self, table: Table, rows: &[T]) -> PromoResult<()> {
        for row in rows {
            let value = serde_json::to_value(row).map_err(to_persistence)?;
            self.store.insert(table, value).await?;
        }
        Ok(())
    }

    async fn remove_rows(&self, promotion_id: Uuid) -> PromoResult<()> {
        for table in Table::promotion_children() {
            let rows = self
                .store
                .list(table, &[Filter::eq("promotion_id", promotion_id)], &[])
                .await?;
            for id in rows.iter().filter_map(row_id) {
                self.store.delete(table, id).await?;
            }
        }
        self.store.delete(Table::Promotions, promotion_id).await?;
        Ok(())
    }

    async fn fetch(&self, tenant_id: Uuid, active_only: bool) -> PromoResult<Vec<PromotionDefinition>> {
        let mut filters = vec![Filter::eq("tenant_id", tenant_id)];
        if active_only {
            filters.push(Filter::eq("is_active", true));
        }

        let rows = self
            .store
            .list(
                Table::Promotions,
                &filters,
                &[OrderBy::asc("priority"), OrderBy::asc("start_date")],
            )
            .await?;

        let mut promotions = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row_id(&row);
            match decode::<Promotion>(row) {
                Ok(promotion) => match promotion.check_invariants() {
                    Ok(()) => promotions.push(promotion),
                    Err(reason) => {
                        tracing::warn!("Skipping invalid promotion {}: {}", promotion.id, reason)
                    }
                },
                Err(e) => tracing::warn!("Skipping malformed promotion row {:?}: {}", id, e),
            }
        }

        let mut definitions = self.attach_children(promotions).await?;
        definitions.retain(|definition| match definition.check_invariants() {
            Ok(()) => true,
            Err(reason) => {
                tracing::warn!("Skipping invalid promotion {}: {}", definition.promotion.id, reason);
                false
            }
        });
        sort_by_precedence(&mut definitions);
        Ok(definitions)
    }

    /// Load child rows for a batch of promotions
    ///
    /// A promotion with any malformed child row is dropped entirely, since a
    /// half-loaded eligibility or rule set would widen who gets the discount.
    async fn attach_children(&self, promotions: Vec<Promotion>) -> PromoResult<Vec<PromotionDefinition>> {
        if promotions.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = promotions.iter().map(|p| p.id).collect();
        let mut broken = HashSet::new();

        let rules: Vec<PromotionRule> = self
            .children(
                Table::PromotionRules,
                &ids,
                &[OrderBy::asc("rule_group"), OrderBy::asc("position")],
                &mut broken,
            )
            .await?;
        let actions: Vec<PromotionAction> = self
            .children(Table::PromotionActions, &ids, &[OrderBy::asc("created_at")], &mut broken)
            .await?;
        let categories: Vec<CategoryEligibility> = self
            .children(Table::PromotionCategoryEligibility, &ids, &[], &mut broken)
            .await?;
        let customers: Vec<CustomerEligibility> = self
            .children(Table::PromotionCustomerEligibility, &ids, &[], &mut broken)
            .await?;
        let products: Vec<ProductEligibility> = self
            .children(Table::PromotionProductEligibility, &ids, &[], &mut broken)
            .await?;

        let mut by_id: HashMap<Uuid, PromotionDefinition> = promotions
            .into_iter()
            .filter(|p| {
                if broken.contains(&p.id) {
                    tracing::warn!("Skipping promotion {} with malformed child rows", p.id);
                    false
                } else {
                    true
                }
            })
            .map(|p| (p.id, PromotionDefinition::bare(p)))
            .collect();

        for rule in rules {
            if let Some(def) = by_id.get_mut(&rule.promotion_id) {
                def.rules.push(rule);
            }
        }
        for action in actions {
            if let Some(def) = by_id.get_mut(&action.promotion_id) {
                def.actions.push(action);
            }
        }
        for row in categories {
            if let Some(def) = by_id.get_mut(&row.promotion_id) {
                def.category_eligibility.push(row);
            }
        }
        for row in customers {
            if let Some(def) = by_id.get_mut(&row.promotion_id) {
                def.customer_eligibility.push(row);
            }
        }
        for row in products {
            if let Some(def) = by_id.get_mut(&row.promotion_id) {
                def.product_eligibility.push(row);
            }
        }

        let mut definitions: Vec<PromotionDefinition> = by_id.into_values().collect();
        sort_by_precedence(&mut definitions);
        Ok(definitions)
    }

    async fn children<T: DeserializeOwned>(
        &self,
        table: Table,
        promotion_ids: &[Uuid],
        ordering: &[OrderBy],
        broken: &mut HashSet<Uuid>,
    ) -> PromoResult<Vec<T>> {
        let rows = self
            .store
            .list(table, &[Filter::is_in("promotion_id", promotion_ids)], ordering)
            .await?;

        let mut decoded = Vec::with_capacity(rows.len());
        for row in rows {
            let owner = row
                .get("promotion_id")
                .and_then(Value::as_str)
                .and_then(|raw| Uuid::parse_str(raw).ok());
            match decode::<T>(row) {
                Ok(value) => decoded.push(value),
                Err(e) => {
                    tracing::warn!("Malformed {} row for promotion {:?}: {}", table, owner, e);
                    if let Some(owner) = owner {
                        broken.insert(owner);
                    }
                }
            }
        }
        Ok(decoded)
    }
}

/// Ascending priority, then earlier start date, then id
pub(crate) fn sort_by_precedence(definitions: &mut [PromotionDefinition]) {
    definitions.sort_by(|a, b| {
        let (a, b) = (&a.promotion, &b.promotion);
        a.priority
            .cmp(&b.priority)
            .then(a.start_date.cmp(&b.start_date))
            .then(a.id.cmp(&b.id))
    });
}

fn row_id(row: &Value) -> Option<Uuid> {
    row.get("id")
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

fn row_tenant(row: &Value) -> Option<Uuid> {
    row.get("tenant_id")
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

fn to_persistence(err: serde_json::Error) -> PromotionError {
    PromotionError::Persistence(err.into())
}
