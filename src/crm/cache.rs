/// Cached listing fragments using ArcSwap
///
/// Holds the rendered JSON for the leads list, clients list and dashboard of
/// each tenant. Reads are lock-free; every update swaps the whole map, which
/// suits a read-mostly workload where writes only invalidate.
///
/// Each (tenant, view) slot carries a generation that `invalidate` bumps.
/// Readers take the generation before querying the database and hand it back
/// to `put`, which drops the fragment if an invalidation happened in between.

use arc_swap::ArcSwap;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::tenant::TenantSlug;

/// Views whose fragments are cached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
    Leads,
    Clientes,
    Dashboard,
}

impl View {
    /// Every view touched by a lead conversion
    pub const CONVERSION: [View; 3] = [View::Leads, View::Clientes, View::Dashboard];
}

#[derive(Debug, Clone)]
struct CachedView {
    fragment: Arc<Value>,
    built_at: Instant,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    generation: u64,
    cached: Option<CachedView>,
}

type CacheKey = (TenantSlug, View);

#[derive(Debug)]
pub struct ViewCache {
    slots: ArcSwap<HashMap<CacheKey, Slot>>,
    ttl: Duration,
}

impl ViewCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: ArcSwap::new(Arc::new(HashMap::new())),
            ttl,
        }
    }

    /// Fresh fragment for the view, if one was built within the TTL
    pub fn get(&self, tenant: &TenantSlug, view: View) -> Option<Arc<Value>> {
        let slots = self.slots.load();
        let cached = slots.get(&(tenant.clone(), view))?.cached.as_ref()?;
        if cached.built_at.elapsed() > self.ttl {
            return None;
        }
        Some(Arc::clone(&cached.fragment))
    }

    /// Current generation of the view; read it before building a fragment
    pub fn generation(&self, tenant: &TenantSlug, view: View) -> u64 {
        self.slots
            .load()
            .get(&(tenant.clone(), view))
            .map_or(0, |slot| slot.generation)
    }

    /// Store a fragment built at `generation`
    ///
    /// Returns false, storing nothing, when the view was invalidated since.
    pub fn put(&self, tenant: &TenantSlug, view: View, generation: u64, fragment: Value) -> bool {
        let cached = CachedView {
            fragment: Arc::new(fragment),
            built_at: Instant::now(),
        };
        let key = (tenant.clone(), view);
        let mut stored = false;

        self.slots.rcu(|current| {
            let mut next = HashMap::clone(current);
            let slot = next.entry(key.clone()).or_default();
            stored = slot.generation == generation;
            if stored {
                slot.cached = Some(cached.clone());
            }
            next
        });

        if !stored {
            tracing::debug!("Discarded stale {:?} fragment for tenant {}", view, tenant);
        }
        stored
    }

    /// Drop the tenant's fragments for the given views and bump their generations
    pub fn invalidate(&self, tenant: &TenantSlug, views: &[View]) {
        self.slots.rcu(|current| {
            let mut next = HashMap::clone(current);
            for view in views {
                let slot = next.entry((tenant.clone(), *view)).or_default();
                slot.generation += 1;
                slot.cached = None;
            }
            next
        });

        tracing::debug!("🧹 Invalidated cached views {:?} for tenant {}", views, tenant);
    }
}
