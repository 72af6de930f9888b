//! Runtime context
//!
//! `ExecCtx` is the read-mostly per-request state carried through an
//! execution: request time, catalogs, store factory, and the value
//! comparer. The comparer holds reusable scratch, so a context is not safe
//! to share between threads as-is; `Clone` produces an independent context
//! with a fresh comparer and shared catalogs, which is what each concurrent
//! union branch receives.
//!
//! `Vars` chains scope and carries temp slots used to pass state between
//! operators that are in call-stack scope but not adjacent in label space
//! (window partitioning hands its buffer to the frames operator this way).

use std::cell::{RefCell, RefMut};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::AggCatalog;
use crate::expr::ExprCatalog;
use crate::store::{MemStoreFactory, StoreFactory};
use crate::value::ValueComparer;
use crate::window::WindowState;

/// Engine tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory for spill files.
    pub tmp_dir: PathBuf,

    /// Rows between stats checkpoints in long-running operators.
    pub stats_cadence: u64,

    /// Rows per union staging batch; zero or negative means each branch
    /// sends one final batch.
    pub union_batch_size: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tmp_dir: std::env::temp_dir().join("aeroflow"),
            stats_cadence: 1024,
            union_batch_size: 16,
        }
    }
}

/// Per-request execution context.
pub struct ExecCtx {
    /// Request time, fixed for the whole execution.
    pub now: DateTime<Utc>,

    /// Engine configuration.
    pub config: EngineConfig,

    /// Expression catalog used to compile plan expressions.
    pub exprs: Arc<ExprCatalog>,

    /// Aggregate-function catalog used by grouping.
    pub aggs: Arc<AggCatalog>,

    /// Allocator/recycler for external stores.
    pub stores: Arc<dyn StoreFactory>,

    comparer: RefCell<ValueComparer>,
}

impl ExecCtx {
    /// Creates a context with the default catalogs and in-memory stores.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            now: Utc::now(),
            config,
            exprs: Arc::new(ExprCatalog::standard()),
            aggs: Arc::new(AggCatalog::standard()),
            stores: Arc::new(MemStoreFactory::new()),
            comparer: RefCell::new(ValueComparer::new()),
        }
    }

    /// Replaces the store factory.
    pub fn with_stores(mut self, stores: Arc<dyn StoreFactory>) -> Self {
        self.stores = stores;
        self
    }

    /// Borrows the context's value comparer.
    pub fn comparer(&self) -> RefMut<'_, ValueComparer> {
        self.comparer.borrow_mut()
    }
}

impl Default for ExecCtx {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Clone for ExecCtx {
    /// Clones for a concurrent branch: catalogs and stores are shared,
    /// the comparer is fresh.
    fn clone(&self) -> Self {
        Self {
            now: self.now,
            config: self.config.clone(),
            exprs: Arc::clone(&self.exprs),
            aggs: Arc::clone(&self.aggs),
            stores: Arc::clone(&self.stores),
            comparer: RefCell::new(ValueComparer::new()),
        }
    }
}

/// One temp-slot value.
#[derive(Clone)]
pub enum TempSlot {
    /// Shared window partition/frame state.
    Windows(Rc<RefCell<WindowState>>),
}

/// Scope chain with temp slots.
#[derive(Default)]
pub struct Vars {
    temps: RefCell<Vec<Option<TempSlot>>>,
    /// Enclosing scope, if any.
    pub next: Option<Rc<Vars>>,
}

impl Vars {
    /// Creates a scope with no temp slots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a temp slot, growing the slot array as needed.
    pub fn set_temp(&self, i: usize, slot: TempSlot) {
        let mut temps = self.temps.borrow_mut();
        if temps.len() <= i {
            temps.resize_with(i + 1, || None);
        }
        temps[i] = Some(slot);
    }

    /// Clears a temp slot.
    pub fn clear_temp(&self, i: usize) {
        let mut temps = self.temps.borrow_mut();
        if i < temps.len() {
            temps[i] = None;
        }
    }

    /// Reads a temp slot, searching enclosing scopes.
    pub fn temp(&self, i: usize) -> Option<TempSlot> {
        if let Some(slot) = self.temps.borrow().get(i).and_then(|s| s.clone()) {
            return Some(slot);
        }
        self.next.as_ref().and_then(|next| next.temp(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_catalogs() {
        let ctx = ExecCtx::default();
        let branch = ctx.clone();
        assert!(Arc::ptr_eq(&ctx.exprs, &branch.exprs));
        assert!(Arc::ptr_eq(&ctx.aggs, &branch.aggs));
        assert_eq!(ctx.now, branch.now);
    }

    #[test]
    fn test_temp_slot_search_reaches_enclosing_scope() {
        let outer = Rc::new(Vars::new());
        let state = Rc::new(RefCell::new(WindowState::new()));
        outer.set_temp(2, TempSlot::Windows(state));

        let inner = Vars {
            temps: RefCell::new(Vec::new()),
            next: Some(Rc::clone(&outer)),
        };
        assert!(inner.temp(2).is_some());
        assert!(inner.temp(0).is_none());

        outer.clear_temp(2);
        assert!(inner.temp(2).is_none());
    }
}
