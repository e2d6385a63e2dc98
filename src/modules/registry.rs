use super::{builtin_modules, FeatureModule, ModuleDescriptor, ModuleInfo};
use crate::metrics::RegistryMetrics;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

/// Process-wide catalog of feature module descriptors.
///
/// Constructed once at startup and shared by reference. All reads and writes
/// go through one mutex, so lazy discovery cannot race with `enable_module`.
pub struct ModuleRegistry {
    catalog: Vec<Arc<dyn FeatureModule>>,
    state: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    /// Kept sorted by (order, seq)
    modules: Vec<Entry>,
    initialized: bool,
    next_seq: u64,
}

struct Entry {
    id: String,
    descriptor: ModuleDescriptor,
    /// First-registration position; breaks ties between equal orders
    seq: u64,
}

impl RegistryState {
    fn position(&self, id: &str) -> Option<usize> {
        self.modules.iter().position(|e| e.id == id)
    }

    /// Insert or overwrite. An overwritten module keeps its original position
    /// among modules of equal order.
    fn upsert(&mut self, id: &str, descriptor: ModuleDescriptor) {
        match self.position(id) {
            Some(idx) => {
                warn!("Module {} already registered, updating its information", id);
                self.modules[idx].descriptor = descriptor;
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.modules.push(Entry {
                    id: id.to_string(),
                    descriptor,
                    seq,
                });
            }
        }
        self.sort();
        info!("Module registered: {}", id);
    }

    fn sort(&mut self) {
        self.modules
            .sort_by_key(|e| (e.descriptor.order, e.seq));
    }
}

impl ModuleRegistry {
    /// Registry that discovers from the given registration table.
    pub fn new(catalog: Vec<Arc<dyn FeatureModule>>) -> Self {
        Self {
            catalog,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Registry over the modules compiled into this server.
    pub fn with_builtin_modules() -> Self {
        Self::new(builtin_modules())
    }

    /// The registration table scanned by discovery.
    pub fn catalog(&self) -> &[Arc<dyn FeatureModule>] {
        &self.catalog
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scan the registration table and register every module found.
    ///
    /// A module whose descriptor entry point fails is logged and skipped; the
    /// rest of the scan continues.
    pub fn discover_modules(&self) {
        let mut state = self.state();
        self.discover_locked(&mut state);
    }

    fn discover_locked(&self, state: &mut RegistryState) {
        info!("Discovering modules...");
        for module in &self.catalog {
            let id = module.id();
            let descriptor = match module.module_info() {
                Some(Ok(descriptor)) => descriptor,
                Some(Err(e)) => {
                    error!("Error while discovering module {}: {:#}", id, e);
                    RegistryMetrics::record_discovery_failure(id);
                    continue;
                }
                None => ModuleDescriptor::default_for(id),
            };
            state.upsert(id, descriptor);
        }
        state.initialized = true;
        RegistryMetrics::set_module_count(state.modules.len());
        info!(
            "Discovery finished. {} module(s) found.",
            state.modules.len()
        );
    }

    /// Lock the state, running discovery first if it never ran.
    fn discovered(&self) -> MutexGuard<'_, RegistryState> {
        let mut state = self.state();
        if !state.initialized {
            self.discover_locked(&mut state);
        }
        state
    }

    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    /// Register a module directly, bypassing discovery. Overwriting an existing
    /// id is an update, not an error.
    pub fn register_module(&self, id: &str, descriptor: ModuleDescriptor) {
        let mut state = self.state();
        state.upsert(id, descriptor);
        RegistryMetrics::set_module_count(state.modules.len());
    }

    /// All descriptors in presentation order, each tagged with its id.
    pub fn get_modules_info(&self) -> Vec<ModuleInfo> {
        self.discovered()
            .modules
            .iter()
            .map(|e| ModuleInfo {
                id: e.id.clone(),
                descriptor: e.descriptor.clone(),
            })
            .collect()
    }

    pub fn get_module(&self, id: &str) -> Option<ModuleDescriptor> {
        let state = self.discovered();
        state
            .position(id)
            .map(|idx| state.modules[idx].descriptor.clone())
    }

    /// Unknown modules count as disabled.
    pub fn is_module_enabled(&self, id: &str) -> bool {
        self.get_module(id).is_some_and(|d| d.enabled)
    }

    /// Flip the `enabled` flag of a known module. Returns false for an unknown id.
    pub fn enable_module(&self, id: &str, enabled: bool) -> bool {
        let mut state = self.discovered();
        let Some(idx) = state.position(id) else {
            warn!("Module {} not found, cannot change its state", id);
            return false;
        };
        state.modules[idx].descriptor.enabled = enabled;
        info!(
            "Module {} {}",
            id,
            if enabled { "enabled" } else { "disabled" }
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Described {
        id: &'static str,
        order: i64,
    }

    impl FeatureModule for Described {
        fn id(&self) -> &'static str {
            self.id
        }

        fn module_info(&self) -> Option<anyhow::Result<ModuleDescriptor>> {
            Some(Ok(ModuleDescriptor {
                order: self.order,
                ..ModuleDescriptor::default_for(self.id)
            }))
        }
    }

    struct Bare(&'static str);

    impl FeatureModule for Bare {
        fn id(&self) -> &'static str {
            self.0
        }
    }

    struct Broken;

    impl FeatureModule for Broken {
        fn id(&self) -> &'static str {
            "broken"
        }

        fn module_info(&self) -> Option<anyhow::Result<ModuleDescriptor>> {
            Some(Err(anyhow::anyhow!("descriptor exploded")))
        }
    }

    struct Counting(Arc<AtomicUsize>);

    impl FeatureModule for Counting {
        fn id(&self) -> &'static str {
            "counting"
        }

        fn module_info(&self) -> Option<anyhow::Result<ModuleDescriptor>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            None
        }
    }

    fn descriptor(order: i64) -> ModuleDescriptor {
        ModuleDescriptor {
            order,
            ..ModuleDescriptor::default_for("x")
        }
    }

    fn ids(registry: &ModuleRegistry) -> Vec<String> {
        registry
            .get_modules_info()
            .into_iter()
            .map(|m| m.id)
            .collect()
    }

    #[test]
    fn test_discovery_sorts_by_order_with_stable_ties() {
        let registry = ModuleRegistry::new(vec![
            Arc::new(Bare("alpha")),
            Arc::new(Described { id: "dash", order: 1 }),
            Arc::new(Bare("omega")),
        ]);
        registry.discover_modules();

        assert!(registry.is_initialized());
        assert_eq!(ids(&registry), vec!["dash", "alpha", "omega"]);
    }

    #[test]
    fn test_register_orders_999_1_999() {
        let registry = ModuleRegistry::new(Vec::new());
        registry.register_module("first", descriptor(999));
        registry.register_module("second", descriptor(1));
        registry.register_module("third", descriptor(999));

        let listed: Vec<(String, i64)> = registry
            .get_modules_info()
            .into_iter()
            .map(|m| (m.id, m.descriptor.order))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("second".to_string(), 1),
                ("first".to_string(), 999),
                ("third".to_string(), 999)
            ]
        );
    }

    #[test]
    fn test_listing_is_idempotent() {
        let registry = ModuleRegistry::with_builtin_modules();
        let first = registry.get_modules_info();
        let second = registry.get_modules_info();
        assert_eq!(first, second);
    }

    #[test]
    fn test_lazy_discovery_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ModuleRegistry::new(vec![Arc::new(Counting(calls.clone()))]);
        assert!(!registry.is_initialized());

        registry.get_modules_info();
        registry.get_module("counting");
        registry.is_module_enabled("counting");
        registry.enable_module("counting", false);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_initialized());
    }

    #[test]
    fn test_failing_module_is_skipped() {
        let registry = ModuleRegistry::new(vec![
            Arc::new(Bare("alpha")),
            Arc::new(Broken),
            Arc::new(Described { id: "dash", order: 1 }),
        ]);

        assert_eq!(ids(&registry), vec!["dash", "alpha"]);
        assert!(registry.get_module("broken").is_none());
    }

    #[test]
    fn test_default_descriptor_for_modules_without_entry_point() {
        let registry = ModuleRegistry::new(vec![Arc::new(Bare("reports"))]);
        let module = registry.get_module("reports").unwrap();
        assert_eq!(module.title, "Reports");
        assert_eq!(module.order, 999);
        assert!(module.enabled);
    }

    #[test]
    fn test_enable_unknown_module_returns_false_without_inserting() {
        let registry = ModuleRegistry::with_builtin_modules();
        let before = registry.get_modules_info().len();

        assert!(!registry.enable_module("nonexistent", true));
        assert_eq!(registry.get_modules_info().len(), before);
        assert!(registry.get_module("nonexistent").is_none());
        assert!(!registry.is_module_enabled("nonexistent"));
    }

    #[test]
    fn test_enable_and_disable() {
        let registry = ModuleRegistry::with_builtin_modules();
        assert!(registry.is_module_enabled("dashboard"));

        assert!(registry.enable_module("dashboard", false));
        assert!(!registry.is_module_enabled("dashboard"));

        assert!(registry.enable_module("dashboard", true));
        assert!(registry.is_module_enabled("dashboard"));
    }

    #[test]
    fn test_register_overwrites_existing_id_in_place() {
        let registry = ModuleRegistry::new(Vec::new());
        registry.register_module("a", descriptor(5));
        registry.register_module("b", descriptor(5));

        let mut updated = descriptor(5);
        updated.title = "Renamed".to_string();
        registry.register_module("a", updated);

        assert_eq!(ids(&registry), vec!["a", "b"]);
        assert_eq!(registry.get_module("a").unwrap().title, "Renamed");
    }

    #[test]
    fn test_concurrent_toggles_and_reads() {
        let registry = Arc::new(ModuleRegistry::with_builtin_modules());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        registry.enable_module("tickets", i % 2 == 0);
                        assert_eq!(registry.get_modules_info().len(), 2);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.is_initialized());
    }
}
