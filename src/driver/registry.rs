//! Backend registry (§6): the process-wide mapping from driver name to a
//! lazily-constructed driver instance. This is the only process-wide
//! mutable state the core requires; it is initialized at first use and
//! never torn down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use super::Driver;
use crate::backend::cpu;
use crate::error::Error;

type Factory = Arc<dyn Fn() -> Result<Arc<dyn Driver>, Error> + Send + Sync>;

struct Registry {
    factories: Mutex<HashMap<String, Factory>>,
    instances: Mutex<HashMap<String, Arc<dyn Driver>>>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        let mut factories: HashMap<String, Factory> = HashMap::new();
        factories.insert("cpu".to_string(), Arc::new(|| Ok(cpu::driver())));
        Registry {
            factories: Mutex::new(factories),
            instances: Mutex::new(HashMap::new()),
        }
    })
}

/// Registers `factory` under `name`, replacing any previous registration.
/// The factory is not invoked until the first [`driver`] lookup for `name`.
pub fn register_driver(
    name: impl Into<String>,
    factory: impl Fn() -> Result<Arc<dyn Driver>, Error> + Send + Sync + 'static,
) {
    let name = name.into();
    log::debug!("registering driver {name:?}");
    let registry = registry();
    registry
        .factories
        .lock()
        .unwrap()
        .insert(name.clone(), Arc::new(factory));
    registry.instances.lock().unwrap().remove(&name);
}

/// Returns the driver registered under `name`, constructing and caching it
/// on first lookup.
///
/// # Errors
///
/// Returns [`Error::UnknownDriver`] if no factory is registered under
/// `name`.
pub fn driver(name: &str) -> Result<Arc<dyn Driver>, Error> {
    let registry = registry();
    if let Some(existing) = registry.instances.lock().unwrap().get(name) {
        return Ok(existing.clone());
    }
    let factory = registry
        .factories
        .lock()
        .unwrap()
        .get(name)
        .cloned()
        .ok_or_else(|| Error::UnknownDriver(format!("no driver registered under {name:?}")))?;
    let instance = factory()?;
    registry
        .instances
        .lock()
        .unwrap()
        .insert(name.to_string(), instance.clone());
    Ok(instance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_driver_is_preregistered() {
        let driver = driver("cpu").unwrap();
        assert_eq!(driver.name(), "cpu");
    }

    #[test]
    fn unknown_driver_fails() {
        assert!(matches!(driver("does-not-exist"), Err(Error::UnknownDriver(_))));
    }

    #[test]
    fn lookups_are_cached() {
        let first = driver("cpu").unwrap();
        let second = driver("cpu").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
