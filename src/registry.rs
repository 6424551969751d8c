//! `Registry` (§4, component 7): process-wide pool lookup plus the
//! single CA-bundle path shared by every `Tls` client. Both are
//! read-mostly state initialized once and consulted by every pool
//! without further synchronization beyond the lock around the map
//! itself (§9, Registry global state).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use crate::error::PoolError;
use crate::pool::{self, PoolHandle, PoolOptions};

struct Registry {
    pools: HashMap<String, PoolHandle>,
    ca_certificate_bundle_path: Option<PathBuf>,
}

static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();

fn registry() -> &'static Mutex<Registry> {
    REGISTRY.get_or_init(|| {
        Mutex::new(Registry { pools: HashMap::new(), ca_certificate_bundle_path: None })
    })
}

/// Set the process-wide CA bundle path consulted by every pool started
/// after this call that doesn't configure its own.
pub fn set_ca_certificate_bundle_path(path: Option<PathBuf>) {
    registry().lock().unwrap().ca_certificate_bundle_path = path;
}

pub fn ca_certificate_bundle_path() -> Option<PathBuf> {
    registry().lock().unwrap().ca_certificate_bundle_path.clone()
}

/// Start a pool under `id`, registering it under a name derived from the
/// id (§6, Process-global state). Replaces any pool already registered
/// there; the caller is responsible for stopping the old one first if
/// that matters.
pub fn start(id: &str, mut options: PoolOptions) -> PoolHandle {
    if options.client_options.ca_certificate_bundle_path.is_none() {
        options.client_options.ca_certificate_bundle_path = ca_certificate_bundle_path();
    }
    let handle = pool::start(id.to_string(), options);
    registry().lock().unwrap().pools.insert(id.to_string(), handle.clone());
    handle
}

/// Stop and unregister the pool under `id`. A no-op, not an error, if no
/// such pool is registered.
pub async fn stop(id: &str) -> Result<(), PoolError> {
    let handle = registry().lock().unwrap().pools.remove(id);
    match handle {
        Some(handle) => handle.stop().await,
        None => Ok(()),
    }
}

pub fn get(id: &str) -> Option<PoolHandle> {
    registry().lock().unwrap().pools.get(id).cloned()
}
