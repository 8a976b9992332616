//! Per-namespace Protector registry with idle eviction and periodic cache
//! clearing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Error;
use crate::protector::Protector;
use crate::record::PiiRecord;

/// Configuration of the factory service.
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    /// A protector with no public call for this long is evicted.
    pub idle: Duration,
    /// Period of the background monitor's checks.
    pub monitor_period: Duration,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(20 * 60),
            monitor_period: Duration::from_secs(5),
        }
    }
}

/// Builds a Protector for a namespace on first request.
pub type ProtectorBuilder = Arc<dyn Fn(&str) -> Arc<dyn Protector> + Send + Sync>;

/// Wraps a Protector to stamp the time of its last public call.
struct Traced {
    inner: Arc<dyn Protector>,
    last_op: RwLock<Instant>,
}

impl Traced {
    fn new(inner: Arc<dyn Protector>) -> Self {
        Self {
            inner,
            last_op: RwLock::new(Instant::now()),
        }
    }

    fn mark(&self) {
        *self.last_op.write() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_op.read().elapsed()
    }
}

#[async_trait]
impl Protector for Traced {
    fn namespace(&self) -> &str {
        self.inner.namespace()
    }

    async fn encrypt(&self, records: &mut [&mut dyn PiiRecord]) -> Result<(), Error> {
        let result = self.inner.encrypt(records).await;
        self.mark();
        result
    }

    async fn decrypt(&self, records: &mut [&mut dyn PiiRecord]) -> Result<(), Error> {
        let result = self.inner.decrypt(records).await;
        self.mark();
        result
    }

    async fn forget(&self, subject_id: &str) -> Result<(), Error> {
        let result = self.inner.forget(subject_id).await;
        self.mark();
        result
    }

    async fn recover(&self, subject_id: &str) -> Result<(), Error> {
        let result = self.inner.recover(subject_id).await;
        self.mark();
        result
    }

    async fn clear(&self, force: bool) -> Result<(), Error> {
        self.inner.clear(force).await
    }
}

/// Handle returned by [`Factory::instance`]: tells the protector to
/// immediately clear its cache of encryption materials, typically invoked
/// as a scope-end hook.
pub struct ForceClear {
    protector: Arc<Traced>,
}

impl ForceClear {
    pub async fn call(&self) {
        if let Err(e) = self.protector.clear(true).await {
            warn!(error = %e, "force clear failed");
        }
    }
}

struct FactoryInner {
    registry: RwLock<HashMap<String, Arc<Traced>>>,
    builder: ProtectorBuilder,
    config: FactoryConfig,
}

/// Thread-safe registry of one Protector per namespace.
///
/// The background monitor regularly TTL-clears every registered protector's
/// cache and evicts protectors idle for longer than the configured window.
#[derive(Clone)]
pub struct Factory {
    inner: Arc<FactoryInner>,
}

impl Factory {
    pub fn new(builder: ProtectorBuilder) -> Self {
        Self::with_config(builder, FactoryConfig::default())
    }

    pub fn with_config(builder: ProtectorBuilder, config: FactoryConfig) -> Self {
        Self {
            inner: Arc::new(FactoryInner {
                registry: RwLock::new(HashMap::new()),
                builder,
                config,
            }),
        }
    }

    /// Returns the namespace's Protector, building it on first request,
    /// together with a force-clear handle.
    pub fn instance(&self, namespace: &str) -> (Arc<dyn Protector>, ForceClear) {
        let mut registry = self.inner.registry.write();
        let traced = registry
            .entry(namespace.to_string())
            .or_insert_with(|| {
                debug!(namespace, "building protector");
                let traced = Arc::new(Traced::new((self.inner.builder)(namespace)));
                traced.mark();
                traced
            })
            .clone();

        (
            traced.clone() as Arc<dyn Protector>,
            ForceClear { protector: traced },
        )
    }

    /// Number of currently registered protectors.
    pub fn len(&self) -> usize {
        self.inner.registry.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.registry.read().is_empty()
    }

    async fn clear_round(&self, force: bool) {
        let snapshot: Vec<(String, Arc<Traced>)> = self
            .inner
            .registry
            .read()
            .iter()
            .map(|(ns, t)| (ns.clone(), t.clone()))
            .collect();

        for (namespace, traced) in &snapshot {
            if let Err(e) = traced.clear(force).await {
                warn!(namespace, error = %e, "cache clear failed");
            }
        }

        let idle = self.inner.config.idle;
        let mut registry = self.inner.registry.write();
        registry.retain(|namespace, traced| {
            let evict = force || traced.idle_for() >= idle;
            if evict {
                debug!(namespace = %namespace, "evicting idle protector");
            }
            !evict
        });
    }

    /// Starts the background monitor. Every monitor period it TTL-clears
    /// all registered protectors and evicts the idle ones. When `stop`
    /// signals (or its sender is dropped), one final forced clear runs,
    /// bounded by a one-second timeout so shutdown cannot hang on it.
    pub fn monitor(&self, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        let factory = self.clone();
        let period = factory.inner.config.monitor_period;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    changed = stop.changed() => {
                        match changed {
                            Ok(()) if !*stop.borrow() => continue,
                            _ => break,
                        }
                    }
                    _ = ticker.tick() => {
                        factory.clear_round(false).await;
                    }
                }
            }
            let _ = tokio::time::timeout(Duration::from_secs(1), factory.clear_round(true)).await;
        })
    }
}
