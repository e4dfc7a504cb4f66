//! Provider registry: one memoized calibration provider per correction domain.
//!
//! The registry is owned by the caller and shared by handle across datasets.
//! Construction runs under the registry lock, so concurrent first use of a
//! domain builds the provider exactly once.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use syst_core::errors::{codes, ErrorInfo, SystError};
use syst_core::stable_hash_string;
use tracing::{debug, warn};

/// Correction domain key, e.g. `pileup` or `jet`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domain(String);

impl Domain {
    /// Domain with the given key.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Domain key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transverse-momentum regime a weight provider may cover separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PtVariant {
    /// Low-pT regime.
    #[serde(rename = "lowPt")]
    Low,
    /// Medium-pT regime.
    #[serde(rename = "medPt")]
    Medium,
    /// High-pT regime.
    #[serde(rename = "highPt")]
    High,
}

impl PtVariant {
    /// Spelling used in configuration and source names.
    pub fn as_str(&self) -> &'static str {
        match self {
            PtVariant::Low => "lowPt",
            PtVariant::Medium => "medPt",
            PtVariant::High => "highPt",
        }
    }

    /// Parses the configuration spelling.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "lowPt" => Some(PtVariant::Low),
            "medPt" => Some(PtVariant::Medium),
            "highPt" => Some(PtVariant::High),
            _ => None,
        }
    }
}

/// What a provider can do, fixed at construction and checked before dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Produces momentum variations.
    pub kinematic: bool,
    /// Produces scale-factor weight groups.
    pub weights: bool,
    /// May run on collision data.
    pub data: bool,
    /// Separately available pT regimes.
    #[serde(default)]
    pub variants: BTreeSet<PtVariant>,
}

impl Capabilities {
    /// Whether `variant` is provided separately.
    pub fn supports(&self, variant: PtVariant) -> bool {
        self.variants.contains(&variant)
    }
}

/// Uniform contract of every calibration provider.
pub trait Provider: Send + Sync + 'static {
    /// Domain this provider serves.
    fn domain(&self) -> &Domain;

    /// What this provider can do.
    fn capabilities(&self) -> &Capabilities;

    /// Access to the concrete type for handlers bound to it.
    fn as_any(&self) -> &dyn Any;
}

impl fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("domain", self.domain())
            .field("capabilities", self.capabilities())
            .finish()
    }
}

/// Shared handle to a constructed provider.
pub type ProviderHandle = Arc<dyn Provider>;

/// Downcasts a provider to the concrete type a handler expects.
pub fn downcast<'a, T: Provider>(provider: &'a dyn Provider) -> Result<&'a T, SystError> {
    provider.as_any().downcast_ref::<T>().ok_or_else(|| {
        SystError::Provider(
            ErrorInfo::new(
                codes::UNSUPPORTED_CONFIGURATION,
                "provider type does not match handler",
            )
            .with_context("domain", provider.domain().as_str())
            .with_context("expected", std::any::type_name::<T>()),
        )
    })
}

/// Result of [`ProviderRegistry::get_or_init`].
#[derive(Debug, Clone)]
pub struct Acquired {
    /// The memoized provider.
    pub provider: ProviderHandle,
    /// Whether this call constructed the provider.
    pub constructed: bool,
    /// Whether the caller's settings differ from the ones used at construction.
    pub settings_ignored: bool,
}

struct Slot {
    provider: ProviderHandle,
    settings_hash: String,
}

/// Memoizing registry keyed by domain.
#[derive(Default)]
pub struct ProviderRegistry {
    slots: Mutex<BTreeMap<Domain, Slot>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("domains", &self.domains())
            .finish()
    }
}

impl ProviderRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty registry behind an [`Arc`], shareable across dataset sessions.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Domain, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Explicitly constructs the provider for `domain`.
    ///
    /// Fails with `provider.already_initialized` if the domain was built before.
    pub fn initialize<F>(
        &self,
        domain: &Domain,
        settings: &Value,
        build: F,
    ) -> Result<ProviderHandle, SystError>
    where
        F: FnOnce(&Value) -> Result<ProviderHandle, SystError>,
    {
        let mut slots = self.lock();
        if slots.contains_key(domain) {
            return Err(SystError::Provider(
                ErrorInfo::new(codes::ALREADY_INITIALIZED, "provider is already initialized")
                    .with_context("domain", domain.as_str()),
            ));
        }
        let provider = construct(domain, settings, build)?;
        slots.insert(
            domain.clone(),
            Slot {
                provider: provider.clone(),
                settings_hash: stable_hash_string(settings)?,
            },
        );
        Ok(provider)
    }

    /// Returns the provider for `domain`, constructing it on first use.
    ///
    /// Later calls get the same instance; their settings are ignored.
    pub fn get_or_init<F>(
        &self,
        domain: &Domain,
        settings: &Value,
        build: F,
    ) -> Result<Acquired, SystError>
    where
        F: FnOnce(&Value) -> Result<ProviderHandle, SystError>,
    {
        let settings_hash = stable_hash_string(settings)?;
        let mut slots = self.lock();
        if let Some(slot) = slots.get(domain) {
            let settings_ignored = slot.settings_hash != settings_hash;
            if settings_ignored {
                warn!(
                    domain = %domain,
                    "provider already constructed with different settings, keeping the first configuration"
                );
            }
            return Ok(Acquired {
                provider: slot.provider.clone(),
                constructed: false,
                settings_ignored,
            });
        }
        let provider = construct(domain, settings, build)?;
        slots.insert(
            domain.clone(),
            Slot {
                provider: provider.clone(),
                settings_hash,
            },
        );
        Ok(Acquired {
            provider,
            constructed: true,
            settings_ignored: false,
        })
    }

    /// Constructed provider of `domain`, or `provider.not_initialized`.
    pub fn get(&self, domain: &Domain) -> Result<ProviderHandle, SystError> {
        self.lock()
            .get(domain)
            .map(|slot| slot.provider.clone())
            .ok_or_else(|| {
                SystError::Provider(
                    ErrorInfo::new(codes::NOT_INITIALIZED, "provider is not initialized")
                        .with_context("domain", domain.as_str()),
                )
            })
    }

    /// Whether `domain` has a constructed provider.
    pub fn is_initialized(&self, domain: &Domain) -> bool {
        self.lock().contains_key(domain)
    }

    /// Hash of the settings the provider was constructed with.
    pub fn settings_hash(&self, domain: &Domain) -> Option<String> {
        self.lock().get(domain).map(|slot| slot.settings_hash.clone())
    }

    /// Domains with a constructed provider.
    pub fn domains(&self) -> Vec<Domain> {
        self.lock().keys().cloned().collect()
    }
}

fn construct<F>(domain: &Domain, settings: &Value, build: F) -> Result<ProviderHandle, SystError>
where
    F: FnOnce(&Value) -> Result<ProviderHandle, SystError>,
{
    debug!(domain = %domain, "constructing provider");
    let provider = build(settings)?;
    if provider.domain() != domain {
        return Err(SystError::Provider(
            ErrorInfo::new(
                codes::PROVIDER_INITIALIZATION,
                "constructed provider reports a different domain",
            )
            .with_context("domain", domain.as_str())
            .with_context("reported", provider.domain().as_str()),
        ));
    }
    Ok(provider)
}
