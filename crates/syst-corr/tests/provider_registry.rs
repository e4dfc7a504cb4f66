use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use serde_json::{json, Value};
use syst_core::{codes, SystError};
use syst_corr::provider::downcast;
use syst_corr::{
    BranchWeightProvider, Capabilities, Domain, Provider, ProviderHandle, ProviderRegistry,
    ShiftTableProvider,
};

#[derive(Debug)]
struct Counting {
    domain: Domain,
    capabilities: Capabilities,
    settings: Value,
}

impl Provider for Counting {
    fn domain(&self) -> &Domain {
        &self.domain
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn counting(domain: &str, builds: &AtomicUsize, settings: &Value) -> ProviderHandle {
    builds.fetch_add(1, Ordering::SeqCst);
    Arc::new(Counting {
        domain: Domain::new(domain),
        capabilities: Capabilities::default(),
        settings: settings.clone(),
    })
}

#[test]
fn provider_is_built_once_and_first_settings_win() {
    let registry = ProviderRegistry::new();
    let builds = AtomicUsize::new(0);
    let domain = Domain::new("pileup");

    let first = registry
        .get_or_init(&domain, &json!({ "file": "a" }), |s| {
            Ok(counting("pileup", &builds, s))
        })
        .expect("first");
    assert!(first.constructed);
    assert!(!first.settings_ignored);

    let same = registry
        .get_or_init(&domain, &json!({ "file": "a" }), |s| {
            Ok(counting("pileup", &builds, s))
        })
        .expect("same");
    assert!(!same.constructed);
    assert!(!same.settings_ignored);

    let other = registry
        .get_or_init(&domain, &json!({ "file": "b" }), |s| {
            Ok(counting("pileup", &builds, s))
        })
        .expect("other");
    assert!(other.settings_ignored);
    assert!(Arc::ptr_eq(&first.provider, &other.provider));
    assert_eq!(builds.load(Ordering::SeqCst), 1);

    let kept = downcast::<Counting>(other.provider.as_ref()).expect("counting");
    assert_eq!(kept.settings, json!({ "file": "a" }));
}

#[test]
fn explicit_initialization_happens_once() {
    let registry = ProviderRegistry::new();
    let domain = Domain::new("tau_es");
    let err = registry.get(&domain).unwrap_err();
    assert_eq!(err.code(), codes::NOT_INITIALIZED);

    let settings = json!({ "collection": "Tau", "shifts": { "tauES": 0.01 } });
    let build = |s: &Value| -> Result<ProviderHandle, SystError> {
        Ok(Arc::new(ShiftTableProvider::from_settings(Domain::new("tau_es"), s)?))
    };
    registry.initialize(&domain, &settings, build).expect("init");
    let err = registry.initialize(&domain, &settings, build).unwrap_err();
    assert_eq!(err.code(), codes::ALREADY_INITIALIZED);

    let provider = registry.get(&domain).expect("initialized");
    assert!(provider.capabilities().kinematic);
    assert!(downcast::<BranchWeightProvider>(provider.as_ref()).is_err());
    assert_eq!(registry.domains(), vec![domain]);
}

#[test]
fn failed_construction_leaves_the_domain_empty() {
    let registry = ProviderRegistry::new();
    let domain = Domain::new("jet");
    let bad = json!({ "collection": "Jet", "shifts": { "Central": 0.1 } });
    let err = registry
        .get_or_init(&domain, &bad, |s| {
            Ok(Arc::new(ShiftTableProvider::from_settings(Domain::new("jet"), s)?) as ProviderHandle)
        })
        .unwrap_err();
    assert_eq!(err.code(), codes::UNSUPPORTED_CONFIGURATION);
    assert!(!registry.is_initialized(&domain));

    let mismatched = registry
        .get_or_init(&domain, &json!({}), |s| Ok(counting("muon", &AtomicUsize::new(0), s)))
        .unwrap_err();
    assert_eq!(mismatched.code(), codes::PROVIDER_INITIALIZATION);
    assert!(registry.settings_hash(&domain).is_none());
}

#[test]
fn concurrent_first_use_builds_once() {
    let registry = ProviderRegistry::shared();
    let builds = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let builds = Arc::clone(&builds);
            thread::spawn(move || {
                registry
                    .get_or_init(&Domain::new("pileup"), &json!({}), |s| {
                        Ok(counting("pileup", &builds, s))
                    })
                    .expect("acquire")
                    .provider
            })
        })
        .collect();
    let providers: Vec<ProviderHandle> = handles
        .into_iter()
        .map(|handle| handle.join().expect("thread"))
        .collect();
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert!(providers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}
