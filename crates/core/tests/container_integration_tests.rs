//! Integration tests for the injectable store: registration batches,
//! consistency enforcement, auto-discovery and scope-aware resolution.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use wirebox_core::{
    Candidate, CandidateFilter, ContainerBuilder, ContextScopeResolver, CoreError,
    DeferredBinding, FnCreationStrategy, Key, Request, ScopeTag, TypeRef,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug)]
struct Engine {
    serial: usize,
}

#[derive(Debug)]
struct Car {
    engine: Arc<Engine>,
}

#[derive(Debug)]
struct Trailer;

trait Notifier: Send + Sync {
    fn channel(&self) -> &'static str;
}

#[derive(Debug)]
struct EmailNotifier;
impl Notifier for EmailNotifier {
    fn channel(&self) -> &'static str {
        "email"
    }
}

struct SmsNotifier;
impl Notifier for SmsNotifier {
    fn channel(&self) -> &'static str {
        "sms"
    }
}

fn engine_candidate() -> Arc<Candidate> {
    static SERIAL: AtomicUsize = AtomicUsize::new(0);
    Candidate::builder::<Engine>()
        .constructs(|_| {
            Ok(Engine {
                serial: SERIAL.fetch_add(1, Ordering::SeqCst),
            })
        })
        .build()
        .unwrap()
}

fn car_candidate() -> Arc<Candidate> {
    Candidate::builder::<Car>()
        .requires(Key::of::<Engine>())
        .constructs(|deps| {
            Ok(Car {
                engine: deps.one::<Engine>(0)?,
            })
        })
        .build()
        .unwrap()
}

#[test]
fn test_register_and_resolve_with_injection() {
    init_tracing();
    let container = ContainerBuilder::new().build();
    container
        .register_all(vec![engine_candidate(), car_candidate()])
        .unwrap();

    let car = container.get_instance::<Car>().unwrap();
    let _serial = car.engine.serial;
    assert_eq!(container.candidate_count().unwrap(), 2);
}

#[test]
fn test_transient_constructs_fresh_singleton_shares() {
    let container = ContainerBuilder::new().build();
    container.register(engine_candidate()).unwrap();

    let first = container.get_instance::<Engine>().unwrap();
    let second = container.get_instance::<Engine>().unwrap();
    assert_ne!(first.serial, second.serial);

    let singleton = Candidate::builder::<Car>()
        .singleton()
        .requires(Key::of::<Engine>())
        .constructs(|deps| {
            Ok(Car {
                engine: deps.one::<Engine>(0)?,
            })
        })
        .build()
        .unwrap();
    container.register(singleton).unwrap();

    let a = container.get_instance::<Car>().unwrap();
    let b = container.get_instance::<Car>().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn test_unsatisfied_batch_leaves_store_unchanged() {
    let container = ContainerBuilder::new().build();
    let err = container
        .register_all(vec![car_candidate()])
        .unwrap_err();
    assert!(matches!(err, CoreError::UnsatisfiedDependency { .. }));
    assert_eq!(container.candidate_count().unwrap(), 0);
}

#[test]
fn test_batch_members_may_satisfy_each_other() {
    let container = ContainerBuilder::new().build();
    // Car first, so only the whole-batch view can satisfy its requirement.
    container
        .register_all(vec![car_candidate(), engine_candidate()])
        .unwrap();
    assert_eq!(container.candidate_count().unwrap(), 2);
}

#[test]
fn test_mutual_eager_requirements_rejected_as_cycle() {
    struct Ping;
    struct Pong;
    let ping = Candidate::builder::<Ping>()
        .requires(Key::of::<Pong>())
        .constructs(|_| Ok(Ping))
        .build()
        .unwrap();
    let pong = Candidate::builder::<Pong>()
        .requires(Key::of::<Ping>())
        .constructs(|_| Ok(Pong))
        .build()
        .unwrap();

    let container = ContainerBuilder::new().build();
    let err = container.register_all(vec![ping, pong]).unwrap_err();
    assert!(matches!(err, CoreError::CyclicDependency { .. }));
    assert_eq!(container.candidate_count().unwrap(), 0);
}

#[test]
fn test_deferred_edge_breaks_cycle_and_resolves_late() {
    struct Service {
        repo: DeferredBinding,
    }
    struct Repo {
        service: Arc<Service>,
    }

    let service = Candidate::builder::<Service>()
        .singleton()
        .requires_deferred(Key::of::<Repo>())
        .constructs(|deps| {
            Ok(Service {
                repo: deps.deferred(0)?,
            })
        })
        .build()
        .unwrap();
    let repo = Candidate::builder::<Repo>()
        .singleton()
        .requires(Key::of::<Service>())
        .constructs(|deps| {
            Ok(Repo {
                service: deps.one::<Service>(0)?,
            })
        })
        .build()
        .unwrap();

    let container = ContainerBuilder::new().build();
    container.register_all(vec![service, repo]).unwrap();

    let service = container.get_instance::<Service>().unwrap();
    let repo = service.repo.get_one::<Repo>().unwrap();
    assert!(Arc::ptr_eq(&repo.service, &service));
}

#[test]
fn test_second_provider_for_singularly_required_key_rejected() {
    let container = ContainerBuilder::new().build();
    container
        .register_all(vec![engine_candidate(), car_candidate()])
        .unwrap();

    let rival = Candidate::builder::<Engine>()
        .discriminator("rival")
        .constructs(|_| Ok(Engine { serial: usize::MAX }))
        .build()
        .unwrap();
    let err = container.register(rival).unwrap_err();
    assert!(matches!(err, CoreError::AmbiguousDependency { .. }));
    assert_eq!(container.candidate_count().unwrap(), 2);
}

#[test]
fn test_removing_singularly_required_provider_rejected() {
    let container = ContainerBuilder::new().build();
    let engine = engine_candidate();
    let engine_id = engine.id().clone();
    container
        .register_all(vec![engine, car_candidate()])
        .unwrap();

    let err = container.remove(&engine_id).unwrap_err();
    assert!(matches!(err, CoreError::ViolatesSingularDependency { .. }));
    assert_eq!(container.candidate_count().unwrap(), 2);
}

#[test]
fn test_reference_counts_release_on_requirer_removal() {
    let container = ContainerBuilder::new().build();
    let engine = engine_candidate();
    let car = car_candidate();
    let engine_id = engine.id().clone();
    let car_id = car.id().clone();
    container.register_all(vec![engine, car]).unwrap();

    container.remove(&car_id).unwrap();
    container.remove(&engine_id).unwrap();
    assert_eq!(container.candidate_count().unwrap(), 0);
    assert!(container.snapshot().unwrap().ref_counts.is_empty());
}

#[test]
fn test_requirer_and_provider_removable_in_one_batch() {
    let container = ContainerBuilder::new().build();
    let engine = engine_candidate();
    let car = car_candidate();
    let engine_id = engine.id().clone();
    let car_id = car.id().clone();
    container.register_all(vec![engine, car]).unwrap();

    container.remove_all(&[car_id, engine_id]).unwrap();
    assert_eq!(container.candidate_count().unwrap(), 0);
}

#[test]
fn test_qualifier_disambiguation() {
    let email = Candidate::builder::<EmailNotifier>()
        .satisfies_type::<dyn Notifier>()
        .qualifier("email")
        .constructs(|_| Ok(EmailNotifier))
        .build()
        .unwrap();
    let sms = Candidate::builder::<SmsNotifier>()
        .satisfies_type::<dyn Notifier>()
        .qualifier("sms")
        .constructs(|_| Ok(SmsNotifier))
        .build()
        .unwrap();

    let container = ContainerBuilder::new().build();
    container.register_all(vec![email, sms]).unwrap();

    // Collection lookup constructs both; only the matching concrete type
    // survives the typed downcast.
    let all = container.get_instances_for::<EmailNotifier>(&Key::of::<dyn Notifier>());
    assert_eq!(all.len(), 1);

    let err = container
        .get_instance_for::<EmailNotifier>(&Key::of::<dyn Notifier>())
        .unwrap_err();
    assert!(matches!(err, CoreError::AmbiguousInstance { .. }));

    let email = container
        .get_instance_for::<EmailNotifier>(&Key::of::<dyn Notifier>().qualified("email"))
        .unwrap();
    assert_eq!(email.channel(), "email");

    // An optional lookup tolerates absence, never ambiguity.
    let err = container
        .try_get_instance_for::<EmailNotifier>(&Key::of::<dyn Notifier>())
        .unwrap_err();
    assert!(matches!(err, CoreError::AmbiguousInstance { .. }));
    assert!(container
        .try_get_instance::<Trailer>()
        .unwrap()
        .is_none());
}

#[test]
fn test_optional_resolve_raises_on_multiple_matches() {
    init_tracing();
    let container = ContainerBuilder::new().build();
    let plain = engine_candidate();
    let rival = Candidate::builder::<Engine>()
        .discriminator("rival")
        .constructs(|_| Ok(Engine { serial: usize::MAX }))
        .build()
        .unwrap();
    container.register_all(vec![plain, rival]).unwrap();

    let err = container
        .resolve(&Request::optional(Key::of::<Engine>()))
        .unwrap_err();
    assert!(matches!(err, CoreError::AmbiguousInstance { .. }));

    let err = container.try_get_instance::<Engine>().unwrap_err();
    assert!(matches!(err, CoreError::AmbiguousInstance { .. }));

    // Absence is still a clean miss.
    assert!(container.try_get_instance::<Trailer>().unwrap().is_none());
}

#[test]
fn test_discovery_expands_transitively_and_is_idempotent() {
    init_tracing();
    let strategy = FnCreationStrategy::new(|type_ref: &TypeRef| {
        if *type_ref == TypeRef::of::<Car>() {
            return Ok(Some(car_candidate()));
        }
        if *type_ref == TypeRef::of::<Engine>() {
            return Ok(Some(engine_candidate()));
        }
        Ok(None)
    });

    let container = ContainerBuilder::new()
        .creation_strategy(Arc::new(strategy))
        .build();
    assert_eq!(container.candidate_count().unwrap(), 0);

    let car = container.get_instance::<Car>().unwrap();
    let _serial = car.engine.serial;
    assert_eq!(container.candidate_count().unwrap(), 2);

    container.get_instance::<Car>().unwrap();
    assert_eq!(container.candidate_count().unwrap(), 2);
}

#[test]
fn test_discovery_failure_reports_path_and_commits_nothing() {
    init_tracing();
    let strategy = FnCreationStrategy::new(|type_ref: &TypeRef| {
        if *type_ref == TypeRef::of::<Car>() {
            return Ok(Some(car_candidate()));
        }
        Ok(None)
    });

    let container = ContainerBuilder::new()
        .creation_strategy(Arc::new(strategy))
        .build();

    let err = container.get_instance::<Car>().unwrap_err();
    match err {
        CoreError::DiscoveryFailed { path, .. } => assert!(path.contains("Car")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(container.candidate_count().unwrap(), 0);
}

#[test]
fn test_rejected_discovery_commit_keeps_branch_diagnostics() {
    init_tracing();
    #[derive(Debug)]
    struct Widget;
    struct Gps;

    // The synthesized widget doubles as an engine provider, which the
    // live store must reject: Car relies on Engine being singular. Its
    // optional GPS branch fails during expansion and must still be
    // reported alongside the commit rejection.
    let strategy = FnCreationStrategy::new(|type_ref: &TypeRef| {
        if *type_ref == TypeRef::of::<Widget>() {
            return Candidate::builder::<Widget>()
                .satisfies_type::<Engine>()
                .requires_optional(Key::of::<Gps>())
                .constructs(|_| Ok(Widget))
                .build()
                .map(Some);
        }
        Ok(None)
    });

    let container = ContainerBuilder::new()
        .creation_strategy(Arc::new(strategy))
        .build();
    container
        .register_all(vec![engine_candidate(), car_candidate()])
        .unwrap();

    let err = container.get_instance::<Widget>().unwrap_err();
    match err {
        CoreError::DiscoveryFailed {
            cause, secondary, ..
        } => {
            assert!(matches!(*cause, CoreError::AmbiguousDependency { .. }));
            assert_eq!(secondary.len(), 1);
            assert!(matches!(
                secondary[0],
                CoreError::UnsatisfiedDependency { .. }
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(container.candidate_count().unwrap(), 2);
}

#[test]
fn test_disabled_or_filtered_lookup_never_discovers() {
    let strategy = FnCreationStrategy::new(|_: &TypeRef| Ok(Some(engine_candidate())));

    let container = ContainerBuilder::new()
        .creation_strategy(Arc::new(strategy))
        .build();

    let accept_all = |_: &Candidate| true;
    let filters: [&CandidateFilter; 1] = [&accept_all];
    let err = container
        .get_instance_where::<Engine>(&Key::of::<Engine>(), &filters)
        .unwrap_err();
    assert!(matches!(err, CoreError::NoSuchInstance { .. }));
    assert_eq!(container.candidate_count().unwrap(), 0);

    let disabled = ContainerBuilder::new()
        .discovery_enabled(false)
        .creation_strategy(Arc::new(FnCreationStrategy::new(|_: &TypeRef| {
            Ok(Some(engine_candidate()))
        })))
        .build();
    let err = disabled.get_instance::<Engine>().unwrap_err();
    assert!(matches!(err, CoreError::NoSuchInstance { .. }));
    assert_eq!(disabled.candidate_count().unwrap(), 0);
}

#[test]
fn test_named_scope_requires_active_resolver() {
    let candidate = Candidate::builder::<Trailer>()
        .scope(ScopeTag::Named("request".to_string()))
        .constructs(|_| Ok(Trailer))
        .build()
        .unwrap();

    let container = ContainerBuilder::new().build();
    container.register(candidate.clone()).unwrap();
    let err = container.get_instance::<Trailer>().unwrap_err();
    assert!(matches!(err, CoreError::ScopeInactive { .. }));

    let resolver = Arc::new(ContextScopeResolver::new());
    let container = ContainerBuilder::new()
        .scope_resolver(ScopeTag::Named("request".to_string()), resolver.clone())
        .build();
    container.register(candidate).unwrap();

    let err = container.get_instance::<Trailer>().unwrap_err();
    assert!(matches!(err, CoreError::ScopeInactive { .. }));

    let context = resolver.open_context();
    let a = container.get_instance::<Trailer>().unwrap();
    let b = container.get_instance::<Trailer>().unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    let released = resolver.close_context(&context);
    assert_eq!(released.len(), 1);
}

#[test]
fn test_shutdown_runs_destructors_for_cached_instances() {
    static DESTROYED: AtomicUsize = AtomicUsize::new(0);

    let candidate = Candidate::builder::<Trailer>()
        .singleton()
        .constructs(|_| Ok(Trailer))
        .destructor(|_| {
            DESTROYED.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    let container = ContainerBuilder::new().build();
    container.register(candidate).unwrap();
    container.get_instance::<Trailer>().unwrap();

    container.shutdown().unwrap();
    assert_eq!(DESTROYED.load(Ordering::SeqCst), 1);
    // Registrations survive shutdown; a new instance can be constructed.
    container.get_instance::<Trailer>().unwrap();
}

#[test]
fn test_removal_destroys_cached_instance() {
    static DESTROYED: AtomicUsize = AtomicUsize::new(0);

    let candidate = Candidate::builder::<Engine>()
        .singleton()
        .constructs(|_| Ok(Engine { serial: 0 }))
        .destructor(|_| {
            DESTROYED.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();
    let id = candidate.id().clone();

    let container = ContainerBuilder::new().build();
    container.register(candidate).unwrap();
    container.get_instance::<Engine>().unwrap();

    container.remove(&id).unwrap();
    assert_eq!(DESTROYED.load(Ordering::SeqCst), 1);
}

#[test]
fn test_request_shapes_through_resolve() {
    let container = ContainerBuilder::new().build();
    container.register(engine_candidate()).unwrap();

    let many = container
        .resolve(&Request::all(Key::of::<Engine>()))
        .unwrap();
    assert_eq!(many.many::<Engine>().unwrap().len(), 1);

    let absent = container
        .resolve(&Request::optional(Key::of::<Trailer>()))
        .unwrap();
    assert!(absent.optional::<Trailer>().unwrap().is_none());

    let deferred = container
        .resolve(&Request::one(Key::of::<Engine>()).deferred())
        .unwrap();
    let engine = deferred.deferred().unwrap().get_one::<Engine>().unwrap();
    let _serial = engine.serial;
}

#[test]
fn test_snapshot_reflects_candidates_and_ref_counts() {
    let container = ContainerBuilder::new().build();
    container
        .register_all(vec![engine_candidate(), car_candidate()])
        .unwrap();

    let snapshot = container.snapshot().unwrap();
    assert_eq!(snapshot.candidates.len(), 2);
    assert_eq!(snapshot.ref_counts.len(), 1);
    assert_eq!(snapshot.ref_counts[0].count, 1);

    let json = snapshot.to_json().unwrap();
    assert!(json.contains("Engine"));
    assert!(json.contains("Car"));
}
