use prometheus::{IntCounterVec, Opts, Registry, TextEncoder};
use rpc_complexity::telemetry::AdmissionEvent;
use rpc_complexity_prometheus::{complexity_counter, PrometheusSink, LABELS, METRIC_HELP, METRIC_NAME};
use tower_service::Service;

fn fresh_counter() -> IntCounterVec {
    IntCounterVec::new(Opts::new(METRIC_NAME, METRIC_HELP), &LABELS).expect("counter")
}

fn admitted(service: &str, token: &str, weight: u64) -> AdmissionEvent {
    AdmissionEvent::Admitted {
        service: service.into(),
        method: "SayHello".into(),
        token: token.into(),
        weight,
    }
}

#[tokio::test]
async fn admitted_weight_accumulates() {
    let registry = Registry::new();
    let mut sink = PrometheusSink::with_counter(fresh_counter(), &registry).expect("register");

    sink.call(admitted("helloworld.Greeter", "default", 1)).await.unwrap();
    sink.call(admitted("helloworld.Greeter", "default", 4)).await.unwrap();
    sink.call(admitted("helloworld.Greeter", "db", 7)).await.unwrap();

    assert_eq!(sink.value("helloworld.Greeter", "SayHello", "default"), 5);
    assert_eq!(sink.value("helloworld.Greeter", "SayHello", "db"), 7);

    let text = TextEncoder::new().encode_to_string(&registry.gather()).unwrap();
    assert!(text.contains("# HELP rpc_complexity_total Sum of admitted call complexity"));
    assert!(text.contains(r#"service="helloworld.Greeter""#), "{text}");
    assert!(text.contains(r#"token="default"} 5"#), "{text}");
}

#[tokio::test]
async fn rejections_are_not_counted() {
    let registry = Registry::new();
    let mut sink = PrometheusSink::with_counter(fresh_counter(), &registry).unwrap();

    sink.call(AdmissionEvent::Rejected {
        service: "helloworld.Greeter".into(),
        method: "SayHello".into(),
        token: "default".into(),
        weight: 3,
        reason: "exhausted".into(),
    })
    .await
    .unwrap();

    assert_eq!(sink.value("helloworld.Greeter", "SayHello", "default"), 0);
}

#[test]
fn registering_twice_is_tolerated() {
    let registry = Registry::new();
    let first = PrometheusSink::register(&registry).expect("first registration");
    let second = PrometheusSink::register(&registry).expect("already registered is fine");

    // Both sinks feed the shared process-wide collector.
    first.counter().with_label_values(&["test.Twice", "m", "t"]).inc_by(2);
    assert_eq!(second.value("test.Twice", "m", "t"), 2);
    assert_eq!(complexity_counter().with_label_values(&["test.Twice", "m", "t"]).get(), 2);
}

#[test]
fn conflicting_metric_is_an_error() {
    let registry = Registry::new();
    let imposter =
        IntCounterVec::new(Opts::new(METRIC_NAME, "something else"), &["service"]).unwrap();
    registry.register(Box::new(imposter)).unwrap();

    let err = PrometheusSink::register(&registry).unwrap_err();
    assert!(matches!(err, prometheus::Error::Msg(_)), "got {err:?}");
}

#[test]
fn same_shaped_foreign_counter_is_an_error() {
    let registry = Registry::new();
    registry.register(Box::new(fresh_counter())).unwrap();

    // Increments on an unregistered copy would never reach a scrape.
    let err = PrometheusSink::with_counter(fresh_counter(), &registry).unwrap_err();
    assert!(matches!(err, prometheus::Error::Msg(_)), "got {err:?}");
    assert!(registry.gather().iter().all(|mf| mf.get_metric().is_empty()));
}

#[test]
fn reregistering_leaves_no_marker_series() {
    let registry = Registry::new();
    let counter = fresh_counter();
    PrometheusSink::with_counter(counter.clone(), &registry).unwrap();
    let sink = PrometheusSink::with_counter(counter, &registry).expect("same collector");

    sink.counter().with_label_values(&["test.Marker", "m", "t"]).inc_by(4);
    let families = registry.gather();
    let family = families.iter().find(|mf| mf.get_name() == METRIC_NAME).expect("family");
    assert_eq!(family.get_metric().len(), 1);
    assert_eq!(family.get_metric()[0].get_counter().get_value(), 4.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_observations_sum_exactly() {
    let registry = Registry::new();
    let sink = PrometheusSink::with_counter(fresh_counter(), &registry).unwrap();

    let tasks: Vec<_> = (0..16u64)
        .map(|task| {
            let mut sink = sink.clone();
            tokio::spawn(async move {
                for i in 0..250u64 {
                    let token = if i % 2 == 0 { "default" } else { "db" };
                    sink.call(admitted("helloworld.Greeter", token, task + 1)).await.unwrap();
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.expect("task panicked");
    }

    // Each task sends 125 events per token with weight task + 1.
    let expected: u64 = (1..=16u64).map(|w| w * 125).sum();
    assert_eq!(sink.value("helloworld.Greeter", "SayHello", "default"), expected);
    assert_eq!(sink.value("helloworld.Greeter", "SayHello", "db"), expected);

    let families = registry.gather();
    let family = families.iter().find(|mf| mf.get_name() == METRIC_NAME).expect("family");
    let scraped: f64 = family.get_metric().iter().map(|m| m.get_counter().get_value()).sum();
    assert_eq!(scraped, (2 * expected) as f64);
}

#[test]
fn default_registry_registration_is_idempotent() {
    PrometheusSink::register_default().expect("first");
    PrometheusSink::register_default().expect("second");
}
