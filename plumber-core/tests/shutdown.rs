//! Shutdown drains (spec §8): raising the shutdown flag while requests are
//! already admitted lets the dispatcher finish every one of them
//! (`Config::shutdown_drain`) instead of waiting forever for modules that
//! never report themselves exhausted, then stop with the task table idle.

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use plumber_core::equeue::Event;
use plumber_core::inmemory_module::InMemoryModule;
use plumber_core::{Config, Dispatcher, Module, ModuleRegistry, ServiceBuilder};

#[tokio::test]
async fn shutdown_drains_every_admitted_request_before_stopping() {
    let mut builder = ServiceBuilder::new();
    let node = builder.add_node(Arc::new(support::EchoServlet::new()), vec![]);
    let service = builder.build((node, 0), (node, 1)).unwrap();

    let modules: Vec<_> = (0..3u8)
        .map(|i| {
            let m = Arc::new(InMemoryModule::new());
            m.seed_request(format!("request-{i}").into_bytes());
            m
        })
        .collect();

    let mut registry = ModuleRegistry::new();
    for (id, m) in modules.iter().enumerate() {
        registry.register(id as u8, m.clone() as Arc<dyn Module>);
    }

    let mut dispatcher = Dispatcher::new(service, registry, Config::default());
    let handle = dispatcher.event_handle();
    let shutdown = dispatcher.shutdown_flag();

    // None of the three modules ever reports Exhausted, so without a
    // shutdown request the dispatcher would wait for further events forever.
    for id in 0..3u8 {
        handle.post(Event::Accept { module: id }).await.unwrap();
    }

    let run_handle = tokio::spawn(async move {
        dispatcher.run().await.unwrap();
        dispatcher.is_idle()
    });

    // Give the loop time to admit and fully drain all three requests before
    // it blocks waiting on a fourth event.
    tokio::time::sleep(Duration::from_millis(30)).await;
    shutdown.store(true, Ordering::Release);
    // Unblock the pending wait so the loop re-checks the shutdown flag; the
    // module has nothing left pending so this accept is a harmless no-op.
    handle.post(Event::Accept { module: 0 }).await.unwrap();

    let idle = run_handle.await.unwrap();
    assert!(idle, "every admitted request should be freed once drained");

    for (i, m) in modules.iter().enumerate() {
        assert_eq!(m.peek_latest(), format!("request-{i}").into_bytes());
    }
}
