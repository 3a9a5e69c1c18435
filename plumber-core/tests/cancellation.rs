//! Cancellation propagation (spec §8): diamond graph A → {B, C} → D where B's
//! exec signals failure. Since C offers an alternate path to the output
//! boundary, B is not part of D's critical cluster, so D still runs with
//! B's edge cancelled and the request completes using only C's branch.

mod support;

use std::sync::Arc;

use plumber_core::cluster::ClusterAnalysis;
use plumber_core::equeue::Event;
use plumber_core::flags::PipeFlags;
use plumber_core::inmemory_module::InMemoryModule;
use plumber_core::{Config, Dispatcher, Module, ModuleRegistry, ServiceBuilder};

#[tokio::test]
async fn diamond_with_one_failing_branch_still_produces_output() {
    let mut builder = ServiceBuilder::new();
    let a = builder.add_node(Arc::new(support::SplitServlet::new()), vec![]);
    let b = builder.add_node(Arc::new(support::FailingServlet::new()), vec![]);
    let c = builder.add_node(Arc::new(support::EchoServlet::new()), vec![]);
    let d = builder.add_node(Arc::new(support::JoinServlet::new()), vec![]);

    builder.add_edge(a, 1, b, 0, PipeFlags::INPUT, "$t");
    builder.add_edge(a, 2, c, 0, PipeFlags::INPUT, "$t");
    builder.add_edge(b, 1, d, 0, PipeFlags::INPUT, "$t");
    builder.add_edge(c, 1, d, 1, PipeFlags::INPUT, "$t");

    let service = builder.build((a, 0), (d, 2)).unwrap();

    // Property 4 (spec §8): B has an alternate path to the output through C,
    // so cancelling B must not force the output boundary to cancel too.
    let cluster = ClusterAnalysis::analyze(&service);
    assert!(!cluster.is_critical(b), "a branch with an alternate path to the output is not critical");

    let module = Arc::new(InMemoryModule::new());
    module.seed_request(b"payload".to_vec());

    let mut registry = ModuleRegistry::new();
    registry.register(0, module.clone() as Arc<dyn Module>);

    let mut dispatcher = Dispatcher::new(service, registry, Config::default());
    let handle = dispatcher.event_handle();
    handle.post(Event::Accept { module: 0 }).await.unwrap();
    handle.post(Event::Exhausted { module: 0 }).await.unwrap();

    dispatcher.run().await.unwrap();

    assert_eq!(module.peek_latest(), b"payload", "D should run on C's live branch alone");
}
