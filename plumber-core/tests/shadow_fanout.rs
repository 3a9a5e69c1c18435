//! Shadow fan-out (spec §8): a single output pipe feeding two downstream
//! nodes is delivered to the first as a direct handle and to every further
//! consumer as an independent shadow fork (spec §4.7's tie-break rule).
//! Disabling one fork suppresses delivery on that branch only.

mod support;

use std::sync::Arc;

use plumber_core::equeue::Event;
use plumber_core::flags::PipeFlags;
use plumber_core::inmemory_module::InMemoryModule;
use plumber_core::{Config, Dispatcher, Module, ModuleRegistry, Service, ServiceBuilder};

fn diamond_graph(disable_c_branch: bool) -> Service {
    let mut builder = ServiceBuilder::new();
    let a = builder.add_node(Arc::new(support::EchoServlet::new()), vec![]);
    let b = builder.add_node(Arc::new(support::EchoServlet::new()), vec![]);
    let c = builder.add_node(Arc::new(support::EchoServlet::new()), vec![]);
    let e = builder.add_node(Arc::new(support::JoinServlet::new()), vec![]);

    let c_flags = if disable_c_branch {
        PipeFlags::INPUT | PipeFlags::DISABLED
    } else {
        PipeFlags::INPUT
    };

    // A's single "out" pipe (local id 1) feeds both B and C: the second
    // edge sharing that source pipe becomes a shadow fork of the first.
    builder.add_edge(a, 1, b, 0, PipeFlags::INPUT, "$t");
    builder.add_edge(a, 1, c, 0, c_flags, "$t");
    builder.add_edge(b, 1, e, 0, PipeFlags::INPUT, "$t");
    builder.add_edge(c, 1, e, 1, PipeFlags::INPUT, "$t");

    builder.build((a, 0), (e, 2)).unwrap()
}

async fn run(service: Service, seed: &[u8]) -> Vec<u8> {
    let module = Arc::new(InMemoryModule::new());
    module.seed_request(seed.to_vec());

    let mut registry = ModuleRegistry::new();
    registry.register(0, module.clone() as Arc<dyn Module>);

    let mut dispatcher = Dispatcher::new(service, registry, Config::default());
    let handle = dispatcher.event_handle();
    handle.post(Event::Accept { module: 0 }).await.unwrap();
    handle.post(Event::Exhausted { module: 0 }).await.unwrap();
    dispatcher.run().await.unwrap();

    module.peek_latest()
}

#[tokio::test]
async fn both_branches_see_identical_bytes_by_default() {
    let output = run(diamond_graph(false), b"echoed").await;
    // The join concatenates both branches; if they diverged the bytes
    // wouldn't simply be the seed doubled.
    assert_eq!(output, b"echoedechoed");
}

#[tokio::test]
async fn disabling_one_fork_suppresses_delivery_on_that_branch_only() {
    let output = run(diamond_graph(true), b"echoed").await;
    // C's fork is disabled, so C never receives A's broadcast, its task
    // dies from an all-cancelled input set, and the join sees only B.
    assert_eq!(output, b"echoed");
}
