//! Single-node echo (spec §8): one servlet copies the boundary input to the
//! boundary output, end to end through the dispatcher.

mod support;

use std::sync::Arc;

use plumber_core::equeue::Event;
use plumber_core::inmemory_module::InMemoryModule;
use plumber_core::{Config, Dispatcher, Module, ModuleRegistry, ServiceBuilder};

#[tokio::test]
async fn boundary_input_echoes_to_boundary_output() {
    let mut builder = ServiceBuilder::new();
    let node = builder.add_node(Arc::new(support::EchoServlet::new()), vec![]);
    let service = builder.build((node, 0), (node, 1)).unwrap();

    let module = Arc::new(InMemoryModule::new());
    module.seed_request(b"hello".to_vec());

    let mut registry = ModuleRegistry::new();
    registry.register(0, module.clone() as Arc<dyn Module>);

    let mut dispatcher = Dispatcher::new(service, registry, Config::default());
    let handle = dispatcher.event_handle();
    handle.post(Event::Accept { module: 0 }).await.unwrap();
    handle.post(Event::Exhausted { module: 0 }).await.unwrap();

    dispatcher.run().await.unwrap();

    assert_eq!(module.peek_latest(), b"hello");
}
