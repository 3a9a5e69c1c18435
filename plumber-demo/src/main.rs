//! A minimal standalone demo: one servlet that echoes its input pipe to its
//! output pipe, run through the scheduler end to end against an in-memory
//! module. Stands in for `bpmn-lite-server`'s gRPC front end, which this
//! crate does not carry forward (no `.proto` source was retrieved, and a
//! concrete wire transport is an out-of-scope external collaborator).

use std::sync::Arc;

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use plumber_core::equeue::Event;
use plumber_core::inmemory_module::InMemoryModule;
use plumber_core::{Config, Dispatcher, ExecPipes, Module, ModuleRegistry, Pdt, RequestScope, Result, Servlet, ServiceBuilder};

struct EchoServlet {
    pdt: Pdt,
}

impl EchoServlet {
    fn new() -> Self {
        EchoServlet { pdt: Pdt::new(["in", "out"]) }
    }
}

#[async_trait]
impl Servlet for EchoServlet {
    fn pdt(&self) -> &Pdt {
        &self.pdt
    }

    async fn exec(&self, pipes: &mut ExecPipes<'_>, _scope: &RequestScope) -> Result<()> {
        let mut data = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let n = pipes.read(0, &mut buf).await?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
        }
        pipes.write(1, &data).await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let mut builder = ServiceBuilder::new();
    let node = builder.add_node(Arc::new(EchoServlet::new()), vec![]);
    let service = builder.build((node, 0), (node, 1))?;

    let module = Arc::new(InMemoryModule::new());
    module.seed_request(b"hello, plumber".to_vec());

    let mut registry = ModuleRegistry::new();
    registry.register(0, module.clone() as Arc<dyn Module>);

    let mut dispatcher = Dispatcher::new(service, registry, Config::default());
    let handle = dispatcher.event_handle();
    handle.post(Event::Accept { module: 0 }).await?;
    handle.post(Event::Exhausted { module: 0 }).await?;

    dispatcher.run().await?;

    let output = module.peek_latest();
    tracing::info!(output = %String::from_utf8_lossy(&output), "request echoed");
    println!("{}", String::from_utf8_lossy(&output));

    Ok(())
}
