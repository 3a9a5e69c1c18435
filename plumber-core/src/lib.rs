//! A service-composition scheduler: wires independently-developed servlets
//! into a typed dataflow graph and runs requests through it, propagating
//! cancellation and backpressure the way the graph's edges describe.
//!
//! See `SPEC_FULL.md` at the workspace root for the full module-by-module
//! design; `DESIGN.md` records what each module is grounded on.

pub mod cluster;
pub mod config;
pub mod dispatcher;
pub mod equeue;
pub mod error;
pub mod flags;
pub mod graph;
pub mod inmemory_module;
pub mod module;
pub mod pipe;
pub mod scope;
pub mod servlet;
pub mod step;
pub mod task;
pub mod typeinfer;

pub use config::Config;
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use flags::PipeFlags;
pub use graph::{NodeId, Service, ServiceBuilder};
pub use module::{Module, ModuleRegistry};
pub use scope::{RequestScope, ScopeEntity, ScopeToken};
pub use servlet::{ExecPipes, Pdt, Servlet};
pub use task::RequestId;
