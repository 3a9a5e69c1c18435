//! Type inference (spec §8): an edge declared with a concrete source type
//! and a `$t` destination type variable resolves to that concrete type, with
//! a header size read from the catalogue.

mod support;

use std::sync::Arc;

use plumber_core::flags::PipeFlags;
use plumber_core::typeinfer::{infer_types, InMemoryCatalogue};
use plumber_core::ServiceBuilder;

#[tokio::test]
async fn a_concrete_type_expression_resolves_to_itself_with_the_catalogues_size() {
    let mut builder = ServiceBuilder::new();
    let a = builder.add_node(Arc::new(support::EchoServlet::new()), vec![]);
    let b = builder.add_node(Arc::new(support::EchoServlet::new()), vec![]);
    builder.add_edge(a, 1, b, 0, PipeFlags::INPUT, "plumber/std/String");
    let mut service = builder.build((a, 0), (b, 1)).unwrap();

    let mut catalogue = InMemoryCatalogue::new();
    catalogue.declare_type("plumber/std/String", 4);

    infer_types(&mut service, &catalogue).unwrap();

    let (resolved, size) = service.resolved_type(b, 0, false).expect("edge should be resolved");
    assert_eq!(resolved, "plumber/std/String");
    assert_eq!(size, 4);
}

#[tokio::test]
async fn trailing_variable_binds_through_an_intermediate_hop() {
    // a --"plumber/std/String"--> mid --"$t"--> b
    let mut builder = ServiceBuilder::new();
    let a = builder.add_node(Arc::new(support::EchoServlet::new()), vec![]);
    let mid = builder.add_node(Arc::new(support::EchoServlet::new()), vec![]);
    let b = builder.add_node(Arc::new(support::EchoServlet::new()), vec![]);
    builder.add_edge(a, 1, mid, 0, PipeFlags::INPUT, "plumber/std/String");
    builder.add_edge(mid, 1, b, 0, PipeFlags::INPUT, "$t");
    let mut service = builder.build((a, 0), (b, 1)).unwrap();

    let mut catalogue = InMemoryCatalogue::new();
    catalogue.declare_type("plumber/std/String", 4);

    infer_types(&mut service, &catalogue).unwrap();

    let (resolved, size) = service.resolved_type(b, 0, false).expect("edge should be resolved");
    assert_eq!(resolved, "plumber/std/String");
    assert_eq!(size, 4);
}
