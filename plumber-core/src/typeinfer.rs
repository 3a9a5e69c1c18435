//! Type inference (spec §4.3, C5): solve convertibility equations over the
//! graph's edges and bind type variables, using a protocol-type catalogue
//! that stands in for the out-of-scope on-disk type database.
//!
//! Grounded on the original `sched/type.c`: environment table of named type
//! variables, convertibility-equation solving per node in topological order,
//! and variable merge-by-common-ancestor on repeat binding. The original's
//! full `|`-alternation grammar is simplified to the sequence-plus-trailing-
//! variable grammar spec.md's data model actually describes (see DESIGN.md).

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::graph::{NodeId, Service};

/// One position in a parsed type expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeAtom {
    /// A concrete, catalogue-known type name.
    Concrete(String),
    /// `$name` — captures a type (or, if trailing, the rest of the list).
    Var(String),
    /// `$name.field` — projects a field off whatever `name` is bound to.
    VarField(String, String),
}

/// Parse a type expression into its ordered list of atoms.
pub fn parse_type_expr(expr: &str) -> Vec<TypeAtom> {
    expr.split_whitespace()
        .map(|tok| {
            if let Some(rest) = tok.strip_prefix('$') {
                match rest.split_once('.') {
                    Some((name, field)) => TypeAtom::VarField(name.to_string(), field.to_string()),
                    None => TypeAtom::Var(rest.to_string()),
                }
            } else {
                TypeAtom::Concrete(tok.to_string())
            }
        })
        .collect()
}

/// The closed catalogue of protocol types the type inferrer consults. A real
/// deployment backs this by the out-of-scope on-disk type database; tests
/// and the demo use [`InMemoryCatalogue`].
pub trait TypeCatalogue: Send + Sync {
    /// The common ancestor of two type names under the subtype lattice, or
    /// `None` if they are unrelated.
    fn common_ancestor(&self, a: &str, b: &str) -> Option<String>;
    /// The type of a named field projected off `ty`.
    fn field_type(&self, ty: &str, field: &str) -> Option<String>;
    /// The byte size of a type's typed header.
    fn type_size(&self, ty: &str) -> Option<usize>;
}

/// A simple in-memory catalogue: a fixed subtype lattice plus per-type sizes
/// and field types, good enough for tests and the demo binary.
#[derive(Default)]
pub struct InMemoryCatalogue {
    /// type -> parent type, forming a forest of single-inheritance chains.
    parents: HashMap<String, String>,
    sizes: HashMap<String, usize>,
    fields: HashMap<(String, String), String>,
}

impl InMemoryCatalogue {
    pub fn new() -> Self {
        InMemoryCatalogue::default()
    }

    pub fn declare_type(&mut self, name: impl Into<String>, size: usize) -> &mut Self {
        self.sizes.insert(name.into(), size);
        self
    }

    pub fn declare_subtype(&mut self, child: impl Into<String>, parent: impl Into<String>) -> &mut Self {
        self.parents.insert(child.into(), parent.into());
        self
    }

    pub fn declare_field(
        &mut self,
        ty: impl Into<String>,
        field: impl Into<String>,
        field_type: impl Into<String>,
    ) -> &mut Self {
        self.fields.insert((ty.into(), field.into()), field_type.into());
        self
    }

    fn ancestors(&self, ty: &str) -> Vec<String> {
        let mut chain = vec![ty.to_string()];
        let mut cur = ty.to_string();
        while let Some(parent) = self.parents.get(&cur) {
            chain.push(parent.clone());
            cur = parent.clone();
        }
        chain
    }
}

impl TypeCatalogue for InMemoryCatalogue {
    fn common_ancestor(&self, a: &str, b: &str) -> Option<String> {
        if a == b {
            return Some(a.to_string());
        }
        let a_chain = self.ancestors(a);
        let b_chain = self.ancestors(b);
        a_chain.into_iter().find(|candidate| b_chain.contains(candidate))
    }

    fn field_type(&self, ty: &str, field: &str) -> Option<String> {
        self.fields.get(&(ty.to_string(), field.to_string())).cloned()
    }

    fn type_size(&self, ty: &str) -> Option<usize> {
        self.sizes.get(ty).copied()
    }
}

/// Environment table mapping a type variable's name to its bound type (a
/// list of atoms, to support a trailing variable capturing multiple
/// positions at once).
#[derive(Default)]
struct Env {
    bindings: HashMap<String, Vec<String>>,
}

impl Env {
    fn merge(&mut self, catalogue: &dyn TypeCatalogue, name: &str, concrete: &[String]) -> Result<()> {
        match self.bindings.get(name) {
            None => {
                self.bindings.insert(name.to_string(), concrete.to_vec());
                Ok(())
            }
            Some(current) => {
                if current.len() != concrete.len() {
                    return Err(Error::TypeError(format!(
                        "cannot merge type variable ${name}: different arity"
                    )));
                }
                let mut merged = Vec::with_capacity(current.len());
                for (c, n) in current.iter().zip(concrete.iter()) {
                    let ancestor = catalogue.common_ancestor(c, n).ok_or_else(|| {
                        Error::TypeError(format!("cannot merge type {c} and {n} for ${name}"))
                    })?;
                    merged.push(ancestor);
                }
                self.bindings.insert(name.to_string(), merged);
                Ok(())
            }
        }
    }

    fn get(&self, name: &str) -> Option<&[String]> {
        self.bindings.get(name).map(|v| v.as_slice())
    }
}

/// Solve the convertibility equations for one node's incoming edges,
/// producing an environment that binds every type variable referenced in
/// the node's pipe type expressions (spec §4.3).
fn solve_convertibility_equations(
    service: &Service,
    catalogue: &dyn TypeCatalogue,
    node: NodeId,
) -> Result<Env> {
    let mut env = Env::default();

    for pd in service.incoming(node) {
        let (source_type, _) = service
            .resolved_type(pd.source_node, pd.source_pipe, true)
            .ok_or_else(|| Error::TypeError("upstream pipe has no resolved type yet".into()))?;
        let source_atoms = parse_type_expr(source_type);
        let source_types: Vec<String> = source_atoms
            .iter()
            .map(|a| match a {
                TypeAtom::Concrete(t) => t.clone(),
                _ => unreachable!("a resolved type is always fully concrete"),
            })
            .collect();

        let dest_expr = service
            .edge_type_expr(pd.destination_node, pd.destination_pipe, false)
            .ok_or_else(|| Error::TypeError("destination pipe has no type expression".into()))?;
        let dest_atoms = parse_type_expr(&dest_expr);

        for (i, dest_atom) in dest_atoms.iter().enumerate() {
            match dest_atom {
                TypeAtom::Var(name) => {
                    if i + 1 == dest_atoms.len() {
                        // Trailing variable: capture the remaining source tail.
                        env.merge(catalogue, name, &source_types[i.min(source_types.len())..])?;
                    } else {
                        let Some(src) = source_types.get(i) else {
                            return Err(Error::TypeError(format!(
                                "source type exhausted before binding ${name}"
                            )));
                        };
                        env.merge(catalogue, name, std::slice::from_ref(src))?;
                    }
                }
                TypeAtom::VarField(..) => {
                    return Err(Error::TypeError(
                        "a field projection cannot appear on the binding side of an equation".into(),
                    ));
                }
                TypeAtom::Concrete(expected) => {
                    let Some(src) = source_types.get(i) else {
                        return Err(Error::TypeError(format!(
                            "source type exhausted, expected {expected}"
                        )));
                    };
                    match catalogue.common_ancestor(src, expected) {
                        Some(ref anc) if anc == expected => {}
                        _ => {
                            return Err(Error::TypeError(format!(
                                "cannot convert {src} to {expected}"
                            )))
                        }
                    }
                }
            }
        }
    }

    Ok(env)
}

/// Render a type expression to its fully concrete form under `env`, also
/// returning the header byte size of the first rendered position.
///
/// `fallback` is consulted for a variable `env` has no binding for: a node's
/// own outgoing edge can reference a variable that node never captured from
/// its own incoming equations (a bare pass-through hop), in which case it
/// resolves to whatever concrete types are already flowing into that same
/// node, in declaration order.
fn render_type_name(
    expr: &str,
    env: &Env,
    fallback: Option<&[String]>,
    catalogue: &dyn TypeCatalogue,
) -> Result<(String, usize)> {
    let atoms = parse_type_expr(expr);
    let mut rendered = Vec::new();

    for atom in &atoms {
        match atom {
            TypeAtom::Concrete(name) => rendered.push(name.clone()),
            TypeAtom::Var(name) => {
                let bound = env.get(name).or(fallback).ok_or_else(|| {
                    Error::TypeError(format!("type variable ${name} not bound"))
                })?;
                rendered.extend_from_slice(bound);
            }
            TypeAtom::VarField(name, field) => {
                let bound = env.get(name).or(fallback).ok_or_else(|| {
                    Error::TypeError(format!("type variable ${name} not bound"))
                })?;
                let base = bound.first().ok_or_else(|| {
                    Error::TypeError(format!("type variable ${name} bound to nothing"))
                })?;
                let field_type = catalogue.field_type(base, field).ok_or_else(|| {
                    Error::TypeError(format!("type {base} has no field {field}"))
                })?;
                rendered.push(field_type);
            }
        }
    }

    if rendered.is_empty() {
        return Err(Error::TypeError(format!("type expression '{expr}' rendered to nothing")));
    }

    let size = catalogue
        .type_size(&rendered[0])
        .ok_or_else(|| Error::TypeError(format!("catalogue has no size for type {}", rendered[0])))?;

    Ok((rendered.join(" "), size))
}

/// Run type inference over the whole service, in topological order from the
/// input node, resolving every edge's type expression to a concrete type and
/// header size (spec §4.3).
pub fn infer_types(service: &mut Service, catalogue: &dyn TypeCatalogue) -> Result<()> {
    let order = service.topological_order()?;
    tracing::debug!(nodes = order.len(), "running type inference over service graph");

    for node in order {
        let env = solve_convertibility_equations(service, catalogue, node).map_err(|err| {
            tracing::warn!(?node, %err, "type inference failed");
            err
        })?;

        let incoming = service.incoming(node);
        for pd in &incoming {
            let expr = service
                .edge_type_expr(pd.destination_node, pd.destination_pipe, false)
                .expect("incoming edge always has a type expression");
            let (rendered, size) = render_type_name(&expr, &env, None, catalogue)?;
            service.set_resolved_type(pd.destination_node, pd.destination_pipe, false, rendered, size)?;
        }

        // A node's own outgoing edge can reference a variable that node never
        // bound from its own incoming equations (a bare "$t" pass-through
        // hop, spec §4.3's intermediate-hop case): fall back to this node's
        // own already-resolved incoming types, in declaration order, so the
        // variable still resolves instead of erroring as unbound.
        let passthrough: Vec<String> = incoming
            .iter()
            .map(|pd| {
                service
                    .resolved_type(pd.destination_node, pd.destination_pipe, false)
                    .map(|(ty, _)| ty.to_string())
                    .expect("just resolved above")
            })
            .flat_map(|ty| {
                parse_type_expr(&ty).into_iter().map(|atom| match atom {
                    TypeAtom::Concrete(t) => t,
                    _ => unreachable!("a resolved type is always fully concrete"),
                })
            })
            .collect();

        let outgoing = service.outgoing(node);
        for pd in &outgoing {
            let expr = service
                .edge_type_expr(pd.source_node, pd.source_pipe, true)
                .expect("outgoing edge always has a type expression");
            let (rendered, size) = render_type_name(&expr, &env, Some(&passthrough), catalogue)?;
            service.set_resolved_type(pd.source_node, pd.source_pipe, true, rendered, size)?;
        }
    }

    tracing::debug!("type inference resolved every edge in the service graph");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_variable_captures_the_source_type() {
        let mut catalogue = InMemoryCatalogue::new();
        catalogue.declare_type("plumber/std/String", 4);
        let mut env = Env::default();
        env.merge(&catalogue, "t", &["plumber/std/String".to_string()]).unwrap();
        let (rendered, size) = render_type_name("$t", &env, None, &catalogue).unwrap();
        assert_eq!(rendered, "plumber/std/String");
        assert_eq!(size, 4);
    }

    #[test]
    fn an_unbound_variable_falls_back_to_the_nodes_own_incoming_type() {
        let mut catalogue = InMemoryCatalogue::new();
        catalogue.declare_type("plumber/std/String", 4);
        let env = Env::default();
        let fallback = ["plumber/std/String".to_string()];
        let (rendered, size) = render_type_name("$t", &env, Some(&fallback), &catalogue).unwrap();
        assert_eq!(rendered, "plumber/std/String");
        assert_eq!(size, 4);
    }

    #[test]
    fn an_unbound_variable_with_no_fallback_is_a_type_error() {
        let catalogue = InMemoryCatalogue::new();
        let env = Env::default();
        assert!(render_type_name("$t", &env, None, &catalogue).is_err());
    }

    #[test]
    fn concrete_position_must_be_convertible() {
        let mut catalogue = InMemoryCatalogue::new();
        catalogue.declare_type("plumber/std/String", 0);
        catalogue.declare_type("plumber/std/Int", 8);
        let env = Env::default();
        let result = render_type_name("plumber/std/Int", &env, None, &catalogue);
        assert!(result.is_ok());
    }

    #[test]
    fn merging_unrelated_types_fails() {
        let catalogue = InMemoryCatalogue::new();
        let mut env = Env::default();
        env.merge(&catalogue, "t", &["A".to_string()]).unwrap();
        assert!(env.merge(&catalogue, "t", &["B".to_string()]).is_err());
    }
}
