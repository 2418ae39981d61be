//! Diagnostic renderings of a chain
//!
//! [`dump_chain`] writes an indented outline of a document's contexts,
//! declarations, uses and imports. [`dump_dot_graph`] renders a context
//! subtree and the contexts it imports as Graphviz dot. Both need the read
//! lock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write;

use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::chain::DUChain;
use crate::context::{ContextType, Use};
use crate::declaration_id::DeclarationId;
use crate::indexed::{IndexedContext, IndexedTopContext};
use crate::range::SimpleRange;

struct ContextSnapshot {
    context_type: ContextType,
    range: SimpleRange,
    scope: String,
    imports: Vec<(IndexedContext, String)>,
    children: Vec<IndexedContext>,
    uses: Vec<Use>,
}

fn snapshot(chain: &DUChain, context: IndexedContext) -> Option<ContextSnapshot> {
    chain.with_context(context, |current| ContextSnapshot {
        context_type: current.context_type(),
        range: current.range(),
        scope: current.scope_identifier().to_string(),
        imports: current
            .imported_parent_contexts()
            .iter()
            .map(|import| (import.context, import.position.to_string()))
            .collect(),
        children: current.child_contexts().to_vec(),
        uses: current.uses().to_vec(),
    })
}

/// Short human-readable name of a context.
pub fn context_label(chain: &DUChain, context: IndexedContext) -> String {
    let url = chain
        .with_top(context.top(), |top| top.url())
        .unwrap_or_else(|| "<destroyed>".to_string());
    match snapshot(chain, context) {
        Some(current) if current.scope.is_empty() => {
            format!("{:?} {}", current.context_type, url)
        }
        Some(current) => format!("{:?} {} ({})", current.context_type, current.scope, url),
        None => format!("<stale context in {}>", url),
    }
}

/// Indented outline of `top`.
pub fn dump_chain(chain: &DUChain, top: IndexedTopContext) -> String {
    let mut out = String::new();
    let Some((url, registered, contexts, declarations, table)) = chain.with_top(top, |document| {
        (
            document.url(),
            document.is_registered(),
            document.context_count(),
            document.declaration_count(),
            document.declaration_table().to_vec(),
        )
    }) else {
        return out;
    };

    let _ = writeln!(
        out,
        "top {} [{}] ({} contexts, {} declarations)",
        url,
        if registered { "registered" } else { "unregistered" },
        contexts,
        declarations
    );
    if let Some(root) = chain.root_context(top) {
        dump_context(chain, root, &table, 1, &mut out);
    }
    out
}

fn dump_context(
    chain: &DUChain,
    context: IndexedContext,
    table: &[DeclarationId],
    depth: usize,
    out: &mut String,
) {
    let Some(current) = snapshot(chain, context) else {
        return;
    };
    let indent = "  ".repeat(depth);
    let _ = writeln!(
        out,
        "{}context {:?} \"{}\" {}",
        indent, current.context_type, current.scope, current.range
    );

    for (imported, position) in &current.imports {
        let _ = writeln!(
            out,
            "{}  import {} @ {}",
            indent,
            context_label(chain, *imported),
            position
        );
    }
    for declaration in chain.local_declarations(context) {
        let line = chain.with_declaration(declaration, |declaration| {
            let ty = declaration
                .abstract_type()
                .map(|ty| format!(" : {}", ty))
                .unwrap_or_default();
            format!(
                "declaration {}{} {} {:?} {:?}",
                declaration.qualified_identifier(),
                ty,
                declaration.range(),
                declaration.kind(),
                declaration.facets()
            )
        });
        if let Some(line) = line {
            let _ = writeln!(out, "{}  {}", indent, line);
        }
    }
    for recorded in &current.uses {
        let target = recorded
            .declaration_index
            .and_then(|index| table.get(index as usize))
            .map(|id| id.to_string())
            .unwrap_or_else(|| "<unresolved>".to_string());
        let _ = writeln!(out, "{}  use {} -> {}", indent, recorded.range, target);
    }
    for child in &current.children {
        dump_context(chain, *child, table, depth + 1, out);
    }
}

/// Graphviz dot of the subtree below `context` plus the contexts it
/// imports. Ownership edges are labelled `child`, import edges `import`.
pub fn dump_dot_graph(chain: &DUChain, context: IndexedContext) -> String {
    let mut graph: DiGraph<String, &'static str> = DiGraph::new();
    let mut nodes: HashMap<IndexedContext, NodeIndex> = HashMap::new();
    let mut queue = VecDeque::from([context]);

    let mut node_of = |graph: &mut DiGraph<String, &'static str>, context: IndexedContext| {
        *nodes
            .entry(context)
            .or_insert_with(|| graph.add_node(context_label(chain, context)))
    };

    let mut visited = HashSet::new();
    while let Some(current) = queue.pop_front() {
        if !visited.insert(current) {
            continue;
        }
        let Some(state) = snapshot(chain, current) else {
            continue;
        };
        let from = node_of(&mut graph, current);
        for child in state.children {
            let to = node_of(&mut graph, child);
            graph.add_edge(from, to, "child");
            queue.push_back(child);
        }
        for (imported, _) in state.imports {
            let to = node_of(&mut graph, imported);
            graph.add_edge(from, to, "import");
            queue.push_back(imported);
        }
    }

    format!("{}", Dot::with_config(&graph, &[]))
}
