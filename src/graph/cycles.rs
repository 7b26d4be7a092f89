//! Cycle detection over the project graph: classical three-color DFS.

use super::EdgeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Detect all simple cycles reachable from the graph's roots, visited in
/// name order. Each reported cycle is the stack slice from the first
/// occurrence of the re-entered node through the current node, with the
/// re-entered node appended, e.g. `[a, b, c, a]`.
///
/// An empty result means the graph is acyclic.
pub fn detect_cycles(deps: &EdgeMap) -> Vec<Vec<String>> {
    let mut color: std::collections::BTreeMap<&str, Color> =
        deps.keys().map(|k| (k.as_str(), Color::White)).collect();
    let mut stack: Vec<&str> = Vec::new();
    let mut cycles = Vec::new();

    for root in deps.keys() {
        if color[root.as_str()] == Color::White {
            visit(root, deps, &mut color, &mut stack, &mut cycles);
        }
    }
    cycles
}

fn visit<'a>(
    node: &'a str,
    deps: &'a EdgeMap,
    color: &mut std::collections::BTreeMap<&'a str, Color>,
    stack: &mut Vec<&'a str>,
    cycles: &mut Vec<Vec<String>>,
) {
    color.insert(node, Color::Gray);
    stack.push(node);

    for child in deps.get(node).into_iter().flatten() {
        match color.get(child.as_str()).copied() {
            Some(Color::Gray) => {
                if let Some(pos) = stack.iter().position(|n| *n == child.as_str()) {
                    let mut cycle: Vec<String> =
                        stack[pos..].iter().map(|s| s.to_string()).collect();
                    cycle.push(child.clone());
                    cycles.push(cycle);
                }
            }
            Some(Color::White) => visit(child, deps, color, stack, cycles),
            _ => {}
        }
    }

    stack.pop();
    color.insert(node, Color::Black);
}
