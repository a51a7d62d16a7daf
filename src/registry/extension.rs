//! Extension composition and cycle detection.

use std::collections::HashSet;
use std::sync::Arc;

use super::RuntimePlugin;

/// Compose `extender` over `target`.
///
/// The result keeps the extender's identity and bindings. Its layers are the
/// extender's followed by the target's, so any capability the extender
/// provides shadows the target's; everything else falls through. The
/// `extends` lists are unioned.
pub fn extend(extender: &RuntimePlugin, target: &RuntimePlugin) -> RuntimePlugin {
    let mut composed = extender.clone();

    for layer in &target.layers {
        if !composed.layers.iter().any(|l| Arc::ptr_eq(l, layer)) {
            composed.layers.push(Arc::clone(layer));
        }
    }

    for id in &target.descriptor.extends {
        if id != composed.id() && !composed.descriptor.extends.contains(id) {
            composed.descriptor.extends.push(id.clone());
        }
    }

    composed
}

/// Find a path from `id` back to itself through `extends` edges.
///
/// `edges` yields the extends list of an already known plugin. Returns the
/// cycle as `[id, ..., id]`.
pub fn find_cycle<F>(id: &str, extends: &[String], edges: F) -> Option<Vec<String>>
where
    F: Fn(&str) -> Vec<String>,
{
    let mut visited = HashSet::new();
    let mut path = vec![id.to_string()];

    for target in extends {
        if visit(id, target, &edges, &mut visited, &mut path) {
            return Some(path);
        }
    }
    None
}

fn visit<F>(
    origin: &str,
    node: &str,
    edges: &F,
    visited: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> bool
where
    F: Fn(&str) -> Vec<String>,
{
    path.push(node.to_string());
    if node == origin {
        return true;
    }

    if visited.insert(node.to_string()) {
        for next in edges(node) {
            if visit(origin, &next, edges, visited, path) {
                return true;
            }
        }
    }

    path.pop();
    false
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::{Value, json};

    use super::*;
    use crate::descriptor::PluginDescriptor;
    use crate::plugin::{Capability, FnPlugin};

    fn plugin(id: &str, extends: &[&str], layer: FnPlugin) -> RuntimePlugin {
        RuntimePlugin::new(
            PluginDescriptor::for_plugin(
                id,
                vec!["e".into()],
                extends.iter().map(|s| s.to_string()).collect(),
            ),
            "./",
            Arc::new(layer),
        )
    }

    fn graph(edges: &[(&str, &[&str])]) -> impl Fn(&str) -> Vec<String> {
        let map: HashMap<String, Vec<String>> = edges
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect();
        move |id: &str| map.get(id).cloned().unwrap_or_default()
    }

    #[test]
    fn test_extender_members_win() {
        let target = plugin(
            "dict.base",
            &[],
            FnPlugin::new()
                .member("x", |_| Ok(json!("base-x")))
                .member("y", |_| Ok(json!("base-y"))),
        );
        let extender = plugin(
            "dict.better",
            &["dict.base"],
            FnPlugin::new().member("x", |_| Ok(json!("better-x"))),
        );

        let composed = extend(&extender, &target);

        assert_eq!(composed.id(), "dict.better");
        assert_eq!(composed.layers.len(), 2);
        let x = composed.provider(&Capability::member("x")).unwrap();
        assert!(Arc::ptr_eq(x, &extender.layers[0]));
        let y = composed.provider(&Capability::member("y")).unwrap();
        assert!(Arc::ptr_eq(y, &target.layers[0]));
    }

    #[test]
    fn test_extends_lists_are_unioned() {
        let target = plugin("a.t", &["a.u", "a.v"], FnPlugin::new());
        let extender = plugin("a.x", &["a.t", "a.u"], FnPlugin::new());

        let composed = extend(&extender, &target);
        assert_eq!(composed.extends(), &["a.t", "a.u", "a.v"]);
    }

    #[test]
    fn test_repeated_extend_does_not_duplicate_layers() {
        let target = plugin("a.t", &[], FnPlugin::new().on_run(|p: Value, _, _| Ok(p)));
        let extender = plugin("a.x", &["a.t"], FnPlugin::new());

        let once = extend(&extender, &target);
        let twice = extend(&once, &target);
        assert_eq!(twice.layers.len(), 2);
    }

    #[test]
    fn test_direct_cycle() {
        let edges = graph(&[("a.b", &["a.a"])]);
        let cycle = find_cycle("a.a", &["a.b".to_string()], edges).unwrap();
        assert_eq!(cycle, vec!["a.a", "a.b", "a.a"]);
    }

    #[test]
    fn test_transitive_cycle() {
        let edges = graph(&[("a.b", &["a.c"]), ("a.c", &["a.a"])]);
        let cycle = find_cycle("a.a", &["a.b".to_string()], edges).unwrap();
        assert_eq!(cycle, vec!["a.a", "a.b", "a.c", "a.a"]);
    }

    #[test]
    fn test_self_extension_is_a_cycle() {
        let cycle = find_cycle("a.a", &["a.a".to_string()], graph(&[])).unwrap();
        assert_eq!(cycle, vec!["a.a", "a.a"]);
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let edges = graph(&[("a.b", &["a.d"]), ("a.c", &["a.d"]), ("a.d", &[])]);
        let extends = vec!["a.b".to_string(), "a.c".to_string()];
        assert!(find_cycle("a.a", &extends, edges).is_none());
    }
}
