//! Tree builder: flattens a nested desired-state description into a key-tree.
//!
//! Every node of the description is parsed once into a [`DesiredNode`] record
//! (value, metadata, array elements, children, remove flag). Building then
//! walks those records and emits keys.
//!
//! Accepted node shapes:
//! - scalar: the node's value
//! - object: reserved names (`value`, `meta`, `array`, `remove`, `keys`) are
//!   directives, every other name is a child
//! - list of single-directive objects: `[{value: ..}, {meta: ..}, {keys: ..}]`

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use tracing::{debug, instrument, trace};

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::key::{parse_index, Key, KeyName, Segment, ARRAY_META, ORDER_META};
use crate::domain::keyset::KeySet;

pub const VALUE: &str = "value";
pub const META: &str = "meta";
pub const ARRAY: &str = "array";
pub const REMOVE: &str = "remove";
pub const KEYS: &str = "keys";

const DIRECTIVES: [&str; 5] = [VALUE, META, ARRAY, REMOVE, KEYS];

/// Name that, inside an `array` block, stands for the next index.
const NEXT_INDEX: &str = "#";

fn is_directive(name: &str) -> bool {
    DIRECTIVES.contains(&name)
}

/// `#` or `#N`; any other name starting with `#` is an ordinary child.
fn is_index_marker(name: &str) -> bool {
    name == NEXT_INDEX || name.strip_prefix('#').and_then(parse_index).is_some()
}

/// One validated node of the desired-state description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredNode {
    pub value: Option<String>,
    /// Flattened metadata, names joined with `/`.
    pub meta: Vec<(String, String)>,
    pub array: Option<Vec<DesiredNode>>,
    /// Children in input order.
    pub keys: Vec<(String, DesiredNode)>,
    pub remove: bool,
}

impl DesiredNode {
    /// Parse a node; `path` is only used for error messages.
    pub fn parse(input: &Value, path: &str) -> DomainResult<Self> {
        let mut node = DesiredNode::default();
        match input {
            Value::Null => {}
            Value::Object(entries) => {
                for (name, child) in entries {
                    if is_directive(name) {
                        node.apply_directive(name, child, path)?;
                    } else {
                        let child_path = format!("{path}/{name}");
                        node.keys
                            .push((name.clone(), DesiredNode::parse(child, &child_path)?));
                    }
                }
            }
            Value::Array(directives) => {
                let mut seen = BTreeSet::new();
                for entry in directives {
                    let Value::Object(entry) = entry else {
                        return Err(DomainError::build(
                            path,
                            format!("directive list entries must be objects, found {entry}"),
                        ));
                    };
                    for (name, child) in entry {
                        if !is_directive(name) {
                            return Err(DomainError::build(
                                path,
                                format!(
                                    "'{name}' is not a directive (expected one of {DIRECTIVES:?})"
                                ),
                            ));
                        }
                        if !seen.insert(name.clone()) {
                            return Err(DomainError::build(
                                path,
                                format!("directive '{name}' given more than once"),
                            ));
                        }
                        node.apply_directive(name, child, path)?;
                    }
                }
            }
            scalar => node.value = Some(scalar_to_string(scalar, path)?),
        }
        node.validate(path)?;
        Ok(node)
    }

    fn apply_directive(&mut self, name: &str, input: &Value, path: &str) -> DomainResult<()> {
        match name {
            VALUE => {
                if self.value.is_some() {
                    return Err(DomainError::build(path, "directive 'value' given more than once"));
                }
                self.value = Some(scalar_to_string(input, path)?);
            }
            META => {
                let Value::Object(entries) = input else {
                    return Err(DomainError::build(path, "'meta' must be a mapping"));
                };
                flatten_meta(entries, "", path, &mut self.meta)?;
            }
            ARRAY => {
                let Value::Array(elements) = input else {
                    return Err(DomainError::build(path, "'array' must be a list"));
                };
                if self.array.is_some() {
                    return Err(DomainError::build(path, "directive 'array' given more than once"));
                }
                self.array = Some(parse_array(elements, path)?);
            }
            REMOVE => match input {
                Value::Bool(flag) => self.remove = *flag,
                other => {
                    return Err(DomainError::build(
                        path,
                        format!("'remove' must be a boolean, found {other}"),
                    ))
                }
            },
            KEYS => {
                let Value::Object(entries) = input else {
                    return Err(DomainError::build(path, "'keys' must be a mapping"));
                };
                for (name, child) in entries {
                    let child_path = format!("{path}/{name}");
                    self.keys
                        .push((name.clone(), DesiredNode::parse(child, &child_path)?));
                }
            }
            _ => unreachable!("not a directive: {name}"),
        }
        Ok(())
    }

    fn validate(&self, path: &str) -> DomainResult<()> {
        if self.array.is_some() && self.value.is_some() {
            return Err(DomainError::build(
                path,
                "conflicting directives 'array' and 'value' on the same key",
            ));
        }
        Ok(())
    }

    /// Whether building this node emits a key for the node itself.
    fn defines_key(&self) -> bool {
        self.value.is_some()
            || !self.meta.is_empty()
            || self.array.is_some()
            || (self.keys.is_empty() && !self.remove)
    }
}

fn scalar_to_string(input: &Value, path: &str) -> DomainResult<String> {
    match input {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(DomainError::build(
            path,
            format!("expected a scalar value, found {other}"),
        )),
    }
}

/// Flatten a (possibly nested) metadata mapping into `name/sub = value` pairs.
///
/// Nested metadata nodes may only use `value` and `keys`.
fn flatten_meta(
    entries: &Map<String, Value>,
    prefix: &str,
    path: &str,
    out: &mut Vec<(String, String)>,
) -> DomainResult<()> {
    for (name, input) in entries {
        let full = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        match input {
            Value::Object(_) | Value::Array(_) => {
                let node = DesiredNode::parse(input, &format!("{path}[meta {full}]"))?;
                flatten_meta_node(&node, &full, path, out)?;
            }
            scalar => out.push((full, scalar_to_string(scalar, path)?)),
        }
    }
    Ok(())
}

fn flatten_meta_node(
    node: &DesiredNode,
    name: &str,
    path: &str,
    out: &mut Vec<(String, String)>,
) -> DomainResult<()> {
    if node.array.is_some() || node.remove || !node.meta.is_empty() {
        return Err(DomainError::build(
            path,
            format!("metadata '{name}' may only use 'value' and 'keys'"),
        ));
    }
    if let Some(value) = &node.value {
        out.push((name.to_string(), value.clone()));
    }
    for (child, child_node) in &node.keys {
        flatten_meta_node(child_node, &format!("{name}/{child}"), path, out)?;
    }
    Ok(())
}

/// Parse the elements of an `array` directive.
///
/// An element is a scalar, an object of children, a directive list, or an
/// object whose only key is `#` (or the explicit next index `#N`) holding the
/// element itself.
fn parse_array(elements: &[Value], path: &str) -> DomainResult<Vec<DesiredNode>> {
    let mut nodes = Vec::with_capacity(elements.len());
    for (index, element) in elements.iter().enumerate() {
        let element_path = format!("{path}/#{index}");
        let node = match element {
            Value::Null => {
                return Err(DomainError::build(
                    &element_path,
                    "array element must not be null",
                ))
            }
            Value::Object(entries) if entries.keys().any(|k| is_index_marker(k)) => {
                let Some((marker, inner)) = entries.iter().next().filter(|_| entries.len() == 1)
                else {
                    return Err(DomainError::build(
                        &element_path,
                        "an index key ('#' or '#N') must be the only key of an array element",
                    ));
                };
                if marker != NEXT_INDEX && marker != &format!("#{index}") {
                    return Err(DomainError::build(
                        &element_path,
                        format!(
                            "non-sequential array element '{marker}', \
                             expected '#' or '#{index}'"
                        ),
                    ));
                }
                DesiredNode::parse(inner, &element_path)?
            }
            other => DesiredNode::parse(other, &element_path)?,
        };
        nodes.push(node);
    }
    Ok(nodes)
}

/// Single-path or recursive removal from the top-level remove list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveSpec {
    pub path: KeyName,
    pub recursive: bool,
}

impl RemoveSpec {
    /// Parse one entry: `"user:/a"`, `{path: "user:/a", recursive: true}` or
    /// `{"user:/a": {recursive: true}}`.
    pub fn parse(entry: &Value, base: Option<&KeyName>) -> DomainResult<Self> {
        match entry {
            Value::String(path) => Ok(Self {
                path: KeyName::resolve(path, base)?,
                recursive: false,
            }),
            Value::Object(fields) if fields.contains_key("path") => {
                let path = fields
                    .get("path")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        DomainError::validation("remove entry 'path' must be a string")
                    })?;
                Ok(Self {
                    path: KeyName::resolve(path, base)?,
                    recursive: read_recursive(fields.get("recursive"))?,
                })
            }
            Value::Object(fields) if fields.len() == 1 => {
                let Some((path, options)) = fields.iter().next() else {
                    return Err(DomainError::validation("empty remove entry"));
                };
                let recursive = match options {
                    Value::Object(options) => read_recursive(options.get("recursive"))?,
                    Value::Null => false,
                    other => {
                        return Err(DomainError::validation(format!(
                            "remove options for '{path}' must be a mapping, found {other}"
                        )))
                    }
                };
                Ok(Self {
                    path: KeyName::resolve(path, base)?,
                    recursive,
                })
            }
            other => Err(DomainError::validation(format!(
                "malformed remove entry: {other}"
            ))),
        }
    }
}

fn read_recursive(flag: Option<&Value>) -> DomainResult<bool> {
    match flag {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(DomainError::validation(format!(
            "'recursive' must be a boolean, found {other}"
        ))),
    }
}

/// Output of a build: keys to converge plus single keys marked for removal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuiltTree {
    pub keys: KeySet,
    pub removals: BTreeSet<KeyName>,
}

impl BuiltTree {
    /// All names this tree touches.
    pub fn names(&self) -> impl Iterator<Item = &KeyName> {
        self.keys.names().chain(self.removals.iter())
    }

    /// Apply removals to `current`, then overlay this tree.
    ///
    /// Values replace existing values; given metadata overlays existing
    /// metadata. With `keep_order`, keys new to `current` are ordered after the
    /// highest existing `order`, while existing keys keep theirs.
    pub fn apply_to(&self, current: &KeySet, removes: &[RemoveSpec], keep_order: bool) -> KeySet {
        let mut out = current.clone();
        let offset = if keep_order {
            current.max_order().map_or(0, |max| max + 1)
        } else {
            0
        };

        // removals first: a removed and re-added key starts without its old metadata
        for name in &self.removals {
            out.remove(name);
        }
        for spec in removes {
            if spec.recursive {
                let removed = out.remove_recursive(&spec.path);
                trace!(path = %spec.path, count = removed.len(), "recursive remove");
            } else {
                out.remove(&spec.path);
            }
        }

        for (name, desired) in &self.keys {
            match out.get_mut(name) {
                Some(existing) => {
                    if let Some(value) = desired.value() {
                        existing.set_value(value);
                    }
                    for (meta, value) in desired.meta() {
                        if meta == ORDER_META {
                            if existing.order().is_none() {
                                let order = desired.order().unwrap_or(0) + offset;
                                existing.set_meta(ORDER_META, order.to_string());
                            }
                        } else {
                            existing.set_meta(meta.clone(), value.clone());
                        }
                    }
                }
                None => {
                    let mut key = desired.clone();
                    if let Some(order) = desired.order() {
                        key.set_meta(ORDER_META, (order + offset).to_string());
                    }
                    out.insert(name.clone(), key);
                }
            }
        }

        out
    }
}

/// Flattens desired-state nodes into a [`BuiltTree`].
#[derive(Debug, Default)]
pub struct TreeBuilder {
    keep_order: bool,
    next_order: u64,
    tree: BuiltTree,
}

impl TreeBuilder {
    pub fn new(keep_order: bool) -> Self {
        Self {
            keep_order,
            ..Self::default()
        }
    }

    /// Build the desired state given as the request's `keys` field.
    ///
    /// `keys` is a mapping or a list of mappings from key names to nodes.
    /// Names are absolute (`user:/hosts`), bare namespaces (`system`), or
    /// relative to `base`.
    #[instrument(level = "debug", skip(keys))]
    pub fn build(
        keys: &Value,
        base: Option<&KeyName>,
        keep_order: bool,
    ) -> DomainResult<BuiltTree> {
        let mut builder = Self::new(keep_order);
        match keys {
            Value::Null => {}
            Value::Object(entries) => builder.add_entries(entries, base)?,
            Value::Array(maps) => {
                for map in maps {
                    let Value::Object(entries) = map else {
                        return Err(DomainError::build(
                            "keys",
                            format!("list entries must be mappings, found {map}"),
                        ));
                    };
                    builder.add_entries(entries, base)?;
                }
            }
            other => {
                return Err(DomainError::build(
                    "keys",
                    format!("expected a mapping or a list of mappings, found {other}"),
                ))
            }
        }
        let tree = builder.finish();
        debug!(
            keys = tree.keys.len(),
            removals = tree.removals.len(),
            "built desired tree"
        );
        Ok(tree)
    }

    fn add_entries(
        &mut self,
        entries: &Map<String, Value>,
        base: Option<&KeyName>,
    ) -> DomainResult<()> {
        for (name, input) in entries {
            let root = KeyName::resolve(name, base)?;
            let node = DesiredNode::parse(input, &root.to_string())?;
            self.add(&root, &node)?;
        }
        Ok(())
    }

    /// Add one node (and everything below it) at `name`.
    pub fn add(&mut self, name: &KeyName, node: &DesiredNode) -> DomainResult<()> {
        if node.remove {
            if node.value.is_some() || !node.meta.is_empty() {
                debug!(key = %name, "remove given: ignoring value and metadata");
            }
            self.tree.removals.insert(name.clone());
        } else if node.defines_key() {
            let mut key = Key::new();
            if let Some(value) = &node.value {
                key.set_value(value.clone());
            }
            for (meta, value) in &node.meta {
                key.set_meta(meta.clone(), value.clone());
            }
            if let Some(elements) = &node.array {
                let last = elements
                    .len()
                    .checked_sub(1)
                    .map(|i| format!("#{i}"))
                    .unwrap_or_default();
                key.set_meta(ARRAY_META, last);
            }
            if self.keep_order {
                key.set_meta(ORDER_META, self.next_order.to_string());
                self.next_order += 1;
            }
            self.insert(name, key)?;
        }

        if let Some(elements) = &node.array {
            for (index, element) in elements.iter().enumerate() {
                self.add(&name.child(Segment::Index(index)), element)?;
            }
        }
        for (child, child_node) in &node.keys {
            self.add(&name.join_literal(child), child_node)?;
        }
        Ok(())
    }

    fn insert(&mut self, name: &KeyName, key: Key) -> DomainResult<()> {
        let Some(existing) = self.tree.keys.get_mut(name) else {
            self.tree.keys.insert(name.clone(), key);
            return Ok(());
        };
        match (existing.value(), key.value()) {
            (Some(a), Some(b)) if a != b => {
                return Err(DomainError::build(
                    name.to_string(),
                    format!("conflicting values '{a}' and '{b}'"),
                ))
            }
            (None, Some(b)) => existing.set_value(b),
            _ => {}
        }
        for (meta, value) in key.meta() {
            if meta == ORDER_META {
                continue;
            }
            match existing.get_meta(meta) {
                Some(current) if current != value => {
                    return Err(DomainError::build(
                        name.to_string(),
                        format!("conflicting metadata '{meta}': '{current}' and '{value}'"),
                    ))
                }
                _ => existing.set_meta(meta.clone(), value.clone()),
            }
        }
        Ok(())
    }

    pub fn finish(self) -> BuiltTree {
        self.tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn name(s: &str) -> KeyName {
        s.parse().unwrap()
    }

    fn value_of<'a>(tree: &'a BuiltTree, key: &str) -> Option<&'a str> {
        tree.keys.get(&name(key)).and_then(Key::value)
    }

    fn mixed_input() -> Value {
        json!([{
            "user:/hosts": {
                "localhost": {
                    "ipv4": [{"value": "127.0.0.1"}, {"meta": {"elektra": {"test": "1"}}}],
                    "ipv6": [{"value": "::1"}]
                },
                "example.com": {
                    "ipv4": [{"value": "1.2.3.4"}, {"remove": true}]
                }
            },
            "system": {
                "drink": [{"value": "beer"}, {"meta": {"healthy": "false"}}],
                "cake": "lie",
                "nonleaf": [
                    {"value": "non-leaf value"},
                    {"keys": {"further": {"continuation": "123"}, "raspberry": "pie"}}
                ]
            },
            "dir:/animals": [
                {"array": [
                    {"species": "cow", "name": "Bessie"},
                    {"#": [
                        {"meta": {"goodboy": "true"}},
                        {"keys": {"species": "dog", "name": "Rufus"}}
                    ]},
                    "value of 3rd element",
                    {"#": "value of 4th element"}
                ]},
                {"meta": {"something": "abc"}}
            ]
        }])
    }

    #[test]
    fn given_mixed_description_when_building_then_flattens_all_keys() {
        let tree = TreeBuilder::build(&mixed_input(), None, false).unwrap();

        assert_eq!(tree.keys.len(), 15);
        assert_eq!(value_of(&tree, "user:/hosts/localhost/ipv4"), Some("127.0.0.1"));
        assert_eq!(
            tree.keys
                .get(&name("user:/hosts/localhost/ipv4"))
                .unwrap()
                .get_meta("elektra/test"),
            Some("1")
        );
        assert_eq!(value_of(&tree, "system:/cake"), Some("lie"));
        assert_eq!(value_of(&tree, "system:/nonleaf"), Some("non-leaf value"));
        assert_eq!(value_of(&tree, "system:/nonleaf/further/continuation"), Some("123"));
        assert_eq!(value_of(&tree, "dir:/animals/#0/species"), Some("cow"));
        assert_eq!(value_of(&tree, "dir:/animals/#1/name"), Some("Rufus"));
        assert_eq!(value_of(&tree, "dir:/animals/#2"), Some("value of 3rd element"));
        assert_eq!(value_of(&tree, "dir:/animals/#3"), Some("value of 4th element"));
        assert!(!tree.keys.contains(&name("dir:/animals/#0")));

        let animals = tree.keys.get(&name("dir:/animals")).unwrap();
        assert_eq!(animals.get_meta("array"), Some("#3"));
        assert_eq!(animals.get_meta("something"), Some("abc"));
        assert_eq!(
            tree.keys.get(&name("dir:/animals/#1")).unwrap().get_meta("goodboy"),
            Some("true")
        );
    }

    #[test]
    fn given_remove_directive_when_building_then_marked_for_removal_only() {
        let tree = TreeBuilder::build(&mixed_input(), None, false).unwrap();
        let marked = name("user:/hosts/example.com/ipv4");
        assert!(tree.removals.contains(&marked));
        assert!(!tree.keys.contains(&marked));
    }

    #[test]
    fn given_nested_meta_when_building_then_names_joined() {
        let input = json!({
            "user:/test": {
                "raspberry": [
                    {"value": "pie"},
                    {"meta": {"comment": {"#1": [
                        {"value": "this is my comment"},
                        {"keys": {"space": "Nothing", "start": [{"value": "#"}]}}
                    ]}}}
                ]
            }
        });
        let tree = TreeBuilder::build(&input, None, false).unwrap();
        assert_eq!(tree.keys.len(), 1);
        let key = tree.keys.get(&name("user:/test/raspberry")).unwrap();
        assert_eq!(key.value(), Some("pie"));
        assert_eq!(key.meta().len(), 3);
        assert_eq!(key.get_meta("comment/#1"), Some("this is my comment"));
        assert_eq!(key.get_meta("comment/#1/space"), Some("Nothing"));
        assert_eq!(key.get_meta("comment/#1/start"), Some("#"));
    }

    #[test]
    fn given_array_and_value_when_building_then_build_error_names_both() {
        let input = json!({"user:/a": {"value": "x", "array": ["1", "2"]}});
        let err = TreeBuilder::build(&input, None, false).unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, DomainError::Build { .. }));
        assert!(message.contains("array") && message.contains("value"), "{message}");
    }

    #[test]
    fn given_non_sequential_index_when_building_then_build_error() {
        let input = json!({"user:/a": {"array": ["zero", {"#3": "three"}]}});
        let err = TreeBuilder::build(&input, None, false).unwrap_err();
        assert!(err.to_string().contains("non-sequential"), "{err}");
    }

    #[test]
    fn given_explicit_next_index_when_building_then_accepted() {
        let input = json!({"user:/a": {"array": ["zero", {"#1": "one"}]}});
        let tree = TreeBuilder::build(&input, None, false).unwrap();
        assert_eq!(value_of(&tree, "user:/a/#1"), Some("one"));
    }

    #[test]
    fn given_hash_prefixed_child_in_array_element_when_building_then_ordinary_child() {
        let input = json!({"user:/list": {"array": [{"name": "a", "#comment": "x"}]}});
        let tree = TreeBuilder::build(&input, None, false).unwrap();
        assert_eq!(value_of(&tree, "user:/list/#0/name"), Some("a"));
        assert_eq!(value_of(&tree, "user:/list/#0/#comment"), Some("x"));
    }

    #[test]
    fn given_index_marker_beside_children_when_building_then_build_error() {
        let input = json!({"user:/list": {"array": [{"name": "a", "#0": "x"}]}});
        let err = TreeBuilder::build(&input, None, false).unwrap_err();
        assert!(err.to_string().contains("must be the only key"), "{err}");
    }

    #[test]
    fn given_null_array_element_when_building_then_build_error() {
        let input = json!({"user:/a": {"array": ["zero", null]}});
        assert!(TreeBuilder::build(&input, None, false).is_err());
    }

    #[test]
    fn given_hash_outside_array_when_building_then_literal_segment() {
        let input = json!({"user:/a": {"#": "literal"}});
        let tree = TreeBuilder::build(&input, None, false).unwrap();
        let (key_name, _) = tree.keys.iter().next().unwrap();
        assert_eq!(key_name.base_name(), Some(&Segment::name("#")));
        assert!(!key_name.is_array_element());
    }

    #[test]
    fn given_empty_array_when_building_then_empty_array_meta() {
        let input = json!({"user:/a": {"array": []}});
        let tree = TreeBuilder::build(&input, None, false).unwrap();
        assert_eq!(tree.keys.get(&name("user:/a")).unwrap().get_meta("array"), Some(""));
    }

    #[test]
    fn given_conflicting_duplicate_when_building_then_build_error() {
        let input = json!({"user:/a": {"b": "1", "b/c": "2"}, "user:/a/b": "other"});
        let err = TreeBuilder::build(&input, None, false).unwrap_err();
        assert!(err.to_string().contains("conflicting values"), "{err}");
    }

    #[test]
    fn given_keep_order_when_building_then_depth_first_order_meta() {
        let input = json!({"user:/k": {"b": "1", "a": "2", "c": "3"}});
        let tree = TreeBuilder::build(&input, None, true).unwrap();
        let orders: Vec<(String, Option<u64>)> = tree
            .keys
            .iter()
            .map(|(n, k)| (n.to_string(), k.order()))
            .collect();
        assert_eq!(
            orders,
            vec![
                ("user:/k/a".to_string(), Some(1)),
                ("user:/k/b".to_string(), Some(0)),
                ("user:/k/c".to_string(), Some(2)),
            ]
        );
    }

    #[test]
    fn given_existing_orders_when_applying_with_keep_order_then_new_keys_appended() {
        let existing: KeySet = [("k1", "1", "2"), ("k2", "2", "1"), ("k3", "3", "0")]
            .into_iter()
            .map(|(n, v, o)| {
                (
                    name(&format!("user:/test/{n}")),
                    Key::with_value(v).with_meta(ORDER_META, o),
                )
            })
            .collect();
        let desired = BuiltTree {
            keys: [("k2", "n2", "1"), ("k4", "4", "2"), ("k5", "5", "0")]
                .into_iter()
                .map(|(n, v, o)| {
                    (
                        name(&format!("user:/test/{n}")),
                        Key::with_value(v).with_meta(ORDER_META, o),
                    )
                })
                .collect(),
            removals: BTreeSet::new(),
        };

        let result = desired.apply_to(&existing, &[], true);

        let order = |n: &str| result.get(&name(&format!("user:/test/{n}"))).unwrap().order();
        assert_eq!(result.len(), 5);
        assert_eq!(order("k3"), Some(0));
        assert_eq!(order("k2"), Some(1));
        assert_eq!(order("k1"), Some(2));
        assert_eq!(order("k5"), Some(3));
        assert_eq!(order("k4"), Some(5));
        assert_eq!(
            result.get(&name("user:/test/k2")).unwrap().value(),
            Some("n2")
        );
    }

    #[test]
    fn given_remove_entries_when_parsing_then_all_forms_accepted() {
        let entries = [
            json!("user:/"),
            json!({"spec:/": {"something": "else"}}),
            json!({"dir:/": {"recursive": true}}),
            json!({"path": "user:/x", "recursive": true}),
        ];
        let specs: Vec<RemoveSpec> = entries
            .iter()
            .map(|e| RemoveSpec::parse(e, None).unwrap())
            .collect();
        assert!(!specs[0].recursive);
        assert!(!specs[1].recursive);
        assert!(specs[2].recursive);
        assert_eq!(specs[3].path, name("user:/x"));
        assert!(specs[3].recursive);
    }

    #[test]
    fn given_removals_when_applying_then_single_and_recursive_honoured() {
        let current: KeySet = [
            "user:/test",
            "user:/test/1",
            "user:/test/2",
            "user:/else",
            "user:/else/1",
            "user:/else/2",
            "user:/nice",
        ]
        .into_iter()
        .map(|n| (name(n), Key::new()))
        .collect();
        let removes = vec![
            RemoveSpec {
                path: name("user:/else"),
                recursive: false,
            },
            RemoveSpec {
                path: name("user:/test"),
                recursive: true,
            },
        ];

        let result = BuiltTree::default().apply_to(&current, &removes, false);

        let names: Vec<String> = result.names().map(ToString::to_string).collect();
        assert_eq!(names, vec!["user:/else/1", "user:/else/2", "user:/nice"]);
    }

    #[test]
    fn given_removed_and_readded_key_when_applying_then_old_metadata_discarded() {
        let current: KeySet = [(
            name("user:/a"),
            Key::with_value("old").with_meta("check/type", "long"),
        )]
        .into_iter()
        .collect();
        let desired = TreeBuilder::build(&json!({"user:/a": "new"}), None, false).unwrap();
        let removes = vec![RemoveSpec {
            path: name("user:/a"),
            recursive: false,
        }];

        let result = desired.apply_to(&current, &removes, false);

        let key = result.get(&name("user:/a")).unwrap();
        assert_eq!(key.value(), Some("new"));
        assert_eq!(key.get_meta("check/type"), None);
    }
}
