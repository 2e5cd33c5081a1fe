//! Key names and keys: the atoms of the configuration tree.
//!
//! A key name is a namespace plus a sequence of segments. Segments are either
//! literal names or array indices (`#0`, `#1`, ...). The canonical string form
//! escapes `/` and `\` inside literal names, and prefixes a literal name that
//! looks like an array index with `\`, so `user:/list/#0` (index) and
//! `user:/list/\#0` (literal name "#0") never collide.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::error::{DomainError, DomainResult};

/// Metadata carrying the relative position of a key when order is preserved.
pub const ORDER_META: &str = "order";

/// Metadata on an array parent holding the last index (`#N`).
pub const ARRAY_META: &str = "array";

/// Top-level partition of the key hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Namespace {
    Spec,
    Proc,
    Dir,
    User,
    System,
    Default,
}

impl Namespace {
    pub const ALL: [Namespace; 6] = [
        Namespace::Spec,
        Namespace::Proc,
        Namespace::Dir,
        Namespace::User,
        Namespace::System,
        Namespace::Default,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Spec => "spec",
            Namespace::Proc => "proc",
            Namespace::Dir => "dir",
            Namespace::User => "user",
            Namespace::System => "system",
            Namespace::Default => "default",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ns| ns.as_str() == name)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One path segment.
///
/// Indices sort before literal names and compare numerically, so `#2` sorts
/// before `#10`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Segment {
    Index(usize),
    Name(String),
}

impl Segment {
    pub fn name(name: impl Into<String>) -> Self {
        Segment::Name(name.into())
    }

    pub fn is_index(&self) -> bool {
        matches!(self, Segment::Index(_))
    }

    /// Parse one escaped segment of a key path. `#N` becomes an index.
    fn parse(raw: &str) -> Self {
        if let Some(index) = raw.strip_prefix('#').and_then(parse_index) {
            return Segment::Index(index);
        }
        Segment::Name(unescape(raw))
    }

    /// Segment taken literally (desired-state child names).
    fn literal(raw: &str) -> Self {
        Segment::Name(unescape(raw))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Index(i) => write!(f, "#{i}"),
            Segment::Name(name) => {
                if name.strip_prefix('#').and_then(parse_index).is_some() {
                    f.write_str("\\")?;
                }
                for c in name.chars() {
                    match c {
                        '\\' => f.write_str("\\\\")?,
                        '/' => f.write_str("\\/")?,
                        c => write!(f, "{c}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

/// Digits of an array index: no sign, no leading zeros.
pub(crate) fn parse_index(digits: &str) -> Option<usize> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    digits.parse().ok()
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            out.push(chars.next().unwrap_or('\\'));
        } else {
            out.push(c);
        }
    }
    out
}

/// Split on unescaped `/`, dropping empty parts.
fn split_escaped(path: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in path.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '/' => {
                parts.push(&path[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&path[start..]);
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

/// Absolute hierarchical key name.
///
/// Ordering is namespace first, then segment-wise; every descendant of a name
/// sorts directly after it, which keeps subtrees contiguous in ordered maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyName {
    namespace: Namespace,
    segments: Vec<Segment>,
}

impl KeyName {
    pub fn new(namespace: Namespace, segments: Vec<Segment>) -> Self {
        Self {
            namespace,
            segments,
        }
    }

    pub fn root(namespace: Namespace) -> Self {
        Self::new(namespace, Vec::new())
    }

    /// Resolve a name given in a request.
    ///
    /// Absolute names (`user:/a`) and bare namespace words (`system`) stand on
    /// their own; anything else is a path relative to `base`.
    pub fn resolve(name: &str, base: Option<&KeyName>) -> DomainResult<Self> {
        let trimmed = name.trim();
        if let Some(ns) = Namespace::from_name(trimmed) {
            return Ok(Self::root(ns));
        }
        if trimmed.contains(":/") || trimmed.starts_with('/') {
            return trimmed.parse();
        }
        match base {
            Some(base) => Ok(base.join_path(trimmed)),
            None => Err(DomainError::validation(format!(
                "relative key name '{trimmed}' needs a mountpoint"
            ))),
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn child(&self, segment: Segment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self::new(self.namespace, segments)
    }

    /// Append a literal name; `/` still separates levels but `#N` stays a name.
    pub fn join_literal(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(split_escaped(name).into_iter().map(Segment::literal));
        Self::new(self.namespace, segments)
    }

    /// Append a key path in canonical syntax; `#N` parts become indices.
    pub fn join_path(&self, path: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(split_escaped(path).into_iter().map(Segment::parse));
        Self::new(self.namespace, segments)
    }

    pub fn join_segments(&self, tail: &[Segment]) -> Self {
        let mut segments = self.segments.clone();
        segments.extend_from_slice(tail);
        Self::new(self.namespace, segments)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(self.truncate(self.segments.len() - 1))
    }

    pub fn base_name(&self) -> Option<&Segment> {
        self.segments.last()
    }

    pub fn truncate(&self, depth: usize) -> Self {
        Self::new(
            self.namespace,
            self.segments[..depth.min(self.segments.len())].to_vec(),
        )
    }

    pub fn is_array_element(&self) -> bool {
        self.segments.last().is_some_and(Segment::is_index)
    }

    pub fn is_below_or_same(&self, other: &KeyName) -> bool {
        self.namespace == other.namespace && self.segments.starts_with(&other.segments)
    }

    pub fn is_below(&self, other: &KeyName) -> bool {
        self.is_below_or_same(other) && self.segments.len() > other.segments.len()
    }

    pub fn strip_prefix(&self, base: &KeyName) -> Option<&[Segment]> {
        if self.is_below_or_same(base) {
            Some(&self.segments[base.segments.len()..])
        } else {
            None
        }
    }

    /// Relative path below `base` in canonical syntax (empty for `base` itself).
    pub fn relative_to(&self, base: &KeyName) -> Option<String> {
        self.strip_prefix(base).map(|tail| {
            tail.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("/")
        })
    }
}

impl FromStr for KeyName {
    type Err = DomainError;

    fn from_str(s: &str) -> DomainResult<Self> {
        let s = s.trim();
        if s.starts_with('/') {
            return Err(DomainError::validation(format!(
                "cascading key name '{s}' is not supported, \
                 use a namespace such as user:/ or system:/"
            )));
        }
        let (ns, rest) = s
            .split_once(":/")
            .ok_or_else(|| DomainError::validation(format!("key name '{s}' has no namespace")))?;
        let namespace = Namespace::from_name(ns)
            .ok_or_else(|| DomainError::validation(format!("unknown namespace '{ns}' in '{s}'")))?;
        let segments = split_escaped(rest).into_iter().map(Segment::parse).collect();
        Ok(Self::new(namespace, segments))
    }
}

impl fmt::Display for KeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:/", self.namespace)?;
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

/// Equality policy between keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyCompare {
    /// When false the `order` metadata is ignored.
    pub keep_order: bool,
}

impl KeyCompare {
    pub fn new(keep_order: bool) -> Self {
        Self { keep_order }
    }
}

/// Value and metadata of one key. The name lives in the owning [`KeySet`].
///
/// [`KeySet`]: crate::domain::KeySet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Key {
    value: Option<String>,
    meta: BTreeMap<String, String>,
}

impl Key {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            meta: BTreeMap::new(),
        }
    }

    pub fn from_parts(value: Option<String>, meta: BTreeMap<String, String>) -> Self {
        Self { value, meta }
    }

    /// Builder-style metadata setter.
    pub fn with_meta(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(name.into(), value.into());
        self
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn set_value(&mut self, value: impl Into<String>) {
        self.value = Some(value.into());
    }

    pub fn meta(&self) -> &BTreeMap<String, String> {
        &self.meta
    }

    pub fn get_meta(&self, name: &str) -> Option<&str> {
        self.meta.get(name).map(String::as_str)
    }

    pub fn set_meta(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.meta.insert(name.into(), value.into());
    }

    pub fn remove_meta(&mut self, name: &str) -> Option<String> {
        self.meta.remove(name)
    }

    pub fn order(&self) -> Option<u64> {
        self.get_meta(ORDER_META).and_then(|o| o.parse().ok())
    }

    pub fn same_as(&self, other: &Key, compare: KeyCompare) -> bool {
        if self.value != other.value {
            return false;
        }
        if compare.keep_order {
            return self.meta == other.meta;
        }
        let without_order = |k: &'_ Key| {
            k.meta
                .iter()
                .filter(|(name, _)| name.as_str() != ORDER_META)
                .map(|(n, v)| (n.clone(), v.clone()))
                .collect::<Vec<_>>()
        };
        without_order(self) == without_order(other)
    }
}
