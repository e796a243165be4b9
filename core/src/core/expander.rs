use std::fmt;
use std::iter;

use indexmap::IndexMap;

use super::submission::{bytes_to_text, Scalar, Submission};
use crate::oracle::RoundMutations;

/// One step of a path into a submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Location of a node, rendered like `user.items[0]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    fn key(&self, key: &str) -> Self {
        let mut next = self.0.clone();
        next.push(PathSegment::Key(key.to_string()));
        Self(next)
    }

    fn index(&self, index: usize) -> Self {
        let mut next = self.0.clone();
        next.push(PathSegment::Index(index));
        Self(next)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(k) if i == 0 => write!(f, "{}", k)?,
                PathSegment::Key(k) => write!(f, ".{}", k)?,
                PathSegment::Index(idx) => write!(f, "[{}]", idx)?,
            }
        }
        Ok(())
    }
}

/// Which part of the submission an injected variant replaced.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InjectedField {
    /// The map key at this path was renamed, its value kept
    KeyName(FieldPath),
    /// The value at this path was replaced
    Value(FieldPath),
}

impl fmt::Display for InjectedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InjectedField::KeyName(path) => write!(f, "key: {}", path),
            InjectedField::Value(path) => write!(f, "value: {}", path),
        }
    }
}

/// A copy of the original submission with exactly one field replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct InjectedSubmission {
    pub submission: Submission,
    pub field: InjectedField,
    pub round: usize,
}

/// Enumerates every single-field substitution of a submission for one round
/// of mutations.
///
/// Each map key yields one rename variant (the new name always comes from
/// the catch-all mutation) and every reachable leaf yields one value
/// variant. Two mutations are never combined in a variant.
///
/// Two rename cases break the one-field-differs rule. A new name equal to a
/// sibling key takes over that sibling's slot and drops its value. A new
/// name equal to the current key leaves the variant identical to the
/// original.
pub struct AnomalyExpander<'a> {
    original: &'a Submission,
    mutations: &'a RoundMutations,
}

impl<'a> AnomalyExpander<'a> {
    pub fn new(original: &'a Submission, mutations: &'a RoundMutations) -> Self {
        Self { original, mutations }
    }

    /// Starts a fresh lazy pass over the variants.
    pub fn iter(&self) -> Variants<'a> {
        Variants {
            round: self.mutations.round(),
            inner: expand_node(self.original, None, FieldPath::root(), self.mutations),
        }
    }

    /// Number of variants `iter` yields, without building them.
    pub fn variant_count(submission: &Submission) -> usize {
        match submission {
            Submission::Map(map) => map.len() + map.values().map(Self::variant_count).sum::<usize>(),
            Submission::List(items) => items.iter().map(Self::variant_count).sum(),
            Submission::Scalar(_) => 1,
        }
    }
}

impl<'a> IntoIterator for &AnomalyExpander<'a> {
    type Item = InjectedSubmission;
    type IntoIter = Variants<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

type VariantIter<'a> = Box<dyn Iterator<Item = (Submission, InjectedField)> + 'a>;

/// Lazy stream of injected submissions.
pub struct Variants<'a> {
    round: usize,
    inner: VariantIter<'a>,
}

impl Iterator for Variants<'_> {
    type Item = InjectedSubmission;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(submission, field)| InjectedSubmission {
            submission,
            field,
            round: self.round,
        })
    }
}

fn expand_node<'a>(
    node: &'a Submission,
    key: Option<&'a str>,
    path: FieldPath,
    mutations: &'a RoundMutations,
) -> VariantIter<'a> {
    match node {
        Submission::Map(map) => {
            let rename_path = path.clone();
            let renames = map.keys().enumerate().map(move |(idx, k)| {
                let new_key = bytes_to_text(mutations.catch_all());
                (
                    Submission::Map(rename_key(map, idx, new_key)),
                    InjectedField::KeyName(rename_path.key(k)),
                )
            });

            let values = map.iter().enumerate().flat_map(move |(idx, (k, v))| {
                expand_node(v, Some(k.as_str()), path.key(k), mutations).map(move |(sub, field)| {
                    let mut copy = map.clone();
                    copy[idx] = sub;
                    (Submission::Map(copy), field)
                })
            });

            Box::new(renames.chain(values))
        }
        Submission::List(items) => Box::new(items.iter().enumerate().flat_map(move |(idx, item)| {
            expand_node(item, key, path.index(idx), mutations).map(move |(sub, field)| {
                let mut copy = items.clone();
                copy[idx] = sub;
                (Submission::List(copy), field)
            })
        })),
        Submission::Scalar(_) => Box::new(iter::once((
            Submission::Scalar(Scalar::Bytes(mutations.for_key(key).to_vec())),
            InjectedField::Value(path),
        ))),
    }
}

/// Renames the key at `idx` in place. A new name equal to a sibling key
/// takes over that sibling's slot with the renamed value, keeping keys unique.
fn rename_key(map: &IndexMap<String, Submission>, idx: usize, new_key: String) -> IndexMap<String, Submission> {
    let collision = map.get_index_of(&new_key).filter(|&i| i != idx);
    let mut renamed = IndexMap::with_capacity(map.len());
    for (i, (k, v)) in map.iter().enumerate() {
        if i == idx {
            if collision.is_none() {
                renamed.insert(new_key.clone(), v.clone());
            }
        } else if Some(i) == collision {
            renamed.insert(k.clone(), map[idx].clone());
        } else {
            renamed.insert(k.clone(), v.clone());
        }
    }
    renamed
}
