use indexmap::IndexMap;

use super::submission::{Scalar, Submission};

/// Pool key: a map key, or `None` for the catch-all pool.
pub type PoolKey = Option<String>;

/// Valid scalar samples grouped by the map key they were found under.
///
/// The catch-all pool (`None`) holds every scalar seen anywhere, in
/// depth-first order, and always exists even when empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuePool {
    pools: IndexMap<PoolKey, Vec<Scalar>>,
}

impl Default for ValuePool {
    fn default() -> Self {
        let mut pools = IndexMap::new();
        pools.insert(None, Vec::new());
        Self { pools }
    }
}

impl ValuePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects the samples of every submission, in order.
    pub fn collect(submissions: &[Submission]) -> Self {
        let mut pool = Self::new();
        for submission in submissions {
            pool.add_submission(submission);
        }
        pool
    }

    pub fn add_submission(&mut self, submission: &Submission) {
        self.walk(submission, None);
    }

    fn walk(&mut self, node: &Submission, key: Option<&str>) {
        match node {
            Submission::Map(map) => {
                for (k, v) in map {
                    self.walk(v, Some(k.as_str()));
                }
            }
            Submission::List(items) => {
                for item in items {
                    self.walk(item, key);
                }
            }
            Submission::Scalar(value) => {
                if let Some(k) = key {
                    self.pools
                        .entry(Some(k.to_string()))
                        .or_default()
                        .push(value.clone());
                }
                self.pools.entry(None).or_default().push(value.clone());
            }
        }
    }

    pub fn get(&self, key: &PoolKey) -> Option<&[Scalar]> {
        self.pools.get(key).map(Vec::as_slice)
    }

    pub fn catch_all(&self) -> &[Scalar] {
        self.get(&None).unwrap_or(&[])
    }

    /// Samples to mutate for `key`; empty pools borrow the catch-all samples.
    pub fn samples_for(&self, key: &PoolKey) -> &[Scalar] {
        match self.pools.get(key) {
            Some(samples) if !samples.is_empty() => samples,
            _ => self.catch_all(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &PoolKey> {
        self.pools.keys()
    }

    /// Number of pools, the catch-all included.
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catch_all().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::submission::SubmissionType;

    fn num(n: i64) -> Scalar {
        Scalar::Number(n.into())
    }

    fn key(k: &str) -> PoolKey {
        Some(k.to_string())
    }

    #[test]
    fn test_collect_nested_maps() {
        let submission = Submission::parse(
            r#"{"foo": {"bar": 1, "baz": 2}, "top": 1}"#,
            SubmissionType::Json,
        )
        .unwrap();
        let pool = ValuePool::collect(&[submission]);

        assert_eq!(pool.len(), 4);
        assert_eq!(pool.get(&key("bar")).unwrap(), &[num(1)]);
        assert_eq!(pool.get(&key("baz")).unwrap(), &[num(2)]);
        assert_eq!(pool.get(&key("top")).unwrap(), &[num(1)]);
        assert_eq!(pool.catch_all(), &[num(1), num(2), num(1)]);
        assert!(pool.get(&key("foo")).is_none());
    }

    #[test]
    fn test_list_elements_keep_owning_key() {
        let submission = Submission::parse(
            r#"{"items": ["a", "b", {"inner": null}]}"#,
            SubmissionType::Json,
        )
        .unwrap();
        let pool = ValuePool::collect(&[submission]);

        assert_eq!(
            pool.get(&key("items")).unwrap(),
            &[Scalar::String("a".into()), Scalar::String("b".into())]
        );
        assert_eq!(pool.get(&key("inner")).unwrap(), &[Scalar::Null]);
        assert_eq!(pool.catch_all().len(), 3);
    }

    #[test]
    fn test_top_level_scalar_goes_to_catch_all_only() {
        let pool = ValuePool::collect(&[Submission::string("lonely")]);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.catch_all(), &[Scalar::String("lonely".into())]);
    }

    #[test]
    fn test_collect_across_submissions() {
        let a = Submission::parse("id=1", SubmissionType::QueryParams).unwrap();
        let b = Submission::parse("id=2;name=x", SubmissionType::QueryParams).unwrap();
        let pool = ValuePool::collect(&[a, b]);

        assert_eq!(
            pool.get(&key("id")).unwrap(),
            &[Scalar::String("1".into()), Scalar::String("2".into())]
        );
        assert_eq!(pool.catch_all().len(), 3);
    }

    #[test]
    fn test_samples_for_falls_back_to_catch_all() {
        let submission = Submission::parse(r#"{"a": 1}"#, SubmissionType::Json).unwrap();
        let pool = ValuePool::collect(&[submission]);

        assert_eq!(pool.samples_for(&key("a")), &[num(1)]);
        assert_eq!(pool.samples_for(&key("missing")), &[num(1)]);
    }

    #[test]
    fn test_empty_submission_has_empty_catch_all() {
        let pool = ValuePool::collect(&[Submission::parse("{}", SubmissionType::Json).unwrap()]);
        assert_eq!(pool.len(), 1);
        assert!(pool.is_empty());
    }
}
