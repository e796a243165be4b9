use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use log::debug;
use tokio::fs;
use tokio::process::Command;

use super::{MutationOracle, MutationSet};
use crate::core::collector::ValuePool;
use crate::core::submission::Scalar;
use crate::errors::{FuzzError, Result};
use crate::utils;

/// Mutation oracle backed by the Radamsa binary.
///
/// Radamsa works on files: each sample is written to its own file, the
/// binary runs once per pool key, and the numbered outputs are read back.
#[derive(Debug, Clone)]
pub struct RadamsaOracle {
    path: PathBuf,
}

impl RadamsaOracle {
    /// Checks that the binary runs before any target is touched.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let output = Command::new(&path)
            .arg("--help")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| oracle_error(&path, e.to_string()))?;
        if !output.status.success() {
            return Err(oracle_error(&path, format!("--help exited with {}", output.status)));
        }
        debug!("Radamsa found at {}", path.display());
        Ok(Self { path })
    }

    /// Resolves `radamsa` from ./tools, the working directory or PATH.
    pub async fn discover() -> Result<Self> {
        match utils::get_binary_path("radamsa") {
            Some(path) => Self::new(path).await,
            None => Err(oracle_error(Path::new("radamsa"), "binary not found".to_string())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn fuzz_samples(&self, samples: &[Scalar], count: usize) -> Result<Vec<Vec<u8>>> {
        let valid_dir = tempfile::tempdir()?;
        let fuzz_dir = tempfile::tempdir()?;

        if samples.is_empty() {
            // radamsa needs at least one input
            fs::write(valid_dir.path().join("0.case"), b"").await?;
        }
        for (i, sample) in samples.iter().enumerate() {
            fs::write(valid_dir.path().join(format!("{}.case", i)), sample.to_bytes()).await?;
        }

        let pattern = fuzz_dir.path().join("%n.fuzz");
        let output = Command::new(&self.path)
            .arg("-o")
            .arg(&pattern)
            .arg("-n")
            .arg(count.to_string())
            .arg("-r")
            .arg(valid_dir.path())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| oracle_error(&self.path, e.to_string()))?;
        if !output.status.success() {
            return Err(oracle_error(
                &self.path,
                format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        let mut outputs: Vec<(u64, PathBuf)> = Vec::new();
        let mut entries = fs::read_dir(fuzz_dir.path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let index = path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse::<u64>().ok());
            if let Some(index) = index {
                outputs.push((index, path));
            }
        }
        outputs.sort_by_key(|(index, _)| *index);

        if outputs.len() != count {
            return Err(oracle_error(
                &self.path,
                format!("expected {} output file(s), found {}", count, outputs.len()),
            ));
        }

        let mut mutations = Vec::with_capacity(count);
        for (_, path) in outputs {
            mutations.push(fs::read(path).await?);
        }
        Ok(mutations)
    }
}

#[async_trait]
impl MutationOracle for RadamsaOracle {
    async fn mutate(&self, pool: &ValuePool, count: usize) -> Result<MutationSet> {
        let mut set = MutationSet::new(count);
        for key in pool.keys() {
            let mutations = if count == 0 {
                Vec::new()
            } else {
                self.fuzz_samples(pool.samples_for(key), count).await?
            };
            debug!("{} mutation(s) for key {:?}", mutations.len(), key);
            set.insert(key.clone(), mutations)?;
        }
        Ok(set)
    }
}

fn oracle_error(path: &Path, reason: String) -> FuzzError {
    FuzzError::MutationOracle {
        path: path.display().to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use crate::core::submission::{Submission, SubmissionType};

    #[tokio::test]
    async fn test_missing_binary_names_the_path() {
        let err = RadamsaOracle::new("/nonexistent/radamsa").await.unwrap_err();
        match err {
            FuzzError::MutationOracle { path, .. } => assert_eq!(path, "/nonexistent/radamsa"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[cfg(unix)]
    fn fake_radamsa(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = r#"#!/bin/sh
if [ "$1" = "--help" ]; then echo "usage: radamsa"; exit 0; fi
out="$2"; n="$4"; in="$6"
first=$(ls "$in" | head -n 1)
i=1
while [ "$i" -le "$n" ]; do
  f=$(echo "$out" | sed "s/%n/$i/")
  printf '%s-%s' "$(cat "$in/$first")" "$i" > "$f"
  i=$((i + 1))
done
"#;
        let path = dir.join("radamsa");
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_mutations_per_key_in_output_order() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = RadamsaOracle::new(fake_radamsa(dir.path())).await.unwrap();

        let submission = Submission::parse(r#"{"id": "abc"}"#, SubmissionType::Json).unwrap();
        let pool = ValuePool::collect(&[submission]);
        let set = oracle.mutate(&pool, 12).await.unwrap();

        let id = set.get(&Some("id".to_string())).unwrap();
        assert_eq!(id.len(), 12);
        assert_eq!(id[0], b"abc-1");
        assert_eq!(id[1], b"abc-2");
        assert_eq!(id[11], b"abc-12");
        assert_eq!(set.get(&None).unwrap().len(), 12);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_binary_is_an_oracle_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("radamsa");
        fs::write(&path, "#!/bin/sh\n[ \"$1\" = \"--help\" ] && exit 0\nexit 3\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

        let oracle = RadamsaOracle::new(&path).await.unwrap();
        let pool = ValuePool::collect(&[Submission::string("x")]);
        let err = oracle.mutate(&pool, 2).await.unwrap_err();
        assert!(matches!(err, FuzzError::MutationOracle { .. }));
    }
}
