use crate::config::TestingConfig;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("failed to access test mapping {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("invalid test mapping {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{file} is outside project root {root}")]
    OutsideProject { file: PathBuf, root: PathBuf },
}

/// Resolves which tests matter for a changed source file.
///
/// Resolution order, first hit wins:
/// 1. explicit mapping from the mapping file
/// 2. naming convention (`server/app.js` -> `tests/backend/app.test.js`), only if that file exists
/// 3. the category's whole test directory, or the whole suite
#[derive(Debug, Clone)]
pub struct TestImpactMapper {
    project_root: PathBuf,
    mapping_file: PathBuf,
    config: TestingConfig,
    mapping: BTreeMap<String, Vec<String>>,
}

impl TestImpactMapper {
    /// Load the mapping table; a missing file is an empty table.
    pub fn load(
        project_root: &Path,
        mapping_file: PathBuf,
        config: TestingConfig,
    ) -> Result<Self, MappingError> {
        let mapping = match fs::read_to_string(&mapping_file) {
            Ok(text) => serde_json::from_str(&text).map_err(|source| MappingError::Parse {
                path: mapping_file.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(MappingError::Io {
                    path: mapping_file,
                    source,
                });
            }
        };

        Ok(Self {
            project_root: project_root.to_path_buf(),
            mapping_file,
            config,
            mapping,
        })
    }

    /// Test targets for `file`, relative to the project root
    pub fn resolve(&self, file: &Path) -> Result<Vec<String>, MappingError> {
        let rel = self.relative_key(file)?;

        if let Some(targets) = self.mapping.get(&rel) {
            tracing::debug!(file = %rel, ?targets, "explicit test mapping");
            return Ok(targets.clone());
        }

        let rel_path = Path::new(&rel);
        let top = rel_path
            .components()
            .next()
            .and_then(|c| c.as_os_str().to_str())
            .unwrap_or("");
        let rule = self.config.categories.iter().find(|c| c.source_dir == top);

        if let Some(rule) = rule {
            let ext = rel_path.extension().and_then(|e| e.to_str());
            let stem = rel_path.file_stem().and_then(|s| s.to_str());
            if let Some(stem) = stem.filter(|_| rule.matches_extension(ext)) {
                let candidate = format!("{}/{}{}", rule.test_dir, stem, rule.test_suffix);
                if self.project_root.join(&candidate).exists() {
                    tracing::debug!(file = %rel, test = %candidate, "test found by convention");
                    return Ok(vec![candidate]);
                }
            }
            return Ok(vec![rule.test_dir.clone()]);
        }

        Ok(vec![self.config.suite_dir.clone()])
    }

    /// Add or replace the explicit mapping for `file` and persist the table.
    pub fn register(&mut self, file: &Path, targets: Vec<String>) -> Result<(), MappingError> {
        let rel = self.relative_key(file)?;
        self.mapping.insert(rel, targets);
        self.save()
    }

    #[cfg(test)]
    pub fn mapping(&self) -> &BTreeMap<String, Vec<String>> {
        &self.mapping
    }

    fn save(&self) -> Result<(), MappingError> {
        let io_err = |source| MappingError::Io {
            path: self.mapping_file.clone(),
            source,
        };
        if let Some(parent) = self.mapping_file.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(&self.mapping).map_err(|source| {
            MappingError::Parse {
                path: self.mapping_file.clone(),
                source,
            }
        })?;
        fs::write(&self.mapping_file, json).map_err(io_err)?;
        tracing::info!(path = %self.mapping_file.display(), "test mapping saved");
        Ok(())
    }

    /// Forward-slash path of `file` relative to the project root
    fn relative_key(&self, file: &Path) -> Result<String, MappingError> {
        let outside = || MappingError::OutsideProject {
            file: file.to_path_buf(),
            root: self.project_root.clone(),
        };

        let rel = if file.is_absolute() {
            let file = crate::surgery::normalize_path(file);
            let root = crate::surgery::normalize_path(&self.project_root);
            file.strip_prefix(&root).map_err(|_| outside())?.to_path_buf()
        } else {
            file.to_path_buf()
        };

        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(p) => parts.push(p.to_string_lossy().to_string()),
                Component::CurDir => {}
                _ => return Err(outside()),
            }
        }
        Ok(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        (dir, root)
    }

    fn mapper(root: &Path) -> TestImpactMapper {
        TestImpactMapper::load(
            root,
            root.join(".surgeon/test_mapping.json"),
            TestingConfig::default(),
        )
        .unwrap()
    }

    fn touch(root: &Path, rel: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "").unwrap();
        path
    }

    #[test]
    fn test_explicit_mapping_wins() {
        let (_dir, root) = project();
        let file = touch(&root, "server/app.js");
        touch(&root, "tests/backend/app.test.js");
        fs::create_dir_all(root.join(".surgeon")).unwrap();
        fs::write(
            root.join(".surgeon/test_mapping.json"),
            r#"{"server/app.js": ["tests/backend/api.test.js", "tests/backend/db.test.js"]}"#,
        )
        .unwrap();

        let targets = mapper(&root).resolve(&file).unwrap();
        assert_eq!(
            targets,
            vec!["tests/backend/api.test.js", "tests/backend/db.test.js"]
        );
    }

    #[test]
    fn test_convention_requires_existing_test() {
        let (_dir, root) = project();
        let file = touch(&root, "server/app.js");

        assert_eq!(mapper(&root).resolve(&file).unwrap(), vec!["tests/backend"]);

        touch(&root, "tests/backend/app.test.js");
        assert_eq!(
            mapper(&root).resolve(&file).unwrap(),
            vec!["tests/backend/app.test.js"]
        );
    }

    #[test]
    fn test_client_convention_uses_jsx_suffix() {
        let (_dir, root) = project();
        let file = touch(&root, "client/src/App.jsx");
        touch(&root, "tests/frontend/App.test.jsx");

        assert_eq!(
            mapper(&root).resolve(&file).unwrap(),
            vec!["tests/frontend/App.test.jsx"]
        );
    }

    #[test]
    fn test_extension_outside_rule_uses_category() {
        let (_dir, root) = project();
        let file = touch(&root, "scripts/deploy.sh");
        assert_eq!(mapper(&root).resolve(&file).unwrap(), vec!["tests/scripts"]);
    }

    #[test]
    fn test_uncategorized_file_runs_whole_suite() {
        let (_dir, root) = project();
        let file = touch(&root, "webhook-server.js");
        assert_eq!(mapper(&root).resolve(&file).unwrap(), vec!["tests"]);
    }

    #[test]
    fn test_relative_input_path() {
        let (_dir, root) = project();
        touch(&root, "tests/backend/db.test.js");
        let targets = mapper(&root).resolve(Path::new("./server/db.js")).unwrap();
        assert_eq!(targets, vec!["tests/backend/db.test.js"]);
    }

    #[test]
    fn test_file_outside_project() {
        let (_dir, root) = project();
        let other = TempDir::new().unwrap();
        let file = touch(other.path(), "x.js");

        let err = mapper(&root).resolve(&file).unwrap_err();
        assert!(matches!(err, MappingError::OutsideProject { .. }));
    }

    #[test]
    fn test_register_persists() {
        let (_dir, root) = project();
        let file = touch(&root, "server/app.js");

        let mut m = mapper(&root);
        m.register(&file, vec!["tests/backend/custom.test.js".into()])
            .unwrap();

        let reloaded = mapper(&root);
        assert_eq!(
            reloaded.mapping().get("server/app.js"),
            Some(&vec!["tests/backend/custom.test.js".to_string()])
        );
        assert_eq!(
            reloaded.resolve(&file).unwrap(),
            vec!["tests/backend/custom.test.js"]
        );
    }

    #[test]
    fn test_corrupt_mapping_file() {
        let (_dir, root) = project();
        fs::create_dir_all(root.join(".surgeon")).unwrap();
        fs::write(root.join(".surgeon/test_mapping.json"), "[1, 2").unwrap();

        let err = TestImpactMapper::load(
            &root,
            root.join(".surgeon/test_mapping.json"),
            TestingConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::Parse { .. }));
    }
}
