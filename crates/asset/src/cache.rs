//! File-memoized mesh subdivision.
//!
//! A [`MeshCache`] maps `(source mesh, subdivision level)` to the path
//! of a derived mesh artifact under a single injected storage root,
//! computing and persisting each artifact at most once. Artifacts are
//! named `<basename>_subdivision_<level>.<ext>` and never mutated after
//! creation.
//!
//! The resolver is meant for a single-process tool. Concurrent callers
//! racing on the same uncached key may both recompute; the write goes
//! through a temporary file and an atomic rename, so the last writer
//! wins and no torn artifact is ever observable at the final path.

use std::{
    fs,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::{mesh::MeshData, stl, subdivide};

/// Resolver failures, all fatal to the caller.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("mesh source not found: {path}")]
    SourceNotFound { path: PathBuf },
    #[error("unsupported mesh format: {path}")]
    UnsupportedMeshFormat {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to persist derived mesh: {path}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

/// Pure derived-artifact file name: `mesh.stl`, 2 -> `mesh_subdivision_2.stl`.
pub fn derived_file_name(source: &Path, level: u32) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match source.extension() {
        Some(ext) => PathBuf::from(format!(
            "{stem}_subdivision_{level}.{}",
            ext.to_string_lossy()
        )),
        None => PathBuf::from(format!("{stem}_subdivision_{level}")),
    }
}

/// Disk-backed memoization of the subdivision pass, keyed by
/// `(source path, level)`.
#[derive(Clone, Debug)]
pub struct MeshCache {
    root: PathBuf,
}

impl MeshCache {
    /// Cache rooted at an explicit directory. Both the existence check
    /// and the write target this root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache rooted next to the source file, so artifacts land as its
    /// siblings.
    pub fn sibling_of(source: &Path) -> Self {
        let root = source
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path of the derived artifact for `(source, level)`.
    pub fn derived_path(&self, source: &Path, level: u32) -> PathBuf {
        self.root.join(derived_file_name(source, level))
    }

    /// Resolve `(source, level)` to a usable mesh file path, running
    /// Loop subdivision only on a cache miss.
    pub fn resolve(&self, source: &Path, level: u32) -> Result<PathBuf, CacheError> {
        self.resolve_with(source, level, |mesh| subdivide::subdivide(mesh, level))
    }

    /// Same flow as [`resolve`](Self::resolve) with the expensive
    /// computation injected. Lets tests count invocations.
    pub fn resolve_with<F>(
        &self,
        source: &Path,
        level: u32,
        compute: F,
    ) -> Result<PathBuf, CacheError>
    where
        F: FnOnce(MeshData) -> MeshData,
    {
        if !source.is_file() {
            return Err(CacheError::SourceNotFound {
                path: source.to_path_buf(),
            });
        }
        if level == 0 {
            return Ok(source.to_path_buf());
        }

        let derived = self.derived_path(source, level);
        if derived.is_file() {
            log::debug!("Subdivision cache hit: {}", derived.display());
            return Ok(derived);
        }

        log::info!(
            "Subdivision cache miss: {} (level {}), computing",
            derived.display(),
            level
        );
        let mesh = stl::load_stl_from_path(source).map_err(|e| CacheError::UnsupportedMeshFormat {
            path: source.to_path_buf(),
            source: e,
        })?;
        let refined = compute(mesh);
        self.persist(&refined, &derived)?;
        Ok(derived)
    }

    /// Write through a temporary sibling and rename into place, so a
    /// failed write never leaves a readable partial artifact.
    fn persist(&self, mesh: &MeshData, derived: &Path) -> Result<(), CacheError> {
        let write_failure = |source: anyhow::Error| CacheError::WriteFailure {
            path: derived.to_path_buf(),
            source,
        };

        fs::create_dir_all(&self.root)
            .map_err(|e| write_failure(anyhow::Error::new(e).context("creating cache root")))?;

        let mut tmp = derived.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        if let Err(e) = stl::save_stl_to_path(mesh, &tmp) {
            let _ = fs::remove_file(&tmp);
            return Err(write_failure(e));
        }
        fs::rename(&tmp, derived).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            write_failure(anyhow::Error::new(e).context("renaming artifact into place"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stl::load_stl_from_path;
    use std::fs;

    const ASCII_TETRA: &str = r#"solid tetra
        facet normal 0 0 -1
          outer loop
            vertex 0 0 0
            vertex 1 0 0
            vertex 0 1 0
          endloop
        endfacet
        facet normal 0 -1 0
          outer loop
            vertex 0 0 0
            vertex 0 0 1
            vertex 1 0 0
          endloop
        endfacet
        facet normal -1 0 0
          outer loop
            vertex 0 0 0
            vertex 0 1 0
            vertex 0 0 1
          endloop
        endfacet
        facet normal 1 1 1
          outer loop
            vertex 1 0 0
            vertex 0 0 1
            vertex 0 1 0
          endloop
        endfacet
    endsolid tetra
    "#;

    fn write_tetra(dir: &Path) -> PathBuf {
        let path = dir.join("tetra.stl");
        fs::write(&path, ASCII_TETRA).expect("write source mesh");
        path
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn derived_name_is_pure() {
        assert_eq!(
            derived_file_name(Path::new("mesh.stl"), 2),
            PathBuf::from("mesh_subdivision_2.stl")
        );
        assert_eq!(
            derived_file_name(Path::new("dir/zortrax_voronoi_sphere.stl"), 1),
            PathBuf::from("zortrax_voronoi_sphere_subdivision_1.stl")
        );
    }

    #[test]
    fn level_zero_returns_source_and_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = write_tetra(dir.path());
        let cache = MeshCache::new(dir.path());

        let resolved = cache.resolve(&source, 0).expect("resolve level 0");
        assert_eq!(resolved, source);
        assert_eq!(dir_entries(dir.path()), vec!["tetra.stl"]);
    }

    #[test]
    fn missing_source_fails_without_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = MeshCache::new(dir.path());
        let missing = dir.path().join("nope.stl");

        for level in [0, 2] {
            match cache.resolve(&missing, level) {
                Err(CacheError::SourceNotFound { path }) => assert_eq!(path, missing),
                other => panic!("expected SourceNotFound, got {other:?}"),
            }
        }
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[test]
    fn miss_computes_once_then_hits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = write_tetra(dir.path());
        let cache = MeshCache::new(dir.path());

        let mut computed = false;
        let first = cache
            .resolve_with(&source, 1, |mesh| {
                computed = true;
                subdivide::subdivide(mesh, 1)
            })
            .expect("first resolve");
        assert!(computed);
        assert_eq!(first, dir.path().join("tetra_subdivision_1.stl"));
        assert!(first.is_file());

        let second = cache
            .resolve_with(&source, 1, |_| panic!("cache hit must not recompute"))
            .expect("second resolve");
        assert_eq!(second, first);
    }

    #[test]
    fn distinct_levels_yield_distinct_artifacts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = write_tetra(dir.path());
        let cache = MeshCache::new(dir.path());

        let one = cache.resolve(&source, 1).expect("level 1");
        let two = cache.resolve(&source, 2).expect("level 2");
        assert_ne!(one, two);
        assert_eq!(
            dir_entries(dir.path()),
            vec![
                "tetra.stl",
                "tetra_subdivision_1.stl",
                "tetra_subdivision_2.stl"
            ]
        );
    }

    #[test]
    fn artifact_holds_the_refined_mesh() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = write_tetra(dir.path());
        let cache = MeshCache::new(dir.path());

        let derived = cache.resolve(&source, 1).expect("resolve");
        let refined = load_stl_from_path(&derived).expect("parse artifact");
        assert_eq!(refined.triangle_count(), 16);
        // No temporary file left behind.
        assert!(!dir.path().join("tetra_subdivision_1.stl.tmp").exists());
    }

    #[test]
    fn unparseable_source_is_unsupported_format() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("garbage.stl");
        fs::write(&source, b"solid facet but nothing else").expect("write garbage");
        let cache = MeshCache::new(dir.path());

        match cache.resolve(&source, 1) {
            Err(CacheError::UnsupportedMeshFormat { path, .. }) => assert_eq!(path, source),
            other => panic!("expected UnsupportedMeshFormat, got {other:?}"),
        }
    }

    #[test]
    fn unwritable_root_is_write_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = write_tetra(dir.path());
        // A plain file where the cache root should be.
        let blocked = dir.path().join("root-is-a-file");
        fs::write(&blocked, b"").expect("write blocker");
        let cache = MeshCache::new(&blocked);

        match cache.resolve(&source, 1) {
            Err(CacheError::WriteFailure { .. }) => {}
            other => panic!("expected WriteFailure, got {other:?}"),
        }
    }

    #[test]
    fn sibling_root_lands_next_to_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = write_tetra(dir.path());
        let cache = MeshCache::sibling_of(&source);
        assert_eq!(cache.root(), dir.path());
        assert_eq!(
            cache.derived_path(&source, 3),
            dir.path().join("tetra_subdivision_3.stl")
        );
    }
}
