//! Staging area: the per-run workspace on disk and the artifacts staged inside it.
//!
//! A [`RunWorkspace`] is a freshly created, uuid-named directory under a staging root. It owns
//! every [`StagingArtifact`] and [`UploadPayload`] produced during the run and is removed when
//! the run ends, either through [`RunWorkspace::destroy`] or, failing that, on drop.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::{SourceHandle, STAGING_PREFIX};
use crate::contract::Extractor;
use crate::error::ReloadError;

#[derive(Debug)]
pub struct RunWorkspace {
    id: String,
    path: PathBuf,
    destroyed: bool,
}

/// A local package holding one source's extracted rows and schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingArtifact {
    pub package_name: String,
    pub package_dir: PathBuf,
}

/// A compressed copy of a [`StagingArtifact`], ready for upload.
///
/// The archive's single top-level folder is `upload_name`, which is freshly generated for every
/// payload and never equals the package name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPayload {
    pub upload_name: String,
    pub zip_path: PathBuf,
}

impl RunWorkspace {
    /// Creates `<root>/<uuid>`. `root` is created if missing.
    pub fn create(root: &Path) -> Result<Self, ReloadError> {
        let id = Uuid::new_v4().to_string();
        let path = root.join(&id);
        fs::create_dir_all(root)
            .and_then(|_| fs::create_dir(&path))
            .map_err(|e| {
                tracing::error!(error = ?e, path = %path.display(), "Failed to create run workspace");
                ReloadError::Config(format!(
                    "could not create staging workspace {}: {e}",
                    path.display()
                ))
            })?;
        tracing::debug!(path = %path.display(), "Created run workspace");
        Ok(Self {
            id,
            path,
            destroyed: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Extract `source` into a new package named `package_name` inside the workspace.
    pub async fn package<X>(
        &self,
        extractor: &X,
        source: &SourceHandle,
        package_name: &str,
        table_name: &str,
    ) -> Result<StagingArtifact, ReloadError>
    where
        X: Extractor + ?Sized,
    {
        let package_dir = self.path.join(package_name);
        if package_dir.exists() {
            return Err(ReloadError::Extraction(format!(
                "staging package {} already exists",
                package_dir.display()
            )));
        }

        extractor
            .extract(source, &package_dir, table_name)
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, source = %source.path(), "Extraction failed");
                ReloadError::Extraction(format!("could not copy {}: {e}", source.path()))
            })?;

        if !package_dir.is_dir() {
            return Err(ReloadError::Extraction(format!(
                "extraction of {} produced no package at {}",
                source.path(),
                package_dir.display()
            )));
        }

        Ok(StagingArtifact {
            package_name: package_name.to_string(),
            package_dir,
        })
    }

    /// Zip `artifact` under a freshly generated folder name.
    pub fn compress(&self, artifact: &StagingArtifact) -> Result<UploadPayload, ReloadError> {
        let upload_name = format!("{STAGING_PREFIX}{}.gdb", Uuid::new_v4());
        let zip_path = self.path.join(format!("{upload_name}.zip"));

        write_zip(&artifact.package_dir, &upload_name, &zip_path).map_err(|e| {
            tracing::error!(error = ?e, zip = %zip_path.display(), "Failed to compress staging package");
            ReloadError::Extraction(format!(
                "could not compress {}: {e}",
                artifact.package_dir.display()
            ))
        })?;

        tracing::debug!(
            package = %artifact.package_name,
            upload_name = %upload_name,
            zip = %zip_path.display(),
            "Compressed staging package"
        );
        Ok(UploadPayload {
            upload_name,
            zip_path,
        })
    }

    /// Recursively remove the workspace and everything staged in it.
    pub fn destroy(mut self) -> Result<(), ReloadError> {
        self.destroyed = true;
        fs::remove_dir_all(&self.path).map_err(|e| {
            ReloadError::Cleanup(format!(
                "could not remove staging workspace {}: {e}",
                self.path.display()
            ))
        })
    }
}

impl Drop for RunWorkspace {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.path) {
            tracing::warn!(error = ?e, path = %self.path.display(), "Run workspace left behind");
        }
    }
}

impl StagingArtifact {
    pub fn discard(&self) -> io::Result<()> {
        fs::remove_dir_all(&self.package_dir)
    }
}

impl UploadPayload {
    pub fn discard(&self) -> io::Result<()> {
        fs::remove_file(&self.zip_path)
    }
}

fn write_zip(package_dir: &Path, folder: &str, zip_path: &Path) -> io::Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(zip_path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.add_directory(format!("{folder}/"), options)
        .map_err(io::Error::other)?;

    for entry in WalkDir::new(package_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(package_dir)
            .map_err(io::Error::other)?
            .to_string_lossy()
            .replace('\\', "/");
        let name = format!("{folder}/{relative}");

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{name}/"), options)
                .map_err(io::Error::other)?;
        } else {
            zip.start_file(name, options).map_err(io::Error::other)?;
            let mut source = File::open(entry.path())?;
            io::copy(&mut source, &mut zip)?;
        }
    }

    zip.finish().map_err(io::Error::other)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockExtractor;
    use crate::error::ExtractError;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn handle() -> SourceHandle {
        SourceHandle {
            connection: "PG:dbname=test".into(),
            namespace: None,
            table: "gis.parcels".into(),
        }
    }

    fn writing_extractor() -> MockExtractor {
        let mut extractor = MockExtractor::new();
        extractor.expect_extract().returning(|_, dir, _| {
            fs::create_dir_all(dir)?;
            fs::write(dir.join("a00000001.gdbtable"), b"rows")?;
            fs::write(dir.join("gdb"), b"marker")?;
            Ok(())
        });
        extractor
    }

    fn zip_entries(path: &Path) -> Vec<String> {
        let file = File::open(path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn workspaces_are_uniquely_named() {
        let root = tempdir().unwrap();
        let a = RunWorkspace::create(root.path()).unwrap();
        let b = RunWorkspace::create(root.path()).unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().is_dir());
        assert!(b.path().is_dir());
    }

    #[test]
    fn create_fails_when_root_is_not_a_directory() {
        let root = tempdir().unwrap();
        let file_root = root.path().join("not-a-dir");
        fs::write(&file_root, b"x").unwrap();
        let err = RunWorkspace::create(&file_root).unwrap_err();
        assert!(matches!(err, ReloadError::Config(_)), "got {err:?}");
    }

    #[test]
    fn destroy_and_drop_both_remove_the_workspace() {
        let root = tempdir().unwrap();

        let ws = RunWorkspace::create(root.path()).unwrap();
        let path = ws.path().to_path_buf();
        fs::write(path.join("leftover"), b"x").unwrap();
        ws.destroy().unwrap();
        assert!(!path.exists());

        let ws = RunWorkspace::create(root.path()).unwrap();
        let path = ws.path().to_path_buf();
        drop(ws);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn package_then_compress_uses_a_fresh_folder_name() {
        let root = tempdir().unwrap();
        let ws = RunWorkspace::create(root.path()).unwrap();
        let extractor = writing_extractor();

        let artifact = ws
            .package(&extractor, &handle(), "DeleteMe_item1.gdb", "parcels")
            .await
            .unwrap();
        assert_eq!(artifact.package_dir, ws.path().join("DeleteMe_item1.gdb"));

        let first = ws.compress(&artifact).unwrap();
        let second = ws.compress(&artifact).unwrap();
        assert_ne!(first.upload_name, artifact.package_name);
        assert_ne!(first.upload_name, second.upload_name);
        assert!(first.upload_name.starts_with(STAGING_PREFIX));
        assert!(first.upload_name.ends_with(".gdb"));

        let entries = zip_entries(&first.zip_path);
        let folders: HashSet<&str> = entries
            .iter()
            .filter_map(|e| e.split('/').next())
            .collect();
        assert_eq!(folders, HashSet::from([first.upload_name.as_str()]));
        assert!(entries.contains(&format!("{}/a00000001.gdbtable", first.upload_name)));
    }

    #[tokio::test]
    async fn package_surfaces_extractor_failure() {
        let root = tempdir().unwrap();
        let ws = RunWorkspace::create(root.path()).unwrap();
        let mut extractor = MockExtractor::new();
        extractor
            .expect_extract()
            .times(1)
            .returning(|_, _, _| Err(ExtractError::Command("boom".into())));

        let err = ws
            .package(&extractor, &handle(), "DeleteMe_item1.gdb", "parcels")
            .await
            .unwrap_err();
        assert!(matches!(err, ReloadError::Extraction(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn package_requires_the_package_directory() {
        let root = tempdir().unwrap();
        let ws = RunWorkspace::create(root.path()).unwrap();
        let mut extractor = MockExtractor::new();
        extractor.expect_extract().returning(|_, _, _| Ok(()));

        let err = ws
            .package(&extractor, &handle(), "DeleteMe_item1.gdb", "parcels")
            .await
            .unwrap_err();
        assert!(matches!(err, ReloadError::Extraction(_)), "got {err:?}");
    }
}
