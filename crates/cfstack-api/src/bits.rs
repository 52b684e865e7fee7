//! Application bits packaging
//!
//! Directories are zipped into a temporary file so uploads stream from
//! disk; an existing `.zip` is uploaded as is.

use crate::error::{ApiError, Result};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

/// Archive ready for upload; a temporary archive lives as long as this value.
#[derive(Debug)]
pub struct Bits {
    path: PathBuf,
    _temp: Option<NamedTempFile>,
}

impl Bits {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self._temp.is_some()
    }
}

/// Package `source` for upload.
pub async fn prepare(source: &Path) -> Result<Bits> {
    let source = source.to_path_buf();
    tokio::task::spawn_blocking(move || prepare_blocking(&source))
        .await
        .map_err(|e| ApiError::Packaging(e.to_string()))?
}

fn prepare_blocking(source: &Path) -> Result<Bits> {
    let meta = std::fs::metadata(source).map_err(|e| {
        ApiError::Packaging(format!("cannot read {}: {}", source.display(), e))
    })?;

    if meta.is_file() {
        let is_zip = source
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip") || ext.eq_ignore_ascii_case("jar"));
        if !is_zip {
            return Err(ApiError::Packaging(format!(
                "{} is neither a directory nor a zip archive",
                source.display()
            )));
        }
        return Ok(Bits {
            path: source.to_path_buf(),
            _temp: None,
        });
    }

    let temp = tempfile::Builder::new()
        .prefix("cfstack-bits-")
        .suffix(".zip")
        .tempfile()?;
    zip_dir(source, temp.as_file())?;
    tracing::debug!(source = %source.display(), archive = %temp.path().display(), "packaged bits");
    Ok(Bits {
        path: temp.path().to_path_buf(),
        _temp: Some(temp),
    })
}

fn zip_dir(root: &Path, out: &File) -> Result<()> {
    let packaging = |e: zip::result::ZipError| ApiError::Packaging(e.to_string());
    let mut writer = zip::ZipWriter::new(out);

    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| ApiError::Packaging(e.to_string()))?;
        let rel = match entry.path().strip_prefix(root) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(permissions(&entry));

        if entry.file_type().is_dir() {
            writer.add_directory(format!("{}/", name), options).map_err(packaging)?;
        } else {
            writer.start_file(name, options).map_err(packaging)?;
            let mut file = File::open(entry.path())?;
            io::copy(&mut file, &mut writer)?;
        }
    }

    let mut out = writer.finish().map_err(packaging)?;
    out.flush()?;
    Ok(())
}

#[cfg(unix)]
fn permissions(entry: &walkdir::DirEntry) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    entry
        .metadata()
        .map(|m| m.permissions().mode() & 0o777)
        .unwrap_or(0o644)
}

#[cfg(not(unix))]
fn permissions(entry: &walkdir::DirEntry) -> u32 {
    if entry.file_type().is_dir() { 0o755 } else { 0o644 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_is_zipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.js"), "console.log(1)").unwrap();
        std::fs::create_dir(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib/util.js"), "module.exports = {}").unwrap();

        let bits = prepare(dir.path()).await.unwrap();
        assert!(bits.is_temporary());

        let archive = zip::ZipArchive::new(File::open(bits.path()).unwrap()).unwrap();
        let mut names: Vec<_> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(names, vec!["index.js", "lib/", "lib/util.js"]);
    }

    #[tokio::test]
    async fn test_zip_file_is_used_directly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.zip");
        std::fs::write(&path, b"PK").unwrap();

        let bits = prepare(&path).await.unwrap();
        assert!(!bits.is_temporary());
        assert_eq!(bits.path(), path);
    }

    #[tokio::test]
    async fn test_missing_path() {
        let err = prepare(Path::new("/definitely/not/here")).await.unwrap_err();
        assert!(matches!(err, ApiError::Packaging(_)));
    }
}
