//! Getting netCDF files out of the per-year history tar archives.
//!
//! Two ways are provided: [`InMemoryExtraction`] reads the member into a
//! buffer that the netCDF library opens directly, while [`DiskExtraction`]
//! unpacks it into a scratch directory where later runs can reuse it.
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use error_stack::ResultExt;
use serde::{Deserialize, Serialize};

use crate::error::PpError;

/// A file taken out of an archive.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedFile {
    /// The whole file contents; `name` is the member name, used by the
    /// netCDF library in its messages.
    InMemory { name: String, bytes: Vec<u8> },
    /// A file unpacked on disk.
    OnDisk(PathBuf),
}

impl ExtractedFile {
    /// A short description for log and error messages.
    pub fn describe(&self) -> String {
        match self {
            ExtractedFile::InMemory { name, bytes } => format!("{name} (in memory, {} bytes)", bytes.len()),
            ExtractedFile::OnDisk(p) => p.display().to_string(),
        }
    }
}

/// How a member file is taken out of a history archive.
pub trait ExtractionStrategy {
    /// Extract `member` from the tar file `archive`.
    fn extract(&self, archive: &Path, member: &str) -> error_stack::Result<ExtractedFile, PpError>;
}

/// Read archive members into memory; nothing is written to disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryExtraction;

impl ExtractionStrategy for InMemoryExtraction {
    fn extract(&self, archive: &Path, member: &str) -> error_stack::Result<ExtractedFile, PpError> {
        let mut tar = open_archive(archive)?;
        let entries = tar.entries().change_context_lazy(|| {
            PpError::context(format!("Could not read entries of {}", archive.display()))
        })?;

        for entry in entries {
            let mut entry = entry.change_context_lazy(|| {
                PpError::context(format!("Could not read an entry of {}", archive.display()))
            })?;
            if !entry_matches(&entry, member) {
                continue;
            }

            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes).change_context_lazy(|| {
                PpError::context(format!("Could not read {member} from {}", archive.display()))
            })?;
            log::debug!("Read {member} ({} bytes) from {}", bytes.len(), archive.display());
            return Ok(ExtractedFile::InMemory { name: member.to_string(), bytes });
        }

        Err(missing_member(archive, member))
    }
}

/// Unpack archive members under `scratch_dir`.
///
/// A member that was already unpacked there is reused without opening the
/// archive again. Extracted files are left in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskExtraction {
    pub scratch_dir: PathBuf,
}

impl DiskExtraction {
    pub fn new<P: Into<PathBuf>>(scratch_dir: P) -> Self {
        Self { scratch_dir: scratch_dir.into() }
    }

    /// Where `member` ends up once extracted.
    pub fn destination(&self, member: &str) -> PathBuf {
        self.scratch_dir.join(normalize_member(Path::new(member)))
    }
}

impl ExtractionStrategy for DiskExtraction {
    fn extract(&self, archive: &Path, member: &str) -> error_stack::Result<ExtractedFile, PpError> {
        let dest = self.destination(member);
        if dest.is_file() {
            log::debug!("Reusing previously extracted {}", dest.display());
            return Ok(ExtractedFile::OnDisk(dest));
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).change_context_lazy(|| {
                PpError::context(format!("Could not create scratch directory {}", parent.display()))
            })?;
        }

        let mut tar = open_archive(archive)?;
        let entries = tar.entries().change_context_lazy(|| {
            PpError::context(format!("Could not read entries of {}", archive.display()))
        })?;

        for entry in entries {
            let mut entry = entry.change_context_lazy(|| {
                PpError::context(format!("Could not read an entry of {}", archive.display()))
            })?;
            if !entry_matches(&entry, member) {
                continue;
            }

            // Unpack to a temporary name so that an interrupted extraction is not reused
            let partial = dest.with_extension("partial");
            entry.unpack(&partial).change_context_lazy(|| {
                PpError::context(format!("Could not unpack {member} to {}", partial.display()))
            })?;
            std::fs::rename(&partial, &dest).change_context_lazy(|| {
                PpError::context(format!("Could not move {} to {}", partial.display(), dest.display()))
            })?;
            log::debug!("Extracted {member} from {} to {}", archive.display(), dest.display());
            return Ok(ExtractedFile::OnDisk(dest));
        }

        Err(missing_member(archive, member))
    }
}

/// Which strategy to use, as given in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExtractionMode {
    #[default]
    Memory,
    Disk,
}

/// The files extracted for one dataset, kept until the dataset built from
/// them has been written.
///
/// Releasing drops the in-memory buffers; files extracted to disk are kept
/// for reuse.
#[derive(Debug, Default)]
pub struct ArchiveHandles {
    files: Vec<ExtractedFile>,
}

impl ArchiveHandles {
    pub fn new(files: Vec<ExtractedFile>) -> Self {
        Self { files }
    }

    pub fn files(&self) -> &[ExtractedFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn release(&mut self) {
        if !self.files.is_empty() {
            log::debug!("Releasing {} extracted file(s)", self.files.len());
        }
        self.files.clear();
    }
}

impl Drop for ArchiveHandles {
    fn drop(&mut self) {
        self.release();
    }
}

/// Extract the `i`th file of `files` from the `i`th archive of `archives`.
pub fn extract_all<S: ExtractionStrategy + ?Sized, P: AsRef<Path>>(
    files: &[String],
    archives: &[P],
    strategy: &S,
) -> error_stack::Result<ArchiveHandles, PpError> {
    if files.len() != archives.len() {
        error_stack::bail!(PpError::invalid_argument(format!(
            "got {} files but {} archives, there must be one file per archive",
            files.len(),
            archives.len()
        )));
    }
    if files.is_empty() {
        error_stack::bail!(PpError::invalid_argument("no files to extract"));
    }

    let mut extracted = Vec::with_capacity(files.len());
    for (member, archive) in files.iter().zip(archives) {
        let archive = archive.as_ref();
        log::info!("Extracting {member} from {}", archive.display());
        extracted.push(strategy.extract(archive, member)?);
    }
    Ok(ArchiveHandles::new(extracted))
}

fn open_archive(archive: &Path) -> error_stack::Result<tar::Archive<File>, PpError> {
    if !archive.is_file() {
        error_stack::bail!(PpError::MissingPath(archive.to_path_buf()));
    }
    let f = File::open(archive)
        .change_context_lazy(|| PpError::context(format!("Could not open {}", archive.display())))?;
    Ok(tar::Archive::new(f))
}

fn entry_matches<R: Read>(entry: &tar::Entry<R>, member: &str) -> bool {
    entry
        .path()
        .map(|p| normalize_member(&p) == normalize_member(Path::new(member)))
        .unwrap_or(false)
}

/// Member path without "./" components, so that "./00010101.ocean.nc" and
/// "00010101.ocean.nc" compare equal.
fn normalize_member(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn missing_member(archive: &Path, member: &str) -> error_stack::Report<PpError> {
    error_stack::Report::new(PpError::invalid_argument(format!(
        "{member} not found in {}",
        archive.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn write_archive(dir: &Path, year: i32, members: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.join(format!("{year:04}0101.nc.tar"));
        let f = File::create(&path).unwrap();
        let mut builder = tar::Builder::new(f);
        for (name, data) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.finish().unwrap();
        path
    }

    #[test]
    fn test_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(
            dir.path(),
            1,
            &[
                ("./00010101.ocean_monthly.nc", b"ocean".as_slice()),
                ("./00010101.atmos_month.nc", b"atmos".as_slice()),
            ],
        );
        let file = InMemoryExtraction.extract(&archive, "./00010101.atmos_month.nc").unwrap();
        assert_eq!(
            file,
            ExtractedFile::InMemory { name: "./00010101.atmos_month.nc".to_string(), bytes: b"atmos".to_vec() }
        );
        // No prefix works too
        let file = InMemoryExtraction.extract(&archive, "00010101.ocean_monthly.nc").unwrap();
        assert!(matches!(file, ExtractedFile::InMemory { bytes, .. } if bytes == b"ocean"));
    }

    #[test]
    fn test_missing_member_and_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(dir.path(), 1, &[("./00010101.ocean_monthly.nc", b"ocean".as_slice())]);
        assert!(InMemoryExtraction.extract(&archive, "./00010101.ice.nc").is_err());
        let err = InMemoryExtraction
            .extract(&dir.path().join("00020101.nc.tar"), "./00020101.ice.nc")
            .unwrap_err();
        assert!(matches!(err.current_context(), PpError::MissingPath(_)));
    }

    #[test]
    fn test_disk_extraction_reuses_files() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        let archive = write_archive(dir.path(), 2, &[("./00020101.ocean_monthly.nc", b"ocean".as_slice())]);
        let strategy = DiskExtraction::new(&scratch);

        let file = strategy.extract(&archive, "./00020101.ocean_monthly.nc").unwrap();
        let dest = scratch.join("00020101.ocean_monthly.nc");
        assert_eq!(file, ExtractedFile::OnDisk(dest.clone()));
        assert_eq!(std::fs::read(&dest).unwrap(), b"ocean");

        // Second time, the archive is not needed
        std::fs::remove_file(&archive).unwrap();
        let again = strategy.extract(&archive, "./00020101.ocean_monthly.nc").unwrap();
        assert_eq!(again, ExtractedFile::OnDisk(dest.clone()));

        let mut handles = ArchiveHandles::new(vec![again]);
        handles.release();
        assert!(handles.is_empty());
        assert!(dest.exists());
    }

    #[test]
    fn test_extract_all() {
        let dir = tempfile::tempdir().unwrap();
        let archives = (1..=3)
            .map(|y| {
                let name = format!("./{y:04}0101.ocean_monthly.nc");
                write_archive(dir.path(), y, &[(name.as_str(), format!("year {y}").as_bytes())])
            })
            .collect::<Vec<_>>();
        let files = crate::naming::files_for_years("ocean_monthly", 1, 3, "nc", "./").unwrap();
        let handles = extract_all(&files, &archives, &InMemoryExtraction).unwrap();
        assert_eq!(handles.len(), 3);
        assert!(matches!(&handles.files()[2], ExtractedFile::InMemory { bytes, .. } if bytes == b"year 3"));

        let err = extract_all(&files[..2], &archives, &InMemoryExtraction).unwrap_err();
        assert!(matches!(err.current_context(), PpError::InvalidArgument(_)));
        let none: [PathBuf; 0] = [];
        let err = extract_all(&[], &none, &InMemoryExtraction).unwrap_err();
        assert!(matches!(err.current_context(), PpError::InvalidArgument(_)));
    }

    #[test]
    fn test_extraction_mode() {
        assert_eq!(ExtractionMode::from_str("disk").unwrap(), ExtractionMode::Disk);
        assert_eq!(ExtractionMode::Memory.to_string(), "memory");
    }
}
