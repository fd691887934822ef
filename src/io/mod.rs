//! Everything that touches the filesystem: history archives in, netCDF
//! files out.
pub mod archive;
#[cfg(feature = "netcdf")]
pub mod nc_read;
#[cfg(feature = "netcdf")]
pub mod nc_write;

pub use archive::{ArchiveHandles, DiskExtraction, ExtractedFile, ExtractionMode, ExtractionStrategy, InMemoryExtraction};
#[cfg(feature = "netcdf")]
pub use nc_read::assemble;
#[cfg(feature = "netcdf")]
pub use nc_write::{persist, WriteOptions, DEFAULT_FILL_VALUE};
