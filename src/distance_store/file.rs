use super::{check_run, condensed_len, DistanceStore, StoreBackend, StoreFactory};
use crate::{ClusterError, Result};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Header: the record count as a little endian `u32`.
const HEADER_BYTES: u64 = 4;
const VALUE_BYTES: usize = std::mem::size_of::<f64>();

/// Distance store backed by an anonymous temporary file.
///
/// Layout is `[N: u32][N(N-1)/2 x f64]`, little endian, values in ascending position order.
/// The file has no name on disk and is removed by the operating system as soon as the store is
/// dropped, whichever way the run ends.
pub struct FileStore {
    n: usize,
    len: usize,
    file: Mutex<File>,
}

impl FileStore {
    /// Creates a zeroed store for `n` records in `temp_dir`, or in the system temporary
    /// directory when none is given.
    ///
    /// Fails with `ClusterError::Capacity` when `n` does not fit the `u32` header.
    pub fn create(n: usize, temp_dir: Option<&Path>) -> Result<Self> {
        let header = u32::try_from(n).map_err(|_| ClusterError::Capacity {
            bytes: StoreFactory::required_bytes(n),
            limit: StoreFactory::required_bytes(u32::MAX as usize),
        })?;
        let mut file = match temp_dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        let len = condensed_len(n);
        file.write_all(&header.to_le_bytes())?;
        file.set_len(HEADER_BYTES + (len * VALUE_BYTES) as u64)?;
        Ok(FileStore { n, len, file: Mutex::new(file) })
    }

    /// Record count as written in the file header.
    pub fn header(&self) -> Result<u32> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        let mut buf = [0u8; HEADER_BYTES as usize];
        file.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn offset(position: usize) -> u64 {
        HEADER_BYTES + (position * VALUE_BYTES) as u64
    }
}

impl DistanceStore for FileStore {
    fn n(&self) -> usize {
        self.n
    }

    fn backend(&self) -> StoreBackend {
        StoreBackend::File
    }

    fn read_run(&self, start: usize, out: &mut [f64]) -> Result<()> {
        check_run(start, out.len(), self.len)?;
        if out.is_empty() {
            return Ok(());
        }
        let mut buf = vec![0u8; out.len() * VALUE_BYTES];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(Self::offset(start)))?;
            file.read_exact(&mut buf)?;
        }
        for (value, bytes) in out.iter_mut().zip(buf.chunks_exact(VALUE_BYTES)) {
            let mut raw = [0u8; VALUE_BYTES];
            raw.copy_from_slice(bytes);
            *value = f64::from_le_bytes(raw);
        }
        Ok(())
    }

    fn write_run(&self, start: usize, values: &[f64]) -> Result<()> {
        check_run(start, values.len(), self.len)?;
        if values.is_empty() {
            return Ok(());
        }
        let buf: Vec<u8> = values.iter().flat_map(|value| value.to_le_bytes()).collect();
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::offset(start)))?;
        file.write_all(&buf)?;
        Ok(())
    }
}
