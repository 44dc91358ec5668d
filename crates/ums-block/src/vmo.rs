use std::fmt;
use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError};

use crate::{Result, UmsError};

/// Caller-owned memory region that transactions read into / write from.
///
/// Cloning a `Vmo` yields another handle to the same bytes.
#[derive(Clone, Default)]
pub struct Vmo {
    data: Arc<Mutex<Vec<u8>>>,
}

impl Vmo {
    pub fn new(size: usize) -> Self {
        Self::from_vec(vec![0; size])
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
        }
    }

    pub fn len(&self) -> u64 {
        self.with_data(|data| data.len() as u64)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `buf.len()` bytes starting at `offset` out of the region.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.with_data(|data| {
            let range = checked_range(data.len(), offset, buf.len() as u64)?;
            buf.copy_from_slice(&data[range]);
            Ok(())
        })
    }

    /// Copy `buf` into the region starting at `offset`.
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        self.with_data(|data| {
            let range = checked_range(data.len(), offset, buf.len() as u64)?;
            data[range].copy_from_slice(buf);
            Ok(())
        })
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.with_data(|data| data.clone())
    }

    /// Returns true if `[offset, offset + len)` lies inside the region.
    pub fn contains(&self, offset: u64, len: u64) -> bool {
        self.with_data(|data| checked_range(data.len(), offset, len).is_ok())
    }

    fn with_data<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        let mut guard = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl fmt::Debug for Vmo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vmo").field("len", &self.len()).finish()
    }
}

fn checked_range(capacity: usize, offset: u64, len: u64) -> Result<Range<usize>> {
    let end = offset.checked_add(len).ok_or(UmsError::InvalidArgs)?;
    if end > capacity as u64 {
        return Err(UmsError::InvalidArgs);
    }
    Ok(offset as usize..end as usize)
}
