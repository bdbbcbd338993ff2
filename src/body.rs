//! Body buffer allocation for request payloads that exceed the parser's
//! pre-read buffer.

use crate::errors::ErrorKind;
use memmap2::MmapMut;
use std::{env, fs, path::PathBuf};

const SPILL_THRESHOLD: usize = 1024 * 1024;

/// Owns the storage for a request body once it grows past what the
/// parser's buffer already holds.
///
/// Bodies under [`SPILL_THRESHOLD`] live on the heap; larger ones are
/// backed by an anonymous-once-unlinked temp file mapped with
/// [`MmapMut`]. Either way `as_mut_slice` gives a single contiguous
/// destination to read the remaining body bytes into.
pub(crate) enum BodyBuffer {
    Heap(Vec<u8>),
    Mapped(MmapMut),
}

impl BodyBuffer {
    /// Allocates storage for a body of `size` bytes, copying `prefix`
    /// (the body bytes already read past the headers) to the front.
    ///
    /// `allow_temp_file` mirrors [`ReqLimits::allow_post_temp_file`
    /// ](crate::limits::ReqLimits::allow_post_temp_file); when `false`
    /// and `size` exceeds the spill threshold, allocation fails.
    pub(crate) fn allocate(
        size: usize,
        prefix: &[u8],
        allow_temp_file: bool,
    ) -> Result<Self, ErrorKind> {
        let mut buffer = if size < SPILL_THRESHOLD {
            Self::Heap(vec![0; size])
        } else {
            if !allow_temp_file {
                return Err(ErrorKind::BodyTooLarge);
            }
            Self::Mapped(Self::map_temp_file(size)?)
        };

        buffer.as_mut_slice()[..prefix.len()].copy_from_slice(prefix);
        Ok(buffer)
    }

    #[inline]
    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Self::Heap(v) => v.as_mut_slice(),
            Self::Mapped(m) => &mut m[..],
        }
    }

    #[inline]
    pub(crate) fn as_slice(&self) -> &[u8] {
        match self {
            Self::Heap(v) => v.as_slice(),
            Self::Mapped(m) => &m[..],
        }
    }

    fn map_temp_file(size: usize) -> Result<MmapMut, ErrorKind> {
        let dir = spool_dir().ok_or(ErrorKind::InternalError)?;
        let path = dir.join(format!(".corehttpd-body-{}", temp_suffix()));

        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|_| ErrorKind::InternalError)?;

        // Remove the directory entry right after opening; the still-open
        // fd keeps the data alive until the mapping (and file) are dropped.
        #[cfg(unix)]
        let _ = fs::remove_file(&path);

        file.set_len(size as u64)
            .map_err(|_| ErrorKind::InternalError)?;

        // SAFETY: `file` was just created exclusively for this mapping and
        // no other process holds a handle to it; nothing else can race the
        // backing storage while the mapping is live.
        unsafe { MmapMut::map_mut(&file) }.map_err(|_| ErrorKind::InternalError)
    }
}

fn spool_dir() -> Option<PathBuf> {
    ["TMPDIR", "TMP", "TEMP"]
        .into_iter()
        .find_map(|var| env::var_os(var).map(PathBuf::from))
        .filter(|p| p.is_absolute() && p.is_dir())
        .or_else(|| {
            let fallback = PathBuf::from("/var/tmp");
            fallback.is_dir().then_some(fallback)
        })
}

fn temp_suffix() -> String {
    use std::{
        process,
        sync::atomic::{AtomicU64, Ordering},
    };
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    format!(
        "{}-{}",
        process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_under_threshold() {
        let mut buf = BodyBuffer::allocate(16, b"hello", true).unwrap();
        assert_eq!(&buf.as_mut_slice()[..5], b"hello");
        assert!(matches!(buf, BodyBuffer::Heap(_)));
    }

    #[test]
    fn mapped_rejected_without_temp_file() {
        let result = BodyBuffer::allocate(SPILL_THRESHOLD, b"", false);
        assert_eq!(result.unwrap_err(), ErrorKind::BodyTooLarge);
    }

    #[test]
    fn mapped_over_threshold() {
        let mut buf = BodyBuffer::allocate(SPILL_THRESHOLD, b"abc", true).unwrap();
        assert_eq!(&buf.as_mut_slice()[..3], b"abc");
        assert!(matches!(buf, BodyBuffer::Mapped(_)));
    }
}
