use std::io::Read;

/// Wraps a reader and reports the consumed fraction of `total` after every
/// read. Fractions are monotonic because `read` only moves forward.
pub(crate) struct CountingReader<R, F> {
    inner: R,
    total: u64,
    read: u64,
    progress: F,
}

impl<R: Read, F: Fn(f64)> CountingReader<R, F> {
    pub(crate) fn new(inner: R, total: u64, progress: F) -> Self {
        Self {
            inner,
            total,
            read: 0,
            progress,
        }
    }
}

impl<R: Read, F: Fn(f64)> Read for CountingReader<R, F> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read += n as u64;
        if self.total > 0 {
            (self.progress)((self.read as f64 / self.total as f64).min(1.0));
        }
        Ok(n)
    }
}
