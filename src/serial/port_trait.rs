//! Trait abstraction for byte transport operations to enable testing

use std::io;
use std::time::Duration;

/// Byte-level transport primitives the protocol engine consumes
///
/// Reads are non-blocking except for [`Transport::read_exact_timeout`],
/// which is only used by synchronous protocol revisions.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Number of bytes that can be read without blocking
    fn available(&mut self) -> io::Result<usize>;

    /// Read one byte; only valid when `available()` is non-zero
    fn read_one(&mut self) -> io::Result<u8>;

    /// Write all data to the port
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    fn flush(&mut self) -> io::Result<()>;

    /// Block until exactly `len` bytes arrive or `timeout` elapses
    ///
    /// A timeout is reported as an error of kind [`io::ErrorKind::TimedOut`].
    fn read_exact_timeout(&mut self, len: usize, timeout: Duration) -> io::Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn available(&mut self) -> io::Result<usize> {
        (**self).available()
    }

    fn read_one(&mut self) -> io::Result<u8> {
        (**self).read_one()
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn read_exact_timeout(&mut self, len: usize, timeout: Duration) -> io::Result<Vec<u8>> {
        (**self).read_exact_timeout(len, timeout)
    }
}
