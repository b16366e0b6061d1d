use std::io::{self, Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

/// An established, blocking, bidirectional byte stream to a FastCGI application.
///
/// Calls borrow the connection and never close it.
pub trait Connection: Read + Write {
    /// Bound how long the next reads and writes may block. `None` blocks indefinitely.
    fn set_io_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// The timeout currently in effect, so it can be put back after a call.
    fn io_timeout(&self) -> io::Result<Option<Duration>> {
        Ok(None)
    }
}

impl Connection for TcpStream {
    fn set_io_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }

    fn io_timeout(&self) -> io::Result<Option<Duration>> {
        self.read_timeout()
    }
}

#[cfg(unix)]
impl Connection for UnixStream {
    fn set_io_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }

    fn io_timeout(&self) -> io::Result<Option<Duration>> {
        self.read_timeout()
    }
}

impl<'a, C: Connection + ?Sized> Connection for &'a mut C {
    fn set_io_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_io_timeout(timeout)
    }

    fn io_timeout(&self) -> io::Result<Option<Duration>> {
        (**self).io_timeout()
    }
}

/// Applies one deadline to every read and write made through it.
///
/// Before each operation the connection's timeout is set to whatever is left until the deadline;
/// once the deadline has passed, operations fail with `TimedOut` without touching the
/// connection. On drop, the timeout the connection had before is put back.
pub struct Deadline<'a, C: Connection + ?Sized> {
    inner: &'a mut C,
    deadline: Option<Instant>,
    previous: Option<Duration>,
}

impl<'a, C: Connection + ?Sized> Deadline<'a, C> {
    pub fn new(inner: &'a mut C, timeout: Option<Duration>) -> Deadline<'a, C> {
        let mut previous = None;
        if timeout.is_some() {
            match inner.io_timeout() {
                Ok(t) => previous = t,
                Err(e) => debug!("failed to get connection timeout: {}", e),
            }
        }
        Deadline {
            inner,
            deadline: timeout.map(|t| Instant::now() + t),
            previous,
        }
    }

    fn arm(&mut self) -> io::Result<()> {
        let deadline = match self.deadline {
            Some(deadline) => deadline,
            None => return Ok(()),
        };
        let now = Instant::now();
        if now >= deadline {
            debug!("deadline passed");
            return Err(io::Error::new(io::ErrorKind::TimedOut, "FastCGI call timed out"));
        }
        self.inner.set_io_timeout(Some(deadline - now))
    }
}

impl<'a, C: Connection + ?Sized> Read for Deadline<'a, C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.arm()?;
        self.inner.read(buf)
    }
}

impl<'a, C: Connection + ?Sized> Write for Deadline<'a, C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.arm()?;
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.arm()?;
        self.inner.flush()
    }
}

impl<'a, C: Connection + ?Sized> Drop for Deadline<'a, C> {
    fn drop(&mut self) {
        if self.deadline.is_some() {
            if let Err(e) = self.inner.set_io_timeout(self.previous) {
                debug!("failed to restore connection timeout: {}", e);
            }
        }
    }
}
