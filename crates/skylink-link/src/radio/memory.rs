//! # In-Memory Radio Port
//!
//! Channel-backed port for simulation and tests. A pair of ports forms an
//! ideal radio link; [`MemoryPort::inject`] feeds arbitrary buffers (corrupt
//! ones included) into the receive side.

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

use super::{DataRate, RadioPort};

pub struct MemoryPort {
    index: usize,
    tx: Sender<(Bytes, DataRate)>,
    rx: Receiver<(Bytes, DataRate)>,
    loopback_tx: Sender<(Bytes, DataRate)>,
    /// Remaining reopen attempts that should fail.
    pub fail_reopens: u32,
    pub reopens: u32,
}

/// Observer end of a [`MemoryPort`]: sees what the port wrote and can inject
/// received buffers.
#[derive(Clone)]
pub struct MemoryTap {
    written: Receiver<(Bytes, DataRate)>,
    inject: Sender<(Bytes, DataRate)>,
}

impl MemoryTap {
    /// Frames written by the port so far.
    pub fn drain_written(&self) -> Vec<(Bytes, DataRate)> {
        self.written.try_iter().collect()
    }

    pub fn inject(&self, buffer: Bytes) {
        let _ = self.inject.send((buffer, DataRate::UNSET));
    }
}

impl MemoryPort {
    /// A standalone port plus its tap.
    pub fn new(index: usize) -> (Self, MemoryTap) {
        let (written_tx, written_rx) = unbounded();
        let (inject_tx, inject_rx) = unbounded();
        let port = MemoryPort {
            index,
            tx: written_tx,
            rx: inject_rx,
            loopback_tx: inject_tx.clone(),
            fail_reopens: 0,
            reopens: 0,
        };
        let tap = MemoryTap {
            written: written_rx,
            inject: inject_tx,
        };
        (port, tap)
    }

    pub fn inject(&self, buffer: Bytes) {
        let _ = self.loopback_tx.send((buffer, DataRate::UNSET));
    }
}

impl RadioPort for MemoryPort {
    fn index(&self) -> usize {
        self.index
    }

    fn write(&mut self, frame: &[u8], rate: DataRate) -> anyhow::Result<usize> {
        self.tx
            .send((Bytes::copy_from_slice(frame), rate))
            .map_err(|_| anyhow::anyhow!("radio {} tap closed", self.index))?;
        Ok(frame.len())
    }

    fn try_read(&mut self, buf: &mut [u8]) -> anyhow::Result<Option<usize>> {
        match self.rx.try_recv() {
            Ok((data, _)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(Some(n))
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Ok(None),
        }
    }

    fn reopen(&mut self) -> anyhow::Result<()> {
        self.reopens += 1;
        if self.fail_reopens > 0 {
            self.fail_reopens -= 1;
            anyhow::bail!("radio {} failed to reopen", self.index);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_frames_visible_on_tap() {
        let (mut port, tap) = MemoryPort::new(3);
        port.write(b"abc", DataRate::MCS0).unwrap();
        let written = tap.drain_written();
        assert_eq!(written.len(), 1);
        assert_eq!(&written[0].0[..], b"abc");
        assert_eq!(written[0].1, DataRate::MCS0);
    }

    #[test]
    fn injected_buffers_are_read() {
        let (mut port, tap) = MemoryPort::new(0);
        tap.inject(Bytes::from_static(b"hello"));
        let mut buf = [0u8; 16];
        assert_eq!(port.try_read(&mut buf).unwrap(), Some(5));
        assert_eq!(port.try_read(&mut buf).unwrap(), None);
    }

    #[test]
    fn reopen_failures_are_scripted() {
        let (mut port, _tap) = MemoryPort::new(0);
        port.fail_reopens = 1;
        assert!(port.reopen().is_err());
        assert!(port.reopen().is_ok());
        assert_eq!(port.reopens, 2);
    }
}
