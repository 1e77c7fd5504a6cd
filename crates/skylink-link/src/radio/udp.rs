//! # UDP Radio Port
//!
//! Stands in for a radio interface on a bench or in simulation: every frame
//! becomes one datagram to a fixed peer. The data rate is ignored beyond
//! bookkeeping.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};

use anyhow::{Context, Result};

use super::{DataRate, RadioPort};

pub struct UdpRadioPort {
    index: usize,
    bind: SocketAddr,
    peer: SocketAddr,
    socket: UdpSocket,
    /// Rate of the most recent write.
    pub last_rate: DataRate,
    pub frames_sent: u64,
}

impl UdpRadioPort {
    /// Bind `bind` and connect to `peer`.
    pub fn open(index: usize, bind: SocketAddr, peer: SocketAddr) -> Result<Self> {
        let socket = Self::make_socket(bind, peer)?;
        tracing::info!(index, %bind, %peer, "udp radio port opened");
        Ok(UdpRadioPort {
            index,
            bind,
            peer,
            socket,
            last_rate: DataRate::UNSET,
            frames_sent: 0,
        })
    }

    fn make_socket(bind: SocketAddr, peer: SocketAddr) -> Result<UdpSocket> {
        let socket = UdpSocket::bind(bind).with_context(|| format!("binding {bind}"))?;
        socket
            .connect(peer)
            .with_context(|| format!("connecting to {peer}"))?;
        socket.set_nonblocking(true)?;
        Ok(socket)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl RadioPort for UdpRadioPort {
    fn index(&self) -> usize {
        self.index
    }

    fn write(&mut self, frame: &[u8], rate: DataRate) -> Result<usize> {
        self.last_rate = rate;
        let n = self
            .socket
            .send(frame)
            .with_context(|| format!("radio {} send", self.index))?;
        self.frames_sent += 1;
        Ok(n)
    }

    fn try_read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        match self.socket.recv(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            // Connected UDP surfaces ICMP unreachable as a read error; the
            // peer may simply not be up yet.
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => Ok(None),
            Err(e) => Err(e).with_context(|| format!("radio {} recv", self.index)),
        }
    }

    fn reopen(&mut self) -> Result<()> {
        // Rebinding the same address needs the old socket closed first.
        let placeholder = UdpSocket::bind(SocketAddr::new(self.bind.ip(), 0))?;
        drop(std::mem::replace(&mut self.socket, placeholder));
        self.socket = Self::make_socket(self.bind, self.peer)?;
        tracing::info!(index = self.index, bind = %self.bind, "udp radio port reopened");
        Ok(())
    }
}
