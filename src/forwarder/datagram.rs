use std::{
    io,
    net::{Ipv4Addr, SocketAddr, UdpSocket},
    time::Duration,
};

use tracing::{error, trace};

use crate::buffer::BufferedLine;

use super::{join_lines, BatchSender};

/// Fire-and-forget UDP sender.
///
/// The whole batch goes out as one newline-joined datagram. There is no
/// acknowledgement and no retry; a failed send is logged and the batch is
/// gone. The socket is created on first use and recreated on the delivery
/// after a failure.
pub(crate) struct DatagramSender {
    addrs: Vec<SocketAddr>,
    write_timeout: Duration,
    socket: Option<UdpSocket>,
}

impl DatagramSender {
    pub fn new(addrs: Vec<SocketAddr>, write_timeout: Duration) -> Self {
        DatagramSender { addrs, write_timeout, socket: None }
    }

    fn connect(&self) -> io::Result<UdpSocket> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(&self.addrs[..])?;
        socket.set_write_timeout(Some(self.write_timeout))?;
        Ok(socket)
    }

    fn try_send(&mut self, payload: &[u8]) -> io::Result<usize> {
        let socket = match self.socket.take() {
            Some(socket) => socket,
            None => self.connect()?,
        };
        match socket.send(payload) {
            Ok(sent) => {
                self.socket = Some(socket);
                Ok(sent)
            }
            // The socket is suspect after an error; drop it and reconnect on
            // the next delivery.
            Err(e) => Err(e),
        }
    }
}

impl BatchSender for DatagramSender {
    fn deliver(&mut self, batch: &[BufferedLine]) {
        let payload = join_lines(batch.iter().map(|entry| entry.line.as_str()));
        match self.try_send(payload.as_bytes()) {
            Ok(sent) => trace!(bytes = sent, lines = batch.len(), "sent datagram"),
            Err(e) => {
                error!(error = %e, lines = batch.len(), "failed to send datagram, dropping batch");
            }
        }
    }
}
