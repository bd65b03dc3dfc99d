//! Datagram socket abstraction used by the transport loops.
//!
//! Both loops share one socket by reference: the send loop only transmits and
//! the receive loop only receives. `embassy-net`'s UDP socket is the target
//! implementation.

use core::net::SocketAddrV4;

use embassy_net::{
    udp::{BindError, RecvError, SendError, UdpSocket},
    IpAddress, IpEndpoint,
};

/// A bound-once UDP socket.
#[allow(async_fn_in_trait)]
pub trait DatagramSocket {
    type Error: core::fmt::Debug;

    /// Bind to a local port on all interfaces.
    fn bind_port(
        &mut self,
        port: u16,
    ) -> Result<(), Self::Error>;

    /// Transmit one datagram to `peer`.
    async fn send_datagram(
        &self,
        datagram: &[u8],
        peer: SocketAddrV4,
    ) -> Result<(), Self::Error>;

    /// Wait for one datagram and copy it into `buf`, returning its length.
    async fn recv_datagram(
        &self,
        buf: &mut [u8],
    ) -> Result<usize, Self::Error>;
}

/// Errors from the `embassy-net` socket.
#[derive(Debug)]
pub enum UdpError {
    Bind(BindError),
    Send(SendError),
    Recv(RecvError),
}

impl DatagramSocket for UdpSocket<'_> {
    type Error = UdpError;

    fn bind_port(
        &mut self,
        port: u16,
    ) -> Result<(), UdpError> {
        self.bind(port).map_err(UdpError::Bind)
    }

    async fn send_datagram(
        &self,
        datagram: &[u8],
        peer: SocketAddrV4,
    ) -> Result<(), UdpError> {
        let endpoint = IpEndpoint::new(IpAddress::Ipv4(*peer.ip()), peer.port());
        self.send_to(datagram, endpoint)
            .await
            .map_err(UdpError::Send)
    }

    async fn recv_datagram(
        &self,
        buf: &mut [u8],
    ) -> Result<usize, UdpError> {
        let (len, _meta) = self.recv_from(buf).await.map_err(UdpError::Recv)?;
        Ok(len)
    }
}
