//! Listening socket setup.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener};

/// Open a non-blocking listener on `addr` with the given accept backlog.
///
/// `SO_REUSEADDR` is set so a stopped server's port can be bound again
/// straight away, even with connections lingering in TIME_WAIT.
pub(crate) fn bind(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    #[cfg(unix)]
    socket.set_reuse_address(true)?;

    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_ephemeral_port() {
        let listener = bind("127.0.0.1:0".parse().unwrap(), 8).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        // A client can connect while the listener is alive
        let _client = std::net::TcpStream::connect(addr).unwrap();
    }

    #[test]
    fn test_bind_occupied_port_fails() {
        let first = bind("127.0.0.1:0".parse().unwrap(), 8).unwrap();
        let addr = first.local_addr().unwrap();
        assert!(bind(addr, 8).is_err());
    }
}
