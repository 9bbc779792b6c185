//! Server bind/rebind, client connect-with-retry, and the socket option
//! set-up that `tokio::net` doesn't expose directly — grounded in
//! `socket_common.c`'s `create_real_time_tcp_socket_errexit` /
//! `set_socket_bind_option` / `connect_to_socket`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::config::defaults;
use crate::error::FederateError;

/// Port-hint semantics shared by the RTI and every federate's P2P server.
#[derive(Debug, Clone, Copy)]
pub enum PortHint {
    /// Cycle starting at [`defaults::STARTING_PORT`], the RTI sentinel.
    CyclePorts,
    /// Let the OS assign a port; the bound value is reported back.
    OsAssigned,
    /// Bind this exact port; fail if occupied.
    Exact(u16),
}

impl From<u16> for PortHint {
    fn from(v: u16) -> Self {
        match v {
            1 => PortHint::CyclePorts,
            0 => PortHint::OsAssigned,
            p => PortHint::Exact(p),
        }
    }
}

fn configure_listening_socket(socket: &Socket) -> std::io::Result<()> {
    socket.set_reuse_address(true)?;
    socket.set_nodelay(true)?;
    socket.set_read_timeout(Some(Duration::from_millis(500)))?;
    socket.set_write_timeout(Some(Duration::from_millis(500)))?;
    #[cfg(target_os = "linux")]
    set_tcp_quickack(socket)?;
    Ok(())
}

/// Disables delayed ACKs, matching `create_real_time_tcp_socket_errexit`'s
/// Linux-only `setsockopt(sock, IPPROTO_TCP, TCP_QUICKACK, ...)` call.
/// Not exposed by `socket2`, so this goes straight to `libc`.
#[cfg(target_os = "linux")]
fn set_tcp_quickack(socket: &Socket) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let flag: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_TCP,
            libc::TCP_QUICKACK,
            &flag as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Binds a TCP server per the port-hint rules in `socket_common.c`'s
/// `set_socket_bind_option`. Returns the listener and the port actually
/// bound (meaningful when the hint requested cycling or OS assignment).
pub async fn bind_server(hint: PortHint) -> Result<(TcpListener, u16), FederateError> {
    match hint {
        PortHint::Exact(port) => {
            let listener = bind_one(port).await?;
            let bound = listener.local_addr()?.port();
            Ok((listener, bound))
        }
        PortHint::OsAssigned => {
            let listener = bind_one(0).await?;
            let bound = listener.local_addr()?.port();
            Ok((listener, bound))
        }
        PortHint::CyclePorts => {
            let mut last_err = None;
            for attempt in 0..defaults::PORT_BIND_RETRY_LIMIT {
                let port = defaults::STARTING_PORT
                    .wrapping_add((attempt as u16) % defaults::MAX_NUM_PORT_ADDRESSES);
                match bind_one(port).await {
                    Ok(listener) => {
                        let bound = listener.local_addr()?.port();
                        return Ok((listener, bound));
                    }
                    Err(e) => {
                        last_err = Some(e);
                        tokio::time::sleep(defaults::PORT_BIND_RETRY_INTERVAL).await;
                    }
                }
            }
            Err(last_err.unwrap_or_else(|| {
                FederateError::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    "port cycling exhausted",
                ))
            }))
        }
    }
}

async fn bind_one(port: u16) -> Result<TcpListener, FederateError> {
    let addr: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
    configure_listening_socket(&socket)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    let std_listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(std_listener)?)
}

/// Accepts connections until `stop` signals, ignoring EAGAIN/EWOULDBLOCK
/// (`accept_loop` in the wire contract); any other error is fatal to the
/// caller. Unlike the original's tautological retry condition, only a
/// genuine would-block is retried.
pub async fn accept_one(listener: &TcpListener) -> Result<(TcpStream, SocketAddr), FederateError> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                stream.set_nodelay(true)?;
                return Ok((stream, addr));
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::Interrupted =>
            {
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Connects with retry, bounded by `CONNECT_TIMEOUT` overall and retried
/// every `CONNECT_RETRY_INTERVAL`, per `connect_to_socket`.
pub async fn connect_with_retry(addr: SocketAddr) -> Result<TcpStream, FederateError> {
    let deadline = tokio::time::Instant::now() + defaults::CONNECT_TIMEOUT;
    loop {
        match timeout(defaults::CONNECT_RETRY_INTERVAL, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Ok(Err(e)) => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(FederateError::Timeout(format!(
                        "could not connect to {addr}: {e}"
                    )));
                }
                tokio::time::sleep(defaults::CONNECT_RETRY_INTERVAL).await;
            }
            Err(_elapsed) => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(FederateError::Timeout(format!(
                        "could not connect to {addr} within {:?}",
                        defaults::CONNECT_TIMEOUT
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn os_assigned_port_is_reported_back() {
        let (listener, port) = bind_server(PortHint::OsAssigned).await.unwrap();
        assert_eq!(listener.local_addr().unwrap().port(), port);
        assert_ne!(port, 0);
    }

    /// P7: when the exact port is occupied, an exact-hint bind fails.
    #[tokio::test]
    async fn exact_bind_fails_when_the_port_is_taken() {
        let (_hold, taken_port) = bind_server(PortHint::OsAssigned).await.unwrap();
        let err = bind_server(PortHint::Exact(taken_port)).await;
        assert!(err.is_err());
    }

    /// Scenario 6 / P7: cycling finds a free port when the starting one is
    /// occupied, instead of failing outright.
    #[tokio::test]
    async fn cycling_finds_a_free_port_when_starting_port_is_taken() {
        let starting = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
        starting.set_reuse_address(true).unwrap();
        starting
            .bind(&SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), defaults::STARTING_PORT).into())
            .unwrap();
        starting.listen(128).unwrap();

        let (listener, port) = bind_server(PortHint::CyclePorts).await.unwrap();
        assert_ne!(port, defaults::STARTING_PORT);
        assert_eq!(listener.local_addr().unwrap().port(), port);
    }
}
