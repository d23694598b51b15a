//! TCP socket setup.
//!
//! # Example
//!
//! ```ignore
//! use iso8583_connector::transport::{bind, connect};
//!
//! let listener = bind("127.0.0.1:0".parse()?).await?;
//! let stream = connect(listener.local_addr()?).await?;
//! ```

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

use crate::error::Result;

/// Connect to `addr` with Nagle's algorithm disabled.
pub async fn connect(addr: SocketAddr) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    configure(&stream)?;
    Ok(stream)
}

/// Bind a listening socket.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    Ok(TcpListener::bind(addr).await?)
}

/// Accept the next connection with Nagle's algorithm disabled.
pub async fn accept(listener: &TcpListener) -> Result<(TcpStream, SocketAddr)> {
    let (stream, peer) = listener.accept().await?;
    configure(&stream)?;
    Ok((stream, peer))
}

/// Socket options for message traffic: small frames must not wait for
/// coalescing.
fn configure(stream: &TcpStream) -> Result<()> {
    stream.set_nodelay(true)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_and_accept() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (client, accepted) = tokio::join!(connect(addr), accept(&listener));
        let client = client.unwrap();
        let (server, peer) = accepted.unwrap();

        assert!(client.nodelay().unwrap());
        assert!(server.nodelay().unwrap());
        assert_eq!(peer, client.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(connect(addr).await.is_err());
    }
}
