//! Turmoil-based transport helpers.
//!
//! The channel driver is generic over any `AsyncRead + AsyncWrite` stream,
//! so simulation just hands it Turmoil's TCP types. Turmoil provides
//! deterministic delivery, virtual latency, and fault injection while
//! keeping real stream semantics.

use std::io;

use turmoil::net::{TcpListener, TcpStream};

/// Simulation transport over Turmoil's deterministic TCP.
pub struct SimTransport {
    listener: TcpListener,
}

impl SimTransport {
    /// Bind to an address inside the simulation (e.g. `"0.0.0.0:4840"`).
    ///
    /// # Errors
    ///
    /// Returns an error if the address is in use or invalid.
    pub async fn bind(address: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { listener })
    }

    /// Accept one inbound connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener is shut down.
    pub async fn accept(&self) -> io::Result<TcpStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(stream)
    }

    /// Connect to a simulated host (e.g. `"server:4840"`).
    ///
    /// # Errors
    ///
    /// Returns an error if the host is unreachable or refuses.
    pub async fn connect_to(address: &str) -> io::Result<TcpStream> {
        TcpStream::connect(address).await
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[test]
    fn sim_transport_echo() {
        let mut sim = turmoil::Builder::new().build();

        sim.host("server", || async {
            let transport = SimTransport::bind("0.0.0.0:4840").await?;
            let stream = transport.accept().await?;
            let (mut recv, mut send) = tokio::io::split(stream);

            let mut buf = [0u8; 128];
            let n = recv.read(&mut buf).await?;
            send.write_all(&buf[..n]).await?;

            Ok(())
        });

        sim.client("client", async {
            let stream = SimTransport::connect_to("server:4840").await?;
            let (mut recv, mut send) = tokio::io::split(stream);

            let message = b"open secure channel";
            send.write_all(message).await?;

            let mut buf = vec![0u8; message.len()];
            recv.read_exact(&mut buf).await?;
            assert_eq!(&buf, message);

            Ok(())
        });

        sim.run().expect("simulation failed");
    }
}
