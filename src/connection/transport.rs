use std::env;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream, UnixStream};

use crate::error::{Error, ErrorKind, Result};
use crate::sasl::MAX_LINE_LENGTH;

const ENV_STARTER_ADDRESS: &str = "DBUS_STARTER_ADDRESS";
const ENV_SESSION_BUS: &str = "DBUS_SESSION_BUS_ADDRESS";
const ENV_SYSTEM_BUS: &str = "DBUS_SYSTEM_BUS_ADDRESS";
const DEFAULT_SYSTEM_BUS: &str = "unix:path=/var/run/dbus/system_bus_socket";

/// Resolve the session bus address from the environment.
pub(crate) fn session_bus_address() -> Result<String> {
    for key in [ENV_STARTER_ADDRESS, ENV_SESSION_BUS] {
        if let Ok(address) = env::var(key) {
            return Ok(address);
        }
    }

    Err(ErrorKind::MissingBus.into())
}

/// Resolve the system bus address from the environment, falling back to the
/// well-known default.
pub(crate) fn system_bus_address() -> String {
    for key in [ENV_STARTER_ADDRESS, ENV_SYSTEM_BUS] {
        if let Ok(address) = env::var(key) {
            return address;
        }
    }

    DEFAULT_SYSTEM_BUS.to_owned()
}

/// The address family restriction of a TCP address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Family {
    Ipv4,
    Ipv6,
}

/// A parsed D-Bus server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Address {
    /// A Unix domain socket bound to a filesystem path.
    Unix { path: PathBuf },
    /// A Unix domain socket in the abstract namespace (Linux).
    UnixAbstract { name: String },
    /// A TCP endpoint.
    Tcp {
        host: String,
        port: u16,
        family: Option<Family>,
    },
}

impl Address {
    /// Parse a `transport:key=value,...` address.
    pub(crate) fn parse(address: &str) -> Result<Self> {
        let invalid = || Error::from(ErrorKind::InvalidAddress(address.into()));

        let Some((transport, rest)) = address.split_once(':') else {
            return Err(invalid());
        };

        let mut pairs = Vec::new();

        if !rest.is_empty() {
            for pair in rest.split(',') {
                let Some((key, value)) = pair.split_once('=') else {
                    return Err(invalid());
                };

                pairs.push((key, value));
            }
        }

        let get = |key: &str| pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| *v);

        match transport {
            "unix" => {
                if let Some(path) = get("path") {
                    return Ok(Address::Unix {
                        path: PathBuf::from(path),
                    });
                }

                if let Some(name) = get("abstract") {
                    return Ok(Address::UnixAbstract {
                        name: name.to_owned(),
                    });
                }

                Err(invalid())
            }
            "tcp" => {
                let Some(host) = get("host") else {
                    return Err(invalid());
                };

                let Some(port) = get("port").and_then(|p| p.parse::<u16>().ok()) else {
                    return Err(invalid());
                };

                let family = match get("family") {
                    None => None,
                    Some("ipv4") => Some(Family::Ipv4),
                    Some("ipv6") => Some(Family::Ipv6),
                    Some(..) => return Err(invalid()),
                };

                Ok(Address::Tcp {
                    host: host.to_owned(),
                    port,
                    family,
                })
            }
            _ => Err(invalid()),
        }
    }
}

/// A byte-stream transport to a D-Bus server.
pub(crate) enum Transport {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Transport {
    /// Open a transport to the given address.
    pub(crate) async fn connect(address: &Address) -> Result<Self> {
        match address {
            Address::Unix { path } => Ok(Transport::Unix(UnixStream::connect(path).await?)),
            Address::UnixAbstract { name } => Self::connect_abstract(name),
            Address::Tcp { host, port, family } => {
                let mut candidates = lookup_host((host.as_str(), *port)).await?;

                let candidate = candidates.find(|addr| match family {
                    None => true,
                    Some(Family::Ipv4) => matches!(addr, SocketAddr::V4(..)),
                    Some(Family::Ipv6) => matches!(addr, SocketAddr::V6(..)),
                });

                let Some(candidate) = candidate else {
                    return Err(io::Error::from(io::ErrorKind::AddrNotAvailable).into());
                };

                Ok(Transport::Tcp(TcpStream::connect(candidate).await?))
            }
        }
    }

    #[cfg(target_os = "linux")]
    fn connect_abstract(name: &str) -> Result<Self> {
        use std::os::linux::net::SocketAddrExt;

        let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
        let stream = std::os::unix::net::UnixStream::connect_addr(&addr)?;
        stream.set_nonblocking(true)?;
        Ok(Transport::Unix(UnixStream::from_std(stream)?))
    }

    #[cfg(not(target_os = "linux"))]
    fn connect_abstract(_: &str) -> Result<Self> {
        Err(io::Error::from(io::ErrorKind::Unsupported).into())
    }

    /// Whether the transport could carry file descriptors. This engine
    /// never negotiates fd passing, the predicate only reports transport
    /// capability.
    #[allow(dead_code)]
    pub(crate) fn supports_fd_passing(&self) -> bool {
        matches!(self, Transport::Unix(..))
    }

    pub(crate) async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Transport::Unix(stream) => stream.write_all(buf).await,
            Transport::Tcp(stream) => stream.write_all(buf).await,
        }
    }

    pub(crate) async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Unix(stream) => stream.read(buf).await,
            Transport::Tcp(stream) => stream.read(buf).await,
        }
    }

    /// Split into independently owned read and write halves.
    pub(crate) fn into_split(self) -> (ReadHalf, WriteHalf) {
        match self {
            Transport::Unix(stream) => {
                let (read, write) = stream.into_split();
                (ReadHalf::Unix(read), WriteHalf::Unix(write))
            }
            Transport::Tcp(stream) => {
                let (read, write) = stream.into_split();
                (ReadHalf::Tcp(read), WriteHalf::Tcp(write))
            }
        }
    }
}

/// The owned read half of a [`Transport`].
pub(crate) enum ReadHalf {
    Unix(tokio::net::unix::OwnedReadHalf),
    Tcp(tokio::net::tcp::OwnedReadHalf),
}

impl ReadHalf {
    pub(crate) async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ReadHalf::Unix(read) => read.read(buf).await,
            ReadHalf::Tcp(read) => read.read(buf).await,
        }
    }
}

/// The owned write half of a [`Transport`].
pub(crate) enum WriteHalf {
    Unix(tokio::net::unix::OwnedWriteHalf),
    Tcp(tokio::net::tcp::OwnedWriteHalf),
}

impl WriteHalf {
    pub(crate) async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            WriteHalf::Unix(write) => write.write_all(buf).await,
            WriteHalf::Tcp(write) => write.write_all(buf).await,
        }
    }

    pub(crate) async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            WriteHalf::Unix(write) => write.shutdown().await,
            WriteHalf::Tcp(write) => write.shutdown().await,
        }
    }
}

/// A line-oriented view over a transport used during the SASL dialogue.
///
/// Bytes read past a line terminator are retained and handed back with the
/// transport so the frame decoder sees them.
pub(crate) struct LineStream {
    transport: Transport,
    buf: Vec<u8>,
}

impl LineStream {
    pub(crate) fn new(transport: Transport) -> Self {
        Self {
            transport,
            buf: Vec::new(),
        }
    }

    pub(crate) async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.transport.write_all(bytes).await?;
        Ok(())
    }

    /// Read one CRLF-terminated line, returned without its terminator.
    pub(crate) async fn read_line(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some(at) = self.buf.iter().position(|&b| b == b'\n') {
                if at + 1 > MAX_LINE_LENGTH {
                    return Err(ErrorKind::SaslLineTooLong.into());
                }

                let mut line: Vec<u8> = self.buf.drain(..at + 1).collect();
                line.pop();

                if line.last() == Some(&b'\r') {
                    line.pop();
                }

                return Ok(line);
            }

            if self.buf.len() >= MAX_LINE_LENGTH {
                return Err(ErrorKind::SaslLineTooLong.into());
            }

            let mut chunk = [0u8; 512];
            let n = self.transport.read(&mut chunk).await?;

            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }

            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Give the transport back along with any bytes read past the last
    /// line.
    pub(crate) fn into_parts(self) -> (Transport, Vec<u8>) {
        (self.transport, self.buf)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::{Address, Family, LineStream, Transport};

    #[test]
    fn parse_unix_addresses() {
        assert_eq!(
            Address::parse("unix:path=/var/run/dbus/system_bus_socket").unwrap(),
            Address::Unix {
                path: "/var/run/dbus/system_bus_socket".into()
            }
        );
        assert_eq!(
            Address::parse("unix:abstract=/tmp/dbus-test").unwrap(),
            Address::UnixAbstract {
                name: "/tmp/dbus-test".into()
            }
        );
        assert!(Address::parse("unix:").is_err());
        assert!(Address::parse("unix:guid=1234").is_err());
    }

    #[test]
    fn parse_tcp_addresses() {
        assert_eq!(
            Address::parse("tcp:host=localhost,port=12345").unwrap(),
            Address::Tcp {
                host: "localhost".into(),
                port: 12345,
                family: None
            }
        );
        assert_eq!(
            Address::parse("tcp:host=127.0.0.1,port=1,family=ipv4").unwrap(),
            Address::Tcp {
                host: "127.0.0.1".into(),
                port: 1,
                family: Some(Family::Ipv4)
            }
        );
        assert!(Address::parse("tcp:host=localhost").is_err());
        assert!(Address::parse("tcp:host=localhost,port=notaport").is_err());
        assert!(Address::parse("tcp:host=localhost,port=1,family=ipx").is_err());
        assert!(Address::parse("nonsense").is_err());
    }

    #[tokio::test]
    async fn lines_are_read_up_to_the_terminator() {
        let (client, mut server) = tokio::net::UnixStream::pair().unwrap();
        let mut stream = LineStream::new(Transport::Unix(client));

        server.write_all(b"OK 1234\r\nDATA").await.unwrap();
        assert_eq!(stream.read_line().await.unwrap(), b"OK 1234");

        server.write_all(b" 00\r\n").await.unwrap();
        assert_eq!(stream.read_line().await.unwrap(), b"DATA 00");
    }

    #[tokio::test]
    async fn overlong_sasl_lines_abort() {
        let (client, mut server) = tokio::net::UnixStream::pair().unwrap();
        let mut stream = LineStream::new(Transport::Unix(client));

        server.write_all(&[b'A'; 3000]).await.unwrap();

        let error = stream.read_line().await.unwrap_err();
        assert!(error.to_string().contains("2048"));
    }
}
