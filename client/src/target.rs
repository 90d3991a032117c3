use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use log::info;
use senderlink::yamux::YamuxTransport;
use tokio::net::{TcpStream, UnixStream};
use tokio_util::compat::TokioAsyncReadCompatExt;
use tokio_vsock::{VsockAddr, VsockStream};

/// Where the client connects to.
///
/// Written as `unix:<path>`, `tcp:<host:port>` or `vsock:<cid>:<port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientTarget {
    Unix(PathBuf),
    Tcp(SocketAddr),
    Vsock { cid: u32, port: u32 },
}

impl FromStr for ClientTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| format!("expected <scheme>:<address>, got {s:?}"))?;

        match scheme {
            "unix" if !rest.is_empty() => Ok(ClientTarget::Unix(PathBuf::from(rest))),
            "tcp" => rest
                .parse()
                .map(ClientTarget::Tcp)
                .map_err(|err| format!("invalid TCP address {rest:?}: {err}")),
            "vsock" => {
                let (cid, port) = rest
                    .split_once(':')
                    .ok_or_else(|| format!("expected vsock:<cid>:<port>, got {s:?}"))?;
                Ok(ClientTarget::Vsock {
                    cid: cid.parse().map_err(|_| format!("invalid vsock CID {cid:?}"))?,
                    port: port.parse().map_err(|_| format!("invalid vsock port {port:?}"))?,
                })
            }
            _ => Err(format!("unsupported target {s:?}")),
        }
    }
}

impl fmt::Display for ClientTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientTarget::Unix(path) => write!(f, "unix:{}", path.display()),
            ClientTarget::Tcp(addr) => write!(f, "tcp:{}", addr),
            ClientTarget::Vsock { cid, port } => write!(f, "vsock:{}:{}", cid, port),
        }
    }
}

/// Opens the socket and starts a yamux transport on it.
pub async fn connect(target: &ClientTarget) -> io::Result<YamuxTransport> {
    let transport = match target {
        ClientTarget::Unix(path) => {
            let stream = UnixStream::connect(path).await?;
            YamuxTransport::new(stream.compat())
        }
        ClientTarget::Tcp(addr) => {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            YamuxTransport::new(stream.compat())
        }
        ClientTarget::Vsock { cid, port } => {
            let stream = VsockStream::connect(VsockAddr::new(*cid, *port)).await?;
            YamuxTransport::new(stream.compat())
        }
    };

    info!("Connected to {}", target);
    Ok(transport)
}
