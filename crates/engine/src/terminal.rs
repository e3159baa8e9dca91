//! Terminal Bridge (C7, spec §4.6). The HTTP layer (out of scope) upgrades
//! a browser WebSocket and owns that half of the connection; this module's
//! job is only to open the matching helper terminal connection and copy
//! bytes both ways, grounded on the teacher's `shell_ws.rs` bidirectional
//! copy loop but over raw byte streams rather than a JSON-framed protocol
//! (the `{"type":"resize",...}` frame is forwarded to the helper unchanged,
//! per spec §4.3/§4.6 — this module does not parse it).

use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::Request;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioIo;
use hyperlocal::{UnixClientExt, UnixConnector, Uri as UnixUri};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("helper terminal connect failed: {0}")]
    Connect(String),
    #[error("helper refused terminal upgrade: status {0}")]
    Refused(u16),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opens a fresh helper terminal connection for (ctid, shell) and copies
/// bytes bidirectionally between it and `client` until either side closes.
/// `client` is whatever the HTTP layer's WebSocket upgrade hands us — this
/// function doesn't know or care that it's a WebSocket.
pub async fn bridge<C>(
    socket_path: &str,
    ctid: u32,
    shell: &str,
    mut client: C,
) -> Result<(), TerminalError>
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
{
    let helper_client: Client<UnixConnector, Empty<Bytes>> = Client::unix();
    let uri: hyper::Uri =
        UnixUri::new(socket_path, &format!("/v1/terminal?ctid={ctid}&shell={shell}")).into();

    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .header("connection", "Upgrade")
        .header("upgrade", "docktail-terminal")
        .body(Empty::<Bytes>::new())
        .map_err(|e| TerminalError::Connect(e.to_string()))?;

    let response = helper_client
        .request(request)
        .await
        .map_err(|e| TerminalError::Connect(e.to_string()))?;

    if !response.status().is_success() {
        return Err(TerminalError::Refused(response.status().as_u16()));
    }

    let upgraded = hyper::upgrade::on(response)
        .await
        .map_err(|e| TerminalError::Connect(e.to_string()))?;
    let mut helper_io = TokioIo::new(upgraded);

    let mut client_buf = [0u8; 8192];
    let mut helper_buf = [0u8; 8192];
    loop {
        tokio::select! {
            n = client.read(&mut client_buf) => {
                let n = n?;
                if n == 0 {
                    break;
                }
                helper_io.write_all(&client_buf[..n]).await?;
            }
            n = helper_io.read(&mut helper_buf) => {
                let n = n?;
                if n == 0 {
                    break;
                }
                client.write_all(&helper_buf[..n]).await?;
            }
        }
    }
    Ok(())
}
