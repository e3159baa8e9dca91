//! Peer credentials — (uid, pid) of the process on the other end of the
//! Unix socket, obtained via SO_PEERCRED at accept time (spec §4.3).

use tokio::net::UnixStream;

#[derive(Debug, Clone, Copy)]
pub struct PeerCred {
    pub uid: u32,
    pub pid: i32,
}

pub fn peer_cred(stream: &UnixStream) -> std::io::Result<PeerCred> {
    let cred = nix::sys::socket::getsockopt(stream, nix::sys::socket::sockopt::PeerCredentials)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    Ok(PeerCred {
        uid: cred.uid(),
        pid: cred.pid(),
    })
}

impl PeerCred {
    /// All paths except `/v1/health` require peer uid = 0 or uid = the
    /// designated service user (spec §4.3).
    pub fn is_authorized(&self, service_uid: u32) -> bool {
        self.uid == 0 || self.uid == service_uid
    }
}
