//! Remote-host plumbing: the static host book and the single-operation
//! SSH session used by the remote-command tool.
//!
//! A `RemoteSession` is scoped to one logical operation: open, run one
//! command and/or fetch one file, close. Close is idempotent and also
//! happens on drop, so every exit path releases the transport.

use serde::Deserialize;
use ssh2::Session;
use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

const SSH_PORT: u16 = 22;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Auth or network failure while opening the session. Fatal to the
    /// current operation; no retry at this layer.
    #[error("connect to {host} failed: {detail}")]
    Connect { host: String, detail: String },
    /// Non-zero remote exit or transport drop mid-command. Not fatal to
    /// the session; the captured output is surfaced as text.
    #[error("remote command exited with status {status}: {output}")]
    Exec { status: i32, output: String },
    /// Remote path missing or permission denied during a file fetch.
    #[error("transfer of {remote_path} failed: {detail}")]
    Transfer {
        remote_path: String,
        detail: String,
    },
    /// Host name absent from the host book. Never silently substituted.
    #[error("host {0:?} is not registered")]
    HostNotFound(String),
    #[error("host book {path} is unreadable: {detail}")]
    Registry { path: String, detail: String },
}

/// Connection credentials for one named host.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HostEntry {
    pub username: String,
    pub key_path: String,
}

/// Static host-name → credentials mapping, loaded once at startup from a
/// TOML host book:
///
/// ```toml
/// [hosts.helium]
/// username = "root"
/// key_path = "/home/ops/.ssh/id_ed25519"
/// ```
#[derive(Debug, Clone, Default)]
pub struct HostRegistry {
    hosts: BTreeMap<String, HostEntry>,
}

#[derive(Debug, Deserialize)]
struct HostBook {
    #[serde(default)]
    hosts: BTreeMap<String, HostEntry>,
}

impl HostRegistry {
    pub fn load(path: &Path) -> Result<Self, RemoteError> {
        let raw = fs::read_to_string(path).map_err(|e| RemoteError::Registry {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        let book: HostBook = toml::from_str(&raw).map_err(|e| RemoteError::Registry {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        Ok(Self { hosts: book.hosts })
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, HostEntry)>) -> Self {
        Self {
            hosts: entries.into_iter().collect(),
        }
    }

    /// Exact, case-sensitive lookup. A miss is an error, not a default.
    pub fn lookup(&self, host: &str) -> Result<&HostEntry, RemoteError> {
        self.hosts
            .get(host)
            .ok_or_else(|| RemoteError::HostNotFound(host.to_string()))
    }

    pub fn host_names(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// An open, authenticated connection to one host.
pub struct RemoteSession {
    host: String,
    session: Option<Session>,
}

impl RemoteSession {
    /// Connect and authenticate with a private key file.
    pub fn open(host: &str, username: &str, key_path: &Path) -> Result<Self, RemoteError> {
        let connect_err = |detail: String| RemoteError::Connect {
            host: host.to_string(),
            detail,
        };

        let addr = (host, SSH_PORT)
            .to_socket_addrs()
            .map_err(|e| connect_err(format!("address resolution failed: {e}")))?
            .next()
            .ok_or_else(|| connect_err("address resolution returned no results".to_string()))?;
        let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .map_err(|e| connect_err(e.to_string()))?;

        let mut session = Session::new().map_err(|e| connect_err(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| connect_err(format!("handshake failed: {e}")))?;
        session
            .userauth_pubkey_file(username, None, key_path, None)
            .map_err(|e| connect_err(format!("key authentication failed: {e}")))?;
        if !session.authenticated() {
            return Err(connect_err("authentication rejected".to_string()));
        }

        Ok(Self {
            host: host.to_string(),
            session: Some(session),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn session(&self) -> Result<&Session, RemoteError> {
        self.session.as_ref().ok_or_else(|| RemoteError::Connect {
            host: self.host.clone(),
            detail: "session already closed".to_string(),
        })
    }

    /// Run one command, blocking until the remote process exits. Returns
    /// trimmed stdout; a non-zero exit surfaces stdout+stderr as
    /// `RemoteError::Exec`.
    pub fn run(&mut self, command: &str) -> Result<String, RemoteError> {
        let session = self.session()?;
        let mut channel = session.channel_session().map_err(|e| RemoteError::Exec {
            status: -1,
            output: format!("channel open failed: {e}"),
        })?;
        channel.exec(command).map_err(|e| RemoteError::Exec {
            status: -1,
            output: format!("exec failed: {e}"),
        })?;

        let mut stdout = String::new();
        channel
            .read_to_string(&mut stdout)
            .map_err(|e| RemoteError::Exec {
                status: -1,
                output: format!("stdout read failed: {e}"),
            })?;
        let mut stderr = String::new();
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .map_err(|e| RemoteError::Exec {
                status: -1,
                output: format!("stderr read failed: {e}"),
            })?;

        channel.wait_close().map_err(|e| RemoteError::Exec {
            status: -1,
            output: format!("channel close failed: {e}"),
        })?;
        let status = channel.exit_status().unwrap_or(-1);
        if status != 0 {
            let mut output = stdout.trim().to_string();
            if !stderr.trim().is_empty() {
                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str(stderr.trim());
            }
            return Err(RemoteError::Exec { status, output });
        }

        Ok(stdout.trim().to_string())
    }

    /// Fetch one remote file to a local path over SFTP. Returns bytes
    /// written; validating a non-empty transfer is the caller's job. A
    /// failed transfer removes the partial local file.
    pub fn fetch(&mut self, remote_path: &str, local_path: &Path) -> Result<u64, RemoteError> {
        let transfer_err = |detail: String| RemoteError::Transfer {
            remote_path: remote_path.to_string(),
            detail,
        };

        let session = self.session()?;
        let sftp = session.sftp().map_err(|e| transfer_err(e.to_string()))?;
        let remote = sftp
            .open(Path::new(remote_path))
            .map_err(|e| transfer_err(e.to_string()))?;

        copy_to_local(remote, remote_path, local_path)
    }

    /// Release the transport. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(None, "logpilot done", None);
        }
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Stream a remote file to `local_path`. A mid-stream failure must not
/// leave a truncated file behind, so the partial file is unlinked before
/// the error is surfaced.
fn copy_to_local(
    mut remote: impl Read,
    remote_path: &str,
    local_path: &Path,
) -> Result<u64, RemoteError> {
    let transfer_err = |detail: String| RemoteError::Transfer {
        remote_path: remote_path.to_string(),
        detail,
    };

    let mut local = fs::File::create(local_path).map_err(|e| transfer_err(e.to_string()))?;
    let mut buf = [0u8; 32 * 1024];
    let mut written: u64 = 0;
    let copied = loop {
        let n = match remote.read(&mut buf) {
            Ok(0) => break Ok(written),
            Ok(n) => n,
            Err(e) => break Err(transfer_err(e.to_string())),
        };
        if let Err(e) = local.write_all(&buf[..n]) {
            break Err(transfer_err(e.to_string()));
        }
        written += n as u64;
    };
    if copied.is_err() {
        drop(local);
        let _ = fs::remove_file(local_path);
    }
    copied
}
