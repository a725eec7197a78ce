use std::{
    fmt,
    fs::File,
    io::{self, Read, Write},
    net::{SocketAddr, ToSocketAddrs},
    path::Path,
    time::Duration,
};

use suppaftp::{FtpError, FtpStream, Mode, types::FileType};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// The subset of an FTP control connection the workflow needs.
///
/// A session is not safe for overlapping use: only one operation may be in
/// flight at a time.
pub trait FtpSession: Send {
    fn pwd(&mut self) -> io::Result<String>;
    fn cwd(&mut self, path: &str) -> io::Result<()>;
    /// Names of the entries under `path` (`NLST`).
    fn nlst(&mut self, path: &str) -> io::Result<Vec<String>>;
    /// Binary `RETR` of `path` into `dst`.
    fn retrieve(&mut self, path: &str, dst: &mut dyn Write) -> io::Result<u64>;
    /// Binary `STOR` of `src` as `path`.
    fn store(&mut self, path: &str, src: &mut dyn Read) -> io::Result<u64>;
    fn close(&mut self) -> io::Result<()>;
}

/// Opens sessions. One call to [`Connector::open`] is one connection attempt.
pub trait Connector {
    type Session: FtpSession;

    /// Server address, for diagnostics.
    fn address(&self) -> String;

    /// Connect and log in, giving up after `timeout`.
    fn open(&self, timeout: Duration) -> io::Result<Self::Session>;
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total number of connection attempts; zero counts as one
    pub max_attempts: u32,
    /// Timeout of each attempt and of every later socket operation
    pub timeout: Duration,
    /// Pause between two attempts
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(10),
        }
    }
}

/// The FTP server running inside the VM.
#[derive(Clone)]
pub struct FtpServer {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for FtpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FtpServer")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl Connector for FtpServer {
    type Session = FtpConnection;

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn open(&self, timeout: Duration) -> io::Result<FtpConnection> {
        let addr = resolve(&self.host, self.port)?;
        let mut stream = FtpStream::connect_timeout(addr, timeout).map_err(into_io)?;
        stream.get_ref().set_read_timeout(Some(timeout))?;
        stream.login(&self.user, &self.password).map_err(into_io)?;
        // Passive mode is required behind NAT and by Windows hosts.
        stream.set_mode(Mode::Passive);
        stream.transfer_type(FileType::Binary).map_err(into_io)?;
        Ok(FtpConnection { stream })
    }
}

fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no address found for {host}"),
        )
    })
}

fn into_io(e: FtpError) -> io::Error {
    match e {
        FtpError::ConnectionError(e) => e,
        other => io::Error::other(other),
    }
}

/// A logged-in suppaftp control connection.
pub struct FtpConnection {
    stream: FtpStream,
}

impl FtpSession for FtpConnection {
    fn pwd(&mut self) -> io::Result<String> {
        self.stream.pwd().map_err(into_io)
    }

    fn cwd(&mut self, path: &str) -> io::Result<()> {
        self.stream.cwd(path).map_err(into_io)
    }

    fn nlst(&mut self, path: &str) -> io::Result<Vec<String>> {
        self.stream.nlst(Some(path)).map_err(into_io)
    }

    fn retrieve(&mut self, path: &str, dst: &mut dyn Write) -> io::Result<u64> {
        self.stream
            .retr(path, |reader| {
                io::copy(reader, &mut *dst).map_err(FtpError::ConnectionError)
            })
            .map_err(into_io)
    }

    fn store(&mut self, path: &str, mut src: &mut dyn Read) -> io::Result<u64> {
        self.stream.put_file(path, &mut src).map_err(into_io)
    }

    fn close(&mut self) -> io::Result<()> {
        self.stream.quit().map_err(into_io)
    }
}

/// Open a session, retrying according to `policy`.
///
/// `prior` is closed first and any error from closing it is ignored, since a
/// previous connection is usually dead by the time we reconnect. The returned
/// session is the only live one.
pub fn connect<C: Connector>(
    connector: &C,
    policy: &RetryPolicy,
    prior: Option<C::Session>,
) -> Result<C::Session> {
    connect_with(connector, policy, prior, std::thread::sleep)
}

fn connect_with<C, F>(
    connector: &C,
    policy: &RetryPolicy,
    prior: Option<C::Session>,
    mut sleep: F,
) -> Result<C::Session>
where
    C: Connector,
    F: FnMut(Duration),
{
    if let Some(mut session) = prior {
        if let Err(e) = session.close() {
            debug!("Ignoring error while closing previous FTP session: {e}");
        }
    }

    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        info!(
            "Attempt {attempt} to connect to FTP server {}...",
            connector.address()
        );
        match connector.open(policy.timeout) {
            Ok(session) => {
                info!("✅ Connected and logged in");
                return Ok(session);
            }
            Err(e) if attempt < attempts => {
                warn!("Connection attempt {attempt} failed: {e}");
                info!("Retrying in {}s...", policy.retry_delay.as_secs_f64());
                sleep(policy.retry_delay);
                attempt += 1;
            }
            Err(source) => {
                warn!("Connection attempt {attempt} failed: {source}");
                return Err(Error::ConnectionFailure {
                    host: connector.address(),
                    attempts,
                    source,
                });
            }
        }
    }
}

/// Whether `path` is a directory, found by changing into it and back.
///
/// Any failure counts as "not a directory". The working directory is restored
/// whenever the check managed to enter `path`.
pub fn is_directory<S: FtpSession + ?Sized>(session: &mut S, path: &str) -> bool {
    let previous = match session.pwd() {
        Ok(previous) => previous,
        Err(e) => {
            debug!("PWD failed while probing {path}: {e}");
            return false;
        }
    };
    if session.cwd(path).is_err() {
        return false;
    }
    match session.cwd(&previous) {
        Ok(()) => true,
        Err(e) => {
            warn!("Could not return to {previous} after probing {path}: {e}");
            false
        }
    }
}

/// Download `remote` into the local file `local`.
///
/// A partially written file is removed when the transfer fails.
pub fn download_file<S: FtpSession + ?Sized>(
    session: &mut S,
    remote: &str,
    local: &Path,
) -> Result<u64> {
    let failure = |source| Error::TransferFailure {
        path: remote.to_string(),
        source,
    };

    let mut file = File::create(local).map_err(failure)?;
    match session.retrieve(remote, &mut file) {
        Ok(bytes) => {
            file.flush().map_err(failure)?;
            Ok(bytes)
        }
        Err(source) => {
            drop(file);
            if let Err(e) = std::fs::remove_file(local) {
                debug!("Could not remove partial download {local:?}: {e}");
            }
            Err(failure(source))
        }
    }
}

/// Upload the local file `local` as `remote`.
pub fn upload_file<S: FtpSession + ?Sized>(
    session: &mut S,
    local: &Path,
    remote: &str,
) -> Result<u64> {
    let mut file = File::open(local).map_err(|source| Error::TransferFailure {
        path: local.display().to_string(),
        source,
    })?;
    session
        .store(remote, &mut file)
        .map_err(|source| Error::TransferFailure {
            path: remote.to_string(),
            source,
        })
}
