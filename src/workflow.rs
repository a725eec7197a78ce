use std::{convert::Infallible, io, path::PathBuf};

use shell_escape::unix::escape;
use tracing::{debug, error, info, warn};

use crate::{
    config::Settings,
    error::{Error, Result},
    ftp::{self, Connector, FtpSession, upload_file},
    machine::{Decision, ExitStatus, Machine},
    mirror::{MirrorReport, mirror},
    prompt::{Operator, Prompt},
    runner::ErrorPolicy,
    utils::{create_dir, find_torrents},
};

/// Stops the torrent client left seeding in the VM.
pub const KILL_TORRENT_CLIENT: &str = "sudo pkill -f transmission-cli";

/// clamscan exit code meaning "infected files found".
const VIRUS_FOUND: i32 = 1;

/// How a workflow run ends: exit status plus what to do with the VM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Finish {
    pub status: ExitStatus,
    pub decision: Decision,
}

impl Finish {
    fn success() -> Self {
        Self {
            status: ExitStatus::Success,
            decision: Decision::Ask,
        }
    }

    fn failure() -> Self {
        Self {
            status: ExitStatus::Failure,
            decision: Decision::Ask,
        }
    }
}

/// Command starting a download of `descriptor` (already uploaded into
/// `remote_data_path`) as the FTP user, so the result is readable over FTP.
pub fn torrent_start_command(
    ftp_user: &str,
    remote_data_path: &str,
    descriptor: &str,
    peer_port: Option<u16>,
) -> String {
    let descriptor_path = escape(format!("{remote_data_path}/{descriptor}").into());
    let port = peer_port.map(|p| format!(" -p {p}")).unwrap_or_default();
    format!(
        "sudo -u {ftp_user} transmission-cli{port} -u 0 -w {remote_data_path} {descriptor_path}"
    )
}

/// Recursive scan reporting infected files only, at the lowest CPU priority.
pub fn scan_command(remote_data_path: &str) -> String {
    format!("sudo nice -n 19 clamscan -r -i {remote_data_path}")
}

/// Ask for the forwarded peer port until the answer is blank or a valid port.
pub fn ask_peer_port(prompt: &mut dyn Prompt) -> io::Result<Option<u16>> {
    loop {
        let answer = prompt.ask("Peer port (blank for none):")?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Ok(None);
        }
        match answer.parse::<u16>() {
            Ok(port) if port > 0 => return Ok(Some(port)),
            _ => warn!("Invalid port '{answer}'. Please try again or exit via Ctrl-C."),
        }
    }
}

/// Run the whole workflow and exit the program.
pub async fn run(settings: Settings, operator: Operator) -> Infallible {
    let connector = settings.ftp.clone();
    let mut machine = Machine::new(settings.machine.clone(), operator);
    let finish = execute(&settings, connector, &mut machine).await;
    machine.exit(finish.status, finish.decision).await
}

/// Every workflow step up to, but not including, the exit routine.
///
/// Steps that fail with [`ErrorPolicy::Exit`] still leave the program from
/// inside [`Machine::run`].
pub async fn execute<C>(settings: &Settings, connector: C, machine: &mut Machine) -> Finish
where
    C: Connector + Clone + Send + 'static,
    C::Session: 'static,
{
    greet(machine.operator());

    if machine.up().await.is_err() {
        return Finish::failure();
    }

    let torrents = match find_torrents(&settings.torrent_files_dir) {
        Ok(torrents) => torrents,
        Err(e) => {
            error!("Could not read {:?}: {e}", settings.torrent_files_dir);
            return Finish::failure();
        }
    };
    if torrents.is_empty() {
        warn!(
            "No .torrent files in {:?}, nothing to download",
            settings.torrent_files_dir
        );
        return Finish::success();
    }

    let mut peer_port = settings.peer_port;
    if machine.operator().is_interactive() {
        match confirm_downloads(machine.operator(), &torrents) {
            Ok(true) => {}
            Ok(false) => return Finish::success(),
            Err(e) => {
                error!("No answer to download question: {e}");
                return Finish::failure();
            }
        }
        match ask_peer_port(machine.operator().prompt()) {
            Ok(port) => peer_port = port.or(settings.peer_port),
            Err(e) => {
                error!("No answer to peer port question: {e}");
                return Finish::failure();
            }
        }
    }

    info!("Uploading torrent file(s) via FTP...");
    let session = match open_session(&connector, settings, None).await {
        Ok(session) => session,
        Err(e) => {
            error!("{e}");
            return Finish::failure();
        }
    };
    let (session, descriptors) = match upload_torrents(session, torrents).await {
        Ok(uploaded) => uploaded,
        Err(e) => {
            error!("{e}");
            return Finish::failure();
        }
    };
    info!("All torrents moved to the VM via FTP");

    let total = descriptors.len();
    for (index, descriptor) in descriptors.iter().enumerate() {
        info!("Starting download {} of {total}: {descriptor}", index + 1);
        let command = torrent_start_command(
            &settings.ftp.user,
            &settings.remote_data_path,
            descriptor,
            peer_port,
        );
        if machine
            .exec(&command, settings.download_timeout, ErrorPolicy::Exit)
            .await
            .is_err()
        {
            return Finish::failure();
        }
        info!("Download complete");

        info!("Killing transmission-cli process...");
        // Not fatal: stopping at the sentinel closes the remote shell, which
        // usually takes the client with it, and pkill exits 1 when nothing
        // matched.
        if let Err(e) = machine
            .exec(KILL_TORRENT_CLIENT, None, ErrorPolicy::Return)
            .await
        {
            warn!("Torrent client was not stopped cleanly: {e}");
        }
    }
    info!("All downloads complete");

    info!("Scanning downloaded files with ClamAV...");
    let scan = scan_command(&settings.remote_data_path);
    match machine.exec(&scan, None, ErrorPolicy::Return).await {
        Ok(_) => info!("All files passed virus scan"),
        Err(e) => {
            if e.exit_code() == Some(VIRUS_FOUND) {
                error!("VIRUS DETECTED! Aborting and destroying VM.");
            } else {
                error!("Virus scan did not complete ({e}). Aborting and destroying VM.");
            }
            return Finish {
                status: ExitStatus::Failure,
                decision: Decision::Destroy,
            };
        }
    }

    if let Err(e) = create_dir("downloads", &settings.local_downloads_dir) {
        error!(
            "Could not create {:?}: {e}",
            settings.local_downloads_dir
        );
        return Finish::failure();
    }

    info!("Retrieving clean files from VM...");
    // The upload connection has usually timed out during the downloads.
    let session = match open_session(&connector, settings, Some(session)).await {
        Ok(session) => session,
        Err(e) => {
            error!("{e}");
            return Finish::failure();
        }
    };
    let report = match retrieve(
        session,
        settings.ftp_user_remote_data_path.clone(),
        settings.local_downloads_dir.clone(),
    )
    .await
    {
        Ok(report) => report,
        Err(e) => {
            error!("{e}");
            return Finish::failure();
        }
    };

    if report.is_clean() {
        info!(
            "All files retrieved successfully ({} files, {} bytes)",
            report.files, report.bytes
        );
    } else {
        warn!(
            "Retrieved {} files; {} entries could not be retrieved",
            report.files,
            report.failures.len()
        );
    }

    Finish::success()
}

fn greet(operator: &mut Operator) {
    if !operator.is_interactive() {
        info!("Non-interactive mode");
        return;
    }
    match operator.prompt().ask("Enter your name:") {
        Ok(name) => operator
            .prompt()
            .say(&format!("Enjoy the downloads, {}.", name.trim())),
        Err(e) => debug!("No name given: {e}"),
    }
}

fn confirm_downloads(operator: &mut Operator, torrents: &[PathBuf]) -> io::Result<bool> {
    operator
        .prompt()
        .say("Do you want to continue with downloading the following?");
    for torrent in torrents {
        let name = torrent.file_name().unwrap_or_default().to_string_lossy();
        operator.prompt().say(&format!("  - {name}"));
    }
    operator.confirm("Enter your answer (y/n):")
}

/// FTP calls block, so they run on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Io(io::Error::other(e)))?
}

async fn open_session<C>(
    connector: &C,
    settings: &Settings,
    prior: Option<C::Session>,
) -> Result<C::Session>
where
    C: Connector + Clone + Send + 'static,
    C::Session: 'static,
{
    let connector = connector.clone();
    let policy = settings.retry.clone();
    blocking(move || ftp::connect(&connector, &policy, prior)).await
}

/// Upload every descriptor into the FTP user's home. Returns the session and
/// the uploaded file names, in upload order.
async fn upload_torrents<S>(mut session: S, torrents: Vec<PathBuf>) -> Result<(S, Vec<String>)>
where
    S: FtpSession + 'static,
{
    blocking(move || {
        let mut names = Vec::with_capacity(torrents.len());
        for path in &torrents {
            let name = path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned();
            info!("Uploading {path:?}...");
            upload_file(&mut session, path, &name)?;
            info!("Uploaded {name}");
            names.push(name);
        }
        Ok((session, names))
    })
    .await
}

async fn retrieve<S>(mut session: S, remote_root: String, local_root: PathBuf) -> Result<MirrorReport>
where
    S: FtpSession + 'static,
{
    blocking(move || {
        let report = mirror(&mut session, &remote_root, &local_root);
        if let Err(e) = session.close() {
            debug!("Ignoring error while closing FTP session: {e}");
        }
        Ok(report)
    })
    .await
}
