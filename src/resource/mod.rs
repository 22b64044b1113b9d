//! Concrete resource kinds for viaduct manifests
//!
//! Every kind implements [`declarative::ResourceDescriptor`]:
//! - `preflight_checks` validates required fields and fills defaults
//! - `run` converges the system, reporting `NoChange` when already satisfied
//!
//! Filesystem kinds share the permission helpers below; kinds that fetch
//! over HTTP share [`fetch`].

use anyhow::{Context, Result, bail};
use declarative::ResourceLog;
use std::path::Path;
use std::process::{Command, Stdio};

pub mod apt;
pub mod deb;
pub mod directory;
pub mod download;
pub mod execute;
pub mod file;
pub mod git;
pub mod link;
pub mod package;

pub use apt::AptRepository;
pub use deb::Deb;
pub use directory::Directory;
pub use download::Download;
pub use execute::Execute;
pub use file::File;
pub use git::Git;
pub use link::Link;
pub use package::{Package, PackageManager};

/// Fail unless a required string attribute is set
pub(crate) fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("Required parameter: {}", name);
    }
    Ok(())
}

/// Run a command to completion, forwarding stderr
pub(crate) fn run_status(cmd: &mut Command, show_stdout: bool) -> Result<()> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    cmd.stdout(if show_stdout {
        Stdio::inherit()
    } else {
        Stdio::null()
    })
    .stderr(Stdio::inherit());

    let status = cmd
        .status()
        .with_context(|| format!("Failed to run {}", program))?;
    if !status.success() {
        bail!("{} exited with {}", program, status);
    }
    Ok(())
}

/// Set permission bits on `path`; returns true if they changed
#[cfg(unix)]
pub(crate) fn ensure_mode(log: &ResourceLog, path: &Path, mode: u32) -> Result<bool> {
    use std::os::unix::fs::PermissionsExt;

    let meta = std::fs::metadata(path)
        .with_context(|| format!("Failed to read metadata: {}", path.display()))?;
    let msg = format!("{} -> {:o}", path.display(), mode);

    if meta.permissions().mode() & 0o7777 == mode {
        log.noop(msg);
        return Ok(false);
    }

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set permissions: {}", path.display()))?;
    log.info(msg);
    Ok(true)
}

#[cfg(not(unix))]
pub(crate) fn ensure_mode(log: &ResourceLog, path: &Path, _mode: u32) -> Result<bool> {
    log.debug(format!("{}: permission bits not supported here", path.display()));
    Ok(false)
}

/// Set owner and group on `path`; returns true if either changed
///
/// Unset owner or group is left as is. Names are resolved through the
/// system databases (including NSS sources); numeric IDs are used directly.
#[cfg(unix)]
pub(crate) fn ensure_owner(
    log: &ResourceLog,
    path: &Path,
    owner: Option<&str>,
    group: Option<&str>,
) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;

    if owner.is_none() && group.is_none() {
        return Ok(false);
    }

    let uid = owner.map(resolve_uid).transpose()?;
    let gid = group.map(resolve_gid).transpose()?;

    let meta = std::fs::metadata(path)
        .with_context(|| format!("Failed to read metadata: {}", path.display()))?;
    let target_uid = uid.unwrap_or(meta.uid());
    let target_gid = gid.unwrap_or(meta.gid());
    let msg = format!("{} -> {}:{}", path.display(), target_uid, target_gid);

    if meta.uid() == target_uid && meta.gid() == target_gid {
        log.noop(msg);
        return Ok(false);
    }

    std::os::unix::fs::chown(path, uid, gid)
        .with_context(|| format!("Failed to change owner: {}", path.display()))?;
    log.info(msg);
    Ok(true)
}

#[cfg(not(unix))]
pub(crate) fn ensure_owner(
    _log: &ResourceLog,
    path: &Path,
    owner: Option<&str>,
    group: Option<&str>,
) -> Result<bool> {
    if owner.is_some() || group.is_some() {
        bail!("Ownership not supported on this platform: {}", path.display());
    }
    Ok(false)
}

/// Resolve a user name or numeric UID through the system user database
#[cfg(unix)]
pub(crate) fn resolve_uid(owner: &str) -> Result<u32> {
    if let Ok(uid) = owner.parse::<u32>() {
        return Ok(uid);
    }
    lookup_user(owner)?.with_context(|| format!("Unknown user: {}", owner))
}

/// Resolve a group name or numeric GID through the system group database
#[cfg(unix)]
pub(crate) fn resolve_gid(group: &str) -> Result<u32> {
    if let Ok(gid) = group.parse::<u32>() {
        return Ok(gid);
    }
    lookup_group(group)?.with_context(|| format!("Unknown group: {}", group))
}

/// Largest buffer handed to the `get*nam_r` calls
#[cfg(unix)]
const MAX_LOOKUP_BUFFER: usize = 1 << 20;

/// Error codes some C libraries return for a name that does not exist
#[cfg(unix)]
fn entry_missing(rc: libc::c_int) -> bool {
    matches!(rc, libc::ENOENT | libc::ESRCH | libc::EBADF | libc::EPERM)
}

#[cfg(unix)]
fn lookup_user(name: &str) -> Result<Option<u32>> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;

    let c_name = CString::new(name).with_context(|| format!("Invalid user name: {}", name))?;
    let mut buf: Vec<libc::c_char> = vec![0; 1024];

    loop {
        let mut pwd: MaybeUninit<libc::passwd> = MaybeUninit::uninit();
        let mut result: *mut libc::passwd = std::ptr::null_mut();

        // SAFETY: every pointer is valid for the call and buf.len() is its real size
        let rc = unsafe {
            libc::getpwnam_r(
                c_name.as_ptr(),
                pwd.as_mut_ptr(),
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };

        if rc == libc::ERANGE && buf.len() < MAX_LOOKUP_BUFFER {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 && !entry_missing(rc) {
            return Err(std::io::Error::from_raw_os_error(rc))
                .with_context(|| format!("Failed to look up user {}", name));
        }
        if rc != 0 || result.is_null() {
            return Ok(None);
        }
        // SAFETY: result points into pwd, filled by a successful call
        return Ok(Some(unsafe { (*result).pw_uid }));
    }
}

#[cfg(unix)]
fn lookup_group(name: &str) -> Result<Option<u32>> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;

    let c_name = CString::new(name).with_context(|| format!("Invalid group name: {}", name))?;
    let mut buf: Vec<libc::c_char> = vec![0; 1024];

    loop {
        let mut grp: MaybeUninit<libc::group> = MaybeUninit::uninit();
        let mut result: *mut libc::group = std::ptr::null_mut();

        // SAFETY: every pointer is valid for the call and buf.len() is its real size
        let rc = unsafe {
            libc::getgrnam_r(
                c_name.as_ptr(),
                grp.as_mut_ptr(),
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };

        if rc == libc::ERANGE && buf.len() < MAX_LOOKUP_BUFFER {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 && !entry_missing(rc) {
            return Err(std::io::Error::from_raw_os_error(rc))
                .with_context(|| format!("Failed to look up group {}", name));
        }
        if rc != 0 || result.is_null() {
            return Ok(None);
        }
        // SAFETY: result points into grp, filled by a successful call
        return Ok(Some(unsafe { (*result).gr_gid }));
    }
}

/// True when running with an effective UID of 0
#[cfg(unix)]
pub(crate) fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub(crate) fn is_root() -> bool {
    false
}

/// Fail unless running as root
pub(crate) fn require_root(kind: &str, root: bool) -> Result<()> {
    if !root {
        bail!("{} resource must be run as root", kind);
    }
    Ok(())
}

/// Read one `KEY=value` field from `/etc/os-release` content
pub(crate) fn os_release_field(content: &str, key: &str) -> Option<String> {
    content.lines().find_map(|line| {
        line.strip_prefix(key)
            .and_then(|rest| rest.strip_prefix('='))
            .map(|value| value.trim().trim_matches('"').to_string())
    })
}

/// Upper bound on a downloaded body
const MAX_DOWNLOAD_SIZE: u64 = 512 * 1024 * 1024;

/// Download a URL into memory
pub(crate) fn fetch(url: &str) -> Result<Vec<u8>> {
    let agent = ureq::Agent::new_with_defaults();

    let mut response = agent
        .get(url)
        .header("User-Agent", "viaduct")
        .call()
        .with_context(|| format!("Failed to download {}", url))?;

    response
        .body_mut()
        .with_config()
        .limit(MAX_DOWNLOAD_SIZE)
        .read_to_vec()
        .with_context(|| format!("Failed to read response body from {}", url))
}

/// Serve `body` over HTTP on localhost for every request; returns the URL
#[cfg(test)]
pub(crate) fn serve(status: &'static str, body: &'static [u8]) -> String {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/artifact", listener.local_addr().unwrap());

    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap_or(0) > 2 {
                line.clear();
            }

            let head = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(body);
        }
    });

    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_resolve_root_user() {
        assert_eq!(resolve_uid("root").unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_unknown_names_rejected() {
        let err = resolve_uid("viaduct-no-such-user").unwrap_err();
        assert!(err.to_string().contains("Unknown user: viaduct-no-such-user"));
        let err = resolve_gid("viaduct-no-such-group").unwrap_err();
        assert!(err.to_string().contains("Unknown group: viaduct-no-such-group"));
    }

    #[cfg(unix)]
    #[test]
    fn test_numeric_ids_skip_lookup() {
        assert_eq!(resolve_uid("4242").unwrap(), 4242);
        assert_eq!(resolve_gid("17").unwrap(), 17);
    }

    #[test]
    fn test_require_root() {
        assert!(require_root("Package", true).is_ok());
        let err = require_root("Package", false).unwrap_err();
        assert_eq!(err.to_string(), "Package resource must be run as root");
    }

    #[test]
    fn test_os_release_field() {
        let content = "NAME=\"Ubuntu\"\nID_LIKE=debian\nID=ubuntu\nVERSION_CODENAME=noble\n";
        assert_eq!(os_release_field(content, "ID").as_deref(), Some("ubuntu"));
        assert_eq!(os_release_field(content, "NAME").as_deref(), Some("Ubuntu"));
        assert_eq!(os_release_field(content, "VERSION_CODENAME").as_deref(), Some("noble"));
        assert_eq!(os_release_field(content, "UBUNTU_CODENAME"), None);
    }

    #[test]
    fn test_fetch() {
        let url = serve("200 OK", b"payload");
        assert_eq!(fetch(&url).unwrap(), b"payload");

        let missing = serve("404 Not Found", b"");
        let err = fetch(&missing).unwrap_err();
        assert!(err.to_string().contains("Failed to download"));
    }

    #[test]
    fn test_require() {
        assert!(require("Path", "/tmp/x").is_ok());
        let err = require("Path", "  ").unwrap_err();
        assert_eq!(err.to_string(), "Required parameter: Path");
    }

    #[test]
    fn test_run_status_reports_exit() {
        run_status(Command::new("true").arg("ignored"), false).unwrap();
        let err = run_status(&mut Command::new("false"), false).unwrap_err();
        assert!(err.to_string().starts_with("false exited with"));
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_mode() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("f");
        std::fs::write(&path, "x").unwrap();
        let log = ResourceLog::new("File", "Create");

        assert!(ensure_mode(&log, &path, 0o600).unwrap());
        assert!(!ensure_mode(&log, &path, 0o600).unwrap());
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_owner_unchanged_for_current_owner() {
        use std::os::unix::fs::MetadataExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("f");
        std::fs::write(&path, "x").unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        let log = ResourceLog::new("File", "Create");

        let uid = meta.uid().to_string();
        let gid = meta.gid().to_string();
        assert!(!ensure_owner(&log, &path, Some(&uid), Some(&gid)).unwrap());
        assert!(!ensure_owner(&log, &path, None, None).unwrap());
    }
}
