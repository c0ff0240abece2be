use std::collections::BTreeMap;

use crate::config::DaemonApiConfig;

pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_USER_AGENT: &str = "user-agent";

pub const EVENT_STREAM: &str = "text/event-stream";
pub const APPLICATION_JSON: &str = "application/json";

/// Which endpoint family the headers are for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Long-lived `text/event-stream` turn.
    Stream,
    /// Plain JSON query against the durable store.
    Query,
}

/// Build a deterministic header map for daemon requests.
///
/// Extra headers from the config are applied last and may override defaults.
pub fn build_headers(config: &DaemonApiConfig, kind: RequestKind) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();

    let accept = match kind {
        RequestKind::Stream => EVENT_STREAM,
        RequestKind::Query => APPLICATION_JSON,
    };
    headers.insert(HEADER_ACCEPT.to_owned(), accept.to_owned());
    if kind == RequestKind::Stream {
        headers.insert(HEADER_CONTENT_TYPE.to_owned(), APPLICATION_JSON.to_owned());
    }

    let ua = config
        .user_agent
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(default_user_agent);
    headers.insert(HEADER_USER_AGENT.to_owned(), ua);

    for (key, value) in &config.extra_headers {
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            continue;
        }
        headers.insert(key, value.trim().to_owned());
    }

    headers
}

fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match runtime_os_triplet() {
        Some((platform, release, arch)) => {
            format!("daemon-chat/{version} ({platform} {release}; {arch})")
        }
        None => format!("daemon-chat/{version}"),
    }
}

fn normalize_arch(arch: &str) -> String {
    match arch.to_ascii_lowercase().as_str() {
        "x86_64" | "amd64" => "x64".to_owned(),
        "x86" | "i386" | "i686" => "ia32".to_owned(),
        "aarch64" => "arm64".to_owned(),
        normalized => normalized.to_owned(),
    }
}

#[cfg(unix)]
fn runtime_os_triplet() -> Option<(String, String, String)> {
    use std::ffi::CStr;
    use std::mem::MaybeUninit;

    let mut raw = MaybeUninit::<libc::utsname>::uninit();
    // SAFETY: `uname` initializes the provided `utsname` struct on success.
    let rc = unsafe { libc::uname(raw.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }

    // SAFETY: We checked `uname` returned success, so `raw` is initialized.
    let raw = unsafe { raw.assume_init() };
    // SAFETY: `uname` provides NUL-terminated fixed-size C strings.
    let platform = unsafe { CStr::from_ptr(raw.sysname.as_ptr()) }
        .to_string_lossy()
        .to_lowercase();
    // SAFETY: `uname` provides NUL-terminated fixed-size C strings.
    let release = unsafe { CStr::from_ptr(raw.release.as_ptr()) }
        .to_string_lossy()
        .into_owned();
    // SAFETY: `uname` provides NUL-terminated fixed-size C strings.
    let arch = unsafe { CStr::from_ptr(raw.machine.as_ptr()) }.to_string_lossy();
    let arch = normalize_arch(&arch);

    if platform.is_empty() || release.is_empty() || arch.is_empty() {
        None
    } else {
        Some((platform, release, arch))
    }
}

#[cfg(not(unix))]
fn runtime_os_triplet() -> Option<(String, String, String)> {
    None
}
