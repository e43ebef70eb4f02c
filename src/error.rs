use std::path::PathBuf;

/// Errors surfaced by the sampling engine.
///
/// Per-sample errors (`UnreadableMemory`, `TransientAttach`) are never fatal
/// to the sampler; only `TargetInaccessible`, `BadArgs` and `ConfigError`
/// abort the run.
#[derive(Debug, thiserror::Error)]
pub enum ProfilerError {
    #[error("usage error: {0}")]
    BadArgs(String),

    #[error("cannot access target process {pid}: {source}")]
    TargetInaccessible {
        pid: libc::pid_t,
        #[source]
        source: std::io::Error,
    },

    #[error("ptrace(PTRACE_ATTACH, {tid}) failed: {source}")]
    AttachFailed {
        tid: libc::pid_t,
        #[source]
        source: nix::Error,
    },

    #[error("short read of {got} bytes (wanted {want}) from /proc/{pid}/mem at {addr:#x}")]
    ShortRead {
        pid: libc::pid_t,
        addr: u64,
        want: usize,
        got: usize,
    },

    #[error("unreadable memory at {addr:#x} in process {pid}")]
    UnreadableMemory { pid: libc::pid_t, addr: u64 },

    #[error("remote memory writes are not supported ({addr:#x})")]
    WriteNotSupported { addr: u64 },

    #[error("failed to parse config file {path:?}: {source}")]
    ConfigError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProfilerError>;
