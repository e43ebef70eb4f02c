//! `pmprof`: a non-cooperative sampling profiler for a running Linux
//! process.

use std::path::PathBuf;
use std::process::exit;

use anyhow::Context;
use libc::pid_t;
use structopt::StructOpt;

use pmprof::config::{self, Config, FileConfig};
use pmprof::error::ProfilerError;
use pmprof::sampler::Sampler;
use pmprof::unwind::Method;

#[derive(StructOpt)]
#[structopt(
    name = "pmprof",
    about = "A non-cooperative sampling profiler for a running Linux process"
)]
struct Opt {
    /// Use the DWARF (CFI-based) unwinder. This is the default.
    #[structopt(long)]
    libunwind: bool,

    /// Use the x86_64 frame-pointer chain walker instead of the DWARF unwinder.
    #[structopt(long, conflicts_with = "libunwind")]
    framepointer: bool,

    /// Total number of samples to take. 0 means run until interrupted.
    #[structopt(long)]
    max: Option<u32>,

    /// Samples per second.
    #[structopt(long)]
    freq: Option<u32>,

    /// Path to a TOML configuration file. Defaults to
    /// `$HOME/.config/pmprof/config.toml` if present.
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv).
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u8,

    /// Suppress all logging below warnings.
    #[structopt(short, long)]
    quiet: bool,

    /// Process id of the target to sample.
    pid: pid_t,
}

impl Opt {
    fn cli_method(&self) -> Option<Method> {
        if self.framepointer {
            Some(Method::FramePointer)
        } else if self.libunwind {
            Some(Method::Library)
        } else {
            None
        }
    }
}

fn init_logging(opt: &Opt) {
    let level = if opt.quiet {
        "warn"
    } else {
        match opt.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn resolve_config(opt: &Opt) -> pmprof::Result<Config> {
    if opt.pid <= 0 {
        return Err(ProfilerError::BadArgs(format!(
            "<pid> must be a positive integer, got {}",
            opt.pid
        )));
    }

    let path = opt
        .config
        .clone()
        .or_else(config::default_config_path);

    let file_config = match path {
        Some(p) => FileConfig::load(&p)?,
        None => FileConfig::default(),
    };

    let mut cfg = file_config.merge_into(Config::default());
    if let Some(method) = opt.cli_method() {
        cfg.method = method;
    }
    if let Some(max) = opt.max {
        cfg.max = max;
    }
    if let Some(freq) = opt.freq {
        if freq == 0 {
            return Err(ProfilerError::BadArgs("--freq must be >= 1".to_string()));
        }
        cfg.freq = freq;
    }
    Ok(cfg)
}

fn run() -> anyhow::Result<()> {
    let opt = Opt::from_args();
    init_logging(&opt);

    let config = resolve_config(&opt).context("failed to resolve configuration")?;
    log::info!(
        "sampling pid {} with method={:?} freq={} max={}",
        opt.pid,
        config.method,
        config.freq,
        config.max
    );

    let mut sampler = Sampler::new(opt.pid, config).context("failed to attach to target")?;
    sampler.run().context("sampling loop aborted")
}

fn main() {
    // Every error that survives to this point is fatal by construction:
    // per-sample recoverable errors (attach races, short reads, resolver
    // misses) never propagate out of `Sampler::run`. `anyhow`'s `Context`
    // chain gives the operator the failing step in addition to the
    // underlying `ProfilerError`'s own message.
    if let Err(e) = run() {
        eprintln!("pmprof: {:#}", e);
        exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opt(pid: pid_t, freq: Option<u32>) -> Opt {
        Opt {
            libunwind: false,
            framepointer: false,
            max: None,
            freq,
            config: Some(PathBuf::from("/nonexistent/pmprof/config.toml")),
            verbose: 0,
            quiet: false,
            pid,
        }
    }

    #[test]
    fn zero_or_negative_pid_is_a_usage_error() {
        assert!(resolve_config(&opt(0, None)).is_err());
        assert!(resolve_config(&opt(-1, None)).is_err());
    }

    #[test]
    fn positive_pid_with_zero_freq_is_still_a_usage_error() {
        assert!(resolve_config(&opt(1, Some(0))).is_err());
    }

    #[test]
    fn positive_pid_resolves_to_defaults_with_no_config_file() {
        let cfg = resolve_config(&opt(1, None)).expect("valid args resolve");
        assert_eq!(cfg.freq, Config::default().freq);
    }
}
