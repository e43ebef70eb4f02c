//! The Sampler / Aggregator: the one object that consolidates what the
//! original implementation kept as process globals (`seen_tids`,
//! `cached_reads`, `read_only_maps`, `thread_infos`, `symbol_infos`,
//! `trace_map`). Owns the `Target`, the process-global `ModuleTable`, the
//! per-thread unwind state, the `SymbolResolver`, and the `Histogram`.

use std::collections::HashMap;
use std::thread::sleep;
use std::time::{Duration, Instant};

use libc::pid_t;
use log::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::freezer;
use crate::histogram::Histogram;
use crate::memory::Target;
use crate::modules::ModuleTable;
use crate::output;
use crate::symbols::SymbolResolver;
use crate::unwind::{self, Method, ThreadInfo};

pub struct Sampler {
    config: Config,
    target: Target,
    modules: ModuleTable,
    thread_infos: HashMap<pid_t, ThreadInfo>,
    symbols: SymbolResolver,
    histogram: Histogram,
    suspend_time: Duration,
    run_start: Instant,
}

impl Sampler {
    pub fn new(pid: pid_t, config: Config) -> Result<Self> {
        let target = Target::open(pid)?;
        Ok(Sampler {
            config,
            target,
            modules: ModuleTable::new(),
            thread_infos: HashMap::new(),
            symbols: SymbolResolver::new(),
            histogram: Histogram::new(),
            suspend_time: Duration::from_secs(0),
            run_start: Instant::now(),
        })
    }

    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    /// Runs the configured number of samples (`0` means forever), sleeping
    /// `1/freq` seconds between them. Returns once `max` samples have been
    /// taken, or propagates a fatal error from a freeze attempt.
    pub fn run(&mut self) -> Result<()> {
        self.run_start = Instant::now();
        let period = Duration::from_secs_f64(1.0 / f64::from(self.config.freq.max(1)));

        let mut i: u32 = 0;
        loop {
            self.run_one_sample(i)?;
            i += 1;

            let done = self.config.max != 0 && i >= self.config.max;
            if done {
                break;
            }
            sleep(period);
        }
        Ok(())
    }

    fn run_one_sample(&mut self, index: u32) -> Result<()> {
        let t0 = Instant::now();

        // freezer::freeze() already thaws whatever it managed to attach
        // before reporting a fatal error, so there's nothing to clean up
        // here beyond propagating it.
        let attached = freezer::freeze(self.target.pid())?;

        // Refresh the process-global module table from a fresh maps
        // snapshot before unwinding begins, so newly loaded shared objects
        // are resolvable this sample.
        self.target.refresh_maps();
        if let Ok(entries) = self.target.current_maps() {
            self.modules.sync(&entries);
        }

        for &tid in &attached {
            self.thread_infos
                .entry(tid)
                .or_insert_with(|| ThreadInfo::new_for(self.config.method));
        }

        let mut per_thread_ips: Vec<(pid_t, Vec<u64>)> = Vec::with_capacity(attached.len());
        for &tid in &attached {
            let info = self
                .thread_infos
                .get_mut(&tid)
                .expect("just inserted above");
            let ips = unwind::unwind(
                self.config.method,
                &mut self.target,
                &mut self.modules,
                tid,
                info,
                self.config.frame_limit,
            );
            per_thread_ips.push((tid, ips));
        }

        freezer::thaw(&attached);
        self.suspend_time += t0.elapsed();

        // Drop ThreadInfo for any tid that disappeared this sample.
        self.thread_infos.retain(|tid, _| attached.contains(tid));

        let mut rendered: Vec<(pid_t, Vec<(u64, String, u64)>)> = Vec::with_capacity(per_thread_ips.len());
        for (tid, ips) in &per_thread_ips {
            let mut names = Vec::with_capacity(ips.len());
            let mut frames = Vec::with_capacity(ips.len());
            for &ip in ips {
                let (name, offset) = self.symbols.resolve(&mut self.modules, ip);
                names.push(name.clone());
                frames.push((ip, name, offset));
            }
            self.histogram.record(&names);
            rendered.push((*tid, frames));
        }

        self.target.evict_volatile();

        if self.config.max == 1 {
            for (tid, frames) in &rendered {
                output::print_thread_backtrace(*tid, frames);
            }
        } else if (index + 1) % self.config.freq.max(1) == 0 {
            output::print_report(&self.histogram, self.suspend_time, self.run_start.elapsed());
        }

        info!(
            "sample {} done: {} threads, {} cached pages",
            index,
            attached.len(),
            self.target.cached_page_count()
        );
        if attached.is_empty() {
            warn!("no threads were attached this sample; target may be exiting");
        }

        Ok(())
    }

    pub fn method(&self) -> Method {
        self.config.method
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // requires ptrace against a live target
    fn single_sample_against_self_sleeping_child() {
        let child = std::process::Command::new("sleep")
            .arg("2")
            .spawn()
            .expect("spawn sleep");
        let pid = child.id() as pid_t;
        let config = Config {
            method: Method::FramePointer,
            freq: 1,
            max: 1,
            frame_limit: 20,
        };
        let mut sampler = Sampler::new(pid, config).expect("open target");
        sampler.run().expect("run one sample");
        assert_eq!(sampler.histogram().total_backtraces, sampler.histogram().sum());
    }
}
