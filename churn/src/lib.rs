//! Allocation-churn timer.
//!
//! Every cycle allocates `iterations` short-lived buffers and reports how long that took, in
//! whole milliseconds. The numbers only mean something if the allocations really happen, so each
//! buffer gets one byte written into it and is passed through [`std::hint::black_box`] before it
//! is dropped. That write is a benchmarking artifact, not a meaningful value.

use std::{
    fmt, hint,
    io::{self, Write},
    ops::RangeInclusive,
    time::{Duration, Instant},
};

mod config;

pub use config::ChurnConfig;

/// Observes every churn buffer right after its first byte is written.
pub trait Probe {
    fn inspect(&mut self, iteration: u32, buffer: &[u8]);
}

/// The probe used outside of tests: does nothing and compiles away.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProbe;

impl Probe for NoProbe {
    #[inline(always)]
    fn inspect(&mut self, _iteration: u32, _buffer: &[u8]) {}
}

/// The byte written into the buffer of iteration `iteration`.
#[inline]
pub const fn churn_byte(iteration: u32) -> u8 {
    (iteration % 255) as u8
}

/// Time one cycle: `iterations` allocations of a zeroed `buffer_len`-byte buffer.
///
/// No buffer outlives its own iteration.
pub fn run_cycle<P: Probe>(iterations: u32, buffer_len: usize, probe: &mut P) -> Duration {
    let start = Instant::now();

    for i in 0..iterations {
        let mut churn = vec![0u8; buffer_len];

        if let Some(first) = churn.first_mut() {
            *first = churn_byte(i);
        }

        probe.inspect(i, &churn);
        hint::black_box(churn);
    }

    start.elapsed()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSample {
    pub cycle: u32,
    /// Elapsed time, truncated to whole milliseconds.
    pub elapsed_ms: u128,
}

impl CycleSample {
    pub fn report<'a>(&self, label: &'a str) -> Report<'a> {
        Report {
            sample: *self,
            label,
        }
    }
}

/// One output line, `"<cycle> <label> Time: <elapsed_ms> ms"`.
pub struct Report<'a> {
    sample: CycleSample,
    label: &'a str,
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} Time: {} ms",
            self.sample.cycle, self.label, self.sample.elapsed_ms
        )
    }
}

pub struct Timer {
    config: ChurnConfig,
}

impl Timer {
    pub fn new(config: ChurnConfig) -> Self {
        Timer { config }
    }

    pub fn config(&self) -> &ChurnConfig {
        &self.config
    }

    /// Lazily run the cycles, one per call to `next`.
    pub fn samples(&self) -> Samples<'_, NoProbe> {
        self.samples_with(NoProbe)
    }

    pub fn samples_with<P: Probe>(&self, probe: P) -> Samples<'_, P> {
        Samples {
            config: &self.config,
            cycles: 0..=self.config.cycles,
            probe,
        }
    }

    /// Run every cycle, writing and flushing one line per cycle.
    pub fn run<W: Write>(&self, mut out: W) -> io::Result<()> {
        for sample in self.samples() {
            log::trace!("cycle {} took {} ms", sample.cycle, sample.elapsed_ms);

            writeln!(out, "{}", sample.report(&self.config.label))?;
            out.flush()?;
        }

        Ok(())
    }
}

pub struct Samples<'a, P> {
    config: &'a ChurnConfig,
    cycles: RangeInclusive<u32>,
    probe: P,
}

impl<P> Samples<'_, P> {
    pub fn probe(&self) -> &P {
        &self.probe
    }
}

impl<P: Probe> Iterator for Samples<'_, P> {
    type Item = CycleSample;

    fn next(&mut self) -> Option<Self::Item> {
        let cycle = self.cycles.next()?;

        let elapsed = run_cycle(
            self.config.iterations,
            self.config.buffer_len,
            &mut self.probe,
        );

        Some(CycleSample {
            cycle,
            elapsed_ms: elapsed.as_millis(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.cycles.size_hint()
    }
}
