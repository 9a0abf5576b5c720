use std::io::ErrorKind;

use churn::{ChurnConfig, Timer};
use shared::allocator::CountingAlloc;

#[global_allocator]
static ALLOCATOR: CountingAlloc = CountingAlloc::new();

fn main() -> std::io::Result<()> {
    log::init();

    let config = ChurnConfig::load()?;
    log::info!(
        "{} cycles of {} iterations, {} byte buffers",
        u64::from(config.cycles) + 1,
        config.iterations,
        config.buffer_len
    );

    let before = ALLOCATOR.stats();

    match Timer::new(config).run(std::io::stdout().lock()) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::BrokenPipe => {
            log::debug!("stdout was closed, stopping early");
        }
        Err(e) => return Err(e),
    }

    let stats = ALLOCATOR.stats().since(before);
    log::debug!(
        "{} allocations ({} bytes), {} frees",
        stats.allocations,
        stats.allocated_bytes,
        stats.deallocations
    );

    Ok(())
}
