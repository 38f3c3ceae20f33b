use anyhow::Result;
use devcheck::common::setup::init_logging;
use devcheck::probe::{test_cpu, CpuProbeOptions};
use devcheck::Runtime;

fn main() -> Result<()> {
    // Placement lines are emitted at info level.
    init_logging("info");

    let mut runtime = Runtime::new();
    let report = test_cpu(&mut runtime, &CpuProbeOptions::default())?;
    println!("{}", report.render());
    Ok(())
}
