use anyhow::Result;
use devcheck::common::setup::init_logging;
use devcheck::probe::check_gpu;
use devcheck::Runtime;

fn main() -> Result<()> {
    init_logging("warn");

    let mut runtime = Runtime::new();
    let report = check_gpu(&mut runtime, 0)?;
    println!("{}", report.render());
    Ok(())
}
