use anyhow::{Context, Result};
use devcheck::common::setup::{parse_configuration_options, CommandLineOptions, OutputFormat, Probe};
use devcheck::device::{placement_spec, select_device};
use devcheck::probe::{check_gpu, test_cpu, CpuProbeOptions, GpuOutcome};
use devcheck::{print_green, print_red, print_yellow, Runtime};
use log::info;

fn run_gpu(runtime: &mut Runtime, options: &CommandLineOptions) -> Result<()> {
    let report = check_gpu(runtime, options.gpu_index).context("GPU probe failed")?;
    match options.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!("{}", report.render());
            match &report.outcome {
                GpuOutcome::NoGpu => {
                    print_yellow!("No GPU visible to libtorch");
                }
                GpuOutcome::Restricted { device_name, .. } => {
                    print_green!("Restricted to {}", device_name);
                }
                GpuOutcome::RuntimeError { .. } => {
                    print_red!("GPU visibility left unchanged");
                }
            }
        }
    }
    Ok(())
}

fn run_cpu(runtime: &mut Runtime, options: &CommandLineOptions) -> Result<()> {
    let device = if options.device.eq_ignore_ascii_case("auto") {
        placement_spec(select_device())
    } else {
        options.device.clone()
    };
    let cpu_options = CpuProbeOptions {
        device,
        log_device_placement: options.log_device_placement,
    };
    let report = test_cpu(runtime, &cpu_options)
        .with_context(|| format!("Placement probe on {} failed", cpu_options.device))?;
    match options.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => println!("{}", report.render()),
    }
    Ok(())
}

fn main() -> Result<()> {
    let options = parse_configuration_options()?;
    info!("Running {:?} probe", options.probe);

    let mut runtime = Runtime::new();
    match options.probe {
        Probe::Gpu => run_gpu(&mut runtime, &options)?,
        Probe::Cpu => run_cpu(&mut runtime, &options)?,
        Probe::All => {
            run_gpu(&mut runtime, &options)?;
            run_cpu(&mut runtime, &options)?;
        }
    }
    Ok(())
}
