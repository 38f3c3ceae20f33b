use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command, ValueEnum, builder::EnumValueParser, value_parser};
use env_logger::{Builder, Env};
use std::io::Write;

/// Which diagnostic to run
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Probe {
    /// List GPUs and restrict the runtime to one of them
    Gpu,
    /// Pin a small matmul to a device and log its placement
    Cpu,
    /// GPU probe followed by the CPU probe on the same runtime
    All,
}

/// How reports are written to stdout
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// The plain lines the probes print
    Text,

    /// One JSON document per report
    Json,
}

/// These options define the inputs from the user.
#[derive(Clone, Debug)]
pub struct CommandLineOptions {
    pub probe: Probe,
    pub gpu_index: usize,
    pub device: String,
    pub format: OutputFormat,
    pub log_device_placement: bool,
    pub log_level: String,
}

/// Installs the env_logger backend. `RUST_LOG` wins over `default_level`.
pub fn init_logging(default_level: &str) {
    let _ = Builder::from_env(Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            let file = record.file().unwrap_or("unknown");
            let line = record.line().unwrap_or(0);
            writeln!(
                buf,
                "{} [{}:{}] {}",
                record.level(),
                file,
                line,
                record.args()
            )
        })
        .try_init();
}

pub fn command() -> Command {
    Command::new("devcheck")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Lists the compute devices libtorch can see and checks tensor placement.")
        .subcommand(Command::new("gpu").about("List GPUs and restrict the runtime to one of them"))
        .subcommand(Command::new("cpu").about("Run a pinned matmul and log where it was placed"))
        .subcommand(Command::new("all").about("Run the GPU probe, then the CPU probe"))
        .arg(
            Arg::new("gpu_index")
                .long("gpu-index")
                .value_name("NUMBER")
                .help("Physical GPU to keep visible")
                .value_parser(value_parser!(usize))
                .default_value("0")
                .global(true),
        )
        .arg(
            Arg::new("device")
                .long("device")
                .value_name("SPEC")
                .help("Placement scope for the CPU probe, e.g. /CPU:0, /GPU:0, or auto")
                .default_value("/CPU:0")
                .global(true),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .value_parser(EnumValueParser::<OutputFormat>::new())
                .help("Output format: 'text' or 'json'")
                .default_value("text")
                .global(true),
        )
        .arg(
            Arg::new("log_device_placement")
                .long("log-device-placement")
                .help("Log the device each op runs on (default)")
                .action(ArgAction::SetTrue)
                .overrides_with("no_log_device_placement")
                .global(true),
        )
        .arg(
            Arg::new("no_log_device_placement")
                .long("no-log-device-placement")
                .help("Do not log the device each op runs on")
                .action(ArgAction::SetTrue)
                .overrides_with("log_device_placement")
                .global(true),
        )
        .arg(
            Arg::new("log_level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Default log filter when RUST_LOG is unset")
                .default_value("info")
                .global(true),
        )
}

pub fn options_from_matches(matches: &ArgMatches) -> Result<CommandLineOptions> {
    let probe = match matches.subcommand_name() {
        Some("gpu") => Probe::Gpu,
        Some("cpu") => Probe::Cpu,
        Some("all") | None => Probe::All,
        Some(other) => anyhow::bail!("Unknown probe '{}'", other),
    };

    let gpu_index = *matches
        .get_one::<usize>("gpu_index")
        .context("gpu_index has a default value")?;
    let device = matches
        .get_one::<String>("device")
        .context("device has a default value")?
        .to_string();
    let format = matches
        .get_one::<OutputFormat>("format")
        .copied()
        .unwrap_or(OutputFormat::Text);
    let log_device_placement = !matches.get_flag("no_log_device_placement");
    let log_level = matches
        .get_one::<String>("log_level")
        .context("log_level has a default value")?
        .to_string();

    Ok(CommandLineOptions {
        probe,
        gpu_index,
        device,
        format,
        log_device_placement,
        log_level,
    })
}

/// Parses the process arguments and installs logging.
pub fn parse_configuration_options() -> Result<CommandLineOptions> {
    let matches = command().get_matches();
    let options = options_from_matches(&matches)?;
    init_logging(&options.log_level);
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CommandLineOptions {
        let matches = command().try_get_matches_from(args.iter().copied()).unwrap();
        options_from_matches(&matches).unwrap()
    }

    #[test]
    fn test_defaults() {
        let options = parse(&["devcheck"]);
        assert_eq!(options.probe, Probe::All);
        assert_eq!(options.gpu_index, 0);
        assert_eq!(options.device, "/CPU:0");
        assert_eq!(options.format, OutputFormat::Text);
        assert!(options.log_device_placement);
        assert_eq!(options.log_level, "info");
    }

    #[test]
    fn test_subcommand_with_global_flags() {
        let options = parse(&[
            "devcheck",
            "cpu",
            "--device",
            "/GPU:1",
            "--format",
            "json",
            "--no-log-device-placement",
        ]);
        assert_eq!(options.probe, Probe::Cpu);
        assert_eq!(options.device, "/GPU:1");
        assert_eq!(options.format, OutputFormat::Json);
        assert!(!options.log_device_placement);
    }

    #[test]
    fn test_placement_logging_flags_last_one_wins() {
        let options = parse(&["devcheck", "cpu", "--log-device-placement"]);
        assert!(options.log_device_placement);

        let options = parse(&[
            "devcheck",
            "cpu",
            "--log-device-placement",
            "--no-log-device-placement",
        ]);
        assert!(!options.log_device_placement);

        let options = parse(&[
            "devcheck",
            "cpu",
            "--no-log-device-placement",
            "--log-device-placement",
        ]);
        assert!(options.log_device_placement);
    }

    #[test]
    fn test_gpu_index_must_be_a_number() {
        assert!(command()
            .try_get_matches_from(["devcheck", "gpu", "--gpu-index", "first"])
            .is_err());
    }

    #[test]
    fn test_verify_command() {
        command().debug_assert();
    }
}
