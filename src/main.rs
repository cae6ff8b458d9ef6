//! vkcompute - run a bundled compute scenario on the first Vulkan device.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use vkcompute::scenario::preview;
use vkcompute::{
    shaders, ComputeConfig, ComputeJob, Result, Scenario, ShaderBinary, VulkanContext,
};

#[derive(Debug)]
enum Command {
    Run {
        scenario: Scenario,
        shader: Option<PathBuf>,
        config: ComputeConfig,
    },
    Report {
        config: ComputeConfig,
    },
    EmitShaders(PathBuf),
    Help,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("error: {message}");
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    let result = match command {
        Command::Run {
            scenario,
            shader,
            config,
        } => run(scenario, shader, config),
        Command::Report { config } => report(&config),
        Command::EmitShaders(dir) => emit_shaders(&dir),
        Command::Help => {
            print_usage();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(kind = ?e.kind(), "{e}");
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    println!("USAGE:");
    println!("  vkcompute [sum|copy] [OPTIONS]   Run a scenario (default: sum)");
    println!("  vkcompute report                 Print the device capability snapshot as JSON");
    println!("  vkcompute emit-shaders DIR       Write the bundled .spv kernels to DIR");
    println!();
    println!("OPTIONS:");
    println!("  --shader PATH           Load SPIR-V from PATH instead of the bundled kernel");
    println!("  --elements N            Override the element count");
    println!("  --allocator KIND        manual (default) or pooled");
    println!("  --wait MODE             fence (default) or idle");
    println!("  --timeout-ms N          Give up a fence wait after N milliseconds");
    println!("  --stats PATH            Write allocator statistics as JSON");
    println!("  --entry NAME            Shader entry point (default: main)");
    println!("  --validation            Enable VK_LAYER_KHRONOS_validation if installed");
    println!();
    println!("Log level follows RUST_LOG (default: info).");
}

fn parse_args(args: &[String]) -> std::result::Result<Command, String> {
    let mut args = args.iter().map(String::as_str).peekable();

    let mut scenario = Scenario::sum();
    match args.peek().copied() {
        Some("-h" | "--help" | "help") => return Ok(Command::Help),
        Some("emit-shaders") => {
            args.next();
            let dir = args.next().ok_or("emit-shaders needs a directory")?;
            return Ok(Command::EmitShaders(PathBuf::from(dir)));
        }
        Some("report") => {
            args.next();
            let mut builder = ComputeConfig::builder();
            for flag in args {
                match flag {
                    "--validation" => builder = builder.validation(true),
                    other => return Err(format!("unexpected argument {other:?}")),
                }
            }
            return Ok(Command::Report {
                config: builder.build(),
            });
        }
        Some(name) if !name.starts_with("--") => {
            scenario = Scenario::from_name(name).ok_or_else(|| format!("unknown scenario {name:?}"))?;
            args.next();
        }
        _ => {}
    }

    let mut builder = ComputeConfig::builder();
    let mut shader = None;
    while let Some(flag) = args.next() {
        let mut value = || args.next().ok_or_else(|| format!("{flag} needs a value"));
        match flag {
            "--shader" => shader = Some(PathBuf::from(value()?)),
            "--elements" => {
                let n: usize = value()?.parse().map_err(|e| format!("--elements: {e}"))?;
                if n == 0 {
                    return Err("--elements must be at least 1".into());
                }
                scenario = scenario.with_elements(n);
            }
            "--allocator" => builder = builder.allocation(value()?.parse()?),
            "--wait" => builder = builder.wait(value()?.parse()?),
            "--timeout-ms" => {
                let ms: u64 = value()?.parse().map_err(|e| format!("--timeout-ms: {e}"))?;
                builder = builder.timeout(Duration::from_millis(ms));
            }
            "--stats" => builder = builder.stats_path(value()?),
            "--entry" => builder = builder.entry_point(value()?),
            "--validation" => builder = builder.validation(true),
            other => return Err(format!("unexpected argument {other:?}")),
        }
    }

    Ok(Command::Run {
        scenario,
        shader,
        config: builder.build(),
    })
}

fn buffer_names(scenario: &Scenario) -> &'static [&'static str] {
    match scenario {
        Scenario::Sum { .. } => &["lhs", "rhs", "result"],
        Scenario::Copy { .. } => &["src", "dst"],
    }
}

fn run(scenario: Scenario, shader: Option<PathBuf>, config: ComputeConfig) -> Result<()> {
    tracing::info!(
        scenario = scenario.name(),
        elements = scenario.elements(),
        allocation = ?config.allocation,
        wait = ?config.wait,
        "starting"
    );
    let ctx = VulkanContext::new(&config)?;

    let shader = match shader {
        Some(path) => ShaderBinary::load(path)?,
        None => ShaderBinary::from_bytes(scenario.shader())?,
    };
    let job = ComputeJob::new(ctx, shader, config)?;

    let inputs = scenario.inputs();
    let refs: Vec<&[u32]> = inputs.iter().map(Vec::as_slice).collect();
    let output = job.run(&refs, scenario.elements())?;

    for (name, values) in buffer_names(&scenario).iter().zip(&output.buffers) {
        println!("{name:>6}: {}", preview(values));
    }
    scenario.verify(&output)?;
    println!(
        "{} verified over {} elements ({} workgroups, {:?})",
        scenario.name(),
        scenario.elements(),
        output.groups.total(),
        output.elapsed
    );
    Ok(())
}

fn report(config: &ComputeConfig) -> Result<()> {
    let ctx = VulkanContext::new(config)?;
    println!("{}", serde_json::to_string_pretty(&ctx.capabilities.report())?);
    Ok(())
}

fn emit_shaders(dir: &std::path::Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    for (name, bytes) in shaders::bundled() {
        let path = dir.join(name);
        std::fs::write(&path, bytes)?;
        println!("wrote {} ({} bytes)", path.display(), bytes.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkcompute::{AllocationStrategy, WaitMode};

    fn parse(line: &str) -> std::result::Result<Command, String> {
        let args: Vec<String> = line.split_whitespace().map(String::from).collect();
        parse_args(&args)
    }

    #[test]
    fn test_defaults_to_sum() {
        match parse("").unwrap() {
            Command::Run {
                scenario,
                shader,
                config,
            } => {
                assert_eq!(scenario, Scenario::sum());
                assert!(shader.is_none());
                assert_eq!(config.allocation, AllocationStrategy::Manual);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_full_run_line() {
        let command = parse(
            "copy --elements 32 --allocator pooled --wait idle --timeout-ms 1500 --stats s.json --shader k.spv --validation",
        )
        .unwrap();
        let Command::Run {
            scenario,
            shader,
            config,
        } = command
        else {
            panic!("expected a run command");
        };
        assert_eq!(scenario, Scenario::Copy { elements: 32 });
        assert_eq!(shader, Some(PathBuf::from("k.spv")));
        assert!(config.is_pooled());
        assert_eq!(config.wait, WaitMode::QueueIdle);
        assert_eq!(config.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.stats_path, Some(PathBuf::from("s.json")));
        assert!(config.validation);
    }

    #[test]
    fn test_flags_without_scenario() {
        let Command::Run { scenario, config, .. } = parse("--allocator pooled").unwrap() else {
            panic!("expected a run command");
        };
        assert_eq!(scenario, Scenario::sum());
        assert!(config.is_pooled());
    }

    #[test]
    fn test_subcommands() {
        assert!(matches!(parse("report").unwrap(), Command::Report { .. }));
        assert!(matches!(parse("--help").unwrap(), Command::Help));
        match parse("emit-shaders out").unwrap() {
            Command::EmitShaders(dir) => assert_eq!(dir, PathBuf::from("out")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(parse("square").is_err());
        assert!(parse("sum --elements").is_err());
        assert!(parse("sum --elements 0").is_err());
        assert!(parse("sum --allocator vma").is_err());
        assert!(parse("sum --bogus").is_err());
        assert!(parse("emit-shaders").is_err());
    }
}
