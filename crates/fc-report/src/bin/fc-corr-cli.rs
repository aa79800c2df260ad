#![forbid(unsafe_code)]

use fc_report::{OutputFormat, ReportOptions, run_csv_report};
use fc_runtime::RuntimeMode;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut input: Option<String> = None;
    let mut options = ReportOptions::default();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--input" => {
                input = Some(args.next().ok_or("--input requires a csv path")?);
            }
            "--max-possible-values" => {
                let value = args
                    .next()
                    .ok_or("--max-possible-values requires a number")?;
                options.correlation.max_possible_values = value.parse()?;
            }
            "--max-report" => {
                let value = args.next().ok_or("--max-report requires a number")?;
                options.correlation.max_items_to_report = value.parse()?;
            }
            "--format" => {
                let value = args.next().ok_or("--format requires pairs or json")?;
                options.format = match value.as_str() {
                    "pairs" => OutputFormat::Pairs,
                    "json" => OutputFormat::Json,
                    _ => return Err(format!("unsupported format: {value}").into()),
                };
            }
            "--hardened" => {
                options.correlation.mode = RuntimeMode::Hardened;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}").into());
            }
        }
    }

    let input = input.ok_or("--input is required")?;
    let report = run_csv_report(&input, &options)?;
    print!("{}", report.render(options.format)?);
    Ok(())
}

fn print_help() {
    println!(
        "fc-corr-cli --input <csv> [--max-possible-values N] [--max-report N] \
         [--format pairs|json] [--hardened]"
    );
}
