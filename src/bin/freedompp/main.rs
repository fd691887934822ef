use std::{path::Path, process::ExitCode};

use clap::Parser;
use error_stack::ResultExt;
use freedompp::config::PpConfig;
use freedompp::diag_table::{files_from_diag_table, read_diag_table, variables_from_diag_table};
use freedompp::io::ExtractionMode;
use freedompp::logging::init_logging;
use freedompp::naming::{YearRange, ARCHIVE_SUFFIX};
use freedompp::pipeline;

mod cli;

fn main() -> ExitCode {
    let clargs = cli::Cli::parse();
    init_logging(clargs.verbosity.log_level_filter());
    if let Err(e) = main_inner(clargs) {
        eprintln!("ERROR: {e:?}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn main_inner(clargs: cli::Cli) -> error_stack::Result<(), CliError> {
    match clargs.command {
        cli::Commands::Ts(ts_cli) => ts_driver(ts_cli),
        cli::Commands::Av(av_cli) => av_driver(av_cli),
        cli::Commands::DiagFiles(diag_cli) => diag_driver(diag_cli),
        cli::Commands::ConfigTemplate(template_cli) => PpConfig::write_template(&template_cli.template_file)
            .change_context_lazy(|| CliError::context("Error writing the configuration template")),
    }
}

fn ts_driver(cli: cli::TsCli) -> error_stack::Result<(), CliError> {
    let cfg = load_config(&cli.product)?;
    let years = resolve_years(cli.product.years, &cfg.history_dir)?;
    let base = &cli.product.base_name;
    for field in cli.product.fields.iter() {
        pipeline::write_timeseries(field, base, years, cli.product.freq, &cfg).change_context_lazy(|| {
            CliError::context(format!("Error writing the time series of '{field}' from {base}"))
        })?;
    }
    Ok(())
}

fn av_driver(cli: cli::AvCli) -> error_stack::Result<(), CliError> {
    let cfg = load_config(&cli.product)?;
    let years = resolve_years(cli.product.years, &cfg.history_dir)?;
    let base = &cli.product.base_name;
    let do_annual = matches!(cli.kind, cli::AverageChoice::Annual | cli::AverageChoice::Both);
    let do_monthly = matches!(cli.kind, cli::AverageChoice::Monthly | cli::AverageChoice::Both);

    for field in cli.product.fields.iter() {
        if do_annual {
            pipeline::write_annual_average(field, base, years, cli.product.freq, &cfg).change_context_lazy(
                || CliError::context(format!("Error writing the annual average of '{field}' from {base}")),
            )?;
        }
        if do_monthly {
            pipeline::write_monthly_climatology(field, base, years, cli.product.freq, &cfg)
                .change_context_lazy(|| {
                    CliError::context(format!("Error writing the monthly climatology of '{field}' from {base}"))
                })?;
        }
    }
    Ok(())
}

fn diag_driver(cli: cli::DiagFilesCli) -> error_stack::Result<(), CliError> {
    let text = read_diag_table(&cli.diag_table).change_context(CliError::DiagTable)?;
    if cli.fields {
        let fields = variables_from_diag_table(&text).change_context(CliError::DiagTable)?;
        for f in fields {
            println!("{}\t{}", f.variable, f.file);
        }
    } else {
        let files = files_from_diag_table(&text).change_context(CliError::DiagTable)?;
        for f in files {
            println!("{f}");
        }
    }
    Ok(())
}

/// Load the configuration file, if any, and apply the command line overrides.
fn load_config(product: &cli::ProductCli) -> error_stack::Result<PpConfig, CliError> {
    let mut cfg = match &product.config {
        Some(path) => PpConfig::from_toml_file(path).change_context_lazy(|| {
            CliError::context(format!("Error loading configuration file: {}", path.display()))
        })?,
        None => PpConfig::default(),
    };

    if let Some(dir) = &product.history_dir {
        cfg.history_dir = dir.clone();
    }
    if let Some(dir) = &product.pp_dir {
        cfg.pp_dir = dir.clone();
    }
    if let Some(kind) = &product.file_kind {
        cfg.file_kind = kind.clone();
    }
    if let Some(dir) = &product.scratch_dir {
        cfg.extraction.mode = ExtractionMode::Disk;
        cfg.extraction.scratch_dir = Some(dir.clone());
    }
    log::debug!("Configuration: {cfg:?}");
    Ok(cfg)
}

fn resolve_years(years: cli::YearsArg, history_dir: &Path) -> error_stack::Result<YearRange, CliError> {
    match years {
        cli::YearsArg::Range(range) => Ok(range),
        cli::YearsArg::Auto => {
            let range = years_in_history(history_dir)?;
            log::info!("Found archives for years {range} in {}", history_dir.display());
            Ok(range)
        }
    }
}

/// Find the first and last years with a `YYYY0101.nc.tar` archive in `history_dir`.
fn years_in_history(history_dir: &Path) -> error_stack::Result<YearRange, CliError> {
    if !history_dir.is_dir() {
        error_stack::bail!(CliError::NoArchives(history_dir.display().to_string()));
    }

    let pattern = format!("{}/*0101{ARCHIVE_SUFFIX}", history_dir.display());
    let matches = glob::glob(&pattern)
        .change_context_lazy(|| CliError::context(format!("Error globbing for archives with {pattern}")))?;

    let mut years = vec![];
    for entry in matches {
        let entry = entry.change_context_lazy(|| CliError::context("Error globbing for archives"))?;
        let year = entry
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(ARCHIVE_SUFFIX))
            .and_then(|n| n.strip_suffix("0101"))
            .and_then(|y| y.parse::<i32>().ok());
        match year {
            Some(y) => years.push(y),
            None => log::debug!("Ignoring {}, not a yearly archive", entry.display()),
        }
    }

    let (Some(&first), Some(&last)) = (years.iter().min(), years.iter().max()) else {
        error_stack::bail!(CliError::NoArchives(history_dir.display().to_string()));
    };
    let expected = (last - first + 1) as usize;
    if years.len() != expected {
        log::warn!(
            "Only {} of the {expected} archives for years {first} to {last} are present",
            years.len()
        );
    }
    YearRange::new(first, last).change_context_lazy(|| CliError::context("Error forming the year range"))
}

/// Program error type
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// No yearly archives could be found in the history directory.
    #[error("No yearly history archives found in {0}")]
    NoArchives(String),

    /// The diag_table could not be read or parsed.
    #[error("Could not list the contents of the diag_table")]
    DiagTable,

    /// Wrapper type used to add information to an inner error.
    #[error("{0}")]
    Context(String),
}

impl CliError {
    fn context<S: ToString>(ctx: S) -> Self {
        Self::Context(ctx.to_string())
    }
}
