//! Command line interface definitions
use std::path::PathBuf;
use std::str::FromStr;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use freedompp::frequency::Frequency;
use freedompp::naming::YearRange;

#[derive(Debug, Parser)]
#[command(about = "Post-process FMS history archives into time series and averages")]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub(crate) command: Commands,

    #[command(flatten)]
    pub(crate) verbosity: Verbosity<InfoLevel>,
}

#[derive(Debug, Clone, Subcommand)]
pub(crate) enum Commands {
    /// Write the time series of one or more fields
    Ts(TsCli),
    /// Write annual averages and/or monthly climatologies of one or more fields
    Av(AvCli),
    /// List the history files (or fields) declared in a diag_table
    DiagFiles(DiagFilesCli),
    /// Create an example configuration file
    ConfigTemplate(TemplateCli),
}

#[derive(Debug, Clone, Args)]
pub(crate) struct TsCli {
    #[clap(flatten)]
    pub(crate) product: ProductCli,
}

#[derive(Debug, Clone, Args)]
pub(crate) struct AvCli {
    #[clap(flatten)]
    pub(crate) product: ProductCli,

    /// Which averages to make
    #[clap(long, value_enum, default_value_t = AverageChoice::Annual)]
    pub(crate) kind: AverageChoice,
}

/// Options shared by the `ts` and `av` subcommands
#[derive(Debug, Clone, Args)]
pub(crate) struct ProductCli {
    /// Name of the history files to read, e.g. "ocean_monthly"
    pub(crate) base_name: String,

    /// Fields to process
    #[clap(required = true)]
    pub(crate) fields: Vec<String>,

    /// Years to process, as FIRST-LAST (e.g. 1981-1985) or "auto" to use every
    /// archive found in the history directory
    #[clap(short = 'y', long)]
    pub(crate) years: YearsArg,

    /// Frequency of the history files (1y, 1m, 1d, 6hr, 3hr or annual,
    /// monthly, daily). Inferred from the base name if not given.
    #[clap(short = 'f', long)]
    pub(crate) freq: Option<Frequency>,

    /// TOML configuration file; see the config-template subcommand
    #[clap(short = 'c', long)]
    pub(crate) config: Option<PathBuf>,

    /// Directory with the history archives, overrides the configuration
    #[clap(long)]
    pub(crate) history_dir: Option<PathBuf>,

    /// Root of the pp tree, overrides the configuration
    #[clap(long)]
    pub(crate) pp_dir: Option<PathBuf>,

    /// File kind inside the archives (e.g. "tile1.nc"), overrides the configuration
    #[clap(long)]
    pub(crate) file_kind: Option<String>,

    /// Unpack the history files into this directory instead of reading them
    /// into memory
    #[clap(long)]
    pub(crate) scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum AverageChoice {
    /// One average over all years
    Annual,
    /// Twelve monthly averages over all years
    Monthly,
    /// Both of the above
    Both,
}

/// Create an example configuration file
#[derive(Debug, Clone, Args)]
pub(crate) struct TemplateCli {
    /// Path to write the template to
    pub(crate) template_file: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub(crate) struct DiagFilesCli {
    /// Path to the diag_table
    pub(crate) diag_table: PathBuf,

    /// Print each field with its file instead of only the file names
    #[clap(long)]
    pub(crate) fields: bool,
}

/// The `--years` argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum YearsArg {
    Range(YearRange),
    Auto,
}

impl FromStr for YearsArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }

        let (first, last) = s
            .split_once('-')
            .ok_or_else(|| format!("expected FIRST-LAST or 'auto', got '{s}'"))?;
        let first: i32 = first
            .trim()
            .parse()
            .map_err(|e| format!("invalid first year '{first}': {e}"))?;
        let last: i32 = last
            .trim()
            .parse()
            .map_err(|e| format!("invalid last year '{last}': {e}"))?;
        let range = YearRange::new(first, last).map_err(|e| e.to_string())?;
        Ok(Self::Range(range))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_years_arg() {
        assert_eq!(YearsArg::from_str("auto").unwrap(), YearsArg::Auto);
        assert_eq!(
            YearsArg::from_str("1981-1985").unwrap(),
            YearsArg::Range(YearRange::new(1981, 1985).unwrap())
        );
        assert!(YearsArg::from_str("1985-1981").is_err());
        assert!(YearsArg::from_str("1981").is_err());
    }

    #[test]
    fn test_parse_cli() {
        let cli = Cli::try_parse_from([
            "freedompp", "av", "ocean_monthly", "thetao", "so", "--years", "1-10", "--kind", "both",
        ])
        .unwrap();
        let Commands::Av(av) = cli.command else {
            panic!("expected the av subcommand");
        };
        assert_eq!(av.kind, AverageChoice::Both);
        assert_eq!(av.product.fields, ["thetao", "so"]);
        assert_eq!(av.product.freq, None);
    }
}
