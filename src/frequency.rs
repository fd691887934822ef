//! Output frequency of a history dataset and its inference from the dataset name.
//!
//! FMS history files are named after the diag_table file they come from, e.g.
//! `ocean_monthly` or `atmos_4xdaily`, so the frequency can usually be read off
//! the name. [`infer_frequency`] does that by substring matching against
//! [`FREQUENCY_TAGS`].

/// Sampling frequency of a dataset.
///
/// [`std::str::FromStr`] accepts the short internal tags ("1y", "1m", "1d",
/// "6hr", "3hr") as well as the directory labels ("annual", "monthly", "daily"),
/// ignoring case. [`std::fmt::Display`] gives the short tag; use
/// [`Frequency::dir_label`] for the name used in the pp directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum Frequency {
    #[strum(to_string = "1y", serialize = "annual", serialize = "yearly")]
    Yearly,
    #[strum(to_string = "1m", serialize = "monthly")]
    Monthly,
    #[strum(to_string = "1d", serialize = "daily")]
    Daily,
    #[strum(to_string = "6hr", serialize = "4xdaily")]
    SixHourly,
    #[strum(to_string = "3hr", serialize = "8xdaily")]
    ThreeHourly,
}

impl Frequency {
    /// Name of this frequency in the pp directory tree, e.g. the "monthly"
    /// in `ocean_monthly/ts/monthly/5yr`.
    pub fn dir_label(&self) -> &'static str {
        match self {
            Frequency::Yearly => "annual",
            Frequency::Monthly => "monthly",
            Frequency::Daily => "daily",
            Frequency::SixHourly => "6hr",
            Frequency::ThreeHourly => "3hr",
        }
    }
}

/// Tags searched for in a dataset name, from lowest to highest frequency.
///
/// The order matters: "8xdaily" also contains "daily" and "day", so the
/// sub-daily categories must be tested after the daily one and win.
pub const FREQUENCY_TAGS: [(Frequency, &[&str]); 5] = [
    (Frequency::Yearly, &["annual", "yearly", "1y"]),
    (Frequency::Monthly, &["monthly", "month", "1m"]),
    (Frequency::Daily, &["daily", "day", "1d"]),
    (Frequency::SixHourly, &["4xdaily", "6hr"]),
    (Frequency::ThreeHourly, &["8xdaily", "3hr"]),
];

/// Infer the frequency of a dataset from its name (e.g. "ocean_annual").
///
/// Every category in [`FREQUENCY_TAGS`] is tested in order and a later match
/// overrides an earlier one. Returns `None`, and logs a warning, if no tag is
/// found in the name.
pub fn infer_frequency(base_name: &str) -> Option<Frequency> {
    let freq = FREQUENCY_TAGS
        .iter()
        .filter(|(_, tags)| tags.iter().any(|tag| base_name.contains(tag)))
        .map(|(freq, _)| *freq)
        .last();

    if freq.is_none() {
        log::warn!("could not infer frequency from name {base_name}");
    }
    freq
}

/// Use `explicit` if given, otherwise infer from `base_name`.
pub fn resolve_frequency(base_name: &str, explicit: Option<Frequency>) -> Option<Frequency> {
    explicit.or_else(|| infer_frequency(base_name))
}
