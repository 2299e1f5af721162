//! Instrument catalogue seeding.
//!
//! On reset the `instruments` table is seeded either from a CSV file (first
//! column is the ticker, one header row) or from the list of pairs FXCM
//! publishes tick data for.

use super::StoreError;
use crate::domain::Ticker;
use std::path::Path;
use tracing::warn;

/// Pairs available in the FXCM tick-data repository.
pub const FXCM_TICK_INSTRUMENTS: &[&str] = &[
    "AUDCAD", "AUDCHF", "AUDJPY", "AUDNZD", "CADCHF", "EURAUD", "EURCHF", "EURGBP", "EURJPY",
    "EURNZD", "EURUSD", "GBPCHF", "GBPJPY", "GBPNZD", "GBPUSD", "NZDCAD", "NZDCHF", "NZDJPY",
    "NZDUSD", "USDCAD", "USDCHF", "USDJPY",
];

/// The built-in catalogue.
pub fn default_catalogue() -> Vec<Ticker> {
    FXCM_TICK_INSTRUMENTS
        .iter()
        .filter_map(|t| Ticker::parse(t).ok())
        .collect()
}

/// Read a catalogue CSV. Rows whose first column is not a valid ticker are
/// skipped with a warning.
pub fn load_catalogue(path: &Path) -> Result<Vec<Ticker>, StoreError> {
    let catalogue_err = |source| StoreError::Catalogue {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(catalogue_err)?;

    let mut tickers = Vec::new();
    for row in reader.records() {
        let row = row.map_err(catalogue_err)?;
        let Some(raw) = row.get(0) else { continue };
        match Ticker::parse(raw) {
            Ok(t) => tickers.push(t),
            Err(e) => warn!(path = %path.display(), "skipping catalogue row: {e}"),
        }
    }
    tickers.sort();
    tickers.dedup();
    Ok(tickers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalogue_is_valid() {
        let tickers = default_catalogue();
        assert_eq!(tickers.len(), FXCM_TICK_INSTRUMENTS.len());
        assert!(tickers.iter().any(|t| t.as_str() == "EURUSD"));
    }

    #[test]
    fn loads_csv_catalogue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tick_instruments.csv");
        std::fs::write(&path, "ticket,description\neurusd,Euro\nGBPUSD,Cable\n??,bad\nEURUSD,dup\n")
            .unwrap();

        let tickers = load_catalogue(&path).unwrap();
        let names: Vec<&str> = tickers.iter().map(|t| t.as_str()).collect();
        assert_eq!(names, vec!["EURUSD", "GBPUSD"]);
    }

    #[test]
    fn missing_csv_is_an_error() {
        let err = load_catalogue(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, StoreError::Catalogue { .. }));
    }
}
