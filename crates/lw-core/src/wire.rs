//! Binding to the native prediction engine's C-style symbol table.
//!
//! The engine exports one function per query. Each takes a UTF-8 JSON
//! payload and returns a double, a string, or a bare pointer to doubles
//! whose length the caller must already know. [`Transport`] abstracts that
//! calling convention; [`WireOracle`] turns it into an [`Oracle`].

use chrono::NaiveDateTime;
use lw_common::{Error, OracleError, Result};

use crate::oracle::{
    DoseRecommendation, Oracle, OracleRequest, OracleResponse, QueryKind, ResponseShape,
};
use crate::request::parse_timestamp;

/// Raw calling convention of the engine library.
pub trait Transport {
    fn call_double(&mut self, symbol: &str, payload: &[u8])
        -> std::result::Result<f64, OracleError>;

    fn call_text(
        &mut self,
        symbol: &str,
        payload: &[u8],
    ) -> std::result::Result<String, OracleError>;

    /// Read `len` doubles from the buffer the symbol returns.
    fn call_doubles(
        &mut self,
        symbol: &str,
        payload: &[u8],
        len: usize,
    ) -> std::result::Result<Vec<f64>, OracleError>;
}

/// Exported symbol serving `kind`.
pub fn symbol(kind: QueryKind) -> &'static str {
    match kind {
        QueryKind::ActiveInsulin => "getActiveInsulin",
        QueryKind::ActiveCarbs => "getActiveCarbs",
        QueryKind::DynamicCarbsOnBoard => "getDynamicCarbsOnBoard",
        QueryKind::InsulinPercentEffectRemaining => "insulinPercentEffectRemaining",
        QueryKind::PercentAbsorptionAtPercentTime => "percentAbsorptionAtPercentTime",
        QueryKind::PiecewiseLinearPercentRate => "percentRateAtPercentTime",
        QueryKind::LinearPercentRate => "linearPercentRateAtPercentTime",
        QueryKind::PredictionDates => "getPredictionDates",
        QueryKind::PredictionValues => "generatePrediction",
        QueryKind::GlucoseEffectVelocityDates => "getGlucoseEffectVelocityDates",
        QueryKind::GlucoseEffectVelocityValues => "getGlucoseEffectVelocity",
        QueryKind::GlucoseEffectVelocity => "getGlucoseEffectVelocityAndDates",
        QueryKind::DoseRecommendations => "getDoseRecommendations",
    }
}

/// [`Oracle`] over a [`Transport`].
#[derive(Debug)]
pub struct WireOracle<T> {
    transport: T,
}

impl<T: Transport> WireOracle<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport> Oracle for WireOracle<T> {
    fn call(&mut self, request: &OracleRequest, kind: QueryKind) -> Result<OracleResponse> {
        let payload = request.to_json()?;
        let payload = payload.as_bytes();
        let name = symbol(kind);

        let response = match kind.shape() {
            ResponseShape::Scalar => {
                OracleResponse::Scalar(self.transport.call_double(name, payload)?)
            }
            ResponseShape::Dates => {
                OracleResponse::Dates(decode_dates(&self.transport.call_text(name, payload)?)?)
            }
            ResponseShape::Values => {
                let dates_kind = kind.paired_dates().ok_or_else(|| {
                    Error::MalformedResponse(format!("{kind} has no paired date list"))
                })?;
                let dates = self.transport.call_text(symbol(dates_kind), payload)?;
                let len = decode_dates(&dates)?.len();
                OracleResponse::Values(self.transport.call_doubles(name, payload, len)?)
            }
            ResponseShape::Pairs => {
                let (dates, values) = decode_pairs(&self.transport.call_text(name, payload)?)?;
                OracleResponse::Pairs { dates, values }
            }
            ResponseShape::Recommendation => OracleResponse::Recommendation(
                decode_recommendation(&self.transport.call_text(name, payload)?)?,
            ),
        };
        Ok(response)
    }
}

/// Decode a comma-delimited date list. A trailing delimiter is ignored.
pub fn decode_dates(text: &str) -> Result<Vec<NaiveDateTime>> {
    let text = text.trim();
    let text = text.strip_suffix(',').unwrap_or(text);
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    text.split(',').map(parse_timestamp).collect()
}

/// Decode whitespace-separated `timestamp,value` tokens.
pub fn decode_pairs(text: &str) -> Result<(Vec<NaiveDateTime>, Vec<f64>)> {
    let mut dates = Vec::new();
    let mut values = Vec::new();
    for token in text.split_whitespace() {
        let (ts, value) = token
            .rsplit_once(',')
            .ok_or_else(|| Error::MalformedResponse(format!("pair without delimiter: {token:?}")))?;
        let value: f64 = value
            .parse()
            .map_err(|_| Error::MalformedResponse(format!("non-numeric value: {value:?}")))?;
        dates.push(parse_timestamp(ts)?);
        values.push(value);
    }
    Ok((dates, values))
}

/// Decode a dose recommendation. Empty text means nothing to recommend.
pub fn decode_recommendation(text: &str) -> Result<Option<DoseRecommendation>> {
    let text = text.trim();
    if text.is_empty() || text == "null" {
        return Ok(None);
    }
    serde_json::from_str(text)
        .map(Some)
        .map_err(|e| Error::MalformedResponse(format!("dose recommendation: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct CannedTransport {
        doubles: HashMap<&'static str, f64>,
        texts: HashMap<&'static str, &'static str>,
        buffers: HashMap<&'static str, Vec<f64>>,
        seen: Vec<String>,
    }

    impl Transport for CannedTransport {
        fn call_double(
            &mut self,
            symbol: &str,
            _payload: &[u8],
        ) -> std::result::Result<f64, OracleError> {
            self.seen.push(symbol.to_string());
            self.doubles
                .get(symbol)
                .copied()
                .ok_or_else(|| OracleError::new(symbol, "missing symbol"))
        }

        fn call_text(
            &mut self,
            symbol: &str,
            _payload: &[u8],
        ) -> std::result::Result<String, OracleError> {
            self.seen.push(symbol.to_string());
            self.texts
                .get(symbol)
                .map(|s| s.to_string())
                .ok_or_else(|| OracleError::new(symbol, "missing symbol"))
        }

        fn call_doubles(
            &mut self,
            symbol: &str,
            _payload: &[u8],
            len: usize,
        ) -> std::result::Result<Vec<f64>, OracleError> {
            self.seen.push(symbol.to_string());
            let buffer = self
                .buffers
                .get(symbol)
                .ok_or_else(|| OracleError::new(symbol, "missing symbol"))?;
            Ok(buffer.iter().copied().take(len).collect())
        }
    }

    #[test]
    fn test_dates_trailing_delimiter() {
        let dates = decode_dates("2024-02-28T00:00:00Z,2024-02-28T00:05:00Z,").unwrap();
        assert_eq!(dates.len(), 2);
        assert_eq!(dates[1] - dates[0], chrono::Duration::minutes(5));
        assert!(decode_dates("").unwrap().is_empty());
        assert!(decode_dates(",").unwrap().is_empty());
    }

    #[test]
    fn test_pairs_normalize_offsets() {
        let (dates, values) =
            decode_pairs("2024-02-28T01:00:00+01:00,0.5\n2024-02-28T00:05:00Z,-1e-3").unwrap();
        assert_eq!(dates[0].to_string(), "2024-02-28 00:00:00");
        assert_eq!(values, vec![0.5, -0.001]);
    }

    #[test]
    fn test_pairs_reject_garbage() {
        assert_eq!(decode_pairs("nonsense").unwrap_err().code(), 32);
        assert_eq!(
            decode_pairs("2024-02-28T00:00:00Z,abc").unwrap_err().code(),
            32
        );
    }

    #[test]
    fn test_recommendation_empty_is_none() {
        assert_eq!(decode_recommendation("  ").unwrap(), None);
        let rec = decode_recommendation(r#"{"amount": 1.5}"#).unwrap().unwrap();
        assert_eq!(rec.get("amount"), Some(&serde_json::json!(1.5)));
        assert!(decode_recommendation("{").is_err());
    }

    #[test]
    fn test_values_fetch_dates_for_length() {
        let mut transport = CannedTransport::default();
        transport.texts.insert(
            "getPredictionDates",
            "2024-02-28T00:00:00Z,2024-02-28T00:05:00Z,",
        );
        transport
            .buffers
            .insert("generatePrediction", vec![110.0, 108.0, 0.0, 0.0]);

        let mut oracle = WireOracle::new(transport);
        let response = oracle
            .call(&OracleRequest::PercentTime(0.0), QueryKind::PredictionValues)
            .unwrap();
        assert_eq!(response, OracleResponse::Values(vec![110.0, 108.0]));
        assert_eq!(
            oracle.transport().seen,
            vec!["getPredictionDates", "generatePrediction"]
        );
    }

    #[test]
    fn test_transport_error_propagates_unchanged() {
        let mut oracle = WireOracle::new(CannedTransport::default());
        let err = oracle
            .call(&OracleRequest::PercentTime(0.5), QueryKind::LinearPercentRate)
            .unwrap_err();
        match err {
            Error::Oracle(inner) => {
                assert_eq!(inner.query, "linearPercentRateAtPercentTime");
                assert_eq!(inner.message, "missing symbol");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_symbols_are_distinct() {
        let mut symbols: Vec<_> = QueryKind::ALL.iter().map(|k| symbol(*k)).collect();
        symbols.sort();
        symbols.dedup();
        assert_eq!(symbols.len(), QueryKind::ALL.len());
    }
}
