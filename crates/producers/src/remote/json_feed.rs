use chrono::{DateTime, Utc};
use common::models::{Direction, SignalDraft};
use serde::Deserialize;

use crate::traits::SignalParser;
use crate::{SourceConfig, SourceError};

#[derive(Debug, Deserialize)]
struct FeedEntry {
    symbol: String,
    direction: Direction,
    confidence: f64,
    #[serde(default)]
    strategy: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Feed {
    Wrapped { signals: Vec<FeedEntry> },
    Bare(Vec<FeedEntry>),
}

/// Parser for sources that already publish structured signals as JSON,
/// either a bare array or `{"signals": [...]}`.
pub struct JsonFeedParser;

impl SignalParser for JsonFeedParser {
    fn parse(&self, source: &SourceConfig, raw: &str) -> Result<Vec<SignalDraft>, SourceError> {
        let feed: Feed = serde_json::from_str(raw).map_err(|e| SourceError::Parse(e.to_string()))?;
        let entries = match feed {
            Feed::Wrapped { signals } => signals,
            Feed::Bare(entries) => entries,
        };

        Ok(entries
            .into_iter()
            .filter(|e| !e.symbol.trim().is_empty() && e.confidence.is_finite())
            .map(|e| {
                let mut draft = SignalDraft::new(
                    source.name.clone(),
                    e.symbol.trim().to_uppercase(),
                    e.direction,
                    e.confidence,
                    e.strategy.unwrap_or_else(|| source.format.clone()),
                );
                if let Some(ts) = e.timestamp {
                    draft.created_at = ts;
                }
                draft
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceConfig {
        SourceConfig {
            name: "feed-a".to_string(),
            url: "http://feed.test".to_string(),
            format: "json".to_string(),
            timeout_secs: 5,
            active: true,
        }
    }

    #[test]
    fn parses_wrapped_feed() {
        let raw = r#"{"signals": [
            {"symbol": "eurusd", "direction": "CALL", "confidence": 0.82, "strategy": "breakout"},
            {"symbol": "R_50", "direction": "PUT", "confidence": 0.74}
        ]}"#;
        let drafts = JsonFeedParser.parse(&source(), raw).unwrap();
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].symbol, "EURUSD");
        assert_eq!(drafts[0].direction, Direction::Up);
        assert_eq!(drafts[0].provider, "feed-a");
        assert_eq!(drafts[1].strategy, "json");
    }

    #[test]
    fn parses_bare_array_and_drops_blank_symbols() {
        let raw = r#"[
            {"symbol": " ", "direction": "Up", "confidence": 0.9},
            {"symbol": "XAUUSD", "direction": "Down", "confidence": 0.7}
        ]"#;
        let drafts = JsonFeedParser.parse(&source(), raw).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].direction, Direction::Down);
    }

    #[test]
    fn html_is_a_parse_error() {
        let err = JsonFeedParser.parse(&source(), "<html></html>").unwrap_err();
        assert!(matches!(err, SourceError::Parse(_)));
    }
}
