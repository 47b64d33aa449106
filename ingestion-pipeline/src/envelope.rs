use dom_smoothie::{Article, Readability, TextMode};
use encoding_rs::{Encoding, GB18030};
use tracing::{debug, warn};

const SECTION_SEPARATOR: &str = "\r\n\r\n";

/// Turns an HTML page into readable plain text.
pub trait ContentExtractor: Send + Sync {
    fn extract(&self, html: &str) -> Option<String>;
}

/// Main-content extraction backed by `dom_smoothie`'s readability port.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadabilityExtractor;

impl ContentExtractor for ReadabilityExtractor {
    fn extract(&self, html: &str) -> Option<String> {
        let config = dom_smoothie::Config {
            text_mode: TextMode::Formatted,
            ..Default::default()
        };

        let article: Article = match Readability::new(html, None, Some(config))
            .and_then(|mut readability| readability.parse())
        {
            Ok(article) => article,
            Err(err) => {
                debug!(error = %err, "readability could not extract an article");
                return None;
            }
        };

        let text: String = article.text_content.into();
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

/// Returns the payload unchanged. Useful for plain-text payloads and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughExtractor;

impl ContentExtractor for PassthroughExtractor {
    fn extract(&self, html: &str) -> Option<String> {
        Some(html.to_string())
    }
}

/// Decode raw record bytes into text.
///
/// Strict UTF-8 is tried first, then strict GB18030, then whatever encoding
/// `chardetng` guesses. Returns `None` when no attempt decodes cleanly.
pub fn decode(raw: &[u8]) -> Option<String> {
    if let Ok(text) = std::str::from_utf8(raw) {
        return Some(text.to_string());
    }

    if let Some(text) = decode_strict(GB18030, raw) {
        return Some(text);
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(raw, true);
    let guessed = detector.guess(None, true);
    let decoded = decode_strict(guessed, raw);
    if decoded.is_some() {
        debug!(encoding = guessed.name(), "decoded record with detected encoding");
    }
    decoded
}

fn decode_strict(encoding: &'static Encoding, raw: &[u8]) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(raw)
        .map(std::borrow::Cow::into_owned)
}

/// Split a record into its archive metadata, HTTP headers and payload.
///
/// Returns `None` unless the trimmed text has exactly three sections.
pub fn split_envelope(text: &str) -> Option<(&str, &str, &str)> {
    let mut parts = text.trim().splitn(3, SECTION_SEPARATOR);
    let metadata = parts.next()?;
    let headers = parts.next()?;
    let payload = parts.next()?;
    Some((metadata, headers, payload))
}

/// Strips the archive envelope from decompressed records and extracts the
/// page content.
pub struct EnvelopeParser {
    extractor: Box<dyn ContentExtractor>,
}

impl EnvelopeParser {
    pub fn new(extractor: Box<dyn ContentExtractor>) -> Self {
        Self { extractor }
    }

    pub fn readability() -> Self {
        Self::new(Box::new(ReadabilityExtractor))
    }

    pub fn passthrough() -> Self {
        Self::new(Box::new(PassthroughExtractor))
    }

    /// Extract the content of one decompressed record.
    ///
    /// Every failure mode yields an empty string, which callers cache as a
    /// terminal outcome.
    pub fn parse(&self, raw: &[u8]) -> String {
        if raw.is_empty() {
            return String::new();
        }

        let Some(text) = decode(raw) else {
            warn!(bytes = raw.len(), "record could not be decoded");
            return String::new();
        };

        let Some((_, _, payload)) = split_envelope(&text) else {
            warn!(
                chars = text.chars().count(),
                "record does not have metadata, headers and payload sections"
            );
            return String::new();
        };

        self.extractor.extract(payload).unwrap_or_default()
    }
}

impl Default for EnvelopeParser {
    fn default() -> Self {
        Self::readability()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverExtracts;

    impl ContentExtractor for NeverExtracts {
        fn extract(&self, _html: &str) -> Option<String> {
            None
        }
    }

    #[test]
    fn parses_three_section_record() {
        let parser = EnvelopeParser::passthrough();
        assert_eq!(
            parser.parse(b"META\r\n\r\nHEADERS\r\n\r\nHello world"),
            "Hello world"
        );
    }

    #[test]
    fn payload_keeps_later_separators() {
        let parser = EnvelopeParser::passthrough();
        assert_eq!(
            parser.parse(b"\r\n META\r\n\r\nH\r\n\r\nfirst\r\n\r\nsecond \r\n"),
            "first\r\n\r\nsecond"
        );
    }

    #[test]
    fn malformed_or_empty_records_yield_empty_content() {
        let parser = EnvelopeParser::passthrough();
        assert_eq!(parser.parse(b""), "");
        assert_eq!(parser.parse(b"META\r\n\r\nonly two parts"), "");
        assert_eq!(parser.parse(b"no separators at all"), "");
    }

    #[test]
    fn extractor_failure_is_normalized_to_empty() {
        let parser = EnvelopeParser::new(Box::new(NeverExtracts));
        assert_eq!(parser.parse(b"M\r\n\r\nH\r\n\r\n<html></html>"), "");
    }

    #[test]
    fn decodes_gb18030_payloads() {
        let (encoded, _, had_errors) = GB18030.encode("M\r\n\r\nH\r\n\r\n你好，世界");
        assert!(!had_errors);
        assert!(std::str::from_utf8(&encoded).is_err());

        let parser = EnvelopeParser::passthrough();
        assert_eq!(parser.parse(&encoded), "你好，世界");
    }

    #[test]
    fn decode_prefers_utf8() {
        assert_eq!(decode("héllo".as_bytes()).as_deref(), Some("héllo"));
    }

    #[test]
    fn readability_extracts_article_text() {
        let html = format!(
            "<html><head><title>Notes</title></head><body><article><h1>Notes</h1><p>{}</p><p>{}</p></article></body></html>",
            "The archive keeps every page it has seen, and this paragraph is long enough to count as content. ".repeat(5),
            "A second paragraph adds more readable prose so the extractor is confident about it. ".repeat(5),
        );
        let text = ReadabilityExtractor.extract(&html).expect("article text");
        assert!(text.contains("The archive keeps every page"));
        assert!(!text.contains("<p>"));
    }

    #[test]
    fn readability_returns_none_for_blank_documents() {
        assert!(ReadabilityExtractor.extract("").is_none());
    }
}
