//! Rendered-content heuristic
//!
//! Guesses whether a page needs client-side JavaScript to produce its
//! meaningful content. It is pattern matching over raw markup, not a parser:
//! false positives and false negatives are expected.

use regex::Regex;

/// Visible body text shorter than this marks a page as script-rendered.
pub const MIN_VISIBLE_TEXT_CHARS: usize = 100;

/// Markers left in server output by client-side frameworks.
pub const FRAMEWORK_FINGERPRINTS: &[&str] = &[
    r"__NEXT_DATA__",
    r#"id=["']__next["']"#,
    r"window\.__NUXT__",
    r#"id=["']__nuxt["']"#,
    r#"id=["']__docusaurus["']"#,
    r#"<div[^>]+id=["']app["']"#,
    r#"<div[^>]+id=["']root["']"#,
    r"data-reactroot",
    r#"ng-version=["']"#,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Classification {
    pub is_js_rendered: bool,
    /// Body existed and its visible text was under the threshold
    pub sparse_body: bool,
    /// A framework fingerprint matched
    pub framework_marker: bool,
}

/// Narrow seam so a parser-based analysis can replace the regex one.
pub trait ContentClassifier: Send + Sync {
    fn classify(&self, html: &str) -> Classification;
}

pub struct PatternClassifier {
    body: Regex,
    strip: Vec<Regex>,
    whitespace: Regex,
    fingerprints: Vec<Regex>,
    min_visible_chars: usize,
}

impl PatternClassifier {
    pub fn new() -> Self {
        Self::with_threshold(MIN_VISIBLE_TEXT_CHARS)
    }

    pub fn with_threshold(min_visible_chars: usize) -> Self {
        let compile = |pattern: &str| {
            Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {pattern}: {e}"))
        };

        Self {
            body: compile(r"(?is)<body[^>]*>(.*?)</body>"),
            strip: vec![
                compile(r"(?is)<script\b[^>]*>.*?</script\s*>"),
                compile(r"(?is)<style\b[^>]*>.*?</style\s*>"),
                compile(r"(?is)<link\b[^>]*>"),
            ],
            whitespace: compile(r"\s+"),
            fingerprints: FRAMEWORK_FINGERPRINTS.iter().map(|p| compile(p)).collect(),
            min_visible_chars,
        }
    }

    /// Body text after dropping script, style and link elements, with
    /// whitespace collapsed. `None` when the document has no `<body>`.
    pub fn visible_body_text(&self, html: &str) -> Option<String> {
        let body = self.body.captures(html)?.get(1)?.as_str();

        let mut text = body.to_string();
        for pattern in &self.strip {
            text = pattern.replace_all(&text, "").into_owned();
        }

        Some(self.whitespace.replace_all(&text, " ").trim().to_string())
    }

    fn has_fingerprint(&self, html: &str) -> bool {
        self.fingerprints.iter().any(|pattern| pattern.is_match(html))
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentClassifier for PatternClassifier {
    fn classify(&self, html: &str) -> Classification {
        let sparse_body = self
            .visible_body_text(html)
            .map(|text| text.chars().count() < self.min_visible_chars)
            .unwrap_or(false);
        let framework_marker = self.has_fingerprint(html);

        Classification {
            is_js_rendered: sparse_body || framework_marker,
            sparse_body,
            framework_marker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraph(words: usize) -> String {
        "lorem ipsum dolor sit amet ".repeat(words)
    }

    #[test]
    fn test_empty_shell_is_js_rendered() {
        let classifier = PatternClassifier::new();
        let html = r#"<html><head><title>x</title></head><body>
            <noscript>Enable JS</noscript>
            <script src="/bundle.js"></script>
        </body></html>"#;
        let result = classifier.classify(html);
        assert!(result.is_js_rendered);
        assert!(result.sparse_body);
        assert!(!result.framework_marker);
    }

    #[test]
    fn test_scripts_and_styles_do_not_count_as_text() {
        let classifier = PatternClassifier::new();
        let html = format!(
            "<html><body><script>var data = \"{}\";</script><style>.a {{ color: red; }} {}</style><link rel=\"stylesheet\" href=\"a.css\"><p>short</p></body></html>",
            paragraph(20),
            paragraph(20)
        );
        assert_eq!(
            classifier.visible_body_text(&html).as_deref(),
            Some("<p>short</p>")
        );
        assert!(classifier.classify(&html).is_js_rendered);
    }

    #[test]
    fn test_substantial_static_page_is_not_js_rendered() {
        let classifier = PatternClassifier::new();
        let html = format!(
            "<html><head><title>Article</title></head><body><article><h1>Title</h1><p>{}</p></article></body></html>",
            paragraph(10)
        );
        let result = classifier.classify(&html);
        assert!(!result.is_js_rendered);
        assert!(!result.sparse_body);
        assert!(!result.framework_marker);
    }

    #[test]
    fn test_fingerprint_wins_over_substantial_text() {
        let classifier = PatternClassifier::new();
        let fingerprints = [
            r#"<script id="__NEXT_DATA__" type="application/json">{}</script>"#,
            r#"<div id="__next"></div>"#,
            r#"<script>window.__NUXT__={}</script>"#,
            r#"<div id="__docusaurus"></div>"#,
            r#"<div class="shell" id="app"></div>"#,
            r#"<div id='root'></div>"#,
            r#"<div data-reactroot="">x</div>"#,
            r#"<app-root ng-version="17.0.0"></app-root>"#,
        ];
        for marker in fingerprints {
            let html = format!("<html><body>{marker}<p>{}</p></body></html>", paragraph(10));
            let result = classifier.classify(&html);
            assert!(result.is_js_rendered, "{marker}");
            assert!(result.framework_marker, "{marker}");
        }
    }

    #[test]
    fn test_missing_body_skips_emptiness_check() {
        let classifier = PatternClassifier::new();
        assert!(!classifier.classify("<html><head><title>t</title></head></html>").is_js_rendered);
        assert!(classifier.visible_body_text("no body here").is_none());
    }

    #[test]
    fn test_threshold_boundary() {
        let classifier = PatternClassifier::new();
        let exactly = "a".repeat(MIN_VISIBLE_TEXT_CHARS);
        let under = "a".repeat(MIN_VISIBLE_TEXT_CHARS - 1);
        assert!(!classifier.classify(&format!("<body>{exactly}</body>")).is_js_rendered);
        assert!(classifier.classify(&format!("<body>{under}</body>")).is_js_rendered);
    }

    #[test]
    fn test_body_attributes_and_case() {
        let classifier = PatternClassifier::new();
        let html = format!("<HTML><BODY class=\"home\">\n\n  {}  \n</BODY></HTML>", paragraph(5));
        assert!(!classifier.classify(&html).is_js_rendered);
    }
}
