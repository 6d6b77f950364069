use crate::error::{PressError, Result};
use std::sync::Arc;
use syntect::highlighting::ThemeSet;
use syntect::html::highlighted_html_for_string;
use syntect::parsing::SyntaxSet;

const SYNTECT_THEME: &str = "base16-ocean.dark";
const SYNTECT_MARKER: &str = "<div class=\"highlight\">";

/// Turns fenced code blocks into highlighted HTML and recognises its own output.
pub trait Highlighter: Send + Sync {
    fn name(&self) -> &str;

    fn highlight(&self, code: &str, language: Option<&str>) -> String;

    /// True when `html` holds a block produced by this highlighter.
    fn contains_highlighted(&self, html: &str) -> bool;
}

pub fn highlighter_for(name: &str) -> Result<Arc<dyn Highlighter>> {
    match name {
        "syntect" => Ok(Arc::new(SyntectHighlighter::new())),
        "syntaxhighlighter" => Ok(Arc::new(SyntaxHighlighter)),
        other => Err(PressError::UnknownExtension {
            kind: "highlighter",
            name: other.to_string(),
        }),
    }
}

pub fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub struct SyntectHighlighter {
    syntax_set: SyntaxSet,
    theme_set: ThemeSet,
}

impl Default for SyntectHighlighter {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntectHighlighter {
    pub fn new() -> Self {
        Self {
            syntax_set: SyntaxSet::load_defaults_newlines(),
            theme_set: ThemeSet::load_defaults(),
        }
    }
}

impl Highlighter for SyntectHighlighter {
    fn name(&self) -> &str {
        "syntect"
    }

    fn highlight(&self, code: &str, language: Option<&str>) -> String {
        let highlighted = language
            .and_then(|language| self.syntax_set.find_syntax_by_token(language))
            .zip(self.theme_set.themes.get(SYNTECT_THEME))
            .and_then(|(syntax, theme)| {
                highlighted_html_for_string(code, &self.syntax_set, syntax, theme).ok()
            });

        let inner = match (highlighted, language) {
            (Some(html), _) => html,
            (None, Some(language)) => format!(
                "<pre><code class=\"language-{}\">{}</code></pre>",
                language,
                escape_html(code)
            ),
            (None, None) => format!("<pre><code>{}</code></pre>", escape_html(code)),
        };
        format!("{SYNTECT_MARKER}{inner}</div>")
    }

    fn contains_highlighted(&self, html: &str) -> bool {
        html.contains(SYNTECT_MARKER)
    }
}

/// Emits `<pre class='brush:lang'>` blocks for client-side highlighting.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyntaxHighlighter;

impl Highlighter for SyntaxHighlighter {
    fn name(&self) -> &str {
        "syntaxhighlighter"
    }

    fn highlight(&self, code: &str, language: Option<&str>) -> String {
        format!(
            "<pre class='brush:{}'>{}</pre>",
            language.unwrap_or("plain"),
            escape_html(code)
        )
    }

    fn contains_highlighted(&self, html: &str) -> bool {
        html.contains("<pre class='brush:") || html.contains("<pre class=\"brush:")
    }
}
