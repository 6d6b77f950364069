use crate::error::Result;
use crate::highlight::Highlighter;
use crate::registry::Converter;
use crate::source::Source;
use pulldown_cmark::{CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd, html};
use std::sync::Arc;

const MARKDOWN_EXTENSIONS: [&str; 5] = ["md", "markdown", "mkd", "mkdn", "mdown"];

/// Markdown to HTML, with fenced code blocks passed through the highlighter.
pub struct MarkdownConverter {
    highlighter: Arc<dyn Highlighter>,
}

impl MarkdownConverter {
    pub fn new(highlighter: Arc<dyn Highlighter>) -> Self {
        Self { highlighter }
    }

    pub fn render(&self, content: &str) -> String {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_HEADING_ATTRIBUTES);

        let mut events = Vec::new();
        let mut code_block: Option<(Option<String>, String)> = None;

        for event in Parser::new_ext(content, options) {
            match event {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let language = match kind {
                        CodeBlockKind::Fenced(language) if !language.trim().is_empty() => {
                            language.split_whitespace().next().map(String::from)
                        }
                        _ => None,
                    };
                    code_block = Some((language, String::new()));
                }
                Event::End(TagEnd::CodeBlock) => {
                    if let Some((language, code)) = code_block.take() {
                        let highlighted = self.highlighter.highlight(&code, language.as_deref());
                        events.push(Event::Html(CowStr::from(highlighted)));
                    }
                }
                Event::Text(text) if code_block.is_some() => {
                    if let Some((_, code)) = code_block.as_mut() {
                        code.push_str(&text);
                    }
                }
                other => events.push(other),
            }
        }

        let mut output = String::with_capacity(content.len() * 3 / 2);
        html::push_html(&mut output, events.into_iter());
        output
    }
}

impl Converter for MarkdownConverter {
    fn name(&self) -> &str {
        "markdown"
    }

    fn order(&self) -> i32 {
        100
    }

    fn matches(&self, source: &Source) -> bool {
        let extension = source.entry.extension().to_ascii_lowercase();
        MARKDOWN_EXTENSIONS.contains(&extension.as_str())
    }

    fn convert(&self, body: &str) -> Result<String> {
        Ok(self.render(body))
    }

    fn output_extension(&self, _source: &Source) -> String {
        ".html".to_string()
    }
}

/// Leaves the body untouched and keeps the source extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityConverter;

impl Converter for IdentityConverter {
    fn name(&self) -> &str {
        "identity"
    }

    fn order(&self) -> i32 {
        i32::MAX
    }

    fn matches(&self, _source: &Source) -> bool {
        true
    }

    fn convert(&self, body: &str) -> Result<String> {
        Ok(body.to_string())
    }

    fn output_extension(&self, source: &Source) -> String {
        match source.entry.extension() {
            "" => String::new(),
            extension => format!(".{extension}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::highlight::{SyntaxHighlighter, SyntectHighlighter};
    use crate::source::{Meta, SourceEntry};
    use std::fs;
    use tempfile::TempDir;

    fn source(dir: &TempDir, name: &str) -> Source {
        let file = dir.path().join(name);
        fs::write(&file, "x").unwrap();
        Source {
            entry: SourceEntry::new(dir.path(), &file).unwrap(),
            meta: Meta::default(),
            body: "x".to_string(),
        }
    }

    #[test]
    fn test_markdown_matches_extensions() {
        let dir = TempDir::new().unwrap();
        let converter = MarkdownConverter::new(Arc::new(SyntaxHighlighter));

        assert!(converter.matches(&source(&dir, "a.md")));
        assert!(converter.matches(&source(&dir, "b.mkd")));
        assert!(converter.matches(&source(&dir, "c.Markdown")));
        assert!(!converter.matches(&source(&dir, "d.html")));
        assert_eq!(converter.output_extension(&source(&dir, "a.md")), ".html");
    }

    #[test]
    fn test_markdown_renders_and_highlights() {
        let converter = MarkdownConverter::new(Arc::new(SyntaxHighlighter));
        let html = converter
            .convert("# Title\n\nSome *text* and `code`.\n\n```rust\nlet x = 1 < 2;\n```\n")
            .unwrap();

        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<em>text</em>"));
        assert!(html.contains("<code>code</code>"));
        assert!(html.contains("<pre class='brush:rust'>let x = 1 &lt; 2;\n</pre>"));
    }

    #[test]
    fn test_markdown_with_syntect() {
        let converter = MarkdownConverter::new(Arc::new(SyntectHighlighter::new()));
        let html = converter.convert("```rust\nfn main() {}\n```\n").unwrap();
        assert!(html.contains("<div class=\"highlight\">"));
    }

    #[test]
    fn test_identity_keeps_extension() {
        let dir = TempDir::new().unwrap();
        let converter = IdentityConverter;
        assert!(converter.matches(&source(&dir, "feed.xml")));
        assert_eq!(converter.output_extension(&source(&dir, "feed.xml")), ".xml");
        assert_eq!(converter.convert("<b>x</b>").unwrap(), "<b>x</b>");
    }
}
