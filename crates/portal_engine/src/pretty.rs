use portal_core::PreviewError;
use quick_xml::events::Event;
use quick_xml::{Reader, Writer};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PrettyPrintError {
    pub message: String,
    pub line: Option<u32>,
}

impl From<PrettyPrintError> for PreviewError {
    fn from(err: PrettyPrintError) -> Self {
        PreviewError {
            message: err.message,
            line: err.line,
        }
    }
}

/// Re-indent an XML document with two spaces per level.
pub fn pretty_print_xml(text: &str) -> Result<String, PrettyPrintError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(event) => writer.write_event(event).map_err(|err| PrettyPrintError {
                message: err.to_string(),
                line: None,
            })?,
            Err(err) => {
                let offset = usize::try_from(reader.error_position()).unwrap_or(usize::MAX);
                return Err(PrettyPrintError {
                    message: err.to_string(),
                    line: Some(line_at(text, offset)),
                });
            }
        }
    }

    String::from_utf8(writer.into_inner()).map_err(|err| PrettyPrintError {
        message: err.to_string(),
        line: None,
    })
}

fn line_at(text: &str, offset: usize) -> u32 {
    let end = offset.min(text.len());
    let newlines = text.as_bytes()[..end].iter().filter(|b| **b == b'\n').count();
    u32::try_from(newlines + 1).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{line_at, pretty_print_xml};

    #[test]
    fn nested_elements_are_indented() {
        let pretty = pretty_print_xml("<a><b/><c><d/></c></a>").unwrap();
        assert_eq!(pretty, "<a>\n  <b/>\n  <c>\n    <d/>\n  </c>\n</a>");
    }

    #[test]
    fn existing_whitespace_is_normalised() {
        let pretty = pretty_print_xml("<a>\n\n      <b/>\n</a>").unwrap();
        assert_eq!(pretty, "<a>\n  <b/>\n</a>");
    }

    #[test]
    fn malformed_documents_report_a_line() {
        let err = pretty_print_xml("<a>\n<b>\n</a>").unwrap_err();
        assert!(!err.message.is_empty());
        assert!(matches!(err.line, Some(line) if line >= 2));
    }

    #[test]
    fn lines_are_counted_from_one() {
        assert_eq!(line_at("abc", 0), 1);
        assert_eq!(line_at("a\nb\nc", 4), 3);
        assert_eq!(line_at("a\n", 99), 2);
    }
}
