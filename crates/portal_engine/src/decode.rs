use encoding_rs::{Decoder, Encoding};

pub const DEFAULT_CHARSET: &str = "utf-8";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unsupported charset {0}")]
    UnsupportedCharset(String),
}

/// Incremental bytes-to-text decoder.
///
/// A code point split across two `decode` calls is held back until its
/// remaining bytes arrive, so chunk boundaries never corrupt the text.
pub struct StreamDecoder {
    encoding: &'static Encoding,
    decoder: Decoder,
}

impl StreamDecoder {
    /// Pick the charset from a Content-Type header, else `default_charset`.
    /// Unknown labels are rejected here rather than at the first chunk.
    pub fn new(content_type: Option<&str>, default_charset: &str) -> Result<Self, DecodeError> {
        let label = content_type
            .and_then(extract_charset)
            .unwrap_or_else(|| default_charset.to_string());
        let encoding = Encoding::for_label(label.trim().as_bytes())
            .ok_or(DecodeError::UnsupportedCharset(label))?;
        Ok(Self::for_encoding(encoding))
    }

    pub fn for_encoding(encoding: &'static Encoding) -> Self {
        Self {
            encoding,
            decoder: encoding.new_decoder_with_bom_removal(),
        }
    }

    pub fn encoding_name(&self) -> &'static str {
        self.encoding.name()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.decode_inner(bytes, false)
    }

    /// Flush at natural end of stream. An incomplete trailing sequence
    /// becomes U+FFFD. Not used after truncation, where the tail is dropped.
    pub fn finish(&mut self) -> String {
        self.decode_inner(&[], true)
    }

    fn decode_inner(&mut self, bytes: &[u8], last: bool) -> String {
        let capacity = self
            .decoder
            .max_utf8_buffer_length(bytes.len())
            .unwrap_or(bytes.len().saturating_mul(3).saturating_add(16));
        let mut text = String::with_capacity(capacity);
        let (_result, _read, _had_errors) = self.decoder.decode_to_string(bytes, &mut text, last);
        text
    }
}

fn extract_charset(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .filter_map(|part| {
            let part = part.trim();
            let (name, value) = part.split_once('=')?;
            if !name.trim().eq_ignore_ascii_case("charset") {
                return None;
            }
            let value = value.trim().trim_matches(['"', '\''].as_ref());
            (!value.is_empty()).then_some(value)
        })
        .next()
        .map(|s| s.to_string())
}
