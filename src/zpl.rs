//! Minimal ZPL tokenizer.
//!
//! Only what the extractor and the preview rasterizer need: split markup
//! into `^XX` / `~XX` commands and recover the human-readable field data,
//! decoding `^FH` hexadecimal escapes along the way. Nothing is executed.
//!
//! Command codes are two characters, upper-cased. The one exception is the
//! font command `^A`, whose second character is the font name and therefore
//! belongs to the parameters (`^A0N,30,30` → code `A`, params `0N,30,30`).
//! Field data (`^FD`, `^FV`) runs to the next `^` so a literal `~` inside a
//! field does not split it.

/// One tokenized command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command<'a> {
    /// `'^'` for format commands, `'~'` for control commands.
    pub prefix: char,
    pub code: String,
    pub params: &'a str,
}

impl Command<'_> {
    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }

    /// Comma-separated parameters, trimmed.
    pub fn args(&self) -> Vec<&str> {
        split_args(self.params)
    }

    /// Integer parameter at `idx`, ignoring blanks and junk.
    pub fn int_arg(&self, idx: usize) -> Option<i64> {
        self.args()
            .get(idx)
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .map(|v| v.round() as i64)
    }

    /// True for barcode commands (`^B1` … `^BZ`, `^B3`, `^BC`, …) but not `^BY`.
    pub fn is_barcode(&self) -> bool {
        self.prefix == '^' && self.code.starts_with('B') && self.code != "BY"
    }
}

/// Split comma-separated parameters.
pub fn split_args(params: &str) -> Vec<&str> {
    if params.trim().is_empty() {
        return Vec::new();
    }
    params.split(',').map(str::trim).collect()
}

/// Tokenize markup into commands. Text before the first prefix is ignored.
pub fn commands(markup: &str) -> Vec<Command<'_>> {
    let bytes = markup.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b != b'^' && b != b'~' {
            i += 1;
            continue;
        }
        let prefix = b as char;
        let rest = &markup[i + 1..];
        let mut chars = rest.char_indices();
        let Some((_, c1)) = chars.next() else {
            break;
        };

        let (code, consumed) = if prefix == '^' && c1.eq_ignore_ascii_case(&'a') {
            ("A".to_string(), c1.len_utf8())
        } else {
            match chars.next() {
                Some((j, c2)) => (
                    format!("{c1}{c2}").to_ascii_uppercase(),
                    j + c2.len_utf8(),
                ),
                None => (c1.to_ascii_uppercase().to_string(), c1.len_utf8()),
            }
        };

        let params_from = i + 1 + consumed;
        let is_data = code == "FD" || code == "FV";
        let end = next_prefix(bytes, params_from, is_data);
        out.push(Command {
            prefix,
            code,
            params: &markup[params_from..end],
        });
        i = end;
    }

    out
}

fn next_prefix(bytes: &[u8], from: usize, caret_only: bool) -> usize {
    bytes[from..]
        .iter()
        .position(|&b| b == b'^' || (!caret_only && b == b'~'))
        .map_or(bytes.len(), |p| from + p)
}

/// Decoded data of one `^FD` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldText {
    pub text: String,
    /// Field origin from the last `^FO`/`^FT`, if any.
    pub origin: Option<(i64, i64)>,
    /// The field belongs to a barcode command.
    pub barcode: bool,
}

/// All field data in document order.
pub fn field_texts(markup: &str) -> Vec<FieldText> {
    let mut out = Vec::new();
    let mut hex_indicator: Option<char> = None;
    let mut origin = None;
    let mut barcode = false;

    for cmd in commands(markup) {
        match cmd.code.as_str() {
            "FO" | "FT" => {
                origin = match (cmd.int_arg(0), cmd.int_arg(1)) {
                    (Some(x), Some(y)) => Some((x, y)),
                    _ => Some((0, 0)),
                };
            }
            "FH" => {
                hex_indicator = Some(cmd.params.trim().chars().next().unwrap_or('_'));
            }
            "FD" | "FV" => {
                let raw = cmd.params.trim_end_matches(['\r', '\n']);
                let text = match hex_indicator {
                    Some(ind) => decode_field_hex(raw, ind),
                    None => raw.to_string(),
                };
                out.push(FieldText {
                    text,
                    origin,
                    barcode,
                });
            }
            "FS" => {
                hex_indicator = None;
                origin = None;
                barcode = false;
            }
            _ if cmd.is_barcode() => barcode = true,
            _ => {}
        }
    }

    out
}

/// Non-barcode field text joined by newlines, for pattern matching.
pub fn plain_text(markup: &str) -> String {
    field_texts(markup)
        .into_iter()
        .filter(|f| !f.barcode)
        .map(|f| f.text)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Decode `^FH` escapes: `indicator` followed by two hex digits is one byte.
/// Malformed escapes are kept literally. Bytes are read as UTF-8 (lossy).
pub fn decode_field_hex(data: &str, indicator: char) -> String {
    let mut bytes = Vec::with_capacity(data.len());
    let mut chars = data.chars().peekable();
    let mut buf = [0u8; 4];

    while let Some(c) = chars.next() {
        if c == indicator {
            let mut probe = chars.clone();
            if let (Some(h), Some(l)) = (probe.next(), probe.next()) {
                if let (Some(h), Some(l)) = (h.to_digit(16), l.to_digit(16)) {
                    bytes.push((h * 16 + l) as u8);
                    chars = probe;
                    continue;
                }
            }
        }
        bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
    }

    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_basic_label() {
        let cmds = commands("^XA^FO50,60^A0N,30,30^FDHello^FS^XZ");
        let codes: Vec<&str> = cmds.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["XA", "FO", "A", "FD", "FS", "XZ"]);
        assert_eq!(cmds[1].int_arg(0), Some(50));
        assert_eq!(cmds[1].int_arg(1), Some(60));
        assert_eq!(cmds[2].params, "0N,30,30");
        assert_eq!(cmds[3].params, "Hello");
    }

    #[test]
    fn tilde_inside_field_data_does_not_split() {
        let cmds = commands("^XA^FDa~b^FS^XZ");
        assert_eq!(cmds[1].params, "a~b");
    }

    #[test]
    fn field_hex_decodes_utf8() {
        // "Não" with ã as UTF-8 bytes C3 A3
        assert_eq!(decode_field_hex("N_C3_A3o", '_'), "Não");
        assert_eq!(decode_field_hex("50_% off", '_'), "50_% off");
    }

    #[test]
    fn field_texts_tracks_hex_origin_and_barcodes() {
        let markup = "^XA^FO10,20^FH^FDCaf_C3_A9^FS^FO0,0^BCN,100^FD12345^FS^FDplain^FS^XZ";
        let fields = field_texts(markup);
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].text, "Café");
        assert_eq!(fields[0].origin, Some((10, 20)));
        assert!(fields[1].barcode);
        assert!(!fields[2].barcode);
        assert_eq!(fields[2].origin, None);
        assert_eq!(plain_text(markup), "Café\nplain");
    }

    #[test]
    fn custom_hex_indicator() {
        let fields = field_texts("^XA^FH\\^FDA\\42C^FS^XZ");
        assert_eq!(fields[0].text, "ABC");
    }
}
