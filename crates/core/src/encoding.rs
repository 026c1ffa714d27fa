use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

const BOM_UTF8: [u8; 3] = [0xEF, 0xBB, 0xBF];
const BOM_UTF16_BE: [u8; 2] = [0xFE, 0xFF];
const BOM_UTF16_LE: [u8; 2] = [0xFF, 0xFE];
const REPLACEMENT: char = '\u{FFFD}';

/// How the bytes of a file map to document text.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    AsRefStr,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum UniMode {
    /// Bytes are used as is
    #[default]
    Raw8Bit,
    Utf16BigEndian,
    Utf16LittleEndian,
    /// UTF-8 with a byte order mark
    Utf8,
    /// UTF-8 declared by a coding cookie, no byte order mark
    Cookie,
}

impl UniMode {
    pub fn code(&self) -> u8 {
        match self {
            UniMode::Raw8Bit => 0,
            UniMode::Utf16BigEndian => 1,
            UniMode::Utf16LittleEndian => 2,
            UniMode::Utf8 => 3,
            UniMode::Cookie => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<UniMode> {
        let mode = match code {
            0 => UniMode::Raw8Bit,
            1 => UniMode::Utf16BigEndian,
            2 => UniMode::Utf16LittleEndian,
            3 => UniMode::Utf8,
            4 => UniMode::Cookie,
            _ => return None,
        };
        Some(mode)
    }

    pub fn is_utf16(&self) -> bool {
        matches!(self, UniMode::Utf16BigEndian | UniMode::Utf16LittleEndian)
    }

    /// Byte order mark written at the start of a file in this mode
    pub fn bom(&self) -> &'static [u8] {
        match self {
            UniMode::Utf16BigEndian => &BOM_UTF16_BE,
            UniMode::Utf16LittleEndian => &BOM_UTF16_LE,
            UniMode::Utf8 => &BOM_UTF8,
            UniMode::Raw8Bit | UniMode::Cookie => &[],
        }
    }
}

/// Streaming decoder from file bytes to UTF-8 document text.
///
/// The mode is decided from the byte order mark at the start of the stream.
/// UTF-16 input is converted to UTF-8, other input passes through unchanged.
/// Input may be split at arbitrary points, an odd byte or an unpaired lead
/// surrogate at the end of a block is carried over to the next one.
#[derive(Debug, Default)]
pub struct Decoder {
    mode: Option<UniMode>,
    head: Vec<u8>,
    odd: Option<u8>,
    lead: Option<u16>,
}

impl Decoder {
    pub fn new() -> Decoder {
        Decoder::default()
    }

    /// Mode detected so far, raw 8 bit until a byte order mark has been seen
    pub fn mode(&self) -> UniMode {
        self.mode.unwrap_or_default()
    }

    /// Whether the mode was decided by a byte order mark
    pub fn has_bom(&self) -> bool {
        !matches!(self.mode, None | Some(UniMode::Raw8Bit))
    }

    pub fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) {
        match self.mode {
            Some(mode) => self.convert(mode, input, out),
            None => {
                self.head.extend_from_slice(input);
                if self.head.len() >= BOM_UTF8.len() {
                    self.detect(out);
                }
            }
        }
    }

    /// Flush carried state at the end of the stream
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        if self.mode.is_none() {
            self.detect(out);
        }

        if self.odd.take().is_some() || self.lead.take().is_some() {
            push_char(REPLACEMENT, out);
        }
    }

    fn detect(&mut self, out: &mut Vec<u8>) {
        let head = std::mem::take(&mut self.head);
        let (mode, skip) = if head.starts_with(&BOM_UTF16_BE) {
            (UniMode::Utf16BigEndian, BOM_UTF16_BE.len())
        } else if head.starts_with(&BOM_UTF16_LE) {
            (UniMode::Utf16LittleEndian, BOM_UTF16_LE.len())
        } else if head.starts_with(&BOM_UTF8) {
            (UniMode::Utf8, BOM_UTF8.len())
        } else {
            (UniMode::Raw8Bit, 0)
        };

        log::debug!("Decoder detected {mode}");
        self.mode = Some(mode);
        self.convert(mode, &head[skip..], out);
    }

    fn convert(&mut self, mode: UniMode, input: &[u8], out: &mut Vec<u8>) {
        if !mode.is_utf16() {
            out.extend_from_slice(input);
            return;
        }

        let big_endian = mode == UniMode::Utf16BigEndian;
        let mut bytes = input;

        if let Some(first) = self.odd.take() {
            match bytes.split_first() {
                Some((second, rest)) => {
                    self.unit(unit_from([first, *second], big_endian), out);
                    bytes = rest;
                }
                None => {
                    self.odd = Some(first);
                    return;
                }
            }
        }

        let mut chunks = bytes.chunks_exact(2);
        for pair in chunks.by_ref() {
            self.unit(unit_from([pair[0], pair[1]], big_endian), out);
        }

        if let [last] = chunks.remainder() {
            self.odd = Some(*last);
        }
    }

    fn unit(&mut self, unit: u16, out: &mut Vec<u8>) {
        if let Some(lead) = self.lead.take() {
            if is_trail(unit) {
                let cp = 0x10000 + (((lead as u32) - 0xD800) << 10) + ((unit as u32) - 0xDC00);
                push_char(char::from_u32(cp).unwrap_or(REPLACEMENT), out);
                return;
            }

            push_char(REPLACEMENT, out);
        }

        if is_lead(unit) {
            self.lead = Some(unit);
        } else if is_trail(unit) {
            push_char(REPLACEMENT, out);
        } else {
            push_char(char::from_u32(unit as u32).unwrap_or(REPLACEMENT), out);
        }
    }
}

/// Converts UTF-8 document text into the bytes written for a mode.
#[derive(Debug)]
pub struct Encoder {
    mode: UniMode,
    started: bool,
}

impl Encoder {
    pub fn new(mode: UniMode) -> Encoder {
        Encoder {
            mode,
            started: false,
        }
    }

    pub fn mode(&self) -> UniMode {
        self.mode
    }

    /// Encode a block of text. The first call is prefixed with the byte order
    /// mark of the mode. Text should be split at character boundaries.
    pub fn encode(&mut self, text: &[u8], out: &mut Vec<u8>) {
        if !self.started {
            self.started = true;
            out.extend_from_slice(self.mode.bom());
        }

        match self.mode {
            UniMode::Utf16BigEndian | UniMode::Utf16LittleEndian => {
                let big_endian = self.mode == UniMode::Utf16BigEndian;
                let text = String::from_utf8_lossy(text);
                for unit in text.encode_utf16() {
                    let bytes = if big_endian {
                        unit.to_be_bytes()
                    } else {
                        unit.to_le_bytes()
                    };
                    out.extend_from_slice(&bytes);
                }
            }
            _ => out.extend_from_slice(text),
        }
    }
}

/// Largest position `<= at` that does not split a UTF-8 sequence. If that
/// would be the start of `bytes`, the end of the first character is returned
/// instead so that progress is always made.
pub fn split_point(bytes: &[u8], at: usize) -> usize {
    if at >= bytes.len() {
        return bytes.len();
    }

    let mut pos = at;
    while pos > 0 && is_continuation(bytes[pos]) {
        pos -= 1;
    }

    if pos == 0 {
        pos = 1;
        while pos < bytes.len() && is_continuation(bytes[pos]) {
            pos += 1;
        }
    }

    pos
}

fn is_continuation(byte: u8) -> bool {
    byte & 0xC0 == 0x80
}

fn unit_from(bytes: [u8; 2], big_endian: bool) -> u16 {
    if big_endian {
        u16::from_be_bytes(bytes)
    } else {
        u16::from_le_bytes(bytes)
    }
}

fn is_lead(unit: u16) -> bool {
    (0xD800..0xDC00).contains(&unit)
}

fn is_trail(unit: u16) -> bool {
    (0xDC00..0xE000).contains(&unit)
}

fn push_char(ch: char, out: &mut Vec<u8>) {
    let mut buf = [0u8; 4];
    out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_in_blocks(input: &[u8], block: usize) -> (UniMode, Vec<u8>) {
        let mut decoder = Decoder::new();
        let mut out = vec![];
        for chunk in input.chunks(block) {
            decoder.decode(chunk, &mut out);
        }
        decoder.finish(&mut out);
        (decoder.mode(), out)
    }

    fn encode(mode: UniMode, text: &str) -> Vec<u8> {
        let mut encoder = Encoder::new(mode);
        let mut out = vec![];
        encoder.encode(text.as_bytes(), &mut out);
        out
    }

    #[test]
    fn raw_bytes_pass_through() {
        let input = b"plain \xE9 latin text";
        let (mode, out) = decode_in_blocks(input, 4);
        assert_eq!(mode, UniMode::Raw8Bit);
        assert_eq!(out, input);
    }

    #[test]
    fn utf8_bom_is_stripped() {
        let (mode, out) = decode_in_blocks(b"\xEF\xBB\xBFhello", 1);
        assert_eq!(mode, UniMode::Utf8);
        assert_eq!(out, b"hello");
    }

    #[test]
    fn utf16_split_everywhere() {
        let text = "a\u{e9}\u{1F600}z";
        for mode in [UniMode::Utf16BigEndian, UniMode::Utf16LittleEndian] {
            let bytes = encode(mode, text);
            for block in 1..bytes.len() {
                let (detected, out) = decode_in_blocks(&bytes, block);
                assert_eq!(detected, mode);
                assert_eq!(String::from_utf8(out).unwrap(), text, "block {block}");
            }
        }
    }

    #[test]
    fn unpaired_surrogate_is_replaced() {
        // BOM, lead surrogate, 'a'
        let input = [0xFF, 0xFE, 0x3D, 0xD8, 0x61, 0x00];
        let (_, out) = decode_in_blocks(&input, 3);
        assert_eq!(String::from_utf8(out).unwrap(), "\u{FFFD}a");
    }

    #[test]
    fn dangling_lead_at_end() {
        let input = [0xFE, 0xFF, 0xD8, 0x3D];
        let (_, out) = decode_in_blocks(&input, 16);
        assert_eq!(String::from_utf8(out).unwrap(), "\u{FFFD}");
    }

    #[test]
    fn short_file_without_bom() {
        let (mode, out) = decode_in_blocks(b"ab", 16);
        assert_eq!(mode, UniMode::Raw8Bit);
        assert_eq!(out, b"ab");
    }

    #[test]
    fn cookie_mode_writes_no_bom() {
        assert_eq!(encode(UniMode::Cookie, "x"), b"x");
        assert_eq!(encode(UniMode::Utf8, "x"), b"\xEF\xBB\xBFx");
    }

    #[test]
    fn split_point_respects_boundaries() {
        let text = "a\u{e9}b".as_bytes();
        assert_eq!(split_point(text, 2), 1);
        assert_eq!(split_point(text, 3), 3);
        assert_eq!(split_point(text, 10), 4);

        let wide = "\u{1F600}".as_bytes();
        assert_eq!(split_point(wide, 2), 4);
    }

    #[test]
    fn mode_codes() {
        use strum::IntoEnumIterator;
        for mode in UniMode::iter() {
            assert_eq!(UniMode::from_code(mode.code()), Some(mode));
        }
        assert_eq!(UniMode::from_code(9), None);
    }
}
