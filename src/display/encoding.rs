//! Display character encoding
//!
//! The 3270 display has its own character set; this maps Latin-1 and EBCDIC
//! characters onto it. Characters with no display equivalent map to `0x00`.

use std::sync::OnceLock;

use crate::ebcdic::Codepage;

/// Display character for `?`, used in place of non-ASCII characters
pub const REPLACEMENT: u8 = 0x18;

const CHARACTER_MAP: [(char, u8); 111] = [
    ('>', 0x08),
    ('<', 0x09),
    ('[', 0x0a),
    (']', 0x0b),
    (')', 0x0c),
    ('(', 0x0d),
    ('}', 0x0e),
    ('{', 0x0f),
    ('=', 0x11),
    ('\'', 0x12),
    ('"', 0x13),
    ('/', 0x14),
    ('\\', 0x15),
    ('|', 0x16),
    ('\u{00A6}', 0x17),
    ('?', 0x18),
    ('!', 0x19),
    ('$', 0x1a),
    ('\u{00A2}', 0x1b),
    ('\u{00A3}', 0x1c),
    ('\u{00A5}', 0x1d),
    ('0', 0x20),
    ('1', 0x21),
    ('2', 0x22),
    ('3', 0x23),
    ('4', 0x24),
    ('5', 0x25),
    ('6', 0x26),
    ('7', 0x27),
    ('8', 0x28),
    ('9', 0x29),
    ('\u{00DF}', 0x2a),
    ('\u{00A7}', 0x2b),
    ('#', 0x2c),
    ('@', 0x2d),
    ('%', 0x2e),
    ('_', 0x2f),
    ('&', 0x30),
    ('-', 0x31),
    ('.', 0x32),
    (',', 0x33),
    (':', 0x34),
    ('+', 0x35),
    ('\u{00AC}', 0x36),
    ('\u{00AF}', 0x37),
    ('\u{00B0}', 0x38),
    ('^', 0x3a),
    ('~', 0x3b),
    ('\u{00A8}', 0x3c),
    ('a', 0x80),
    ('b', 0x81),
    ('c', 0x82),
    ('d', 0x83),
    ('e', 0x84),
    ('f', 0x85),
    ('g', 0x86),
    ('h', 0x87),
    ('i', 0x88),
    ('j', 0x89),
    ('k', 0x8a),
    ('l', 0x8b),
    ('m', 0x8c),
    ('n', 0x8d),
    ('o', 0x8e),
    ('p', 0x8f),
    ('q', 0x90),
    ('r', 0x91),
    ('s', 0x92),
    ('t', 0x93),
    ('u', 0x94),
    ('v', 0x95),
    ('w', 0x96),
    ('x', 0x97),
    ('y', 0x98),
    ('z', 0x99),
    ('\u{00E6}', 0x9a),
    ('\u{00F8}', 0x9b),
    ('\u{00E5}', 0x9c),
    ('\u{00E7}', 0x9d),
    ('A', 0xa0),
    ('B', 0xa1),
    ('C', 0xa2),
    ('D', 0xa3),
    ('E', 0xa4),
    ('F', 0xa5),
    ('G', 0xa6),
    ('H', 0xa7),
    ('I', 0xa8),
    ('J', 0xa9),
    ('K', 0xaa),
    ('L', 0xab),
    ('M', 0xac),
    ('N', 0xad),
    ('O', 0xae),
    ('P', 0xaf),
    ('Q', 0xb0),
    ('R', 0xb1),
    ('S', 0xb2),
    ('T', 0xb3),
    ('U', 0xb4),
    ('V', 0xb5),
    ('W', 0xb6),
    ('X', 0xb7),
    ('Y', 0xb8),
    ('Z', 0xb9),
    ('\u{00C6}', 0xba),
    ('\u{00D8}', 0xbb),
    ('\u{00C5}', 0xbc),
    ('\u{00C7}', 0xbd),
    (';', 0xbe),
    ('*', 0xbf),
];

fn ascii_map() -> &'static [u8; 256] {
    static MAP: OnceLock<[u8; 256]> = OnceLock::new();

    MAP.get_or_init(|| {
        let mut map = [0x00; 256];

        for (character, byte) in CHARACTER_MAP {
            map[character as usize] = byte;
        }

        map
    })
}

fn ebcdic_map() -> &'static [u8; 256] {
    static MAP: OnceLock<[u8; 256]> = OnceLock::new();

    MAP.get_or_init(|| {
        let mut map = [0x00; 256];

        for (byte, display) in map.iter_mut().enumerate() {
            *display = encode_ascii_character(Codepage::Cp500.decode(byte as u8));
        }

        map
    })
}

/// Map a Latin-1 character to a display character
pub fn encode_ascii_character(character: char) -> u8 {
    match u8::try_from(u32::from(character)) {
        Ok(index) => ascii_map()[index as usize],
        Err(_) => 0x00,
    }
}

/// Map an EBCDIC character to a display character
pub fn encode_ebcdic_character(byte: u8) -> u8 {
    ebcdic_map()[byte as usize]
}

/// Map a string to display characters, replacing anything outside ASCII
pub fn encode_string(string: &str) -> Vec<u8> {
    string
        .chars()
        .map(|character| {
            if character.is_ascii() {
                encode_ascii_character(character)
            } else {
                REPLACEMENT
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_ascii_character() {
        assert_eq!(encode_ascii_character('a'), 0x80);
        assert_eq!(encode_ascii_character('Z'), 0xb9);
        assert_eq!(encode_ascii_character('0'), 0x20);
        assert_eq!(encode_ascii_character(' '), 0x00);
        assert_eq!(encode_ascii_character('\u{00A2}'), 0x1b);
        assert_eq!(encode_ascii_character('\u{2713}'), 0x00);
    }

    #[test]
    fn test_encode_ebcdic_character() {
        assert_eq!(encode_ebcdic_character(0x81), 0x80);
        assert_eq!(encode_ebcdic_character(0xc1), 0xa0);
        assert_eq!(encode_ebcdic_character(0xf9), 0x29);
        assert_eq!(encode_ebcdic_character(0x4a), 0x0a);
        assert_eq!(encode_ebcdic_character(0x40), 0x00);
    }

    #[test]
    fn test_encode_string() {
        assert_eq!(
            encode_string("Hello, world!"),
            vec![0xa7, 0x84, 0x8b, 0x8b, 0x8e, 0x33, 0x00, 0x96, 0x8e, 0x91, 0x8b, 0x83, 0x19]
        );
    }

    #[test]
    fn test_encode_string_replaces_non_ascii() {
        let encoded = encode_string("Everything \u{2713}");

        assert_eq!(encoded.len(), 12);
        assert_eq!(&encoded[10..], &[0x00, REPLACEMENT]);
    }
}
