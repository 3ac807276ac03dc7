// unicode/tables.rs - Range tables for scripts, blocks, decimal digits and folds.
//
// Sorted, non-overlapping inclusive ranges; looked up with a binary search.
// Covers the scripts and blocks most patterns ask for; anything else is left
// to a custom `UnicodeProvider`.

pub(super) type RangeTable = &'static [(u32, u32)];

pub(super) static DECIMAL_DIGIT: RangeTable = &[
    (0x0030, 0x0039),
    (0x0660, 0x0669),
    (0x06F0, 0x06F9),
    (0x07C0, 0x07C9),
    (0x0966, 0x096F),
    (0x09E6, 0x09EF),
    (0x0A66, 0x0A6F),
    (0x0AE6, 0x0AEF),
    (0x0B66, 0x0B6F),
    (0x0BE6, 0x0BEF),
    (0x0C66, 0x0C6F),
    (0x0CE6, 0x0CEF),
    (0x0D66, 0x0D6F),
    (0x0E50, 0x0E59),
    (0x0ED0, 0x0ED9),
    (0x0F20, 0x0F29),
    (0x1040, 0x1049),
    (0x17E0, 0x17E9),
    (0x1810, 0x1819),
    (0xFF10, 0xFF19),
    (0x1D7CE, 0x1D7FF),
];

pub(super) static PUNCTUATION: RangeTable = &[
    (0x0021, 0x0023),
    (0x0025, 0x002A),
    (0x002C, 0x002F),
    (0x003A, 0x003B),
    (0x003F, 0x0040),
    (0x005B, 0x005D),
    (0x005F, 0x005F),
    (0x007B, 0x007B),
    (0x007D, 0x007D),
    (0x00A1, 0x00A1),
    (0x00A7, 0x00A7),
    (0x00AB, 0x00AB),
    (0x00B6, 0x00B7),
    (0x00BB, 0x00BB),
    (0x00BF, 0x00BF),
    (0x037E, 0x037E),
    (0x0387, 0x0387),
    (0x055A, 0x055F),
    (0x0589, 0x058A),
    (0x05BE, 0x05BE),
    (0x05C0, 0x05C0),
    (0x05C3, 0x05C3),
    (0x05C6, 0x05C6),
    (0x05F3, 0x05F4),
    (0x060C, 0x060D),
    (0x061B, 0x061B),
    (0x061F, 0x061F),
    (0x066A, 0x066D),
    (0x06D4, 0x06D4),
    (0x0964, 0x0965),
    (0x0970, 0x0970),
    (0x0E4F, 0x0E4F),
    (0x0E5A, 0x0E5B),
    (0x2010, 0x2027),
    (0x2030, 0x2043),
    (0x2045, 0x2051),
    (0x2053, 0x205E),
    (0x3001, 0x3003),
    (0x3008, 0x3011),
    (0x3014, 0x301F),
    (0xFF01, 0xFF03),
    (0xFF05, 0xFF0A),
    (0xFF0C, 0xFF0F),
    (0xFF1A, 0xFF1B),
    (0xFF1F, 0xFF20),
    (0xFF3B, 0xFF3D),
    (0xFF3F, 0xFF3F),
    (0xFF5B, 0xFF5B),
    (0xFF5D, 0xFF5D),
];

pub(super) static COMBINING_MARK: RangeTable = &[
    (0x0300, 0x036F),
    (0x0483, 0x0489),
    (0x0591, 0x05BD),
    (0x0610, 0x061A),
    (0x064B, 0x065F),
    (0x0900, 0x0903),
    (0x093A, 0x094F),
    (0x0E31, 0x0E31),
    (0x0E34, 0x0E3A),
    (0x1AB0, 0x1AFF),
    (0x1DC0, 0x1DFF),
    (0x20D0, 0x20FF),
    (0x3099, 0x309A),
    (0xFE20, 0xFE2F),
];

// Scripts (subset of Scripts.txt, merged into contiguous spans).
pub(super) static LATIN: RangeTable = &[
    (0x0041, 0x005A),
    (0x0061, 0x007A),
    (0x00AA, 0x00AA),
    (0x00BA, 0x00BA),
    (0x00C0, 0x00D6),
    (0x00D8, 0x00F6),
    (0x00F8, 0x02B8),
    (0x02E0, 0x02E4),
    (0x1D00, 0x1D25),
    (0x1E00, 0x1EFF),
    (0x2C60, 0x2C7F),
    (0xA722, 0xA787),
    (0xFB00, 0xFB06),
    (0xFF21, 0xFF3A),
    (0xFF41, 0xFF5A),
];

pub(super) static GREEK: RangeTable = &[
    (0x0370, 0x0373),
    (0x0375, 0x0377),
    (0x037A, 0x037D),
    (0x037F, 0x037F),
    (0x0384, 0x0384),
    (0x0386, 0x0386),
    (0x0388, 0x038A),
    (0x038C, 0x038C),
    (0x038E, 0x03A1),
    (0x03A3, 0x03E1),
    (0x03F0, 0x03FF),
    (0x1F00, 0x1FFE),
    (0x2126, 0x2126),
];

pub(super) static CYRILLIC: RangeTable = &[
    (0x0400, 0x0484),
    (0x0487, 0x052F),
    (0x1C80, 0x1C88),
    (0x2DE0, 0x2DFF),
    (0xA640, 0xA69F),
];

pub(super) static ARMENIAN: RangeTable = &[(0x0531, 0x0556), (0x0559, 0x058A), (0xFB13, 0xFB17)];

pub(super) static HEBREW: RangeTable = &[(0x0591, 0x05C7), (0x05D0, 0x05EA), (0x05EF, 0x05F4)];

pub(super) static ARABIC: RangeTable = &[
    (0x0600, 0x0604),
    (0x0606, 0x060B),
    (0x060D, 0x061A),
    (0x061C, 0x061E),
    (0x0620, 0x063F),
    (0x0641, 0x064A),
    (0x0656, 0x066F),
    (0x0671, 0x06DC),
    (0x06DE, 0x06FF),
    (0x0750, 0x077F),
];

pub(super) static DEVANAGARI: RangeTable = &[(0x0900, 0x0950), (0x0955, 0x0963), (0x0966, 0x097F)];

pub(super) static THAI: RangeTable = &[(0x0E01, 0x0E3A), (0x0E40, 0x0E5B)];

pub(super) static HANGUL: RangeTable = &[
    (0x1100, 0x11FF),
    (0x3131, 0x318E),
    (0xA960, 0xA97C),
    (0xAC00, 0xD7A3),
    (0xD7B0, 0xD7FB),
];

pub(super) static HIRAGANA: RangeTable = &[(0x3041, 0x3096), (0x309D, 0x309F)];

pub(super) static KATAKANA: RangeTable = &[
    (0x30A1, 0x30FA),
    (0x30FD, 0x30FF),
    (0x31F0, 0x31FF),
    (0xFF66, 0xFF6F),
    (0xFF71, 0xFF9D),
];

pub(super) static HAN: RangeTable = &[
    (0x2E80, 0x2E99),
    (0x2E9B, 0x2EF3),
    (0x3005, 0x3005),
    (0x3007, 0x3007),
    (0x3021, 0x3029),
    (0x3038, 0x303B),
    (0x3400, 0x4DBF),
    (0x4E00, 0x9FFF),
    (0xF900, 0xFA6D),
    (0x20000, 0x2A6DF),
];

// Blocks.
pub(super) static BASIC_LATIN: RangeTable = &[(0x0000, 0x007F)];
pub(super) static LATIN_1_SUPPLEMENT: RangeTable = &[(0x0080, 0x00FF)];
pub(super) static GREEK_AND_COPTIC: RangeTable = &[(0x0370, 0x03FF)];
pub(super) static CYRILLIC_BLOCK: RangeTable = &[(0x0400, 0x04FF)];
pub(super) static HIRAGANA_BLOCK: RangeTable = &[(0x3040, 0x309F)];
pub(super) static KATAKANA_BLOCK: RangeTable = &[(0x30A0, 0x30FF)];
pub(super) static CJK_UNIFIED_IDEOGRAPHS: RangeTable = &[(0x4E00, 0x9FFF)];

/// Folds that map to more than one code point (CaseFolding.txt status F).
pub(super) static FULL_FOLDS: &[(char, &str)] = &[
    ('\u{00DF}', "ss"),
    ('\u{0130}', "i\u{0307}"),
    ('\u{0149}', "\u{02BC}n"),
    ('\u{01F0}', "j\u{030C}"),
    ('\u{0390}', "\u{03B9}\u{0308}\u{0301}"),
    ('\u{03B0}', "\u{03C5}\u{0308}\u{0301}"),
    ('\u{0587}', "\u{0565}\u{0582}"),
    ('\u{1E96}', "h\u{0331}"),
    ('\u{1E97}', "t\u{0308}"),
    ('\u{1E98}', "w\u{030A}"),
    ('\u{1E99}', "y\u{030A}"),
    ('\u{1E9A}', "a\u{02BE}"),
    ('\u{1E9E}', "ss"),
    ('\u{FB00}', "ff"),
    ('\u{FB01}', "fi"),
    ('\u{FB02}', "fl"),
    ('\u{FB03}', "ffi"),
    ('\u{FB04}', "ffl"),
    ('\u{FB05}', "st"),
    ('\u{FB06}', "st"),
];

/// Simple folds that `char::to_lowercase` does not produce.
pub(super) static EXTRA_SIMPLE_FOLDS: &[(char, char)] = &[
    ('\u{017F}', 's'),
    ('\u{03C2}', '\u{03C3}'),
    ('\u{03D0}', '\u{03B2}'),
    ('\u{03D1}', '\u{03B8}'),
    ('\u{03D5}', '\u{03C6}'),
    ('\u{03D6}', '\u{03C0}'),
    ('\u{03F0}', '\u{03BA}'),
    ('\u{03F1}', '\u{03C1}'),
    ('\u{03F5}', '\u{03B5}'),
    ('\u{1E9B}', '\u{1E61}'),
    ('\u{1FBE}', '\u{03B9}'),
];

pub(super) fn in_table(table: RangeTable, c: char) -> bool {
    let cp = c as u32;
    table
        .binary_search_by(|&(lo, hi)| {
            if hi < cp {
                std::cmp::Ordering::Less
            } else if lo > cp {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Equal
            }
        })
        .is_ok()
}
