//! File name sanitizing.
//!
//! Object keys can technically hold anything, but public URLs, local copies
//! and the host's own tooling all cope best with a small ASCII subset.

use crate::error::{ErrorKind, Result};

const REPLACEMENT: char = '_';

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// ASCII spelling of common Latin letters with diacritics.
fn transliterate(c: char) -> Option<&'static str> {
    Some(match c {
        'À' | 'Á' | 'Â' | 'Ã' | 'Å' | 'Ā' | 'Ă' | 'Ą' => "A",
        'à' | 'á' | 'â' | 'ã' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'Ä' => "Ae",
        'ä' => "ae",
        'Æ' => "AE",
        'æ' => "ae",
        'Ç' | 'Ć' | 'Č' => "C",
        'ç' | 'ć' | 'č' => "c",
        'Ð' | 'Ď' | 'Đ' => "D",
        'ð' | 'ď' | 'đ' => "d",
        'È' | 'É' | 'Ê' | 'Ë' | 'Ē' | 'Ę' | 'Ě' => "E",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ę' | 'ě' => "e",
        'Ğ' => "G",
        'ğ' => "g",
        'Ì' | 'Í' | 'Î' | 'Ï' | 'Ī' | 'Į' | 'İ' => "I",
        'ì' | 'í' | 'î' | 'ï' | 'ī' | 'į' | 'ı' => "i",
        'Ł' => "L",
        'ł' => "l",
        'Ñ' | 'Ń' | 'Ň' => "N",
        'ñ' | 'ń' | 'ň' => "n",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ø' | 'Ō' | 'Ő' => "O",
        'ò' | 'ó' | 'ô' | 'õ' | 'ø' | 'ō' | 'ő' => "o",
        'Ö' => "Oe",
        'ö' => "oe",
        'Œ' => "OE",
        'œ' => "oe",
        'Ř' => "R",
        'ř' => "r",
        'Ś' | 'Ş' | 'Š' => "S",
        'ś' | 'ş' | 'š' => "s",
        'ß' => "ss",
        'Ť' => "T",
        'ť' => "t",
        'Þ' => "Th",
        'þ' => "th",
        'Ù' | 'Ú' | 'Û' | 'Ū' | 'Ů' | 'Ű' => "U",
        'ù' | 'ú' | 'û' | 'ū' | 'ů' | 'ű' => "u",
        'Ü' => "Ue",
        'ü' => "ue",
        'Ý' | 'Ÿ' => "Y",
        'ý' | 'ÿ' => "y",
        'Ź' | 'Ż' | 'Ž' => "Z",
        'ź' | 'ż' | 'ž' => "z",
        _ => return None,
    })
}

/// Reduce a file name to `[.A-Za-z0-9_-]`.
///
/// Letters with diacritics are transliterated, surrounding whitespace is
/// trimmed, every byte of any other disallowed character becomes `_`, and
/// trailing dots are stripped. Fails with [`InvalidFileName`](ErrorKind::InvalidFileName)
/// when nothing is left.
///
/// ```
/// use bucketfs_driver::sanitize_file_name;
/// assert_eq!(sanitize_file_name("my file?.jpg").unwrap(), "my_file_.jpg");
/// assert_eq!(sanitize_file_name("Grüße.txt").unwrap(), "Gruesse.txt");
/// assert!(sanitize_file_name("...").is_err());
/// ```
pub fn sanitize_file_name(name: &str) -> Result<String> {
    let mut sanitized = String::with_capacity(name.len());
    for c in name.trim().chars() {
        match transliterate(c) {
            Some(ascii) => sanitized.push_str(ascii),
            None if is_allowed(c) => sanitized.push(c),
            None => sanitized.extend(std::iter::repeat_n(REPLACEMENT, c.len_utf8())),
        }
    }
    let sanitized = sanitized.trim_end_matches('.');
    if sanitized.is_empty() {
        exn::bail!(ErrorKind::InvalidFileName(name.to_string()));
    }
    Ok(sanitized.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("my file?.jpg", "my_file_.jpg")]
    #[case("image.jpg", "image.jpg")]
    #[case("  padded name.png  ", "padded_name.png")]
    #[case("Übersicht März.pdf", "Uebersicht_Maerz.pdf")]
    #[case("café crème.txt", "cafe_creme.txt")]
    #[case("Łódź.jpg", "Lodz.jpg")]
    #[case("trailing.dots...", "trailing.dots")]
    #[case("a/b\\c.txt", "a_b_c.txt")]
    #[case("user@example.com", "user_example.com")]
    #[case("日本.txt", "______.txt")]
    #[case("naïve ☃.txt", "naive____.txt")]
    #[case("dash-and_underscore", "dash-and_underscore")]
    fn test_sanitize_file_name(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize_file_name(input).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case(".")]
    #[case("..")]
    fn test_sanitize_file_name_rejects_empty_results(#[case] input: &str) {
        let err = sanitize_file_name(input).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidFileName(name) if name == input));
    }
}
