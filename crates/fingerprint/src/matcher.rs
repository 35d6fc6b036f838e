//! Response comparison against signature expectations

use honeysift_common::{MatchType, SignatureStep};

/// Compare an observed response with an expected pattern.
///
/// Both sides are raw bytes; text protocols compare their UTF-8 encoding.
#[inline]
pub fn compare(response: &[u8], expected: &[u8], match_type: MatchType) -> bool {
    match match_type {
        MatchType::Precise => response == expected,
        MatchType::Fuzzy => contains(response, expected),
    }
}

/// Compare a response against a step's expected output and match type.
#[inline]
pub fn matches_step(step: &SignatureStep, response: &[u8]) -> bool {
    compare(response, step.expected_output.as_bytes(), step.match_type)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precise_requires_identical_bytes() {
        assert!(compare(b"root@svr04:~# ", b"root@svr04:~# ", MatchType::Precise));
        assert!(!compare(b"root@svr04:~# ", b"root@svr04:~#", MatchType::Precise));
        assert!(!compare(b"abc", b"abd", MatchType::Precise));
        assert!(compare(b"", b"", MatchType::Precise));
    }

    #[test]
    fn fuzzy_is_substring_search() {
        assert!(compare(b"SSH-2.0-OpenSSH_6.0p1 Debian-4+deb7u2", b"deb7u2", MatchType::Fuzzy));
        assert!(compare(b"abc", b"abc", MatchType::Fuzzy));
        assert!(compare(b"abc", b"", MatchType::Fuzzy));
        assert!(!compare(b"ab", b"abc", MatchType::Fuzzy));
        assert!(!compare(b"a-b-c", b"abc", MatchType::Fuzzy));
    }

    #[test]
    fn binary_payloads() {
        let response = [0x00, 0xff, 0x10, 0x20, 0x00];
        assert!(compare(&response, &[0xff, 0x10], MatchType::Fuzzy));
        assert!(!compare(&response, &[0x10, 0xff], MatchType::Fuzzy));
        assert!(compare(&response, &response, MatchType::Precise));
    }

    #[test]
    fn fuzzy_agrees_with_str_contains() {
        let cases = [
            ("uname -a\r\nLinux svr04 3.2.0-4-amd64", "3.2.0-4"),
            ("hello", "lo"),
            ("hello", "ol"),
            ("", "x"),
            ("aaa", "aa"),
        ];
        for (response, expected) in cases {
            assert_eq!(
                compare(response.as_bytes(), expected.as_bytes(), MatchType::Fuzzy),
                response.contains(expected),
                "{response:?} / {expected:?}"
            );
        }
    }

    #[test]
    fn step_matching_uses_expected_output() {
        let step = SignatureStep::new("ls", "IsThisAHoneypot", MatchType::Fuzzy, 0.3);
        assert!(matches_step(&step, b"bin  IsThisAHoneypot.honeypot  tmp"));
        assert!(!matches_step(&step, b"bin  tmp"));
    }
}
