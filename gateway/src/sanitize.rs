//! Sanitization of untrusted oracle output.
//!
//! Oracle replies arrive wrapped in chat prose, markdown fences and the
//! occasional creatively named entry point. The transformation here is
//! deterministic and order-sensitive:
//!
//! 1. cut everything before the first `package dynamic`
//! 2. rewrite any top-level `func Xxx(` to `func Parse(`
//! 3. truncate after the final closing brace
//! 4. prepend the package clause when the model skipped it entirely

use std::sync::OnceLock;

use regex::Regex;

use framegate_types::Signature;

/// The package clause every parser source must carry.
pub const PACKAGE_CLAUSE: &str = "package dynamic";

fn func_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^func\s+[A-Za-z0-9_]+\(").expect("func rename pattern is valid")
    })
}

fn signature_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"//\s*Signature:\s*([0-9A-Fa-f]+)").expect("signature pattern is valid")
    })
}

/// Normalize a raw oracle reply into contract-conformant parser source.
#[must_use]
pub fn sanitize_source(input: &str) -> String {
    let mut text = match input.find(PACKAGE_CLAUSE) {
        Some(start) => &input[start..],
        None => input,
    };

    // drop trailing chatter after the last closing brace (markdown fences,
    // "hope this helps", ...)
    if let Some(last_brace) = text.rfind('}') {
        text = &text[..=last_brace];
    }

    let renamed = func_name_re().replace_all(text, "func Parse(");

    let mut out = renamed.into_owned();
    if !out.contains(PACKAGE_CLAUSE) {
        out = format!("{PACKAGE_CLAUSE}\n\n{out}");
    }
    out.trim().to_string()
}

/// Scan source for the authoritative `// Signature: <HEX>` declaration.
///
/// The declaration wins over any caller-supplied signature at registration
/// time. Odd-length hex is padded with a leading zero.
#[must_use]
pub fn extract_signature(source: &str) -> Option<Signature> {
    let captures = signature_re().captures(source)?;
    let hex = captures.get(1)?.as_str();
    Signature::from_hex(hex).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_preamble_and_fences() {
        let raw = "Here is the code:\n\npackage dynamic\nfunc ParseXYZ(d []byte) map[string]interface{} { return map[string]interface{}{} }\n```";
        let clean = sanitize_source(raw);
        assert!(clean.starts_with(PACKAGE_CLAUSE), "got: {clean}");
        assert!(clean.contains("func Parse("), "got: {clean}");
        assert!(!clean.contains("ParseXYZ"));
        assert!(clean.ends_with('}'));
    }

    #[test]
    fn prepends_missing_package_clause() {
        let raw = "func Parse(d []byte) map[string]interface{} { return nil }";
        let clean = sanitize_source(raw);
        assert!(clean.starts_with(PACKAGE_CLAUSE));
    }

    #[test]
    fn renames_only_top_level_funcs() {
        let raw = r#"package dynamic
func Decode(d []byte) map[string]interface{} {
	helper := func(x int) int { return x }
	return map[string]interface{}{"v": helper(1)}
}"#;
        let clean = sanitize_source(raw);
        assert!(clean.contains("func Parse(d []byte)"));
        // closures keep their (anonymous) shape
        assert!(clean.contains("helper := func(x int) int"));
    }

    #[test]
    fn already_clean_source_is_untouched_apart_from_trim() {
        let raw = "package dynamic\n\nfunc Parse(d []byte) map[string]interface{} {\n\treturn nil\n}\n";
        assert_eq!(sanitize_source(raw), raw.trim());
    }

    #[test]
    fn extracts_signature_comment() {
        let src = "package dynamic\n// Signature: 55AA\nfunc Parse(d []byte) map[string]interface{} { return nil }";
        let sig = extract_signature(src).expect("signature");
        assert_eq!(sig.as_bytes(), &[0x55, 0xAA]);
    }

    #[test]
    fn odd_length_signature_is_padded() {
        let src = "// Signature: 1AA\n";
        let sig = extract_signature(src).expect("signature");
        assert_eq!(sig.as_bytes(), &[0x01, 0xAA]);
    }

    #[test]
    fn missing_or_bad_signature_is_none() {
        assert!(extract_signature("package dynamic\n").is_none());
        assert!(extract_signature("// Signature: ZZZZ\n").is_none());
    }

    #[test]
    fn signature_comment_survives_sanitization() {
        let raw = "Sure!\n\n// Signature: 0180\npackage dynamic\n// Signature: 0180\nfunc Parse(d []byte) map[string]interface{} { return nil }\n```";
        let clean = sanitize_source(raw);
        assert!(extract_signature(&clean).is_some());
    }
}
