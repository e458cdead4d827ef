//! Validation and canonicalization of link payloads.
//!
//! Everything here is pure: the same functions drive keystroke-level feedback
//! and gate every link write right before it is handed to the coalescer.

use crate::models::LinkKind;
use regex::Regex;
use std::sync::OnceLock;

pub(crate) const WHATSAPP_PREFIX: &str = "https://wa.me/";
pub(crate) const WHATSAPP_TITLE: &str = "WhatsApp";

const MIN_PHONE_DIGITS: usize = 10;
const MAX_PHONE_DIGITS: usize = 15;
const MAX_COUNTRY_DIGITS: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("URL must not be empty")]
    EmptyUrl,
    #[error("invalid URL")]
    InvalidUrl,
    #[error("invalid email address")]
    InvalidEmail,
    #[error("invalid phone number")]
    InvalidPhoneNumber,
    #[error("country code must be 1 to 3 digits")]
    InvalidCountryCode,
    #[error("phone number must not be empty")]
    EmptyPhoneNumber,
    #[error("phone number must have 10 to 15 digits, got {digits}")]
    InvalidPhoneLength { digits: usize },
}

/// A canonical `(title, url)` pair ready to be written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedLink {
    /// Suggested title, applied only when the link has none yet.
    pub title: Option<String>,
    pub url: String,
}

fn url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // scheme://label(.label)*.tld(:port)?(/path)?
        Regex::new(
            r"(?i)^https?://([a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z]{2,63}(:\d{1,5})?(/\S*)?$",
        )
        .expect("url pattern is valid")
    })
}

fn scheme_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://").expect("scheme pattern is valid"))
}

fn email_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^[a-z0-9._%+-]+@([a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z]{2,63}$")
            .expect("email pattern is valid")
    })
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

fn digits_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

pub fn normalize(raw: &str, kind: LinkKind) -> Result<NormalizedLink, ValidationError> {
    match kind {
        LinkKind::Whatsapp => normalize_whatsapp_url(raw),
        LinkKind::Email => normalize_email(raw).map(|url| NormalizedLink { title: None, url }),
        LinkKind::Phone => normalize_phone(raw).map(|url| NormalizedLink { title: None, url }),
        LinkKind::Generic | LinkKind::Unknown => {
            normalize_generic(raw).map(|url| NormalizedLink { title: None, url })
        }
    }
}

/// Trim, add `https://` when no scheme is present, then check the host shape.
pub fn normalize_generic(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyUrl);
    }

    let candidate = if scheme_pattern().is_match(trimmed) {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    if url_pattern().is_match(&candidate) {
        Ok(candidate)
    } else {
        Err(ValidationError::InvalidUrl)
    }
}

/// `ada@example.com` or `mailto:ada@example.com` to `mailto:ada@example.com`.
pub fn normalize_email(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    let address = strip_prefix_ignore_case(trimmed, "mailto:").unwrap_or(trimmed).trim();
    if address.is_empty() {
        return Err(ValidationError::EmptyUrl);
    }
    if !email_pattern().is_match(address) {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(format!("mailto:{address}"))
}

/// `tel:` link with separators stripped; a leading `+` is kept.
pub fn normalize_phone(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    let number = strip_prefix_ignore_case(trimmed, "tel:").unwrap_or(trimmed).trim();
    if number.is_empty() {
        return Err(ValidationError::EmptyPhoneNumber);
    }
    let separators = |c: char| c.is_ascii_digit() || " ()-.".contains(c);
    let (plus, rest) = match number.strip_prefix('+') {
        Some(rest) => ("+", rest),
        None => ("", number),
    };
    if !rest.chars().all(separators) {
        return Err(ValidationError::InvalidPhoneNumber);
    }
    let digits = digits_only(rest);
    check_phone_length(&digits)?;
    Ok(format!("tel:{plus}{digits}"))
}

pub fn validate_country_code(country_code: &str) -> Result<String, ValidationError> {
    let digits = digits_only(country_code);
    if digits.is_empty() || digits.len() > MAX_COUNTRY_DIGITS || digits.starts_with('0') {
        return Err(ValidationError::InvalidCountryCode);
    }
    Ok(digits)
}

pub fn validate_local_number(local_number: &str) -> Result<String, ValidationError> {
    let digits = digits_only(local_number);
    if digits.is_empty() {
        return Err(ValidationError::EmptyPhoneNumber);
    }
    Ok(digits)
}

fn check_phone_length(digits: &str) -> Result<(), ValidationError> {
    let n = digits.len();
    if (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&n) {
        Ok(())
    } else {
        Err(ValidationError::InvalidPhoneLength { digits: n })
    }
}

/// Compose a `wa.me` link from the country selector and the number field.
pub fn normalize_whatsapp(
    country_code: &str,
    local_number: &str,
) -> Result<NormalizedLink, ValidationError> {
    let country = validate_country_code(country_code)?;
    let local = validate_local_number(local_number)?;
    let full = format!("{country}{local}");
    check_phone_length(&full)?;

    Ok(NormalizedLink {
        title: Some(WHATSAPP_TITLE.to_string()),
        url: format!("{WHATSAPP_PREFIX}{full}"),
    })
}

/// Accept a free-form `https://wa.me/<digits>` link (scheme optional).
fn normalize_whatsapp_url(raw: &str) -> Result<NormalizedLink, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyUrl);
    }

    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let Some(number) = rest
        .strip_prefix("wa.me/")
        .or_else(|| rest.strip_prefix("www.wa.me/"))
    else {
        return Err(ValidationError::InvalidUrl);
    };

    let number = number.trim_end_matches('/');
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidUrl);
    }
    check_phone_length(number)?;

    Ok(NormalizedLink {
        title: Some(WHATSAPP_TITLE.to_string()),
        url: format!("{WHATSAPP_PREFIX}{number}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("example.com", "https://example.com")]
    #[case("  example.com/path?q=1  ", "https://example.com/path?q=1")]
    #[case("http://example.com", "http://example.com")]
    #[case("HTTPS://Sub.Example.co.uk/a", "HTTPS://Sub.Example.co.uk/a")]
    #[case("shop.example.io:8080/x", "https://shop.example.io:8080/x")]
    fn test_generic_accepts(#[case] raw: &str, #[case] expected: &str) {
        let out = normalize(raw, LinkKind::Generic).expect("should normalize");
        assert_eq!(out.url, expected);
        assert_eq!(out.title, None);
    }

    #[rstest]
    #[case("", ValidationError::EmptyUrl)]
    #[case("   ", ValidationError::EmptyUrl)]
    #[case("localhost", ValidationError::InvalidUrl)]
    #[case("not a url", ValidationError::InvalidUrl)]
    #[case("ftp://example.com", ValidationError::InvalidUrl)]
    #[case("https://exa mple.com", ValidationError::InvalidUrl)]
    #[case("https://-bad.com", ValidationError::InvalidUrl)]
    fn test_generic_rejects(#[case] raw: &str, #[case] expected: ValidationError) {
        assert_eq!(normalize(raw, LinkKind::Generic), Err(expected));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(ValidationError::EmptyUrl.to_string(), "URL must not be empty");
        assert_eq!(ValidationError::InvalidUrl.to_string(), "invalid URL");
    }

    #[rstest]
    #[case("ada@example.com", "mailto:ada@example.com")]
    #[case("  mailto:ada@example.com ", "mailto:ada@example.com")]
    #[case("MAILTO:ada.l+links@mail.example.co.uk", "mailto:ada.l+links@mail.example.co.uk")]
    fn test_email_accepts(#[case] raw: &str, #[case] expected: &str) {
        let out = normalize(raw, LinkKind::Email).expect("should normalize");
        assert_eq!(out.url, expected);
        assert_eq!(normalize(&out.url, LinkKind::Email), Ok(out));
    }

    #[rstest]
    #[case("", ValidationError::EmptyUrl)]
    #[case("mailto:", ValidationError::EmptyUrl)]
    #[case("ada", ValidationError::InvalidEmail)]
    #[case("ada@localhost", ValidationError::InvalidEmail)]
    #[case("ada @example.com", ValidationError::InvalidEmail)]
    fn test_email_rejects(#[case] raw: &str, #[case] expected: ValidationError) {
        assert_eq!(normalize(raw, LinkKind::Email), Err(expected));
    }

    #[rstest]
    #[case("tel:+34612345678", "tel:+34612345678")]
    #[case("+34 612 34-56 78", "tel:+34612345678")]
    #[case("(555) 123-4567 0", "tel:55512345670")]
    fn test_phone_accepts(#[case] raw: &str, #[case] expected: &str) {
        let out = normalize(raw, LinkKind::Phone).expect("should normalize");
        assert_eq!(out.url, expected);
        assert_eq!(normalize(&out.url, LinkKind::Phone), Ok(out));
    }

    #[rstest]
    #[case("tel:", ValidationError::EmptyPhoneNumber)]
    #[case("call me", ValidationError::InvalidPhoneNumber)]
    #[case("+34 61x", ValidationError::InvalidPhoneNumber)]
    #[case("12345", ValidationError::InvalidPhoneLength { digits: 5 })]
    fn test_phone_rejects(#[case] raw: &str, #[case] expected: ValidationError) {
        assert_eq!(normalize(raw, LinkKind::Phone), Err(expected));
    }

    #[test]
    fn test_other_kinds_normalize_as_generic() {
        let out = normalize("cal.example.com/ada", LinkKind::Unknown).expect("should normalize");
        assert_eq!(out.url, "https://cal.example.com/ada");
    }

    #[test]
    fn test_whatsapp_pair_composes_wa_me_link() {
        let out = normalize_whatsapp("+34", "612 34-56 78").expect("should compose");
        assert_eq!(out.url, "https://wa.me/34612345678");
        assert_eq!(out.title.as_deref(), Some("WhatsApp"));
    }

    #[rstest]
    #[case("", "612345678", ValidationError::InvalidCountryCode)]
    #[case("+1234", "612345678", ValidationError::InvalidCountryCode)]
    #[case("34", "  ", ValidationError::EmptyPhoneNumber)]
    #[case("34", "1234", ValidationError::InvalidPhoneLength { digits: 6 })]
    #[case("34", "1234567890123456", ValidationError::InvalidPhoneLength { digits: 18 })]
    fn test_whatsapp_pair_rejects(
        #[case] country: &str,
        #[case] local: &str,
        #[case] expected: ValidationError,
    ) {
        assert_eq!(normalize_whatsapp(country, local), Err(expected));
    }

    #[test]
    fn test_whatsapp_fields_validate_independently() {
        assert_eq!(validate_country_code("+34").as_deref(), Ok("34"));
        assert!(validate_country_code("abc").is_err());
        assert_eq!(validate_local_number("(612) 345").as_deref(), Ok("612345"));
    }

    #[rstest]
    #[case("https://wa.me/34612345678")]
    #[case("wa.me/34612345678")]
    #[case("http://wa.me/34612345678/")]
    fn test_whatsapp_url_forms(#[case] raw: &str) {
        let out = normalize(raw, LinkKind::Whatsapp).expect("should normalize");
        assert_eq!(out.url, "https://wa.me/34612345678");
    }

    #[rstest]
    #[case("https://example.com/34612345678")]
    #[case("https://wa.me/34-612")]
    #[case("https://wa.me/")]
    fn test_whatsapp_url_rejects_malformed(#[case] raw: &str) {
        assert_eq!(
            normalize(raw, LinkKind::Whatsapp),
            Err(ValidationError::InvalidUrl)
        );
    }

    #[test]
    fn test_whatsapp_url_checks_length() {
        assert_eq!(
            normalize("wa.me/123", LinkKind::Whatsapp),
            Err(ValidationError::InvalidPhoneLength { digits: 3 })
        );
    }

    proptest! {
        #[test]
        fn prop_generic_normalization_is_idempotent(
            labels in prop::collection::vec("[a-z0-9]{1,8}", 1..4),
            tld in "[a-z]{2,6}",
            path in prop::option::of("/[a-zA-Z0-9_-]{0,12}"),
            with_scheme in any::<bool>(),
        ) {
            let host = format!("{}.{}", labels.join("."), tld);
            let raw = format!(
                "{}{}{}",
                if with_scheme { "https://" } else { "" },
                host,
                path.unwrap_or_default()
            );
            let once = normalize(&raw, LinkKind::Generic).expect("generated url is valid");
            let twice = normalize(&once.url, LinkKind::Generic).expect("normalized url is valid");
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_whatsapp_normalization_is_idempotent(
            country in "[1-9][0-9]{0,2}",
            local in "[0-9]{9,11}",
        ) {
            if let Ok(once) = normalize_whatsapp(&country, &local) {
                let twice = normalize(&once.url, LinkKind::Whatsapp).expect("composed url is valid");
                prop_assert_eq!(once, twice);
            }
        }
    }
}
