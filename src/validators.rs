//! Reusable single-value predicates attached to fields.
//!
//! A validator never mutates the value and never assumes its position in a
//! field's validator list. The first failing validator wins.

use std::{
    fmt,
    net::{Ipv4Addr, Ipv6Addr},
    sync::LazyLock,
};

use regex::Regex;
use serde_json::Value as Json;

use crate::error::{Error, Result};

static HOSTNAME_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?$").expect("valid hostname pattern")
});
static MAC_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}$").expect("valid MAC address pattern")
});

pub trait Validator: fmt::Debug + Send + Sync {
    /// Checks one representation value. `field_name` only feeds messages.
    fn validate(&self, value: &Json, field_name: &str) -> Result<()>;
}

fn expect_str<'a>(value: &'a Json, field_name: &str, validator: &str) -> Result<&'a str> {
    value.as_str().ok_or_else(|| {
        Error::validation(
            &format!("{validator}_VALUE_MUST_BE_STRING"),
            Some(field_name),
            format!("Field `{field_name}` must be a string, received `{value}`"),
        )
    })
}

fn check_range<T>(number: T, minimum: T, maximum: T, value: &Json, field_name: &str) -> Result<()>
where
    T: PartialOrd + fmt::Display,
{
    if number < minimum {
        return Err(Error::validation(
            "NUMERIC_RANGE_VALIDATOR_MINIMUM_CONSTRAINT",
            Some(field_name),
            format!("Field `{field_name}` must be greater than or equal to {minimum}, received `{value}`"),
        ));
    }

    if number > maximum {
        return Err(Error::validation(
            "NUMERIC_RANGE_VALIDATOR_MAXIMUM_CONSTRAINT",
            Some(field_name),
            format!("Field `{field_name}` must be less than or equal to {maximum}, received `{value}`"),
        ));
    }

    Ok(())
}

fn not_numeric(value: &Json, field_name: &str) -> Error {
    Error::validation(
        "NUMERIC_RANGE_VALIDATOR_VALUE_MUST_BE_NUMERIC",
        Some(field_name),
        format!("Field `{field_name}` must be numeric, received `{value}`"),
    )
}

/// Inclusive numeric bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericRangeValidator {
    pub minimum: f64,
    pub maximum: f64,
}

impl NumericRangeValidator {
    pub fn new(minimum: impl Into<f64>, maximum: impl Into<f64>) -> Self {
        Self {
            minimum: minimum.into(),
            maximum: maximum.into(),
        }
    }
}

impl Validator for NumericRangeValidator {
    fn validate(&self, value: &Json, field_name: &str) -> Result<()> {
        let number = value.as_f64().ok_or_else(|| not_numeric(value, field_name))?;
        check_range(number, self.minimum, self.maximum, value, field_name)
    }
}

/// Inclusive bounds compared as whole numbers, exact over the full `i64`
/// range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegerRangeValidator {
    pub minimum: i64,
    pub maximum: i64,
}

impl IntegerRangeValidator {
    pub fn new(minimum: i64, maximum: i64) -> Self {
        Self { minimum, maximum }
    }
}

impl Validator for IntegerRangeValidator {
    fn validate(&self, value: &Json, field_name: &str) -> Result<()> {
        let number = value.as_i64().ok_or_else(|| not_numeric(value, field_name))?;
        check_range(number, self.minimum, self.maximum, value, field_name)
    }
}

/// Character-count bounds for string values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthValidator {
    pub minimum: usize,
    pub maximum: usize,
}

impl LengthValidator {
    pub fn new(minimum: usize, maximum: usize) -> Self {
        Self { minimum, maximum }
    }
}

impl Validator for LengthValidator {
    fn validate(&self, value: &Json, field_name: &str) -> Result<()> {
        let length = expect_str(value, field_name, "LENGTH_VALIDATOR")?.chars().count();

        if length < self.minimum {
            return Err(Error::validation(
                "LENGTH_VALIDATOR_MINIMUM_CONSTRAINT",
                Some(field_name),
                format!(
                    "Field `{field_name}` must be at least {} characters long",
                    self.minimum
                ),
            ));
        }
        if length > self.maximum {
            return Err(Error::validation(
                "LENGTH_VALIDATOR_MAXIMUM_CONSTRAINT",
                Some(field_name),
                format!(
                    "Field `{field_name}` must be at most {} characters long",
                    self.maximum
                ),
            ));
        }

        Ok(())
    }
}

/// Matches string values against a pattern, or rejects matches when
/// `invert` is set.
#[derive(Debug, Clone)]
pub struct RegexValidator {
    pattern: Regex,
    invert: bool,
    message: Option<String>,
}

impl RegexValidator {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|err| {
            Error::server(
                "REGEX_VALIDATOR_INVALID_PATTERN",
                format!("Invalid validator pattern `{pattern}`: {err}"),
            )
        })?;

        Ok(Self {
            pattern,
            invert: false,
            message: None,
        })
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl Validator for RegexValidator {
    fn validate(&self, value: &Json, field_name: &str) -> Result<()> {
        let text = expect_str(value, field_name, "REGEX_VALIDATOR")?;

        if self.pattern.is_match(text) == self.invert {
            let message = self.message.clone().unwrap_or_else(|| {
                format!(
                    "Field `{field_name}` value `{text}` does not satisfy pattern `{}`",
                    self.pattern.as_str()
                )
            });
            return Err(Error::validation(
                "REGEX_VALIDATOR_FAILED",
                Some(field_name),
                message,
            ));
        }

        Ok(())
    }
}

fn is_hostname(text: &str) -> bool {
    !text.is_empty() && text.len() <= 253 && text.split('.').all(|label| HOSTNAME_LABEL.is_match(label))
}

/// Accepts IPv4/IPv6 addresses, optionally FQDNs and fixed keywords.
#[derive(Debug, Clone)]
pub struct IpAddressValidator {
    pub allow_ipv4: bool,
    pub allow_ipv6: bool,
    pub allow_fqdn: bool,
    pub allow_keywords: Vec<String>,
}

impl Default for IpAddressValidator {
    fn default() -> Self {
        Self {
            allow_ipv4: true,
            allow_ipv6: true,
            allow_fqdn: false,
            allow_keywords: Vec::new(),
        }
    }
}

impl IpAddressValidator {
    pub fn ipv4() -> Self {
        Self {
            allow_ipv6: false,
            ..Self::default()
        }
    }

    pub fn ipv6() -> Self {
        Self {
            allow_ipv4: false,
            ..Self::default()
        }
    }

    pub fn allow_fqdn(mut self) -> Self {
        self.allow_fqdn = true;
        self
    }

    pub fn allow_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.allow_keywords.push(keyword.into());
        self
    }
}

impl Validator for IpAddressValidator {
    fn validate(&self, value: &Json, field_name: &str) -> Result<()> {
        let text = expect_str(value, field_name, "IP_ADDRESS_VALIDATOR")?;

        let accepted = (self.allow_ipv4 && text.parse::<Ipv4Addr>().is_ok())
            || (self.allow_ipv6 && text.parse::<Ipv6Addr>().is_ok())
            || (self.allow_fqdn && is_hostname(text) && text.contains('.'))
            || self.allow_keywords.iter().any(|keyword| keyword == text);

        if !accepted {
            return Err(Error::validation(
                "IP_ADDRESS_VALIDATOR_FAILED",
                Some(field_name),
                format!("Field `{field_name}` must be a valid address, received `{text}`"),
            ));
        }

        Ok(())
    }
}

/// Fully qualified domain names: at least two dot-separated labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct FqdnValidator;

impl Validator for FqdnValidator {
    fn validate(&self, value: &Json, field_name: &str) -> Result<()> {
        let text = expect_str(value, field_name, "FQDN_VALIDATOR")?;
        let text = text.strip_suffix('.').unwrap_or(text);

        if !is_hostname(text) || !text.contains('.') {
            return Err(Error::validation(
                "FQDN_VALIDATOR_FAILED",
                Some(field_name),
                format!("Field `{field_name}` must be a fully qualified domain name, received `{text}`"),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HostnameValidator;

impl Validator for HostnameValidator {
    fn validate(&self, value: &Json, field_name: &str) -> Result<()> {
        let text = expect_str(value, field_name, "HOSTNAME_VALIDATOR")?;

        if !is_hostname(text) {
            return Err(Error::validation(
                "HOSTNAME_VALIDATOR_FAILED",
                Some(field_name),
                format!("Field `{field_name}` must be a valid hostname, received `{text}`"),
            ));
        }

        Ok(())
    }
}

/// Six colon- or dash-separated hex octets.
#[derive(Debug, Clone, Copy, Default)]
pub struct MacAddressValidator;

impl Validator for MacAddressValidator {
    fn validate(&self, value: &Json, field_name: &str) -> Result<()> {
        let text = expect_str(value, field_name, "MAC_ADDRESS_VALIDATOR")?;

        if !MAC_ADDRESS.is_match(text) {
            return Err(Error::validation(
                "MAC_ADDRESS_VALIDATOR_FAILED",
                Some(field_name),
                format!("Field `{field_name}` must be a valid MAC address, received `{text}`"),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_range_bounds_are_inclusive() {
        let validator = NumericRangeValidator::new(300, 86400);
        assert!(validator.validate(&json!(300), "exp").is_ok());
        assert!(validator.validate(&json!(86400), "exp").is_ok());

        let err = validator.validate(&json!(299), "exp").unwrap_err();
        assert_eq!(err.response_id(), "NUMERIC_RANGE_VALIDATOR_MINIMUM_CONSTRAINT");
        let err = validator.validate(&json!(86401), "exp").unwrap_err();
        assert_eq!(err.response_id(), "NUMERIC_RANGE_VALIDATOR_MAXIMUM_CONSTRAINT");
    }

    #[test]
    fn test_integer_range_is_exact_for_large_bounds() {
        let validator = IntegerRangeValidator::new(i64::MAX - 1, i64::MAX);
        assert!(validator.validate(&json!(i64::MAX), "counter").is_ok());

        // both sides round to the same f64
        let err = validator.validate(&json!(i64::MAX - 2), "counter").unwrap_err();
        assert_eq!(err.response_id(), "NUMERIC_RANGE_VALIDATOR_MINIMUM_CONSTRAINT");

        let upper = IntegerRangeValidator::new(0, 1 << 53);
        let err = upper.validate(&json!((1_i64 << 53) + 1), "counter").unwrap_err();
        assert_eq!(err.response_id(), "NUMERIC_RANGE_VALIDATOR_MAXIMUM_CONSTRAINT");

        let err = upper.validate(&json!(1.5), "counter").unwrap_err();
        assert_eq!(err.response_id(), "NUMERIC_RANGE_VALIDATOR_VALUE_MUST_BE_NUMERIC");
    }

    #[test]
    fn test_ip_address_validator_modes() {
        let any = IpAddressValidator::default();
        assert!(any.validate(&json!("10.0.0.1"), "addr").is_ok());
        assert!(any.validate(&json!("fe80::1"), "addr").is_ok());
        assert!(any.validate(&json!("example.com"), "addr").is_err());

        let v4 = IpAddressValidator::ipv4().allow_fqdn().allow_keyword("dynamic");
        assert!(v4.validate(&json!("fe80::1"), "addr").is_err());
        assert!(v4.validate(&json!("gw.example.com"), "addr").is_ok());
        assert!(v4.validate(&json!("dynamic"), "addr").is_ok());
    }

    #[test]
    fn test_hostname_and_fqdn() {
        assert!(HostnameValidator.validate(&json!("router-1"), "host").is_ok());
        assert!(HostnameValidator.validate(&json!("-bad"), "host").is_err());
        assert!(FqdnValidator.validate(&json!("router"), "host").is_err());
        assert!(FqdnValidator.validate(&json!("router.lan."), "host").is_ok());
    }

    #[test]
    fn test_mac_address_validator() {
        assert!(MacAddressValidator.validate(&json!("00:1a:2B:3c:4d:5e"), "mac").is_ok());
        assert!(MacAddressValidator.validate(&json!("00:1a:2B:3c:4d"), "mac").is_err());
    }

    #[test]
    fn test_regex_validator_inverted() {
        let validator = RegexValidator::new(r"\s").unwrap().inverted();
        assert!(validator.validate(&json!("no_spaces"), "name").is_ok());
        let err = validator.validate(&json!("has space"), "name").unwrap_err();
        assert_eq!(err.response_id(), "REGEX_VALIDATOR_FAILED");
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let err = MacAddressValidator.validate(&json!(5), "mac").unwrap_err();
        assert_eq!(err.response_id(), "MAC_ADDRESS_VALIDATOR_VALUE_MUST_BE_STRING");
    }
}
