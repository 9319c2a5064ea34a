//! Attribute types and typed comparisons.
//!
//! Every stored field has one of three fixed-width shapes: a 4-byte signed
//! integer (`i`), a 4-byte float (`f`), or an `N`-byte string (`sN`).
//! Fields travel as raw little-endian bytes inside packed records; this
//! crate owns the conversions between command-line literals, field bytes,
//! and decoded values, plus the comparison semantics scans rely on.

use std::cmp::Ordering;
use std::fmt;

/// Maximum `N` accepted in an `sN` string format.
pub const MAX_STR_LEN: usize = 50;

/// Absolute tolerance for float comparisons.
pub const FLOAT_ABS_EPS: f64 = 1e-6;
/// Relative tolerance for float comparisons.
pub const FLOAT_REL_EPS: f64 = 1e-6;

/// The type tag of an attribute, stored on disk as a single byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttrType {
    Int,
    Float,
    Str,
}

impl AttrType {
    /// The on-disk tag byte.
    pub fn code(self) -> u8 {
        match self {
            AttrType::Int => b'i',
            AttrType::Float => b'f',
            AttrType::Str => b's',
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b'i' => Some(AttrType::Int),
            b'f' => Some(AttrType::Float),
            b's' => Some(AttrType::Str),
            _ => None,
        }
    }
}

/// Why a format string failed to parse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatError {
    /// Not one of `i`, `f`, `sN`.
    Syntax,
    /// `sN` with `N` outside `1..=MAX_STR_LEN`.
    StrLen,
}

/// Parse an attribute format string (`"i"`, `"f"`, or `"sN"`) into its
/// type tag and byte width.
pub fn parse_format(fmt: &str) -> Result<(AttrType, usize), FormatError> {
    match fmt {
        "i" => Ok((AttrType::Int, 4)),
        "f" => Ok((AttrType::Float, 4)),
        _ => {
            let digits = fmt.strip_prefix('s').ok_or(FormatError::Syntax)?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(FormatError::Syntax);
            }
            // Two digits cover the whole legal range.
            if digits.len() > 2 {
                return Err(FormatError::StrLen);
            }
            let n: usize = digits.parse().map_err(|_| FormatError::Syntax)?;
            if n == 0 || n > MAX_STR_LEN {
                return Err(FormatError::StrLen);
            }
            Ok((AttrType::Str, n))
        }
    }
}

/// Render a `(type, width)` pair back into its format string.
pub fn render_format(ty: AttrType, width: usize) -> String {
    match ty {
        AttrType::Int => "i".to_string(),
        AttrType::Float => "f".to_string(),
        AttrType::Str => format!("s{width}"),
    }
}

/// A comparison operator, as supplied with `select`/`delete`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// Decode the integer constant used at the command boundary.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            501 => Some(CompareOp::Eq),
            502 => Some(CompareOp::Ge),
            503 => Some(CompareOp::Gt),
            504 => Some(CompareOp::Le),
            505 => Some(CompareOp::Ne),
            506 => Some(CompareOp::Lt),
            _ => None,
        }
    }

    pub fn from_symbol(sym: &str) -> Option<Self> {
        match sym {
            "=" | "==" => Some(CompareOp::Eq),
            "!=" | "<>" => Some(CompareOp::Ne),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            _ => None,
        }
    }

    /// Apply the operator to an ordering of `field` relative to the
    /// comparison value. `None` means unordered (a NaN was involved), for
    /// which only `Ne` holds.
    pub fn holds(self, ord: Option<Ordering>) -> bool {
        let Some(ord) = ord else {
            return self == CompareOp::Ne;
        };
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
        }
    }
}

/// Tolerant float comparison: equal within
/// `max(FLOAT_ABS_EPS, FLOAT_REL_EPS * max(|a|, |b|))`, `None` when either
/// side is NaN. Infinities compare exactly.
pub fn float_cmp(a: f64, b: f64) -> Option<Ordering> {
    if a.is_nan() || b.is_nan() {
        return None;
    }
    if a.is_infinite() || b.is_infinite() {
        return a.partial_cmp(&b);
    }
    let tol = FLOAT_ABS_EPS.max(FLOAT_REL_EPS * a.abs().max(b.abs()));
    let diff = a - b;
    if diff.abs() <= tol {
        Some(Ordering::Equal)
    } else if diff > 0.0 {
        Some(Ordering::Greater)
    } else {
        Some(Ordering::Less)
    }
}

fn is_valid_integer(s: &str) -> bool {
    let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_valid_float(s: &str) -> bool {
    let body = s.strip_prefix(['-', '+']).unwrap_or(s);
    if body.is_empty() {
        return false;
    }
    let mut dot_seen = false;
    let mut digit_seen = false;
    for b in body.bytes() {
        match b {
            b'.' if dot_seen => return false,
            b'.' => dot_seen = true,
            b'0'..=b'9' => digit_seen = true,
            _ => return false,
        }
    }
    digit_seen
}

/// Copy a literal into a fixed-width string field: truncate to `width`,
/// zero-pad, and force a terminating NUL in the last byte when the input
/// did not fit.
pub fn fixed_str_bytes(literal: &str, width: usize) -> Vec<u8> {
    let src = literal.as_bytes();
    let mut buf = vec![0u8; width];
    let n = src.len().min(width);
    buf[..n].copy_from_slice(&src[..n]);
    if src.len() >= width {
        buf[width - 1] = 0;
    }
    buf
}

/// A typed comparison value in its stored representation.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Int(i32),
    Float(f32),
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// Validate and convert a literal for a field of the given type and
    /// width. Returns `None` for malformed or out-of-range numerics;
    /// string literals always convert (with truncation).
    pub fn parse(ty: AttrType, width: usize, literal: &str) -> Option<Self> {
        match ty {
            AttrType::Int => {
                if !is_valid_integer(literal) {
                    return None;
                }
                literal.parse::<i32>().ok().map(FieldValue::Int)
            }
            AttrType::Float => {
                if !is_valid_float(literal) {
                    return None;
                }
                literal.parse::<f32>().ok().map(FieldValue::Float)
            }
            AttrType::Str => Some(FieldValue::Bytes(fixed_str_bytes(literal, width))),
        }
    }

    /// The field bytes this value occupies inside a record.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            FieldValue::Int(v) => v.to_le_bytes().to_vec(),
            FieldValue::Float(v) => v.to_le_bytes().to_vec(),
            FieldValue::Bytes(b) => b.clone(),
        }
    }

    /// Order the stored field bytes relative to this value.
    pub fn compare_field(&self, field: &[u8]) -> Option<Ordering> {
        match self {
            FieldValue::Int(v) => {
                let cur = int_from_field(field);
                Some(cur.cmp(v))
            }
            FieldValue::Float(v) => {
                let cur = f32::from_le_bytes(field[..4].try_into().ok()?);
                float_cmp(cur as f64, *v as f64)
            }
            FieldValue::Bytes(b) => {
                let width = b.len().min(field.len());
                Some(field[..width].cmp(&b[..width]))
            }
        }
    }

    /// Does `field <op> self` hold?
    pub fn matches(&self, field: &[u8], op: CompareOp) -> bool {
        op.holds(self.compare_field(field))
    }
}

/// A decoded field, ready for display.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f32),
    Str(String),
}

/// Little-endian decode that zero-extends fields narrower than four
/// bytes (the catalog stores one-byte flags as integers).
fn int_from_field(raw: &[u8]) -> i32 {
    let mut bytes = [0u8; 4];
    let n = raw.len().min(4);
    bytes[..n].copy_from_slice(&raw[..n]);
    i32::from_le_bytes(bytes)
}

/// Decode the raw bytes of one field. String fields are trimmed of
/// trailing NULs and spaces.
pub fn decode_field(ty: AttrType, raw: &[u8]) -> Value {
    match ty {
        AttrType::Int => Value::Int(int_from_field(raw)),
        AttrType::Float => Value::Float(f32::from_le_bytes(raw[..4].try_into().unwrap_or([0; 4]))),
        AttrType::Str => {
            let end = raw
                .iter()
                .rposition(|&b| b != 0 && b != b' ')
                .map_or(0, |i| i + 1);
            Value::Str(String::from_utf8_lossy(&raw[..end]).into_owned())
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v:.2}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cmp::Ordering::{Equal, Greater, Less};

    #[test]
    fn parses_scalar_formats() {
        assert_eq!(parse_format("i"), Ok((AttrType::Int, 4)));
        assert_eq!(parse_format("f"), Ok((AttrType::Float, 4)));
        assert_eq!(parse_format("s10"), Ok((AttrType::Str, 10)));
        assert_eq!(parse_format("s1"), Ok((AttrType::Str, 1)));
        assert_eq!(parse_format("s50"), Ok((AttrType::Str, 50)));
    }

    #[test]
    fn rejects_malformed_formats() {
        assert_eq!(parse_format("x"), Err(FormatError::Syntax));
        assert_eq!(parse_format("s"), Err(FormatError::Syntax));
        assert_eq!(parse_format("s1x"), Err(FormatError::Syntax));
        assert_eq!(parse_format("int"), Err(FormatError::Syntax));
        assert_eq!(parse_format("s0"), Err(FormatError::StrLen));
        assert_eq!(parse_format("s51"), Err(FormatError::StrLen));
        assert_eq!(parse_format("s100"), Err(FormatError::StrLen));
    }

    #[test]
    fn format_round_trips() {
        for fmt in ["i", "f", "s7", "s20"] {
            let (ty, width) = parse_format(fmt).unwrap();
            assert_eq!(render_format(ty, width), fmt);
        }
    }

    #[test]
    fn op_codes_match_command_boundary() {
        assert_eq!(CompareOp::from_code(501), Some(CompareOp::Eq));
        assert_eq!(CompareOp::from_code(502), Some(CompareOp::Ge));
        assert_eq!(CompareOp::from_code(503), Some(CompareOp::Gt));
        assert_eq!(CompareOp::from_code(504), Some(CompareOp::Le));
        assert_eq!(CompareOp::from_code(505), Some(CompareOp::Ne));
        assert_eq!(CompareOp::from_code(506), Some(CompareOp::Lt));
        assert_eq!(CompareOp::from_code(7), None);
    }

    #[test]
    fn nan_is_unordered_only_ne_holds() {
        let nan = FieldValue::Float(1.0);
        let field = f32::NAN.to_le_bytes();
        assert!(!nan.matches(&field, CompareOp::Eq));
        assert!(!nan.matches(&field, CompareOp::Lt));
        assert!(!nan.matches(&field, CompareOp::Le));
        assert!(!nan.matches(&field, CompareOp::Gt));
        assert!(!nan.matches(&field, CompareOp::Ge));
        assert!(nan.matches(&field, CompareOp::Ne));
    }

    #[test]
    fn floats_compare_within_tolerance() {
        assert_eq!(float_cmp(1.0, 1.0 + 1e-9), Some(Equal));
        assert_eq!(float_cmp(1.0, 2.0), Some(Less));
        assert_eq!(float_cmp(2.0, 1.0), Some(Greater));
        assert_eq!(float_cmp(f64::INFINITY, f64::INFINITY), Some(Equal));
        assert_eq!(float_cmp(f64::NEG_INFINITY, 0.0), Some(Less));
    }

    #[test]
    fn integer_literals_validate_like_the_shell() {
        assert_eq!(FieldValue::parse(AttrType::Int, 4, "42"), Some(FieldValue::Int(42)));
        assert_eq!(FieldValue::parse(AttrType::Int, 4, "-3"), Some(FieldValue::Int(-3)));
        assert_eq!(FieldValue::parse(AttrType::Int, 4, "+7"), Some(FieldValue::Int(7)));
        assert_eq!(FieldValue::parse(AttrType::Int, 4, "3.5"), None);
        assert_eq!(FieldValue::parse(AttrType::Int, 4, ""), None);
        assert_eq!(FieldValue::parse(AttrType::Int, 4, "-"), None);
        assert_eq!(FieldValue::parse(AttrType::Int, 4, "12a"), None);
    }

    #[test]
    fn float_literals_allow_one_dot() {
        assert!(FieldValue::parse(AttrType::Float, 4, "1.5").is_some());
        assert!(FieldValue::parse(AttrType::Float, 4, "-0.25").is_some());
        assert!(FieldValue::parse(AttrType::Float, 4, "10").is_some());
        assert!(FieldValue::parse(AttrType::Float, 4, "1.2.3").is_none());
        assert!(FieldValue::parse(AttrType::Float, 4, "1e5").is_none());
        assert!(FieldValue::parse(AttrType::Float, 4, ".").is_none());
    }

    #[test]
    fn string_fields_truncate_with_final_nul() {
        assert_eq!(fixed_str_bytes("hi", 4), vec![b'h', b'i', 0, 0]);
        // Exactly the width: last byte is forced to NUL.
        assert_eq!(fixed_str_bytes("abcd", 4), vec![b'a', b'b', b'c', 0]);
        assert_eq!(fixed_str_bytes("abcdef", 4), vec![b'a', b'b', b'c', 0]);
    }

    #[test]
    fn decode_trims_trailing_padding() {
        assert_eq!(
            decode_field(AttrType::Str, b"hi\0\0\0"),
            Value::Str("hi".into())
        );
        assert_eq!(
            decode_field(AttrType::Str, b"pad  \0"),
            Value::Str("pad".into())
        );
        assert_eq!(decode_field(AttrType::Int, &7i32.to_le_bytes()), Value::Int(7));
    }

    #[test]
    fn one_byte_flags_decode_as_integers() {
        assert_eq!(decode_field(AttrType::Int, &[1]), Value::Int(1));
        assert_eq!(decode_field(AttrType::Int, &[0]), Value::Int(0));
        assert_eq!(
            FieldValue::Int(1).compare_field(&[1]),
            Some(std::cmp::Ordering::Equal)
        );
    }

    proptest! {
        #[test]
        fn int_compare_matches_native_order(a in any::<i32>(), b in any::<i32>()) {
            let value = FieldValue::Int(b);
            let field = a.to_le_bytes();
            prop_assert_eq!(value.compare_field(&field), Some(a.cmp(&b)));
        }

        #[test]
        fn float_cmp_is_antisymmetric(a in -1e30f64..1e30, b in -1e30f64..1e30) {
            let fwd = float_cmp(a, b);
            let rev = float_cmp(b, a);
            prop_assert_eq!(fwd.map(Ordering::reverse), rev);
        }

        #[test]
        fn string_compare_matches_byte_order(a in "[a-z]{0,8}", b in "[a-z]{0,8}") {
            let value = FieldValue::Bytes(fixed_str_bytes(&b, 8));
            let field = fixed_str_bytes(&a, 8);
            prop_assert_eq!(
                value.compare_field(&field),
                Some(fixed_str_bytes(&a, 8).cmp(&fixed_str_bytes(&b, 8)))
            );
        }
    }
}
