//! Turns log call arguments into the human-readable `msg` field.
//!
//! Values are stringified by type:
//! - `true` / `false` for booleans
//! - `null` for null
//! - canonical decimal text for numbers
//! - canonical JSON for arrays and objects
//! - strings verbatim
//!
//! When a format string is given with arguments, printf-style conversions
//! (`%s %d %i %u %f %x %X %b %%`, with `-`/`0` flags, width and precision)
//! are substituted from the arguments in order.

use serde_json::Value;

/// Stringifies a single value for the message field.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Bool(true) => "true".to_string(),
        Value::Bool(false) => "false".to_string(),
        Value::Null => "null".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}

/// Builds the message: formats when `message` is a string with arguments,
/// otherwise stringifies `message` alone.
pub fn compose(message: &Value, args: &[Value]) -> String {
    match message {
        Value::String(format) if !args.is_empty() => format_message(format, args),
        other => stringify(other),
    }
}

#[derive(Debug, Default)]
struct Conversion {
    left_align: bool,
    zero_pad: bool,
    width: usize,
    precision: Option<usize>,
}

/// printf-style formatting over JSON values.
///
/// Missing arguments render as empty text; unknown conversions are copied
/// through unchanged.
pub fn format_message(format: &str, args: &[Value]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut args = args.iter();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        let mut raw = String::from("%");
        let mut conv = Conversion::default();

        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => conv.left_align = true,
                '0' => conv.zero_pad = true,
                _ => break,
            }
            raw.push(flag);
            chars.next();
        }
        conv.width = read_number(&mut chars, &mut raw);
        if chars.peek() == Some(&'.') {
            raw.push('.');
            chars.next();
            conv.precision = Some(read_number(&mut chars, &mut raw));
        }

        let Some(kind) = chars.next() else {
            out.push_str(&raw);
            break;
        };

        let rendered = match kind {
            's' => {
                let text = args.next().map(stringify).unwrap_or_default();
                Some(match conv.precision {
                    Some(max) => text.chars().take(max).collect(),
                    None => text,
                })
            }
            'd' | 'i' | 'u' => Some(integer_of(args.next()).to_string()),
            'f' | 'F' => Some(format!(
                "{:.*}",
                conv.precision.unwrap_or(6),
                float_of(args.next())
            )),
            'x' => Some(format!("{:x}", integer_of(args.next()))),
            'X' => Some(format!("{:X}", integer_of(args.next()))),
            'b' => Some(format!("{:b}", integer_of(args.next()))),
            _ => None,
        };

        match rendered {
            Some(text) => out.push_str(&pad(text, &conv, kind != 's')),
            None => {
                out.push_str(&raw);
                out.push(kind);
            }
        }
    }

    out
}

fn read_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, raw: &mut String) -> usize {
    let mut value = 0usize;
    while let Some(&d) = chars.peek() {
        let Some(digit) = d.to_digit(10) else { break };
        value = value.saturating_mul(10).saturating_add(digit as usize);
        raw.push(d);
        chars.next();
    }
    value
}

fn pad(text: String, conv: &Conversion, numeric: bool) -> String {
    let len = text.chars().count();
    if len >= conv.width {
        return text;
    }
    let fill = conv.width - len;
    if conv.left_align {
        format!("{}{}", text, " ".repeat(fill))
    } else if conv.zero_pad && numeric {
        match text.strip_prefix('-') {
            Some(digits) => format!("-{}{}", "0".repeat(fill), digits),
            None => format!("{}{}", "0".repeat(fill), text),
        }
    } else {
        format!("{}{}", " ".repeat(fill), text)
    }
}

fn integer_of(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Some(Value::Bool(b)) => i64::from(*b),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))
                .unwrap_or(0)
        }
        Some(Value::Array(items)) => i64::from(!items.is_empty()),
        Some(Value::Object(map)) => i64::from(!map.is_empty()),
        Some(Value::Null) | None => 0,
    }
}

fn float_of(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        other => integer_of(other) as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stringify_by_type() {
        assert_eq!(stringify(&json!(true)), "true");
        assert_eq!(stringify(&json!(false)), "false");
        assert_eq!(stringify(&Value::Null), "null");
        assert_eq!(stringify(&json!(1234)), "1234");
        assert_eq!(stringify(&json!(1234.233)), "1234.233");
        assert_eq!(stringify(&json!([1, 2])), "[1,2]");
        assert_eq!(
            stringify(&json!({"engine": "V6 3.5", "numberOfDoors": 4})),
            r#"{"engine":"V6 3.5","numberOfDoors":4}"#
        );
        assert_eq!(stringify(&json!("plain")), "plain");
    }

    #[test]
    fn test_compose_without_args_stringifies() {
        assert_eq!(compose(&json!([1, 2]), &[]), "[1,2]");
        // A lone string is not treated as a format
        assert_eq!(compose(&json!("100%s done"), &[]), "100%s done");
    }

    #[test]
    fn test_format_substitutes_in_order() {
        assert_eq!(format_message("test %s %s", &[json!(1), json!(2)]), "test 1 2");
        assert_eq!(
            format_message("this is msg %d ---", &[json!(123)]),
            "this is msg 123 ---"
        );
        assert_eq!(
            format_message("blah %s this", &[json!({"engine": "V6"})]),
            r#"blah {"engine":"V6"} this"#
        );
    }

    #[test]
    fn test_format_numeric_conversions() {
        assert_eq!(format_message("%.2f", &[json!(3.14159)]), "3.14");
        assert_eq!(format_message("%f", &[json!(1)]), "1.000000");
        assert_eq!(format_message("%05d", &[json!(42)]), "00042");
        assert_eq!(format_message("%05d", &[json!(-42)]), "-0042");
        assert_eq!(format_message("%x", &[json!(255)]), "ff");
        assert_eq!(format_message("%d", &[json!("17 apples")]), "0");
        assert_eq!(format_message("%d", &[json!(9.9)]), "9");
    }

    #[test]
    fn test_format_width_and_alignment() {
        assert_eq!(format_message("[%5s]", &[json!("ab")]), "[   ab]");
        assert_eq!(format_message("[%-5s]", &[json!("ab")]), "[ab   ]");
        assert_eq!(format_message("[%.3s]", &[json!("abcdef")]), "[abc]");
    }

    #[test]
    fn test_format_edge_cases() {
        assert_eq!(format_message("100%%", &[json!(1)]), "100%");
        assert_eq!(format_message("%s and %s", &[json!("one")]), "one and ");
        assert_eq!(format_message("%q stays", &[json!(1)]), "%q stays");
        assert_eq!(format_message("trailing %", &[json!(1)]), "trailing %");
    }
}
