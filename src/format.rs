//! The format-spec mini-language used by f-string fields.
//!
//! Covers fill and alignment, sign, zero padding, width, `,`/`_` grouping,
//! precision and the `s d x X o b f F e E %` presentation types. Anything
//! else raises `NotImplementedError` rather than guessing.

use crate::value::{float_repr, op_error, OpError, Value};

#[derive(Debug, Default)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn invalid(message: impl Into<String>) -> OpError {
    op_error("ValueError", message)
}

fn unsupported(spec: &str) -> OpError {
    op_error(
        "NotImplementedError",
        format!("format spec '{spec}' is not supported"),
    )
}

fn parse(text: &str) -> Result<Spec, OpError> {
    let chars: Vec<char> = text.chars().collect();
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    let mut spec = Spec::default();
    let mut i = 0;

    if chars.len() >= 2 && is_align(chars[1]) {
        spec.fill = Some(chars[0]);
        spec.align = Some(chars[1]);
        i = 2;
    } else if chars.first().is_some_and(|c| is_align(*c)) {
        spec.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c @ ('+' | '-' | ' ')) = chars.get(i) {
        spec.sign = Some(c);
        i += 1;
    }
    if matches!(chars.get(i), Some('#' | 'z')) {
        return Err(unsupported(text));
    }
    if chars.get(i) == Some(&'0') {
        spec.zero = true;
        i += 1;
    }
    let digits = |i: &mut usize| -> Option<usize> {
        let start = *i;
        while chars.get(*i).is_some_and(|c| c.is_ascii_digit()) {
            *i += 1;
        }
        (*i > start).then(|| {
            chars[start..*i]
                .iter()
                .fold(0usize, |n, d| n.saturating_mul(10).saturating_add(d.to_digit(10).unwrap_or(0) as usize))
        })
    };
    spec.width = digits(&mut i).unwrap_or(0);
    if let Some(&c @ (',' | '_')) = chars.get(i) {
        spec.grouping = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        spec.precision = Some(digits(&mut i).ok_or_else(|| invalid("Format specifier missing precision"))?);
    }
    if let Some(&c) = chars.get(i) {
        spec.kind = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(invalid("Invalid format specifier"));
    }
    Ok(spec)
}

/// `format(value, spec)`.
pub fn format_value(value: &Value, text: &str) -> Result<String, OpError> {
    if text.is_empty() {
        return Ok(value.display());
    }
    let spec = parse(text)?;
    match value {
        Value::Str(s) => format_str(s, &spec, text),
        Value::Int(i) => format_int(*i, &spec, text),
        Value::Bool(b) => match spec.kind {
            None | Some('s') if spec.sign.is_none() && spec.grouping.is_none() => {
                format_str(&value.display(), &spec, text)
            }
            _ => format_int(*b as i64, &spec, text),
        },
        Value::Float(f) => format_float(*f, &spec, text),
        other => Err(op_error(
            "TypeError",
            format!("unsupported format string passed to {}.__format__", other.type_name()),
        )),
    }
}

fn format_str(s: &str, spec: &Spec, text: &str) -> Result<String, OpError> {
    if !matches!(spec.kind, None | Some('s')) {
        return Err(invalid(format!(
            "Unknown format code '{}' for object of type 'str'",
            spec.kind.unwrap_or('s')
        )));
    }
    if spec.sign.is_some() {
        return Err(invalid("Sign not allowed in string format specifier"));
    }
    if spec.grouping.is_some() || spec.align == Some('=') {
        return Err(unsupported(text));
    }
    let body: String = match spec.precision {
        Some(p) => s.chars().take(p).collect(),
        None => s.to_string(),
    };
    Ok(pad("", &body, spec, '<'))
}

fn format_int(i: i64, spec: &Spec, text: &str) -> Result<String, OpError> {
    let (radix, group_every) = match spec.kind {
        None | Some('d') => (10, 3),
        Some('x') | Some('X') => (16, 4),
        Some('o') => (8, 4),
        Some('b') => (2, 4),
        Some('f' | 'F' | 'e' | 'E' | '%') => return format_float(i as f64, spec, text),
        Some(_) => return Err(unsupported(text)),
    };
    if spec.precision.is_some() {
        return Err(invalid("Precision not allowed in integer format specifier"));
    }
    if spec.grouping == Some(',') && radix != 10 {
        return Err(invalid(format!(
            "Cannot specify ',' with '{}'.",
            spec.kind.unwrap_or('d')
        )));
    }
    let magnitude = i.unsigned_abs();
    let mut digits = match radix {
        16 => format!("{magnitude:x}"),
        8 => format!("{magnitude:o}"),
        2 => format!("{magnitude:b}"),
        _ => magnitude.to_string(),
    };
    if spec.kind == Some('X') {
        digits = digits.to_uppercase();
    }
    if let Some(sep) = spec.grouping {
        digits = group(&digits, sep, group_every);
    }
    Ok(pad(sign(i < 0, spec), &digits, spec, '>'))
}

fn format_float(f: f64, spec: &Spec, text: &str) -> Result<String, OpError> {
    let kind = match spec.kind {
        None if spec.precision.is_none() => None,
        Some(k @ ('f' | 'F' | 'e' | 'E' | '%')) => Some(k),
        Some(k @ ('d' | 'x' | 'X' | 'o' | 'b' | 's')) => {
            return Err(invalid(format!(
                "Unknown format code '{k}' for object of type 'float'"
            )));
        }
        _ => return Err(unsupported(text)),
    };
    let precision = spec.precision.unwrap_or(6);
    let magnitude = f.abs();
    let mut body = if !f.is_finite() {
        let word = if f.is_nan() { "nan" } else { "inf" };
        match kind {
            Some('F' | 'E') => word.to_uppercase(),
            Some('%') => format!("{word}%"),
            _ => word.to_string(),
        }
    } else {
        match kind {
            None => float_repr(magnitude),
            Some('f' | 'F') => format!("{magnitude:.precision$}"),
            Some('%') => format!("{:.precision$}%", magnitude * 100.0),
            Some(k) => {
                let s = exponent(&format!("{magnitude:.precision$e}"));
                if k == 'E' { s.to_uppercase() } else { s }
            }
        }
    };
    if let Some(sep) = spec.grouping {
        if f.is_finite() {
            let split = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
            let (int_part, rest) = body.split_at(split);
            body = format!("{}{rest}", group(int_part, sep, 3));
        }
    }
    Ok(pad(sign(f.is_sign_negative() && !f.is_nan(), spec), &body, spec, '>'))
}

/// Rust writes `1.5e3`; Python writes `1.5e+03`.
fn exponent(rust: &str) -> String {
    match rust.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => rust.to_string(),
    }
}

fn sign(negative: bool, spec: &Spec) -> &'static str {
    match (negative, spec.sign) {
        (true, _) => "-",
        (false, Some('+')) => "+",
        (false, Some(' ')) => " ",
        _ => "",
    }
}

fn group(digits: &str, sep: char, every: usize) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::with_capacity(chars.len() + chars.len() / every);
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % every == 0 {
            out.push(sep);
        }
        out.push(*c);
    }
    out
}

fn pad(sign: &str, body: &str, spec: &Spec, default_align: char) -> String {
    let (fill, align) = match (spec.fill, spec.align) {
        (_, None) if spec.zero => ('0', '='),
        (fill, align) => (fill.unwrap_or(' '), align.unwrap_or(default_align)),
    };
    let len = sign.chars().count() + body.chars().count();
    let missing = spec.width.saturating_sub(len);
    let fill_n = |n: usize| fill.to_string().repeat(n);
    match align {
        '<' => format!("{sign}{body}{}", fill_n(missing)),
        '^' => format!(
            "{}{sign}{body}{}",
            fill_n(missing / 2),
            fill_n(missing - missing / 2)
        ),
        '=' => format!("{sign}{}{body}", fill_n(missing)),
        _ => format!("{}{sign}{body}", fill_n(missing)),
    }
}

#[cfg(test)]
mod tests {
    use super::format_value;
    use crate::value::Value;

    fn fmt(v: Value, spec: &str) -> String {
        format_value(&v, spec).unwrap()
    }

    #[test]
    fn numbers() {
        assert_eq!(fmt(Value::Float(3.14159), ".2f"), "3.14");
        assert_eq!(fmt(Value::Int(42), "05d"), "00042");
        assert_eq!(fmt(Value::Int(-42), "05"), "-0042");
        assert_eq!(fmt(Value::Int(1234567), ","), "1,234,567");
        assert_eq!(fmt(Value::Int(255), "x"), "ff");
        assert_eq!(fmt(Value::Int(5), "+d"), "+5");
        assert_eq!(fmt(Value::Float(0.25), ".1%"), "25.0%");
        assert_eq!(fmt(Value::Float(1234.5), ".2e"), "1.23e+03");
        assert_eq!(fmt(Value::Float(1234.5), ",.1f"), "1,234.5");
    }

    #[test]
    fn alignment_and_fill() {
        assert_eq!(fmt(Value::str("ab"), ">5"), "   ab");
        assert_eq!(fmt(Value::str("ab"), "*^6"), "**ab**");
        assert_eq!(fmt(Value::Int(7), "<3"), "7  ");
        assert_eq!(fmt(Value::str("abcdef"), ".3"), "abc");
    }

    #[test]
    fn bad_or_unsupported_specs() {
        assert_eq!(
            format_value(&Value::str("a"), "d").unwrap_err().kind,
            "ValueError"
        );
        assert_eq!(
            format_value(&Value::Float(1.0), ".3g").unwrap_err().kind,
            "NotImplementedError"
        );
    }
}
