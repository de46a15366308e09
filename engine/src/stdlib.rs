//! The allow-listed builtin surface available to sandboxed parsers.
//!
//! Everything here is implemented natively; nothing touches the network,
//! filesystem, process environment, or reflection. The set mirrors what a
//! byte-layout parser legitimately needs: formatting, byte-order decoding,
//! math, bit fiddling, byte-slice helpers, conversions, UTF-8 validation,
//! timestamps, and error construction.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::ast::CompositeKind;
use crate::interp::{EvalResult, Fault, Value};

/// Import paths a parser may declare. Anything else is rejected at compile.
pub const ALLOWED_IMPORTS: &[&str] = &[
    "fmt",
    "encoding/binary",
    "math",
    "math/bits",
    "bytes",
    "strconv",
    "unicode/utf8",
    "time",
    "errors",
];

pub fn import_allowed(path: &str) -> bool {
    ALLOWED_IMPORTS.contains(&path)
}

fn wrong_args(name: &str) -> Fault {
    Fault::panic(format!("wrong arguments to {name}"))
}

fn as_int(name: &str, v: &Value) -> Result<i64, Fault> {
    match v {
        Value::Int(i) => Ok(*i),
        _ => Err(wrong_args(name)),
    }
}

fn as_float(name: &str, v: &Value) -> Result<f64, Fault> {
    match v {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        _ => Err(wrong_args(name)),
    }
}

fn as_bytes(name: &str, v: &Value) -> Result<Vec<u8>, Fault> {
    match v {
        Value::Bytes(b) => Ok(b.borrow().clone()),
        _ => Err(wrong_args(name)),
    }
}

fn as_str(name: &str, v: &Value) -> Result<String, Fault> {
    match v {
        Value::Str(s) => Ok(s.to_string()),
        _ => Err(wrong_args(name)),
    }
}

/// Unqualified builtins: `len`, `append`, `make`, `delete`, and the
/// conversion functions. Returns `None` for unknown names so the caller can
/// report an undefined identifier.
pub fn call_builtin(name: &str, args: &[Value]) -> Option<EvalResult> {
    let result = match name {
        "len" => builtin_len(args),
        "append" => builtin_append(args),
        "make" => builtin_make(args),
        "delete" => builtin_delete(args),
        "panic" => Err(Fault::panic(
            args.first().map_or_else(|| "panic".to_string(), display_value),
        )),
        "int" | "int64" | "uint" | "uint64" | "rune" => conv_int(name, args),
        "int8" => conv_masked(name, args, 8, true),
        "int16" => conv_masked(name, args, 16, true),
        "int32" => conv_masked(name, args, 32, true),
        "byte" | "uint8" => conv_masked(name, args, 8, false),
        "uint16" => conv_masked(name, args, 16, false),
        "uint32" => conv_masked(name, args, 32, false),
        "float64" | "float32" => conv_float(name, args),
        "string" => conv_string(args),
        _ => return None,
    };
    Some(result)
}

fn builtin_len(args: &[Value]) -> EvalResult {
    let [v] = args else {
        return Err(wrong_args("len"));
    };
    let n = match v {
        Value::Str(s) => s.len(),
        Value::Bytes(b) => b.borrow().len(),
        Value::List(items) => items.borrow().len(),
        Value::Map(m) => m.borrow().len(),
        Value::Nil => 0,
        other => {
            return Err(Fault::panic(format!(
                "invalid argument: len of {}",
                other.type_name()
            )));
        }
    };
    Ok(Value::Int(n as i64))
}

fn builtin_append(args: &[Value]) -> EvalResult {
    let Some((base, rest)) = args.split_first() else {
        return Err(wrong_args("append"));
    };
    match base {
        Value::Nil => Ok(Value::list(rest.to_vec())),
        Value::List(items) => {
            let mut items = items.borrow().clone();
            items.extend_from_slice(rest);
            Ok(Value::list(items))
        }
        Value::Bytes(bytes) => {
            let mut bytes = bytes.borrow().clone();
            for v in rest {
                match v {
                    Value::Int(i) => bytes.push((i & 0xFF) as u8),
                    other => {
                        return Err(Fault::panic(format!(
                            "cannot append {} to []byte",
                            other.type_name()
                        )));
                    }
                }
            }
            Ok(Value::bytes(bytes))
        }
        other => Err(Fault::panic(format!(
            "first argument to append must be a slice, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_make(args: &[Value]) -> EvalResult {
    // `make` receives the composite kind marker evaluated from its type
    // argument; see the interpreter's TypeRef handling.
    Err(Fault::panic(format!(
        "make expects a composite type argument (got {} values)",
        args.len()
    )))
}

fn builtin_delete(args: &[Value]) -> EvalResult {
    let [m, k] = args else {
        return Err(wrong_args("delete"));
    };
    match (m, k) {
        (Value::Map(m), Value::Str(k)) => {
            m.borrow_mut().remove(k.as_str());
            Ok(Value::Nil)
        }
        (Value::Nil, _) => Ok(Value::Nil),
        _ => Err(wrong_args("delete")),
    }
}

/// `make(map[string]interface{})`, `make([]byte, n)`, `make([]interface{}, n)`
/// and the `[]byte("...")` conversion form, dispatched when a bare composite
/// type appears in call position.
pub fn composite_conversion(kind: CompositeKind, args: &[Value]) -> EvalResult {
    match kind {
        CompositeKind::Map => Ok(Value::map(BTreeMap::new())),
        CompositeKind::Bytes => match args {
            [] => Ok(Value::bytes(Vec::new())),
            [Value::Str(s)] => Ok(Value::bytes(s.as_bytes().to_vec())),
            [Value::Int(n)] if *n >= 0 => Ok(Value::bytes(vec![0u8; *n as usize])),
            _ => Err(wrong_args("[]byte")),
        },
        CompositeKind::List => match args {
            [] => Ok(Value::list(Vec::new())),
            [Value::Int(n)] if *n >= 0 => Ok(Value::list(vec![Value::Nil; *n as usize])),
            _ => Err(wrong_args("make")),
        },
    }
}

fn conv_int(name: &str, args: &[Value]) -> EvalResult {
    let [v] = args else {
        return Err(wrong_args(name));
    };
    match v {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Float(f) => Ok(Value::Int(*f as i64)),
        other => Err(Fault::panic(format!(
            "cannot convert {} to {name}",
            other.type_name()
        ))),
    }
}

fn conv_masked(name: &str, args: &[Value], bits: u32, signed: bool) -> EvalResult {
    let [v] = args else {
        return Err(wrong_args(name));
    };
    let raw = match v {
        Value::Int(i) => *i,
        Value::Float(f) => *f as i64,
        other => {
            return Err(Fault::panic(format!(
                "cannot convert {} to {name}",
                other.type_name()
            )));
        }
    };
    let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
    let truncated = (raw as u64) & mask;
    let value = if signed {
        let sign_bit = 1u64 << (bits - 1);
        if truncated & sign_bit != 0 {
            (truncated | !mask) as i64
        } else {
            truncated as i64
        }
    } else {
        truncated as i64
    };
    Ok(Value::Int(value))
}

fn conv_float(name: &str, args: &[Value]) -> EvalResult {
    let [v] = args else {
        return Err(wrong_args(name));
    };
    match v {
        Value::Int(i) => Ok(Value::Float(*i as f64)),
        Value::Float(f) => Ok(Value::Float(*f)),
        other => Err(Fault::panic(format!(
            "cannot convert {} to {name}",
            other.type_name()
        ))),
    }
}

fn conv_string(args: &[Value]) -> EvalResult {
    let [v] = args else {
        return Err(wrong_args("string"));
    };
    match v {
        Value::Str(s) => Ok(Value::Str(Rc::clone(s))),
        Value::Bytes(b) => Ok(Value::str(
            String::from_utf8_lossy(&b.borrow()).into_owned(),
        )),
        Value::Int(i) => {
            let ch = u32::try_from(*i)
                .ok()
                .and_then(char::from_u32)
                .unwrap_or('\u{FFFD}');
            Ok(Value::str(ch.to_string()))
        }
        other => Err(Fault::panic(format!(
            "cannot convert {} to string",
            other.type_name()
        ))),
    }
}

/// Package-level constants reachable through selectors.
pub fn constant(path: &str) -> Option<Value> {
    Some(match path {
        "math.Pi" => Value::Float(std::f64::consts::PI),
        "math.E" => Value::Float(std::f64::consts::E),
        "math.MaxInt8" => Value::Int(i64::from(i8::MAX)),
        "math.MaxInt16" => Value::Int(i64::from(i16::MAX)),
        "math.MaxInt32" => Value::Int(i64::from(i32::MAX)),
        "math.MaxInt64" => Value::Int(i64::MAX),
        "math.MaxUint8" => Value::Int(255),
        "math.MaxUint16" => Value::Int(65_535),
        "math.MaxUint32" => Value::Int(4_294_967_295),
        _ => return None,
    })
}

/// Qualified calls: `fmt.Sprintf`, `binary.BigEndian.Uint16`, `math.Abs`, …
/// Returns `None` for paths outside the allow-listed surface.
pub fn call_qualified(path: &str, args: &[Value]) -> Option<EvalResult> {
    let result = match path {
        "fmt.Sprintf" => sprintf_call(args),
        "fmt.Sprint" => sprint_call(args),
        "fmt.Errorf" => sprintf_call(args).map(|v| match v {
            Value::Str(s) => Value::ErrVal(Rc::new(s.to_string())),
            other => other,
        }),

        "binary.BigEndian.Uint16" => read_uint(path, args, 2, true),
        "binary.BigEndian.Uint32" => read_uint(path, args, 4, true),
        "binary.BigEndian.Uint64" => read_uint(path, args, 8, true),
        "binary.LittleEndian.Uint16" => read_uint(path, args, 2, false),
        "binary.LittleEndian.Uint32" => read_uint(path, args, 4, false),
        "binary.LittleEndian.Uint64" => read_uint(path, args, 8, false),

        "math.Abs" => float1(path, args, f64::abs),
        "math.Floor" => float1(path, args, f64::floor),
        "math.Ceil" => float1(path, args, f64::ceil),
        "math.Round" => float1(path, args, f64::round),
        "math.Sqrt" => float1(path, args, f64::sqrt),
        "math.Trunc" => float1(path, args, f64::trunc),
        "math.Pow" => float2(path, args, f64::powf),
        "math.Min" => float2(path, args, f64::min),
        "math.Max" => float2(path, args, f64::max),
        "math.Mod" => float2(path, args, |a, b| a % b),

        "bits.OnesCount" | "bits.OnesCount64" => int1(path, args, |v| {
            i64::from((v as u64).count_ones())
        }),
        "bits.OnesCount8" => int1(path, args, |v| i64::from((v as u8).count_ones())),
        "bits.OnesCount16" => int1(path, args, |v| i64::from((v as u16).count_ones())),
        "bits.OnesCount32" => int1(path, args, |v| i64::from((v as u32).count_ones())),
        "bits.LeadingZeros8" => int1(path, args, |v| i64::from((v as u8).leading_zeros())),
        "bits.LeadingZeros16" => int1(path, args, |v| i64::from((v as u16).leading_zeros())),
        "bits.LeadingZeros32" => int1(path, args, |v| i64::from((v as u32).leading_zeros())),
        "bits.TrailingZeros8" => int1(path, args, |v| i64::from((v as u8).trailing_zeros())),
        "bits.TrailingZeros16" => int1(path, args, |v| i64::from((v as u16).trailing_zeros())),
        "bits.TrailingZeros32" => int1(path, args, |v| i64::from((v as u32).trailing_zeros())),
        "bits.Reverse8" => int1(path, args, |v| i64::from((v as u8).reverse_bits())),
        "bits.RotateLeft8" => {
            let r: EvalResult = (|| {
                let [v, k] = args else {
                    return Err(wrong_args(path));
                };
                let v = as_int(path, v)? as u8;
                let k = as_int(path, k)?;
                Ok(Value::Int(i64::from(v.rotate_left((k & 7) as u32))))
            })();
            r
        }

        "bytes.Equal" => bytes2(path, args, |a, b| a == b),
        "bytes.HasPrefix" => bytes2(path, args, |a, b| a.starts_with(b)),
        "bytes.HasSuffix" => bytes2(path, args, |a, b| a.ends_with(b)),
        "bytes.Contains" => bytes2(path, args, |a, b| {
            b.is_empty() || a.windows(b.len().max(1)).any(|w| w == b)
        }),
        "bytes.IndexByte" => {
            let r: EvalResult = (|| {
                let [b, c] = args else {
                    return Err(wrong_args(path));
                };
                let haystack = as_bytes(path, b)?;
                let needle = (as_int(path, c)? & 0xFF) as u8;
                Ok(Value::Int(
                    haystack
                        .iter()
                        .position(|x| *x == needle)
                        .map_or(-1, |i| i as i64),
                ))
            })();
            r
        }

        "strconv.Itoa" => {
            let r: EvalResult = (|| {
                let [v] = args else {
                    return Err(wrong_args(path));
                };
                Ok(Value::str(as_int(path, v)?.to_string()))
            })();
            r
        }
        "strconv.FormatInt" => {
            let r: EvalResult = (|| {
                let [v, base] = args else {
                    return Err(wrong_args(path));
                };
                let v = as_int(path, v)?;
                let base = as_int(path, base)?;
                format_int(v, base)
            })();
            r
        }
        "strconv.Quote" => {
            let r: EvalResult = (|| {
                let [v] = args else {
                    return Err(wrong_args(path));
                };
                Ok(Value::str(format!("{:?}", as_str(path, v)?)))
            })();
            r
        }

        "utf8.Valid" => {
            let r: EvalResult = (|| {
                let [v] = args else {
                    return Err(wrong_args(path));
                };
                Ok(Value::Bool(std::str::from_utf8(&as_bytes(path, v)?).is_ok()))
            })();
            r
        }
        "utf8.ValidString" => {
            let r: EvalResult = (|| {
                let [v] = args else {
                    return Err(wrong_args(path));
                };
                // host strings are always valid UTF-8
                as_str(path, v)?;
                Ok(Value::Bool(true))
            })();
            r
        }
        "utf8.RuneCount" => {
            let r: EvalResult = (|| {
                let [v] = args else {
                    return Err(wrong_args(path));
                };
                let bytes = as_bytes(path, v)?;
                Ok(Value::Int(
                    String::from_utf8_lossy(&bytes).chars().count() as i64
                ))
            })();
            r
        }
        "utf8.RuneCountInString" => {
            let r: EvalResult = (|| {
                let [v] = args else {
                    return Err(wrong_args(path));
                };
                Ok(Value::Int(as_str(path, v)?.chars().count() as i64))
            })();
            r
        }

        "time.Now" => {
            if !args.is_empty() {
                Err(wrong_args(path))
            } else {
                let nanos = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_nanos() as i64)
                    .unwrap_or(0);
                Ok(Value::Time(nanos))
            }
        }

        "errors.New" => {
            let r: EvalResult = (|| {
                let [v] = args else {
                    return Err(wrong_args(path));
                };
                Ok(Value::ErrVal(Rc::new(as_str(path, v)?)))
            })();
            r
        }

        _ => return None,
    };
    Some(result)
}

fn read_uint(path: &str, args: &[Value], width: usize, big_endian: bool) -> EvalResult {
    let [b] = args else {
        return Err(wrong_args(path));
    };
    let bytes = as_bytes(path, b)?;
    if bytes.len() < width {
        return Err(Fault::panic(format!(
            "{path}: need {width} bytes, have {}",
            bytes.len()
        )));
    }
    let mut v: u64 = 0;
    if big_endian {
        for byte in &bytes[..width] {
            v = (v << 8) | u64::from(*byte);
        }
    } else {
        for byte in bytes[..width].iter().rev() {
            v = (v << 8) | u64::from(*byte);
        }
    }
    Ok(Value::Int(v as i64))
}

fn float1(path: &str, args: &[Value], f: impl Fn(f64) -> f64) -> EvalResult {
    let [v] = args else {
        return Err(wrong_args(path));
    };
    Ok(Value::Float(f(as_float(path, v)?)))
}

fn float2(path: &str, args: &[Value], f: impl Fn(f64, f64) -> f64) -> EvalResult {
    let [a, b] = args else {
        return Err(wrong_args(path));
    };
    Ok(Value::Float(f(as_float(path, a)?, as_float(path, b)?)))
}

fn int1(path: &str, args: &[Value], f: impl Fn(i64) -> i64) -> EvalResult {
    let [v] = args else {
        return Err(wrong_args(path));
    };
    Ok(Value::Int(f(as_int(path, v)?)))
}

fn bytes2(path: &str, args: &[Value], f: impl Fn(&[u8], &[u8]) -> bool) -> EvalResult {
    let [a, b] = args else {
        return Err(wrong_args(path));
    };
    Ok(Value::Bool(f(&as_bytes(path, a)?, &as_bytes(path, b)?)))
}

fn format_int(v: i64, base: i64) -> EvalResult {
    let s = match base {
        2 => format!("{:b}", v.unsigned_abs()),
        8 => format!("{:o}", v.unsigned_abs()),
        10 => return Ok(Value::str(v.to_string())),
        16 => format!("{:x}", v.unsigned_abs()),
        _ => return Err(Fault::panic(format!("unsupported base {base}"))),
    };
    Ok(Value::str(if v < 0 { format!("-{s}") } else { s }))
}

fn sprintf_call(args: &[Value]) -> EvalResult {
    let Some((fmt, rest)) = args.split_first() else {
        return Err(wrong_args("fmt.Sprintf"));
    };
    let fmt = as_str("fmt.Sprintf", fmt)?;
    Ok(Value::str(sprintf(&fmt, rest)?))
}

fn sprint_call(args: &[Value]) -> EvalResult {
    let mut out = String::new();
    let mut prev_was_string = true;
    for (i, v) in args.iter().enumerate() {
        let is_string = matches!(v, Value::Str(_));
        if i > 0 && !is_string && !prev_was_string {
            out.push(' ');
        }
        out.push_str(&display_value(v));
        prev_was_string = is_string;
    }
    Ok(Value::str(out))
}

/// `%v`-style rendering, Go flavored.
pub fn display_value(v: &Value) -> String {
    match v {
        Value::Nil => "<nil>".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format!("{f}"),
        Value::Str(s) => s.to_string(),
        Value::Bytes(b) => {
            let inner: Vec<String> = b.borrow().iter().map(|x| x.to_string()).collect();
            format!("[{}]", inner.join(" "))
        }
        Value::List(items) => {
            let inner: Vec<String> = items.borrow().iter().map(display_value).collect();
            format!("[{}]", inner.join(" "))
        }
        Value::Map(m) => {
            let inner: Vec<String> = m
                .borrow()
                .iter()
                .map(|(k, v)| format!("{k}:{}", display_value(v)))
                .collect();
            format!("map[{}]", inner.join(" "))
        }
        Value::Func(_) => "func".to_string(),
        Value::Time(nanos) => format!("time({nanos})"),
        Value::ErrVal(msg) => msg.to_string(),
    }
}

struct Spec {
    minus: bool,
    zero: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

fn pad(spec: &Spec, body: String) -> String {
    let Some(width) = spec.width else {
        return body;
    };
    if body.len() >= width {
        return body;
    }
    let fill = width - body.len();
    if spec.minus {
        let mut out = body;
        out.extend(std::iter::repeat_n(' ', fill));
        out
    } else if spec.zero {
        let (sign, digits) = match body.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", body.as_str()),
        };
        format!("{sign}{}{digits}", "0".repeat(fill))
    } else {
        format!("{}{body}", " ".repeat(fill))
    }
}

/// A small `fmt.Sprintf` covering the verbs parsers use:
/// `%v %d %s %x %X %o %b %c %q %t %f %e %g` with `-`/`0` flags, width and
/// precision.
fn sprintf(fmt: &str, args: &[Value]) -> Result<String, Fault> {
    let mut out = String::new();
    let mut chars = fmt.chars().peekable();
    let mut argi = 0usize;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec = Spec {
            minus: false,
            zero: false,
            width: None,
            precision: None,
        };
        loop {
            match chars.peek() {
                Some('-') => {
                    spec.minus = true;
                    chars.next();
                }
                Some('0') => {
                    spec.zero = true;
                    chars.next();
                }
                Some('+') | Some(' ') | Some('#') => {
                    chars.next();
                }
                _ => break,
            }
        }
        let mut width = String::new();
        while matches!(chars.peek(), Some(c) if c.is_ascii_digit()) {
            width.push(chars.next().unwrap_or('0'));
        }
        if !width.is_empty() {
            spec.width = width.parse().ok();
        }
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut prec = String::new();
            while matches!(chars.peek(), Some(c) if c.is_ascii_digit()) {
                prec.push(chars.next().unwrap_or('0'));
            }
            spec.precision = Some(prec.parse().unwrap_or(0));
        }
        let Some(verb) = chars.next() else {
            out.push('%');
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        let Some(arg) = args.get(argi) else {
            out.push_str(&format!("%!{verb}(MISSING)"));
            continue;
        };
        argi += 1;
        let body = format_verb(verb, &spec, arg)?;
        out.push_str(&pad(&spec, body));
    }
    Ok(out)
}

fn format_verb(verb: char, spec: &Spec, arg: &Value) -> Result<String, Fault> {
    let bad = || format!("%!{verb}({})", arg.type_name());
    Ok(match verb {
        'v' => display_value(arg),
        'd' => match arg {
            Value::Int(i) => i.to_string(),
            _ => bad(),
        },
        's' => match arg {
            Value::Str(s) => match spec.precision {
                Some(p) if s.len() > p => s.chars().take(p).collect(),
                _ => s.to_string(),
            },
            Value::Bytes(b) => String::from_utf8_lossy(&b.borrow()).into_owned(),
            Value::ErrVal(msg) => msg.to_string(),
            other => display_value(other),
        },
        'x' | 'X' => {
            let upper = verb == 'X';
            match arg {
                Value::Int(i) => {
                    let s = format!("{:x}", i.unsigned_abs());
                    let s = if *i < 0 { format!("-{s}") } else { s };
                    if upper { s.to_uppercase() } else { s }
                }
                Value::Bytes(b) => {
                    let mut s = String::new();
                    for byte in b.borrow().iter() {
                        s.push_str(&format!("{byte:02x}"));
                    }
                    if upper { s.to_uppercase() } else { s }
                }
                Value::Str(text) => {
                    let mut s = String::new();
                    for byte in text.as_bytes() {
                        s.push_str(&format!("{byte:02x}"));
                    }
                    if upper { s.to_uppercase() } else { s }
                }
                _ => bad(),
            }
        }
        'o' => match arg {
            Value::Int(i) => format!("{i:o}"),
            _ => bad(),
        },
        'b' => match arg {
            Value::Int(i) => format!("{i:b}"),
            _ => bad(),
        },
        'c' => match arg {
            Value::Int(i) => u32::try_from(*i)
                .ok()
                .and_then(char::from_u32)
                .map_or_else(|| "\u{FFFD}".to_string(), |c| c.to_string()),
            _ => bad(),
        },
        'q' => match arg {
            Value::Str(s) => format!("{s:?}"),
            Value::Int(i) => format!("'{}'", (*i as u8) as char),
            _ => bad(),
        },
        't' => match arg {
            Value::Bool(b) => b.to_string(),
            _ => bad(),
        },
        'f' | 'F' => match arg {
            Value::Int(i) => format!("{:.*}", spec.precision.unwrap_or(6), *i as f64),
            Value::Float(f) => format!("{:.*}", spec.precision.unwrap_or(6), f),
            _ => bad(),
        },
        'e' => match arg {
            Value::Int(i) => format!("{:e}", *i as f64),
            Value::Float(f) => format!("{f:e}"),
            _ => bad(),
        },
        'g' => match arg {
            Value::Int(i) => format!("{}", *i as f64),
            Value::Float(f) => format!("{f}"),
            _ => bad(),
        },
        _ => return Err(Fault::panic(format!("unsupported format verb %{verb}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sprintf_basic_verbs() {
        let out = sprintf(
            "%02X %d %s %v",
            &[
                Value::Int(0x0C),
                Value::Int(42),
                Value::str("hi"),
                Value::Bool(true),
            ],
        )
        .unwrap();
        assert_eq!(out, "0C 42 hi true");
    }

    #[test]
    fn sprintf_width_and_precision() {
        assert_eq!(sprintf("%5d", &[Value::Int(7)]).unwrap(), "    7");
        assert_eq!(sprintf("%-5d|", &[Value::Int(7)]).unwrap(), "7    |");
        assert_eq!(sprintf("%.2f", &[Value::Float(1.0 / 3.0)]).unwrap(), "0.33");
        assert_eq!(sprintf("%04b", &[Value::Int(5)]).unwrap(), "0101");
    }

    #[test]
    fn sprintf_missing_argument_is_marked() {
        assert_eq!(sprintf("%d", &[]).unwrap(), "%!d(MISSING)");
    }

    #[test]
    fn sprintf_hex_of_bytes() {
        let out = sprintf("%X", &[Value::bytes(vec![0x55, 0xAA])]).unwrap();
        assert_eq!(out, "55AA");
    }

    #[test]
    fn big_endian_reads() {
        let b = Value::bytes(vec![0x03, 0xE8]);
        let v = call_qualified("binary.BigEndian.Uint16", &[b])
            .unwrap()
            .unwrap();
        assert!(matches!(v, Value::Int(1000)));

        let b = Value::bytes(vec![0xE8, 0x03]);
        let v = call_qualified("binary.LittleEndian.Uint16", &[b])
            .unwrap()
            .unwrap();
        assert!(matches!(v, Value::Int(1000)));
    }

    #[test]
    fn read_uint_short_buffer_faults() {
        let b = Value::bytes(vec![0x01]);
        let res = call_qualified("binary.BigEndian.Uint32", &[b]).unwrap();
        assert!(res.is_err());
    }

    #[test]
    fn masked_conversions() {
        let v = conv_masked("byte", &[Value::Int(0x1FF)], 8, false).unwrap();
        assert!(matches!(v, Value::Int(0xFF)));
        let v = conv_masked("int8", &[Value::Int(0xFF)], 8, true).unwrap();
        assert!(matches!(v, Value::Int(-1)));
        let v = conv_masked("uint16", &[Value::Int(-1)], 16, false).unwrap();
        assert!(matches!(v, Value::Int(0xFFFF)));
    }

    #[test]
    fn unknown_paths_return_none() {
        assert!(call_qualified("os.Getenv", &[]).is_none());
        assert!(call_builtin("recover", &[]).is_none());
    }

    #[test]
    fn explicit_panic_is_a_fault() {
        let result = call_builtin("panic", &[Value::str("boom")]).unwrap();
        let fault = result.unwrap_err();
        assert_eq!(fault.msg, "boom");
    }

    #[test]
    fn import_allow_list() {
        assert!(import_allowed("fmt"));
        assert!(import_allowed("encoding/binary"));
        assert!(!import_allowed("os"));
        assert!(!import_allowed("net"));
        assert!(!import_allowed("syscall"));
        assert!(!import_allowed("reflect"));
    }
}
