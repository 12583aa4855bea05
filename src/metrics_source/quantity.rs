// Kubernetes resource quantities ("250m", "1.5", "64Mi", "1e3") to integers.
// Exact decimal arithmetic; fractional results round up like Quantity.MilliValue()/Value().

/// Parsed quantity: value = mantissa * binary * 10^exp10.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Parsed {
    mantissa: i128,
    exp10: i32,
    binary: i128,
}

// 10^38 is the largest power of ten that fits in i128.
const MAX_POW10: u32 = 38;

fn parse(q: &str) -> Option<Parsed> {
    let q = q.trim();
    let end = q
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '+' || c == '-'))))
        .map_or(q.len(), |(i, _)| i);
    let (number, suffix) = q.split_at(end);

    let (negative, digits) = match number.as_bytes().first() {
        Some(b'-') => (true, &number[1..]),
        Some(b'+') => (false, &number[1..]),
        _ => (false, number),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }

    let mut mantissa: i128 = 0;
    for c in int_part.chars().chain(frac_part.chars()) {
        let d = c.to_digit(10)? as i128;
        mantissa = mantissa.checked_mul(10)?.checked_add(d)?;
    }
    if negative {
        mantissa = -mantissa;
    }
    let mut exp10 = -i32::try_from(frac_part.len()).ok()?;

    let binary: i128 = match suffix {
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "Pi" => 1 << 50,
        "Ei" => 1 << 60,
        _ => 1,
    };
    if binary == 1 {
        let shift = match suffix {
            "" => 0,
            "n" => -9,
            "u" => -6,
            "m" => -3,
            "k" => 3,
            "M" => 6,
            "G" => 9,
            "T" => 12,
            "P" => 15,
            "E" => 18,
            exp if exp.starts_with('e') || exp.starts_with('E') => exp[1..].parse::<i32>().ok()?,
            _ => return None,
        };
        exp10 = exp10.checked_add(shift)?;
    }

    Some(Parsed {
        mantissa,
        exp10,
        binary,
    })
}

/// Value in units of 10^-shift, rounded towards positive infinity.
fn scaled(q: &str, shift: i32) -> Option<i64> {
    let p = parse(q)?;
    let n = p.mantissa.checked_mul(p.binary)?;
    let e = p.exp10.checked_add(shift)?;
    let v = if e >= 0 {
        n.checked_mul(10i128.checked_pow(e as u32)?)?
    } else if e.unsigned_abs() > MAX_POW10 {
        i128::from(n > 0)
    } else {
        let d = 10i128.pow(e.unsigned_abs());
        let q = n / d;
        if n % d != 0 && n > 0 { q + 1 } else { q }
    };
    i64::try_from(v).ok()
}

/// CPU quantity in millicores.
pub fn cpu_millicores(q: &str) -> Option<i64> {
    scaled(q, 3)
}

/// Memory quantity in bytes.
pub fn memory_bytes(q: &str) -> Option<i64> {
    scaled(q, 0)
}
