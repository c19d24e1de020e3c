//! Built-in formula functions (Rust) and their metadata.
//!
//! Conventions:
//! - Formula-facing built-in names are ALL CAPS (e.g. `SUM`, `UPPER`).
//! - Column aggregates rewrite to `<NAME>_COLUMN(slot)` Rhai calls. If you
//!   add a new aggregate, add it to `COLUMN_BUILTINS`; `register_builtins`
//!   picks it up from there.

use rhai::{Dynamic, Engine};

use crate::engine::ColumnCache;

pub struct ColumnBuiltin {
    pub sheet_name: &'static str,
    pub rhai_name: &'static str,
    pub reduce: fn(&[Dynamic]) -> Dynamic,
}

pub const COLUMN_BUILTINS: &[ColumnBuiltin] = &[
    ColumnBuiltin {
        sheet_name: "SUM",
        rhai_name: "SUM_COLUMN",
        reduce: sum,
    },
    ColumnBuiltin {
        sheet_name: "AVG",
        rhai_name: "AVG_COLUMN",
        reduce: avg,
    },
    ColumnBuiltin {
        sheet_name: "MIN",
        rhai_name: "MIN_COLUMN",
        reduce: min,
    },
    ColumnBuiltin {
        sheet_name: "MAX",
        rhai_name: "MAX_COLUMN",
        reduce: max,
    },
    ColumnBuiltin {
        sheet_name: "COUNT",
        rhai_name: "COUNT_COLUMN",
        reduce: count,
    },
];

/// The Rhai function an aggregate rewrites to, if `sheet_name` is one.
pub(crate) fn column_builtin_rhai_name(sheet_name: &str) -> Option<&'static str> {
    COLUMN_BUILTINS
        .iter()
        .find(|b| b.sheet_name.eq_ignore_ascii_case(sheet_name))
        .map(|b| b.rhai_name)
}

enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(&self) -> f64 {
        match self {
            Number::Int(i) => *i as f64,
            Number::Float(f) => *f,
        }
    }

    fn into_dynamic(self) -> Dynamic {
        match self {
            Number::Int(i) => Dynamic::from_int(i),
            Number::Float(f) => Dynamic::from_float(f),
        }
    }
}

fn numbers(values: &[Dynamic]) -> Vec<Number> {
    values
        .iter()
        .filter_map(|v| {
            if let Ok(i) = v.as_int() {
                Some(Number::Int(i))
            } else {
                v.as_float().ok().filter(|f| !f.is_nan()).map(Number::Float)
            }
        })
        .collect()
}

fn sum(values: &[Dynamic]) -> Dynamic {
    let nums = numbers(values);
    if nums.iter().all(|n| matches!(n, Number::Int(_))) {
        let total = nums
            .iter()
            .map(|n| match n {
                Number::Int(i) => *i,
                Number::Float(_) => 0,
            })
            .fold(0i64, i64::wrapping_add);
        Dynamic::from_int(total)
    } else {
        Dynamic::from_float(nums.iter().map(Number::as_f64).sum())
    }
}

fn avg(values: &[Dynamic]) -> Dynamic {
    let nums = numbers(values);
    if nums.is_empty() {
        return Dynamic::UNIT;
    }
    let total: f64 = nums.iter().map(Number::as_f64).sum();
    Dynamic::from_float(total / nums.len() as f64)
}

fn extreme(values: &[Dynamic], pick_greater: bool) -> Dynamic {
    numbers(values)
        .into_iter()
        .reduce(|best, n| {
            let better = if pick_greater {
                n.as_f64() > best.as_f64()
            } else {
                n.as_f64() < best.as_f64()
            };
            if better { n } else { best }
        })
        .map_or(Dynamic::UNIT, Number::into_dynamic)
}

fn min(values: &[Dynamic]) -> Dynamic {
    extreme(values, false)
}

fn max(values: &[Dynamic]) -> Dynamic {
    extreme(values, true)
}

fn count(values: &[Dynamic]) -> Dynamic {
    Dynamic::from_int(values.iter().filter(|v| !v.is_unit()).count() as i64)
}

fn round_to(x: f64, digits: i64) -> f64 {
    let scale = 10f64.powi(digits.clamp(-300, 300) as i32);
    (x * scale).round_ties_even() / scale
}

/// Register cache readers, aggregates and scalar helpers.
pub fn register_builtins(engine: &mut Engine, cache: ColumnCache) {
    let values = cache.clone();
    engine.register_fn("VALUE", move |slot: i64, row: i64| -> Dynamic { values.value(slot, row) });

    for builtin in COLUMN_BUILTINS {
        let columns = cache.clone();
        engine.register_fn(builtin.rhai_name, move |slot: i64| -> Dynamic {
            columns.aggregate(slot, builtin)
        });
    }

    engine.register_fn("UPPER", |s: &str| -> String { s.to_uppercase() });
    engine.register_fn("LOWER", |s: &str| -> String { s.to_lowercase() });
    engine.register_fn("LEN", |s: &str| -> i64 { s.chars().count() as i64 });
    engine.register_fn("ROUND", |x: f64| -> f64 { x.round_ties_even() });
    engine.register_fn("ROUND", |x: f64, digits: i64| -> f64 { round_to(x, digits) });
    engine.register_fn("ROUND", |x: i64| -> i64 { x });
    engine.register_fn("ROUND", |x: i64, _digits: i64| -> i64 { x });
    engine.register_fn("ABS", |x: f64| -> f64 { x.abs() });
    engine.register_fn("ABS", |x: i64| -> i64 { x.wrapping_abs() });
    engine.register_fn("ISNULL", |v: Dynamic| -> bool { v.is_unit() });
    engine.register_fn("FILLNULL", |v: Dynamic, fill: Dynamic| -> Dynamic {
        if v.is_unit() { fill } else { v }
    });
}
