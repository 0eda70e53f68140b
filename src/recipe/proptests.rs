use super::*;
use proptest::prelude::*;
use serde_yaml::Value;

fn eval_int(src: &str) -> Scalar {
    let lookup = |_: &str| None::<Value>;
    Expr::parse(src).unwrap().evaluate_scalar("prop", &lookup).unwrap()
}

proptest! {
    #[test]
    fn prop_integer_arithmetic_matches_rust(a in -1000i64..1000, b in -1000i64..1000, c in -1000i64..1000) {
        let src = format!("{a} + {b} * ({c} - {a})");
        prop_assert_eq!(eval_int(&src), Scalar::Int(a + b * (c - a)));
    }

    #[test]
    fn prop_division_is_float(a in -1000i64..1000, b in 1i64..1000) {
        let src = format!("{a} / {b}");
        prop_assert_eq!(eval_int(&src), Scalar::Float(a as f64 / b as f64));
    }

    #[test]
    fn prop_chain_resolves_regardless_of_order(n in 2usize..12, seed in 1i64..50) {
        // v0 = seed, v{i} = v{i-1} + 1, written in reverse order
        let mut text = String::new();
        for i in (1..n).rev() {
            text.push_str(&format!("v{i}: eval(v{} + 1)\n", i - 1));
        }
        text.push_str(&format!("v0: {seed}\n"));
        let raw: serde_yaml::Mapping = serde_yaml::from_str(&text).unwrap();
        let out = resolve_variables(&raw, None).unwrap();
        let last = format!("v{}", n - 1);
        prop_assert_eq!(out[last.as_str()].clone(), Value::from(seed + n as i64 - 1));
    }
}
