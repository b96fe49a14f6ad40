//! Implements the XPath 1.0 comparison, arithmetic and union operators.

use crate::ast::BinaryOperator;
use crate::datasource::DataSourceNode;
use crate::engine::{XPathValue, string_to_number};
use crate::error::XPathError;
use crate::extensions::date_to_days;

/// Applies `op` to two already evaluated operands.
///
/// `dates` enables the extension dialect coercion in which a date or datetime string used
/// as a number counts as days since the Unix epoch.
pub fn evaluate<'a, N: DataSourceNode<'a>>(
    op: BinaryOperator,
    left: XPathValue<N>,
    right: XPathValue<N>,
    dates: bool,
) -> Result<XPathValue<N>, XPathError> {
    use BinaryOperator::*;
    let value = match op {
        Or => XPathValue::Boolean(left.to_bool() || right.to_bool()),
        And => XPathValue::Boolean(left.to_bool() && right.to_bool()),
        Equals | NotEquals | LessThan | LessThanOrEqual | GreaterThan | GreaterThanOrEqual => {
            XPathValue::Boolean(compare(op, &left, &right, dates))
        }
        Plus | Minus | Multiply | Divide | Modulo => {
            let l = number(&left, dates);
            let r = number(&right, dates);
            XPathValue::Number(match op {
                Plus => l + r,
                Minus => l - r,
                Multiply => l * r,
                Divide => l / r,
                _ => l % r,
            })
        }
        Union => match (left, right) {
            (XPathValue::NodeSet(mut l), XPathValue::NodeSet(r)) => {
                l.extend(r);
                l.sort();
                l.dedup();
                XPathValue::NodeSet(l)
            }
            (l, r) => {
                return Err(XPathError::TypeError(format!(
                    "Union operands must be node-sets, got {:?} and {:?}",
                    l, r
                )));
            }
        },
    };
    Ok(value)
}

/// Converts a value to a number, optionally reading date strings as day counts.
pub fn number<'a, N: DataSourceNode<'a>>(value: &XPathValue<N>, dates: bool) -> f64 {
    match value {
        XPathValue::String(s) => string_number(s, dates),
        XPathValue::NodeSet(nodes) => {
            string_number(&nodes.first().map(|n| n.string_value()).unwrap_or_default(), dates)
        }
        other => other.to_number(),
    }
}

fn string_number(s: &str, dates: bool) -> f64 {
    let n = string_to_number(s);
    if n.is_nan() && dates {
        date_to_days(s).unwrap_or(f64::NAN)
    } else {
        n
    }
}

fn compare<'a, N: DataSourceNode<'a>>(
    op: BinaryOperator,
    left: &XPathValue<N>,
    right: &XPathValue<N>,
    dates: bool,
) -> bool {
    match (left, right) {
        (XPathValue::NodeSet(l), XPathValue::NodeSet(r)) => {
            let right_strings: Vec<String> = r.iter().map(|n| n.string_value()).collect();
            l.iter().any(|ln| {
                let ls = ln.string_value();
                right_strings
                    .iter()
                    .any(|rs| compare_strings(op, &ls, rs, dates))
            })
        }
        (XPathValue::NodeSet(nodes), XPathValue::Boolean(b)) => {
            compare_atomic(op, &XPathValue::<N>::Boolean(!nodes.is_empty()), &XPathValue::Boolean(*b), dates)
        }
        (XPathValue::Boolean(b), XPathValue::NodeSet(nodes)) => {
            compare_atomic(op, &XPathValue::<N>::Boolean(*b), &XPathValue::Boolean(!nodes.is_empty()), dates)
        }
        (XPathValue::NodeSet(nodes), other) => nodes.iter().any(|n| {
            compare_atomic(op, &XPathValue::String(n.string_value()), other, dates)
        }),
        (other, XPathValue::NodeSet(nodes)) => nodes.iter().any(|n| {
            compare_atomic(op, other, &XPathValue::String(n.string_value()), dates)
        }),
        (l, r) => compare_atomic(op, l, r, dates),
    }
}

fn compare_strings(op: BinaryOperator, l: &str, r: &str, dates: bool) -> bool {
    match op {
        BinaryOperator::Equals => l == r,
        BinaryOperator::NotEquals => l != r,
        _ => compare_numbers(op, string_number(l, dates), string_number(r, dates)),
    }
}

fn compare_atomic<'a, N: DataSourceNode<'a>>(
    op: BinaryOperator,
    left: &XPathValue<N>,
    right: &XPathValue<N>,
    dates: bool,
) -> bool {
    match op {
        BinaryOperator::Equals | BinaryOperator::NotEquals => {
            let equal = match (left, right) {
                (XPathValue::Boolean(_), _) | (_, XPathValue::Boolean(_)) => {
                    left.to_bool() == right.to_bool()
                }
                (XPathValue::Number(_), _) | (_, XPathValue::Number(_)) => {
                    number(left, dates) == number(right, dates)
                }
                _ => left.to_string() == right.to_string(),
            };
            (op == BinaryOperator::Equals) == equal
        }
        _ => compare_numbers(op, number(left, dates), number(right, dates)),
    }
}

fn compare_numbers(op: BinaryOperator, l: f64, r: f64) -> bool {
    match op {
        BinaryOperator::LessThan => l < r,
        BinaryOperator::LessThanOrEqual => l <= r,
        BinaryOperator::GreaterThan => l > r,
        BinaryOperator::GreaterThanOrEqual => l >= r,
        BinaryOperator::Equals => l == r,
        _ => l != r,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::tests::{MockNode, create_test_tree};

    type Value<'a> = XPathValue<MockNode<'a>>;

    fn s<'a>(v: &str) -> Value<'a> {
        XPathValue::String(v.to_string())
    }

    #[test]
    fn test_arithmetic() {
        let r: Value = evaluate(BinaryOperator::Plus, s("2"), XPathValue::Number(3.0), false).unwrap();
        assert_eq!(r.to_number(), 5.0);
        let r: Value = evaluate(BinaryOperator::Modulo, XPathValue::Number(-5.0), XPathValue::Number(2.0), false).unwrap();
        assert_eq!(r.to_number(), -1.0);
        let r: Value = evaluate(BinaryOperator::Divide, XPathValue::Number(1.0), XPathValue::Number(0.0), false).unwrap();
        assert_eq!(r.to_number(), f64::INFINITY);
        let r: Value = evaluate(BinaryOperator::Plus, s("abc"), XPathValue::Number(1.0), false).unwrap();
        assert!(r.to_number().is_nan());
    }

    #[test]
    fn test_node_set_comparisons() {
        let tree = create_test_tree();
        let cities = XPathValue::NodeSet(vec![tree.node(1), tree.node(8)]);
        // existential semantics: true if any member matches
        assert!(evaluate(BinaryOperator::Equals, cities.clone(), s("rot"), false).unwrap().to_bool());
        assert!(evaluate(BinaryOperator::NotEquals, cities.clone(), s("rot"), false).unwrap().to_bool());
        assert!(!evaluate(BinaryOperator::Equals, cities.clone(), s("utr"), false).unwrap().to_bool());
        let empty: Value = XPathValue::NodeSet(vec![]);
        assert!(!evaluate(BinaryOperator::Equals, empty.clone(), s(""), false).unwrap().to_bool());
        assert!(evaluate(BinaryOperator::Equals, empty, XPathValue::Boolean(false), false).unwrap().to_bool());
        let ordinals = XPathValue::NodeSet(vec![tree.node(2)]);
        assert!(evaluate(BinaryOperator::LessThan, ordinals, XPathValue::Number(2.0), false).unwrap().to_bool());
    }

    #[test]
    fn test_atomic_equality_coercions() {
        let r: Value = evaluate(BinaryOperator::Equals, XPathValue::Number(1.0), s("1.0"), false).unwrap();
        assert!(r.to_bool());
        let r: Value = evaluate(BinaryOperator::Equals, XPathValue::Boolean(true), s("x"), false).unwrap();
        assert!(r.to_bool());
        let r: Value = evaluate(BinaryOperator::Equals, s("1"), s("1.0"), false).unwrap();
        assert!(!r.to_bool());
    }

    #[test]
    fn test_dates_as_days_in_extension_dialect() {
        let r: Value = evaluate(BinaryOperator::Plus, s("1970-01-02"), XPathValue::Number(1.0), true).unwrap();
        assert_eq!(r.to_number(), 2.0);
        let r: Value = evaluate(BinaryOperator::Plus, s("1970-01-02"), XPathValue::Number(1.0), false).unwrap();
        assert!(r.to_number().is_nan());
        let r: Value = evaluate(BinaryOperator::GreaterThan, s("2020-01-02"), s("2020-01-01"), true).unwrap();
        assert!(r.to_bool());
    }

    #[test]
    fn test_union_requires_node_sets() {
        let tree = create_test_tree();
        let r = evaluate(
            BinaryOperator::Union,
            XPathValue::NodeSet(vec![tree.node(8)]),
            XPathValue::NodeSet(vec![tree.node(1), tree.node(8)]),
            false,
        )
        .unwrap();
        match r {
            XPathValue::NodeSet(nodes) => assert_eq!(nodes, vec![tree.node(1), tree.node(8)]),
            _ => panic!("Expected NodeSet"),
        }
        assert!(matches!(
            evaluate::<MockNode>(BinaryOperator::Union, s("a"), s("b"), false),
            Err(XPathError::TypeError(_))
        ));
    }
}
