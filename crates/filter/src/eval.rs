use std::cmp::Ordering;

use keel_props::{Properties, Value};

use crate::{Filter, Op};

pub(crate) fn matches(filter: &Filter, props: &Properties) -> bool {
	match filter {
		Filter::And(items) => items.iter().all(|f| matches(f, props)),
		Filter::Or(items) => items.iter().any(|f| matches(f, props)),
		Filter::Not(inner) => !matches(inner, props),
		Filter::Present(attr) => props.contains_key(attr),
		Filter::Compare { attr, op, value } => props.get(attr).is_some_and(|v| compare(v, *op, value)),
		Filter::Substring {
			attr,
			initial,
			any,
			last,
		} => props
			.get(attr)
			.is_some_and(|v| substring(v, initial.as_deref(), any, last.as_deref())),
	}
}

fn ordered(ord: Option<Ordering>, op: Op) -> bool {
	match (ord, op) {
		(Some(o), Op::Equal | Op::Approx) => o == Ordering::Equal,
		(Some(o), Op::GreaterEq) => o != Ordering::Less,
		(Some(o), Op::LessEq) => o != Ordering::Greater,
		(None, _) => false,
	}
}

fn normalize(s: &str) -> String {
	s.chars()
		.filter(|c| !c.is_whitespace())
		.map(|c| c.to_ascii_lowercase())
		.collect()
}

fn compare(value: &Value, op: Op, literal: &str) -> bool {
	match value {
		Value::List(items) => items.iter().any(|v| compare(v, op, literal)),
		Value::Str(s) if op == Op::Approx => normalize(s) == normalize(literal),
		Value::Str(s) => ordered(Some(s.as_str().cmp(literal)), op),
		Value::Int(i) => ordered(literal.trim().parse::<i64>().ok().map(|l| i.cmp(&l)), op),
		Value::Float(x) => ordered(literal.trim().parse::<f64>().ok().and_then(|l| x.partial_cmp(&l)), op),
		Value::Bool(b) => {
			let lit = literal.trim();
			let parsed = if lit.eq_ignore_ascii_case("true") {
				Some(true)
			} else if lit.eq_ignore_ascii_case("false") {
				Some(false)
			} else {
				None
			};
			matches!(op, Op::Equal | Op::Approx) && parsed == Some(*b)
		}
	}
}

fn substring(value: &Value, initial: Option<&str>, any: &[String], last: Option<&str>) -> bool {
	match value {
		Value::List(items) => items.iter().any(|v| substring(v, initial, any, last)),
		Value::Str(s) => substring_str(s, initial, any, last),
		_ => false,
	}
}

fn substring_str(s: &str, initial: Option<&str>, any: &[String], last: Option<&str>) -> bool {
	let mut rest = s;
	if let Some(prefix) = initial {
		let Some(tail) = rest.strip_prefix(prefix) else {
			return false;
		};
		rest = tail;
	}
	for part in any {
		let Some(at) = rest.find(part.as_str()) else {
			return false;
		};
		rest = &rest[at + part.len()..];
	}
	match last {
		Some(suffix) => rest.ends_with(suffix),
		None => true,
	}
}
