//! LDAP-style filter expressions over service [`Properties`].
//!
//! # Role
//!
//! Queries against the service registry and listener subscriptions are expressed as
//! RFC 1960 style filters such as `(&(objectclass=log.Sink)(service.ranking>=10))`.
//! [`Filter::parse`] validates an expression eagerly so malformed input is reported
//! where it is supplied; [`Filter::matches`] evaluates a parsed filter against one
//! property snapshot.
//!
//! # Matching rules
//!
//! - Attribute names are compared ignoring ASCII case, like property keys.
//! - The literal is interpreted according to the type of the stored value: integers and
//!   floats compare numerically, booleans accept `true`/`false`, strings compare
//!   lexically.
//! - A list-valued property matches if any element matches.
//! - `~=` compares ignoring case and whitespace.
//! - A missing attribute never matches (so `(!(k=v))` matches when `k` is absent).

mod eval;
mod parse;

use std::fmt;
use std::str::FromStr;

pub use keel_props::Properties;

/// Comparison operator of a simple filter item.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Op {
	Equal,
	Approx,
	GreaterEq,
	LessEq,
}

impl Op {
	fn as_str(self) -> &'static str {
		match self {
			Self::Equal => "=",
			Self::Approx => "~=",
			Self::GreaterEq => ">=",
			Self::LessEq => "<=",
		}
	}
}

/// Parsed filter expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
	And(Vec<Filter>),
	Or(Vec<Filter>),
	Not(Box<Filter>),
	/// `(attr op literal)`.
	Compare { attr: String, op: Op, value: String },
	/// `(attr=*)`.
	Present(String),
	/// `(attr=init*any*final)`; `None` ends mean the pattern starts or ends with `*`.
	Substring {
		attr: String,
		initial: Option<String>,
		any: Vec<String>,
		last: Option<String>,
	},
}

/// Filter parse failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
	#[error("invalid filter syntax at {position}: {message}")]
	InvalidSyntax { position: usize, message: &'static str },
}

impl Filter {
	/// Parses a filter expression.
	pub fn parse(input: &str) -> Result<Self, FilterError> {
		parse::Parser::new(input).parse()
	}

	/// Equality item with `value` taken literally.
	pub fn equals(attr: impl Into<String>, value: impl Into<String>) -> Self {
		Self::Compare {
			attr: attr.into(),
			op: Op::Equal,
			value: value.into(),
		}
	}

	/// Filter selecting services published under `interface`.
	pub fn object_class(interface: &str) -> Self {
		Self::equals(keel_props::keys::OBJECTCLASS, interface)
	}

	/// Conjunction that collapses to the single operand when given one.
	pub fn all(mut filters: Vec<Filter>) -> Self {
		if filters.len() == 1 {
			return filters.remove(0);
		}
		Self::And(filters)
	}

	/// Evaluates the filter against one property snapshot.
	pub fn matches(&self, props: &Properties) -> bool {
		eval::matches(self, props)
	}
}

impl FromStr for Filter {
	type Err = FilterError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

fn write_escaped(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
	for c in s.chars() {
		if matches!(c, '(' | ')' | '*' | '\\') {
			f.write_str("\\")?;
		}
		write!(f, "{c}")?;
	}
	Ok(())
}

impl fmt::Display for Filter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::And(items) | Self::Or(items) => {
				f.write_str(if matches!(self, Self::And(_)) { "(&" } else { "(|" })?;
				for item in items {
					write!(f, "{item}")?;
				}
				f.write_str(")")
			}
			Self::Not(inner) => write!(f, "(!{inner})"),
			Self::Compare { attr, op, value } => {
				write!(f, "({attr}{}", op.as_str())?;
				write_escaped(f, value)?;
				f.write_str(")")
			}
			Self::Present(attr) => write!(f, "({attr}=*)"),
			Self::Substring {
				attr,
				initial,
				any,
				last,
			} => {
				write!(f, "({attr}=")?;
				if let Some(s) = initial {
					write_escaped(f, s)?;
				}
				f.write_str("*")?;
				for s in any {
					write_escaped(f, s)?;
					f.write_str("*")?;
				}
				if let Some(s) = last {
					write_escaped(f, s)?;
				}
				f.write_str(")")
			}
		}
	}
}
