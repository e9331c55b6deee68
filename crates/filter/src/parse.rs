use crate::{Filter, FilterError, Op};

pub(crate) struct Parser<'a> {
	src: &'a str,
	pos: usize,
}

/// One piece of an item's literal: text, or an unescaped `*`.
enum Piece {
	Text(String),
	Star,
}

impl<'a> Parser<'a> {
	pub(crate) fn new(src: &'a str) -> Self {
		Self { src, pos: 0 }
	}

	pub(crate) fn parse(mut self) -> Result<Filter, FilterError> {
		self.skip_ws();
		if self.at_end() {
			return Err(self.error("empty filter"));
		}
		let filter = self.filter()?;
		self.skip_ws();
		if !self.at_end() {
			return Err(self.error("trailing characters after filter"));
		}
		Ok(filter)
	}

	fn error(&self, message: &'static str) -> FilterError {
		FilterError::InvalidSyntax {
			position: self.pos,
			message,
		}
	}

	fn at_end(&self) -> bool {
		self.pos >= self.src.len()
	}

	fn peek(&self) -> Option<char> {
		self.src[self.pos..].chars().next()
	}

	fn bump(&mut self) -> Option<char> {
		let c = self.peek()?;
		self.pos += c.len_utf8();
		Some(c)
	}

	fn skip_ws(&mut self) {
		while self.peek().is_some_and(char::is_whitespace) {
			self.bump();
		}
	}

	fn expect(&mut self, want: char, message: &'static str) -> Result<(), FilterError> {
		match self.peek() {
			Some(c) if c == want => {
				self.bump();
				Ok(())
			}
			_ => Err(self.error(message)),
		}
	}

	fn filter(&mut self) -> Result<Filter, FilterError> {
		self.skip_ws();
		self.expect('(', "expected '('")?;
		self.skip_ws();
		let filter = match self.peek() {
			Some('&') => {
				self.bump();
				Filter::And(self.filter_list()?)
			}
			Some('|') => {
				self.bump();
				Filter::Or(self.filter_list()?)
			}
			Some('!') => {
				self.bump();
				Filter::Not(Box::new(self.filter()?))
			}
			Some(_) => self.item()?,
			None => return Err(self.error("unexpected end of filter")),
		};
		self.skip_ws();
		self.expect(')', "expected ')'")?;
		Ok(filter)
	}

	fn filter_list(&mut self) -> Result<Vec<Filter>, FilterError> {
		let mut items = Vec::new();
		loop {
			self.skip_ws();
			match self.peek() {
				Some('(') => items.push(self.filter()?),
				_ => break,
			}
		}
		if items.is_empty() {
			return Err(self.error("operator requires at least one operand"));
		}
		Ok(items)
	}

	fn item(&mut self) -> Result<Filter, FilterError> {
		let start = self.pos;
		while let Some(c) = self.peek() {
			if matches!(c, '=' | '~' | '<' | '>' | '(' | ')') {
				break;
			}
			self.bump();
		}
		let attr = self.src[start..self.pos].trim();
		if attr.is_empty() {
			return Err(self.error("missing attribute name"));
		}
		let attr = attr.to_owned();

		let op = match self.bump() {
			Some('=') => Op::Equal,
			Some('~') => {
				self.expect('=', "expected '=' after '~'")?;
				Op::Approx
			}
			Some('<') => {
				self.expect('=', "expected '=' after '<'")?;
				Op::LessEq
			}
			Some('>') => {
				self.expect('=', "expected '=' after '>'")?;
				Op::GreaterEq
			}
			_ => return Err(self.error("expected comparison operator")),
		};

		let pieces = self.literal()?;
		let has_star = pieces.iter().any(|p| matches!(p, Piece::Star));
		if !has_star {
			let value = pieces
				.into_iter()
				.map(|p| match p {
					Piece::Text(s) => s,
					Piece::Star => String::new(),
				})
				.collect();
			return Ok(Filter::Compare { attr, op, value });
		}
		if op != Op::Equal {
			return Err(self.error("wildcard only allowed with '='"));
		}
		if let [Piece::Star] = pieces.as_slice() {
			return Ok(Filter::Present(attr));
		}
		Ok(substring(attr, pieces))
	}

	fn literal(&mut self) -> Result<Vec<Piece>, FilterError> {
		let mut pieces = Vec::new();
		let mut text = String::new();
		loop {
			match self.peek() {
				None => return Err(self.error("unterminated filter item")),
				Some(')') => break,
				Some('(') => return Err(self.error("unescaped '(' in value")),
				Some('\\') => {
					self.bump();
					match self.bump() {
						Some(c) => text.push(c),
						None => return Err(self.error("dangling escape")),
					}
				}
				Some('*') => {
					self.bump();
					if !text.is_empty() {
						pieces.push(Piece::Text(std::mem::take(&mut text)));
					}
					pieces.push(Piece::Star);
				}
				Some(c) => {
					self.bump();
					text.push(c);
				}
			}
		}
		if !text.is_empty() || pieces.is_empty() {
			pieces.push(Piece::Text(text));
		}
		Ok(pieces)
	}
}

fn substring(attr: String, pieces: Vec<Piece>) -> Filter {
	let mut initial = None;
	let mut any = Vec::new();
	let mut last = None;
	let count = pieces.len();
	for (i, piece) in pieces.into_iter().enumerate() {
		let Piece::Text(s) = piece else {
			continue;
		};
		if i == 0 {
			initial = Some(s);
		} else if i == count - 1 {
			last = Some(s);
		} else {
			any.push(s);
		}
	}
	Filter::Substring {
		attr,
		initial,
		any,
		last,
	}
}
