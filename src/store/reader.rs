use crate::store::{Result, TyonError};

/// Bounded character cursor over notation text.
pub struct Reader<'a> {
	text: &'a str,
	pos: usize,
}

impl<'a> Reader<'a> {
	/// Create a reader at position 0.
	pub fn new(text: &'a str) -> Self {
		Self { text, pos: 0 }
	}

	/// Return the current byte offset.
	pub fn pos(&self) -> usize {
		self.pos
	}

	/// Rewind to a previously saved offset.
	pub fn seek(&mut self, pos: usize) {
		self.pos = pos;
	}

	/// True once every character has been consumed.
	pub fn at_end(&self) -> bool {
		self.pos >= self.text.len()
	}

	/// Look at the next character without consuming it.
	pub fn peek(&self) -> Option<char> {
		self.text[self.pos..].chars().next()
	}

	/// Consume and return the next character.
	pub fn bump(&mut self) -> Option<char> {
		let ch = self.peek()?;
		self.pos += ch.len_utf8();
		Some(ch)
	}

	/// Consume the next character only if it equals `ch`.
	pub fn eat(&mut self, ch: char) -> bool {
		if self.peek() == Some(ch) {
			self.pos += ch.len_utf8();
			true
		} else {
			false
		}
	}

	/// Consume the next character, requiring it to equal `ch`.
	pub fn expect(&mut self, ch: char, what: &'static str) -> Result<()> {
		match self.peek() {
			Some(found) if found == ch => {
				self.pos += found.len_utf8();
				Ok(())
			}
			Some(_) => Err(TyonError::Expected { what, at: self.pos }),
			None => Err(TyonError::UnexpectedEof { at: self.pos }),
		}
	}

	/// Skip whitespace and comments. `#` starts a line comment, `#*` a
	/// block comment closed by `*#` (tolerated unclosed at end of input).
	pub fn skip_ignored(&mut self) {
		loop {
			while self.peek().is_some_and(char::is_whitespace) {
				self.bump();
			}
			if self.peek() != Some('#') {
				return;
			}
			self.bump();
			if self.eat('*') {
				loop {
					match self.bump() {
						Some('*') if self.peek() == Some('#') => {
							self.bump();
							break;
						}
						Some(_) => {}
						None => return,
					}
				}
			} else {
				while let Some(ch) = self.peek() {
					if ch == '\n' {
						break;
					}
					self.bump();
				}
			}
		}
	}

	/// Skip spaces and tabs only, never newlines or comments.
	pub fn skip_inline_space(&mut self) {
		while matches!(self.peek(), Some(' ') | Some('\t')) {
			self.bump();
		}
	}

	/// Read a run of word characters (alphanumeric or `_`), possibly empty.
	pub fn read_word(&mut self) -> &'a str {
		let start = self.pos;
		while self.peek().is_some_and(|ch| ch.is_alphanumeric() || ch == '_') {
			self.bump();
		}
		&self.text[start..self.pos]
	}

	/// Read a quoted string starting at the opening `"` or `'`.
	pub fn read_quoted(&mut self) -> Result<String> {
		let at = self.pos;
		let Some(quote) = self.bump() else {
			return Err(TyonError::UnexpectedEof { at });
		};
		let mut out = String::new();
		loop {
			match self.bump() {
				Some(ch) if ch == quote => return Ok(out),
				Some('\\') => match self.bump() {
					Some(esc) => out.push(unescape(esc)),
					None => return Err(TyonError::UnexpectedEof { at: self.pos }),
				},
				Some(ch) => out.push(ch),
				None => return Err(TyonError::UnexpectedEof { at: self.pos }),
			}
		}
	}
}

fn unescape(ch: char) -> char {
	match ch {
		'0' => '\0',
		'a' => '\x07',
		'b' => '\x08',
		'f' => '\x0c',
		'n' => '\n',
		'r' => '\r',
		't' => '\t',
		'v' => '\x0b',
		other => other,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn skips_line_and_block_comments() {
		let mut r = Reader::new("  # note\n #* multi\nline *# x");
		r.skip_ignored();
		assert_eq!(r.peek(), Some('x'));
	}

	#[test]
	fn unclosed_block_comment_reaches_end() {
		let mut r = Reader::new("#* never closed");
		r.skip_ignored();
		assert!(r.at_end());
	}

	#[test]
	fn words_stop_at_non_word_chars() {
		let mut r = Reader::new("speed_2x: 5");
		assert_eq!(r.read_word(), "speed_2x");
		assert_eq!(r.peek(), Some(':'));
	}

	#[test]
	fn quoted_strings_handle_escapes_and_both_quotes() {
		let mut r = Reader::new(r#""a\tb\"c""#);
		assert_eq!(r.read_quoted().unwrap(), "a\tb\"c");
		let mut r = Reader::new("'it\\'s'");
		assert_eq!(r.read_quoted().unwrap(), "it's");
	}

	#[test]
	fn unterminated_string_is_an_error() {
		let mut r = Reader::new("\"open");
		assert!(matches!(r.read_quoted(), Err(TyonError::UnexpectedEof { .. })));
	}
}
