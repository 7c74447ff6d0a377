use smartstring::{LazyCompact, SmartString};
use std::{collections::BTreeMap, fmt::Display};
use thiserror::Error;

use crate::{strip_pre_tags, Tag};

/// Start of an escaped message
pub const MSG_START: &str = "%%%INI%%%";

/// End of an escaped message
pub const MSG_END: &str = "%%%END%%%";

/// Replaces `<` inside an escaped message
pub const LT_SENTINEL: &str = "@@^^^";

/// Replaces `>` inside an escaped message
pub const GT_SENTINEL: &str = "^^^@@";

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

//
// MARK: Encode
//

/// Builds the body of a `<response>` document.
#[derive(Debug, Default, Clone)]
pub struct ResponseBuilder {
	body: String,
}

impl ResponseBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Append `<tag>value</tag>`
	pub fn tag(&mut self, tag: Tag, value: impl Display) -> &mut Self {
		let value = strip_pre_tags(&value.to_string());
		self.body.push('<');
		self.body.push_str(tag.as_str());
		self.body.push('>');
		escape_into(&mut self.body, &value);
		self.body.push_str("</");
		self.body.push_str(tag.as_str());
		self.body.push('>');
		return self;
	}

	/// Append `<tag>value</tag>` if `value` is `Some`
	pub fn tag_opt(&mut self, tag: Tag, value: Option<impl Display>) -> &mut Self {
		if let Some(value) = value {
			self.tag(tag, value);
		}
		return self;
	}

	/// Append `<tag name="name">value</tag>`
	pub fn named_tag(&mut self, tag: Tag, name: &str, value: impl Display) -> &mut Self {
		let mut attr = String::new();
		escape_into(&mut attr, name);

		let value = strip_pre_tags(&value.to_string());
		self.body.push('<');
		self.body.push_str(tag.as_str());
		self.body.push_str(" name=\"");
		self.body.push_str(&attr.replace('"', "&quot;"));
		self.body.push_str("\">");
		escape_into(&mut self.body, &value);
		self.body.push_str("</");
		self.body.push_str(tag.as_str());
		self.body.push('>');
		return self;
	}

	/// Append `<tag>...</tag>`, filling its content with `f`
	pub fn group(&mut self, tag: Tag, f: impl FnOnce(&mut ResponseBuilder)) -> &mut Self {
		let mut inner = ResponseBuilder::new();
		f(&mut inner);
		self.body.push('<');
		self.body.push_str(tag.as_str());
		self.body.push('>');
		self.body.push_str(&inner.body);
		self.body.push_str("</");
		self.body.push_str(tag.as_str());
		self.body.push('>');
		return self;
	}

	pub fn is_empty(&self) -> bool {
		self.body.is_empty()
	}

	/// Render the full document.
	/// If `escaped` is true, the result survives being rendered as
	/// html and read back as text.
	pub fn finish(&self, escaped: bool) -> String {
		let xml = format!("{XML_DECLARATION}\n<response>{}</response>\n", self.body);
		if escaped {
			return escape_envelope(&xml);
		} else {
			return xml;
		}
	}
}

/// Encode a flat set of tags. `None` values are omitted.
pub fn encode(tags: &[(Tag, Option<&str>)], escaped: bool) -> String {
	let mut builder = ResponseBuilder::new();
	for (tag, value) in tags {
		builder.tag_opt(*tag, *value);
	}
	return builder.finish(escaped);
}

/// Wrap an xml document in markers, replacing angle brackets with sentinels.
fn escape_envelope(xml: &str) -> String {
	let mut out = String::with_capacity(xml.len() * 2);
	out.push_str(MSG_START);
	for c in xml.chars() {
		match c {
			'<' => out.push_str(LT_SENTINEL),
			'>' => out.push_str(GT_SENTINEL),
			c => out.push(c),
		}
	}
	out.push_str(MSG_END);
	return out;
}

fn escape_into(out: &mut String, value: &str) {
	for c in value.chars() {
		match c {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			// These would clash with the envelope of an escaped message
			'^' => out.push_str("&#94;"),
			'@' => out.push_str("&#64;"),
			'%' => out.push_str("&#37;"),
			c => out.push(c),
		}
	}
}

//
// MARK: Decode
//

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
	#[error("payload is empty")]
	Empty,

	#[error("escaped payload has no end marker")]
	UnterminatedEnvelope,

	#[error("payload has no root element")]
	NoRoot,

	#[error("text outside of the root element")]
	TextOutsideRoot,

	#[error("malformed markup at byte {0}")]
	Malformed(usize),

	#[error("closing tag `{found}` does not match `{expected}`")]
	MismatchedTag { expected: String, found: String },

	#[error("unexpected closing tag `{0}`")]
	UnexpectedClose(String),

	#[error("tag `{0}` is never closed")]
	Unclosed(String),
}

/// A decoded message.
///
/// Holds the text of every element that carries text,
/// keyed by element name. If an element occurs more than once,
/// the first occurrence wins.
///
/// Text elements with a `name` attribute are also kept in
/// document order, see [`WireMessage::named_values`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WireMessage {
	values: BTreeMap<SmartString<LazyCompact>, String>,
	named: Vec<NamedValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NamedValue {
	element: SmartString<LazyCompact>,
	name: String,
	text: String,
}

impl WireMessage {
	pub fn get(&self, tag: Tag) -> Option<&str> {
		self.values.get(tag.as_str()).map(|x| x.as_str())
	}

	pub fn get_named(&self, name: &str) -> Option<&str> {
		self.values.get(name).map(|x| x.as_str())
	}

	pub fn has(&self, tag: Tag) -> bool {
		self.values.contains_key(tag.as_str())
	}

	/// Parse the trimmed value of `tag` as an integer
	pub fn get_u64(&self, tag: Tag) -> Option<u64> {
		self.get(tag).and_then(|x| x.trim().parse().ok())
	}

	/// Is the trimmed value of `tag` equal to `true`, ignoring case?
	pub fn get_bool(&self, tag: Tag) -> bool {
		self.get(tag)
			.map(|x| x.trim().eq_ignore_ascii_case("true"))
			.unwrap_or(false)
	}

	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}

	/// `(name, text)` of every `tag` element that has a `name` attribute,
	/// in document order
	pub fn named_values(&self, tag: Tag) -> impl Iterator<Item = (&str, &str)> {
		self.named
			.iter()
			.filter(move |x| x.element.as_str() == tag.as_str())
			.map(|x| (x.name.as_str(), x.text.as_str()))
	}
}

/// Decode a payload, escaped or not.
///
/// Anything before the start marker or after the end marker
/// of an escaped payload is ignored.
pub fn decode(payload: &str) -> Result<WireMessage, DecodeError> {
	if payload.trim().is_empty() {
		return Err(DecodeError::Empty);
	}

	let unescaped;
	let xml = match payload.find(MSG_START) {
		None => payload,
		Some(start) => {
			let rest = &payload[start + MSG_START.len()..];
			let end = rest.find(MSG_END).ok_or(DecodeError::UnterminatedEnvelope)?;
			unescaped = rest[..end]
				.replace(LT_SENTINEL, "<")
				.replace(GT_SENTINEL, ">");
			unescaped.as_str()
		}
	};

	return Scanner::new(xml).run();
}

struct Frame {
	name: String,
	/// Value of the `name` attribute
	attr_name: Option<String>,
	text: String,
	has_children: bool,
}

struct Scanner<'a> {
	src: &'a str,
	pos: usize,
	stack: Vec<Frame>,
	values: BTreeMap<SmartString<LazyCompact>, String>,
	named: Vec<NamedValue>,
	seen_root: bool,
	root_closed: bool,
}

impl<'a> Scanner<'a> {
	fn new(src: &'a str) -> Self {
		Self {
			src,
			pos: 0,
			stack: Vec::new(),
			values: BTreeMap::new(),
			named: Vec::new(),
			seen_root: false,
			root_closed: false,
		}
	}

	fn run(mut self) -> Result<WireMessage, DecodeError> {
		let src = self.src;
		while self.pos < src.len() {
			let rest = &src[self.pos..];

			if rest.starts_with("<?") {
				self.skip_past(2, "?>")?;
			} else if rest.starts_with("<!--") {
				self.skip_past(4, "-->")?;
			} else if let Some(body) = rest.strip_prefix("<![CDATA[") {
				let end = body.find("]]>").ok_or(DecodeError::Malformed(self.pos))?;
				let text = body[..end].to_owned();
				self.push_text(&text, true)?;
				self.pos += "<![CDATA[".len() + end + "]]>".len();
			} else if rest.starts_with("<!") {
				self.skip_past(2, ">")?;
			} else if let Some(body) = rest.strip_prefix("</") {
				let end = body.find('>').ok_or(DecodeError::Malformed(self.pos))?;
				let name = body[..end].trim().to_owned();
				self.pos += 2 + end + 1;
				self.close(name)?;
			} else if rest.starts_with('<') {
				self.open()?;
			} else {
				let end = rest.find('<').unwrap_or(rest.len());
				let text = unescape_entities(&rest[..end]);
				self.pos += end;
				self.push_text(&text, false)?;
			}
		}

		if let Some(frame) = self.stack.pop() {
			return Err(DecodeError::Unclosed(frame.name));
		}

		if !self.seen_root {
			return Err(DecodeError::NoRoot);
		}

		return Ok(WireMessage {
			values: self.values,
			named: self.named,
		});
	}

	fn skip_past(&mut self, skip: usize, terminator: &str) -> Result<(), DecodeError> {
		let src = self.src;
		let rest = &src[self.pos + skip..];
		let end = rest
			.find(terminator)
			.ok_or(DecodeError::Malformed(self.pos))?;
		self.pos += skip + end + terminator.len();
		return Ok(());
	}

	fn push_text(&mut self, text: &str, verbatim: bool) -> Result<(), DecodeError> {
		match self.stack.last_mut() {
			Some(frame) => {
				frame.text.push_str(text);
				return Ok(());
			}
			None => {
				if !verbatim && text.trim().is_empty() {
					return Ok(());
				}
				return Err(DecodeError::TextOutsideRoot);
			}
		}
	}

	fn open(&mut self) -> Result<(), DecodeError> {
		let src = self.src;
		let start = self.pos;
		let body = &src[start + 1..];

		// Find the closing `>`, skipping over quoted attribute values
		let mut quote: Option<char> = None;
		let mut end = None;
		for (i, c) in body.char_indices() {
			match (quote, c) {
				(Some(q), c) if c == q => quote = None,
				(Some(_), _) => {}
				(None, '"') | (None, '\'') => quote = Some(c),
				(None, '>') => {
					end = Some(i);
					break;
				}
				(None, _) => {}
			}
		}
		let end = end.ok_or(DecodeError::Malformed(start))?;

		let inner = &body[..end];
		let self_closing = inner.ends_with('/');
		let inner = inner.trim_end_matches('/');
		let name: String = inner.chars().take_while(|c| !c.is_whitespace()).collect();
		let attr_name = attribute(&inner[name.len()..], "name");

		if name.is_empty() || !name.chars().all(is_name_char) {
			return Err(DecodeError::Malformed(start));
		}

		if self.stack.is_empty() {
			if self.root_closed {
				return Err(DecodeError::Malformed(start));
			}
			self.seen_root = true;
		}

		if let Some(parent) = self.stack.last_mut() {
			parent.has_children = true;
		}

		self.pos = start + 1 + end + 1;

		if self_closing {
			self.record(&name, String::new());
			if self.stack.is_empty() {
				self.root_closed = true;
			}
		} else {
			self.stack.push(Frame {
				name,
				attr_name,
				text: String::new(),
				has_children: false,
			});
		}

		return Ok(());
	}

	fn close(&mut self, name: String) -> Result<(), DecodeError> {
		let frame = match self.stack.pop() {
			Some(frame) => frame,
			None => return Err(DecodeError::UnexpectedClose(name)),
		};

		if frame.name != name {
			return Err(DecodeError::MismatchedTag {
				expected: frame.name,
				found: name,
			});
		}

		if !frame.has_children {
			if let Some(attr_name) = frame.attr_name {
				self.named.push(NamedValue {
					element: frame.name.as_str().into(),
					name: attr_name,
					text: frame.text.clone(),
				});
			}
			self.record(&frame.name, frame.text);
		} else {
			let text = frame.text.trim();
			if !text.is_empty() {
				self.record(&frame.name, text.to_owned());
			}
		}

		if self.stack.is_empty() {
			self.root_closed = true;
		}

		return Ok(());
	}

	fn record(&mut self, name: &str, text: String) {
		self.values.entry(name.into()).or_insert(text);
	}
}

/// The value of attribute `key` in the attribute list of a start tag.
/// Unquoted values are not supported.
fn attribute(attrs: &str, key: &str) -> Option<String> {
	let mut rest = attrs.trim_start();
	while !rest.is_empty() {
		let eq = rest.find('=')?;
		let name = rest[..eq].trim();
		let after = rest[eq + 1..].trim_start();
		let quote = after.chars().next().filter(|c| *c == '"' || *c == '\'')?;
		let body = &after[1..];
		let end = body.find(quote)?;

		if name == key {
			return Some(unescape_entities(&body[..end]));
		}
		rest = body[end + 1..].trim_start();
	}
	return None;
}

fn is_name_char(c: char) -> bool {
	c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

/// Resolve the predefined xml entities and numeric character references.
/// Unknown entities are kept as they are.
fn unescape_entities(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	let mut rest = text;

	while let Some(amp) = rest.find('&') {
		out.push_str(&rest[..amp]);
		let after = &rest[amp + 1..];

		let resolved = after.find(';').and_then(|semi| {
			let entity = &after[..semi];
			let c = match entity {
				"lt" => Some('<'),
				"gt" => Some('>'),
				"amp" => Some('&'),
				"quot" => Some('"'),
				"apos" => Some('\''),
				_ => {
					if let Some(hex) = entity
						.strip_prefix("#x")
						.or_else(|| entity.strip_prefix("#X"))
					{
						u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
					} else if let Some(dec) = entity.strip_prefix('#') {
						dec.parse::<u32>().ok().and_then(char::from_u32)
					} else {
						None
					}
				}
			};
			c.map(|c| (c, semi))
		});

		match resolved {
			Some((c, semi)) => {
				out.push(c);
				rest = &after[semi + 1..];
			}
			None => {
				out.push('&');
				rest = after;
			}
		}
	}

	out.push_str(rest);
	return out;
}
