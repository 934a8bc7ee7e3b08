//! N-Triples reader and writer.
//!
//! This is the one serialization the crate handles natively; it is used for
//! metadata sidecar files, vocabulary dumps in tests and the wire bodies of
//! the bundled repository client. Other serializations are the business of
//! external converters.

use std::io::Write;
use std::str::Chars;

use super::graph::Graph;
use super::term::{BlankNode, Literal, NamedNode, Term};

/// A syntax error, located by line number.
#[derive(Debug, thiserror::Error)]
#[error("n-triples syntax error on line {line}: {message}")]
pub struct ParseError {
    /// 1-based line number.
    pub line: usize,
    /// What went wrong.
    pub message: String,
}

/// Parse an N-Triples document.
pub fn parse_str(input: &str) -> Result<Graph, ParseError> {
    let mut graph = Graph::new();
    for (idx, raw) in input.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let (subject, predicate, object) = parse_line(trimmed).map_err(|message| ParseError {
            line,
            message,
        })?;
        graph.insert(subject, predicate, object);
    }
    Ok(graph)
}

/// Serialize a graph as N-Triples.
pub fn write_graph<W: Write>(graph: &Graph, out: &mut W) -> std::io::Result<()> {
    for (subject, predicate, object) in graph.iter() {
        writeln!(out, "{subject} {predicate} {object} .")?;
    }
    Ok(())
}

/// Serialize a graph into an N-Triples string.
pub fn to_string(graph: &Graph) -> String {
    let mut buf = Vec::new();
    // Writing into a Vec cannot fail.
    write_graph(graph, &mut buf).unwrap();
    String::from_utf8(buf).unwrap()
}

fn parse_line(line: &str) -> Result<(Term, NamedNode, Term), String> {
    let mut cursor = Cursor::new(line);
    cursor.skip_ws();
    let subject = match cursor.peek() {
        Some('<') => Term::Named(cursor.iri()?),
        Some('_') => Term::Blank(cursor.blank()?),
        other => return Err(format!("expected subject, found {other:?}")),
    };
    cursor.skip_ws();
    let predicate = match cursor.peek() {
        Some('<') => cursor.iri()?,
        other => return Err(format!("expected predicate IRI, found {other:?}")),
    };
    cursor.skip_ws();
    let object = match cursor.peek() {
        Some('<') => Term::Named(cursor.iri()?),
        Some('_') => Term::Blank(cursor.blank()?),
        Some('"') => Term::Literal(cursor.literal()?),
        other => return Err(format!("expected object, found {other:?}")),
    };
    cursor.skip_ws();
    match cursor.next() {
        Some('.') => {}
        other => return Err(format!("expected terminating '.', found {other:?}")),
    }
    cursor.skip_ws();
    match cursor.peek() {
        None => Ok((subject, predicate, object)),
        Some('#') => Ok((subject, predicate, object)),
        Some(c) => Err(format!("trailing content starting with {c:?}")),
    }
}

struct Cursor<'a> {
    chars: std::iter::Peekable<Chars<'a>>,
}

impl<'a> Cursor<'a> {
    fn new(s: &'a str) -> Self {
        Self {
            chars: s.chars().peekable(),
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn next(&mut self) -> Option<char> {
        self.chars.next()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            self.next();
        }
    }

    fn expect(&mut self, want: char) -> Result<(), String> {
        match self.next() {
            Some(c) if c == want => Ok(()),
            other => Err(format!("expected {want:?}, found {other:?}")),
        }
    }

    fn iri(&mut self) -> Result<NamedNode, String> {
        self.expect('<')?;
        let mut iri = String::new();
        loop {
            match self.next() {
                Some('>') => return Ok(NamedNode::new(iri)),
                Some('\\') => iri.push(self.unicode_escape()?),
                Some(c) => iri.push(c),
                None => return Err("unterminated IRI".into()),
            }
        }
    }

    fn blank(&mut self) -> Result<BlankNode, String> {
        self.expect('_')?;
        self.expect(':')?;
        let mut label = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' {
                label.push(c);
                self.next();
            } else {
                break;
            }
        }
        if label.is_empty() {
            return Err("empty blank node label".into());
        }
        Ok(BlankNode::new(label))
    }

    fn literal(&mut self) -> Result<Literal, String> {
        self.expect('"')?;
        let mut value = String::new();
        loop {
            match self.next() {
                Some('"') => break,
                Some('\\') => value.push(self.string_escape()?),
                Some(c) => value.push(c),
                None => return Err("unterminated string literal".into()),
            }
        }
        match self.peek() {
            Some('@') => {
                self.next();
                let mut lang = String::new();
                while let Some(c) = self.peek() {
                    if c.is_ascii_alphanumeric() || c == '-' {
                        lang.push(c);
                        self.next();
                    } else {
                        break;
                    }
                }
                if lang.is_empty() {
                    return Err("empty language tag".into());
                }
                Ok(Literal::with_lang(value, lang))
            }
            Some('^') => {
                self.next();
                self.expect('^')?;
                let datatype = self.iri()?;
                Ok(Literal::with_datatype(value, datatype))
            }
            _ => Ok(Literal::new(value)),
        }
    }

    fn string_escape(&mut self) -> Result<char, String> {
        match self.next() {
            Some('t') => Ok('\t'),
            Some('b') => Ok('\u{8}'),
            Some('n') => Ok('\n'),
            Some('r') => Ok('\r'),
            Some('f') => Ok('\u{c}'),
            Some('"') => Ok('"'),
            Some('\'') => Ok('\''),
            Some('\\') => Ok('\\'),
            Some('u') => self.hex_char(4),
            Some('U') => self.hex_char(8),
            other => Err(format!("invalid string escape {other:?}")),
        }
    }

    fn unicode_escape(&mut self) -> Result<char, String> {
        match self.next() {
            Some('u') => self.hex_char(4),
            Some('U') => self.hex_char(8),
            other => Err(format!("invalid IRI escape {other:?}")),
        }
    }

    fn hex_char(&mut self, digits: usize) -> Result<char, String> {
        let mut buf = String::with_capacity(digits);
        for _ in 0..digits {
            match self.next() {
                Some(c) if c.is_ascii_hexdigit() => buf.push(c),
                other => return Err(format!("invalid hex digit {other:?}")),
            }
        }
        let v = u32::from_str_radix(&buf, 16).map_err(|e| e.to_string())?;
        char::from_u32(v).ok_or_else(|| format!("invalid code point U+{buf}"))
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn parse_basic_document() {
        let doc = indoc! {r#"
            # a comment
            <https://example.org/s> <https://example.org/p> <https://example.org/o> .
            <https://example.org/s> <https://example.org/label> "café"@fr .
            _:b0 <https://example.org/size> "12"^^<http://www.w3.org/2001/XMLSchema#integer> .

        "#};
        let g = parse_str(doc).unwrap();
        assert_eq!(g.len(), 3);
        let s = Term::named("https://example.org/s");
        let label = g
            .first_object(&s, &NamedNode::new("https://example.org/label"))
            .unwrap();
        match label {
            Term::Literal(l) => {
                assert_eq!(l.value(), "café");
                assert_eq!(l.lang(), Some("fr"));
            }
            other => panic!("unexpected term {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = parse_str("<https://example.org/s> nonsense .").unwrap_err();
        assert_eq!(err.line, 1);
        let err = parse_str("<https://a> <https://b> <https://c>").unwrap_err();
        assert!(err.message.contains("terminating"));
    }

    #[test]
    fn string_escapes_roundtrip() {
        let doc = r#"<https://a> <https://b> "tab\there\nand \"quotes\" and \\ back" ."#;
        let g = parse_str(doc).unwrap();
        let serialized = to_string(&g);
        let reparsed = parse_str(&serialized).unwrap();
        similar_asserts::assert_eq!(g, reparsed);
    }

    #[test]
    fn trailing_comment_allowed() {
        let doc = "<https://a> <https://b> <https://c> . # done";
        assert_eq!(parse_str(doc).unwrap().len(), 1);
    }
}
