use std::iter::Peekable;
use std::str::Chars;
use nom::character::complete::{digit1, one_of};
use nom::combinator::{all_consuming, opt, recognize};
use nom::sequence::pair;
use nom::IResult;
use crate::{LispError, LispValue, Result};
use crate::package::{LispSymbol, PackageRegistry};

fn integer_literal(input: &str) -> IResult<&str, &str> {
    recognize(pair(opt(one_of("+-")), digit1))(input)
}

fn is_delimiter(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, '(' | ')' | '\'' | '`' | ',' | '"' | ';')
}

/// Reads s-expressions from source text, one top-level form per iteration.
///
/// Symbols are interned through the registry as they are read, so the
/// parser must be given the same registry the forms are evaluated with.
/// After the first error the iterator is exhausted.
pub struct LispParser<'a> {
    input: Peekable<Chars<'a>>,
    registry: &'a PackageRegistry,
    quasiquote_depth: usize,
    row: usize,
    col: usize,
    failed: bool,
}

impl<'a> LispParser<'a> {
    pub fn new(input: &'a str, registry: &'a PackageRegistry) -> Self {
        LispParser {
            input: input.chars().peekable(),
            registry,
            quasiquote_depth: 0,
            row: 1,
            col: 1,
            failed: false,
        }
    }

    /// Reads the first form of `input`, if there is one.
    pub fn parse(input: &str, registry: &PackageRegistry) -> Option<Result<LispValue>> {
        LispParser::new(input, registry).next()
    }

    /// Reads every top-level form of `input`.
    pub fn parse_all(input: &str, registry: &PackageRegistry) -> Result<Vec<LispValue>> {
        LispParser::new(input, registry).collect()
    }

    fn peek(&mut self) -> Option<char> {
        self.input.peek().copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.input.next()?;
        if ch == '\n' {
            self.row += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    /// Skips whitespace and `;` comments.
    fn skip_atmosphere(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == ';' {
                while !matches!(self.bump(), None | Some('\n')) {}
            } else if ch.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn read_next(&mut self) -> Option<Result<LispValue>> {
        self.skip_atmosphere();
        self.peek()?;
        Some(self.read_form())
    }

    fn read_form(&mut self) -> Result<LispValue> {
        let (row, col) = (self.row, self.col);
        let known = self.registry.known();
        match self.bump() {
            None => Err(LispError::UnbalancedDelim(1)),
            Some('(') => self.read_list(),
            Some(')') => Err(LispError::SyntaxError(row, col, ')')),
            Some('\'') => self.read_prefixed("'", known.quote.clone()),
            Some('`') => {
                self.quasiquote_depth += 1;
                let out = self.read_prefixed("`", known.quasiquote.clone());
                self.quasiquote_depth -= 1;
                out
            },
            Some(',') => {
                let (prefix, name, sym) = if self.peek() == Some('@') {
                    self.bump();
                    (",@", "slice-unquote", known.slice_unquote.clone())
                } else {
                    (",", "unquote", known.unquote.clone())
                };
                if self.quasiquote_depth == 0 {
                    return Err(LispError::OnlyInQuasiquote(name));
                }
                self.quasiquote_depth -= 1;
                let out = self.read_prefixed(prefix, sym);
                self.quasiquote_depth += 1;
                out
            },
            Some('"') => self.read_string(row, col),
            Some(ch) => {
                let token = self.read_token(ch);
                self.read_atom(&token)
            },
        }
    }

    /// `'x`, `` `x ``, `,x` and `,@x` all read as a two-element list.
    fn read_prefixed(&mut self, prefix: &'static str, head: LispSymbol) -> Result<LispValue> {
        self.skip_atmosphere();
        if self.peek().is_none() {
            return Err(LispError::MissingToken(prefix));
        }
        let inner = self.read_form()?;
        Ok(LispValue::list_from([head.into(), inner]))
    }

    fn read_list(&mut self) -> Result<LispValue> {
        let mut items = vec![];
        loop {
            self.skip_atmosphere();
            let (row, col) = (self.row, self.col);
            match self.peek() {
                None => break Err(LispError::UnbalancedDelim(1)),
                Some(')') => {
                    self.bump();
                    break Ok(LispValue::list_from(items));
                },
                Some(ch) if !is_delimiter(ch) => {
                    self.bump();
                    let token = self.read_token(ch);
                    if token == "." {
                        if items.is_empty() {
                            break Err(LispError::SyntaxError(row, col, '.'));
                        }
                        let tail = self.read_dotted_tail()?;
                        break Ok(LispValue::list_with_tail(items, tail));
                    }
                    items.push(self.read_atom(&token)?);
                },
                Some(_) => {
                    let item = self.read_form().map_err(|err| match err {
                        LispError::UnbalancedDelim(x) => LispError::UnbalancedDelim(x + 1),
                        _ => err,
                    })?;
                    items.push(item);
                },
            }
        }
    }

    /// The single form after ` . ` and the closing paren of a dotted list.
    fn read_dotted_tail(&mut self) -> Result<LispValue> {
        self.skip_atmosphere();
        let (row, col) = (self.row, self.col);
        match self.peek() {
            None => return Err(LispError::UnbalancedDelim(1)),
            Some(')') => return Err(LispError::SyntaxError(row, col, ')')),
            Some(_) => {},
        }
        let tail = self.read_form()?;
        self.skip_atmosphere();
        let (row, col) = (self.row, self.col);
        match self.bump() {
            Some(')') => Ok(tail),
            Some(ch) => Err(LispError::SyntaxError(row, col, ch)),
            None => Err(LispError::UnbalancedDelim(1)),
        }
    }

    fn read_string(&mut self, row: usize, col: usize) -> Result<LispValue> {
        let mut content = String::new();
        loop {
            match self.bump() {
                None => break Err(LispError::UnterminatedString(row, col)),
                Some('"') => break Ok(content.into()),
                Some('\\') => match self.bump() {
                    None => break Err(LispError::UnterminatedString(row, col)),
                    Some('n') => content.push('\n'),
                    Some('b') => content.push(' '),
                    Some('t') => content.push('\t'),
                    Some('"') => content.push('"'),
                    Some('\\') => content.push('\\'),
                    // unknown escapes are dropped
                    Some(_) => {},
                },
                Some(ch) => content.push(ch),
            }
        }
    }

    fn read_token(&mut self, first: char) -> String {
        let mut token = String::from(first);
        while let Some(ch) = self.peek() {
            if is_delimiter(ch) {
                break;
            }
            token.push(ch);
            self.bump();
        }
        token
    }

    fn read_atom(&self, token: &str) -> Result<LispValue> {
        if all_consuming(integer_literal)(token).is_ok() {
            token
                .parse()
                .map(LispValue::Integer)
                .map_err(|_| LispError::IntegerOutOfRange(token.to_owned()))
        } else {
            Ok(self.registry.resolve(token)?.into())
        }
    }
}

impl Iterator for LispParser<'_> {
    type Item = Result<LispValue>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let out = self.read_next();
        if let Some(Err(_)) = out {
            self.failed = true;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str, registry: &PackageRegistry) -> LispValue {
        LispParser::parse(input, registry).unwrap().unwrap()
    }

    fn sym(registry: &PackageRegistry, name: &str) -> LispValue {
        registry.intern(name).into()
    }

    #[test]
    fn read_numbers() {
        let reg = PackageRegistry::new();
        assert_eq!(parse("1", &reg), 1.into());
        assert_eq!(parse("-123", &reg), (-123).into());
        assert_eq!(parse("+7", &reg), 7.into());
        assert_eq!(parse("-", &reg), sym(&reg, "-"));
        assert_eq!(parse("1+", &reg), sym(&reg, "1+"));
        assert!(matches!(
            LispParser::parse("99999999999999999999", &reg),
            Some(Err(LispError::IntegerOutOfRange(_)))
        ));
    }

    #[test]
    fn read_symbols_are_interned() {
        let reg = PackageRegistry::new();
        let forms = LispParser::parse_all("abc abc abc-def", &reg).unwrap();
        assert_eq!(forms.len(), 3);
        assert!(forms[0].is_eq(&forms[1]));
        assert!(!forms[0].is_eq(&forms[2]));
        assert_eq!(forms[2], sym(&reg, "abc-def"));
    }

    #[test]
    fn read_lists() {
        let reg = PackageRegistry::new();
        assert_eq!(parse("()", &reg), LispValue::Nil);
        assert_eq!(parse("( )", &reg), LispValue::Nil);
        assert_eq!(
            parse("(+ 1 (2 3))", &reg),
            LispValue::list_from([
                sym(&reg, "+"),
                1.into(),
                LispValue::list_from([2.into(), 3.into()]),
            ])
        );
        assert_eq!(parse("(1 . 2)", &reg), LispValue::cons(1.into(), 2.into()));
        assert_eq!(
            parse("(1 2 . (3))", &reg),
            LispValue::list_from([1.into(), 2.into(), 3.into()])
        );
    }

    #[test]
    fn bad_dotted_lists() {
        let reg = PackageRegistry::new();
        assert!(matches!(LispParser::parse("(. 2)", &reg), Some(Err(LispError::SyntaxError(..)))));
        assert!(matches!(LispParser::parse("(1 . 2 3)", &reg), Some(Err(LispError::SyntaxError(..)))));
        assert!(matches!(LispParser::parse("(1 . )", &reg), Some(Err(LispError::SyntaxError(..)))));
    }

    #[test]
    fn unbalanced() {
        let reg = PackageRegistry::new();
        assert!(matches!(LispParser::parse("(1 (2", &reg), Some(Err(LispError::UnbalancedDelim(2)))));
        assert!(matches!(LispParser::parse(")", &reg), Some(Err(LispError::SyntaxError(1, 1, ')')))));
    }

    #[test]
    fn comments_and_whitespace() {
        let reg = PackageRegistry::new();
        let forms = LispParser::parse_all("; leading\n1 ; trailing\n\t(2 ; inside\n 3)\n;; end", &reg)
            .unwrap();
        assert_eq!(forms, vec![1.into(), LispValue::list_from([2.into(), 3.into()])]);
        assert!(LispParser::parse_all("  ; nothing\n", &reg).unwrap().is_empty());
    }

    #[test]
    fn quote_sugar() {
        let reg = PackageRegistry::new();
        let k = reg.known();
        assert_eq!(
            parse("'x", &reg),
            LispValue::list_from([k.quote.clone().into(), sym(&reg, "x")])
        );
        assert_eq!(
            parse("`(a ,b ,@c)", &reg),
            LispValue::list_from([
                k.quasiquote.clone().into(),
                LispValue::list_from([
                    sym(&reg, "a"),
                    LispValue::list_from([k.unquote.clone().into(), sym(&reg, "b")]),
                    LispValue::list_from([k.slice_unquote.clone().into(), sym(&reg, "c")]),
                ]),
            ])
        );
        assert!(matches!(LispParser::parse("'", &reg), Some(Err(LispError::MissingToken("'")))));
    }

    #[test]
    fn unquote_needs_quasiquote() {
        let reg = PackageRegistry::new();
        assert!(matches!(
            LispParser::parse(",x", &reg),
            Some(Err(LispError::OnlyInQuasiquote("unquote")))
        ));
        assert!(matches!(
            LispParser::parse("'(,@x)", &reg),
            Some(Err(LispError::OnlyInQuasiquote("slice-unquote")))
        ));
        // one level of unquote per level of quasiquote
        assert!(LispParser::parse("``,,x", &reg).unwrap().is_ok());
        assert!(matches!(
            LispParser::parse("`,,x", &reg),
            Some(Err(LispError::OnlyInQuasiquote("unquote")))
        ));
    }

    #[test]
    fn string_escapes() {
        let reg = PackageRegistry::new();
        assert_eq!(parse(r#""a\nb\tc\bd\"\\""#, &reg), "a\nb\tc d\"\\".into());
        assert_eq!(parse(r#""x\qy""#, &reg), "xy".into());
        assert!(matches!(
            LispParser::parse("\"abc", &reg),
            Some(Err(LispError::UnterminatedString(1, 1)))
        ));
    }

    #[test]
    fn stops_after_error() {
        let reg = PackageRegistry::new();
        let mut parser = LispParser::new("1 ) 2", &reg);
        assert_eq!(parser.next().unwrap().unwrap(), 1.into());
        assert!(parser.next().unwrap().is_err());
        assert!(parser.next().is_none());
    }

    #[test]
    fn qualified_names() {
        let reg = PackageRegistry::new();
        assert!(matches!(
            LispParser::parse("nope::x", &reg),
            Some(Err(LispError::NotAPackage(_)))
        ));
        let inner = crate::package::LispPackage::new("inner");
        reg.intern("inner").set_package(inner.clone());
        assert_eq!(parse("inner::x", &reg), inner.intern("x").into());
        assert_eq!(parse("inner:x", &reg), inner.intern("x").into());
    }
}
