//! Tokenizer for metric formulas
//!
//! Event names and everything attached to them are lexed whole:
//! `UNC_C_TOR_OCCUPANCY.MISS_OPCODE@filter_opc\=0x182\,thresh\=1@`,
//! `cstate_core@c3\-residency@`, `EVENT@ldlat\=3@R` and `EVENT:c1:u` each come
//! out as a single `Token::Event`.

use std::ops::Range;

use winnow::ascii::digit1;
use winnow::combinator::{alt, delimited, not, opt, preceded, repeat, separated, terminated};
use winnow::prelude::*;
use winnow::token::{any, none_of, one_of, take_while};

use crate::ast::{EventRef, Modifier, Qualifier};
use crate::parse::{SyntaxError, SyntaxErrorKind};

type PResult<T> = winnow::ModalResult<T>;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    /// Plain word: an event name, or a function name when followed by `(`
    Word(String),
    /// Event reference carrying escapes, an `@...@` block or a `:` list
    Event(EventRef),
    If,
    Else,
    Plus,
    Minus,
    Star,
    Slash,
    Lt,
    Gt,
    Le,
    Ge,
    Amp,
    Pipe,
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Range<usize>,
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number `{n}`"),
            Token::Word(w) => format!("`{w}`"),
            Token::Event(e) => format!("event `{}`", e.name),
            Token::If => "`if`".to_string(),
            Token::Else => "`else`".to_string(),
            Token::Plus => "`+`".to_string(),
            Token::Minus => "`-`".to_string(),
            Token::Star => "`*`".to_string(),
            Token::Slash => "`/`".to_string(),
            Token::Lt => "`<`".to_string(),
            Token::Gt => "`>`".to_string(),
            Token::Le => "`<=`".to_string(),
            Token::Ge => "`>=`".to_string(),
            Token::Amp => "`&`".to_string(),
            Token::Pipe => "`|`".to_string(),
            Token::LParen => "`(`".to_string(),
            Token::RParen => "`)`".to_string(),
            Token::Comma => "`,`".to_string(),
        }
    }
}

pub(crate) fn is_word_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '#'
}

pub(crate) fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// Split formula text into tokens
pub fn tokenize(text: &str) -> Result<Vec<Spanned>, SyntaxError> {
    let mut lexer = Lexer::new(text);
    let mut tokens = Vec::new();
    while let Some(spanned) = lexer.next_token()? {
        tokens.push(spanned);
    }
    Ok(tokens)
}

struct Lexer<'a> {
    text: &'a str,
    rest: &'a str,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, rest: text }
    }

    fn offset(&self) -> usize {
        self.text.len() - self.rest.len()
    }

    fn error(
        &self,
        kind: SyntaxErrorKind,
        message: impl Into<String>,
        span: Range<usize>,
    ) -> SyntaxError {
        SyntaxError::new(kind, message, self.text, span)
    }

    /// Run a winnow parser on the remaining input, mapping failure to `InvalidToken`
    fn lex<O>(
        &mut self,
        mut parser: impl FnMut(&mut &'a str) -> PResult<O>,
        start: usize,
        message: &str,
    ) -> Result<O, SyntaxError> {
        parser(&mut self.rest).map_err(|_| {
            self.error(
                SyntaxErrorKind::InvalidToken,
                message,
                start..self.offset().max(start + 1),
            )
        })
    }

    fn next_token(&mut self) -> Result<Option<Spanned>, SyntaxError> {
        self.rest = self.rest.trim_start();
        let start = self.offset();
        let Some(c) = self.rest.chars().next() else {
            return Ok(None);
        };

        let starts_number = c.is_ascii_digit()
            || (c == '.' && self.rest[1..].starts_with(|d: char| d.is_ascii_digit()));
        let token = if starts_number {
            self.number(start)?
        } else if is_word_start(c) || matches!(c, '\\' | '@') {
            self.reference(start)?
        } else {
            match punct.parse_next(&mut self.rest) {
                Ok(token) => token,
                Err(_) => {
                    return Err(self.error(
                        SyntaxErrorKind::InvalidToken,
                        format!("unexpected character `{c}`"),
                        start..start + c.len_utf8(),
                    ));
                }
            }
        };

        Ok(Some(Spanned {
            token,
            span: start..self.offset(),
        }))
    }

    fn number(&mut self, start: usize) -> Result<Token, SyntaxError> {
        let text = self.lex(number_text, start, "malformed number")?;
        match text.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(Token::Number(value)),
            _ => Err(self.error(
                SyntaxErrorKind::InvalidToken,
                format!("number `{text}` is out of range"),
                start..self.offset(),
            )),
        }
    }

    /// A name with its optional `@...@` block, `R` suffix and `:` list
    fn reference(&mut self, start: usize) -> Result<Token, SyntaxError> {
        let (name, escaped, terms) = if self.rest.starts_with('@') {
            // `@name,term@`: the first term names the event
            let mut terms = self.lex(block, start, "malformed `@` modifier block")?;
            let first = terms.remove(0);
            if first.value.is_some() {
                return Err(self.error(
                    SyntaxErrorKind::InvalidToken,
                    "`@` block must start with an event name",
                    start..self.offset(),
                ));
            }
            (first.key, true, Some(terms))
        } else {
            let (name, escaped) = self.lex(word, start, "dangling `\\` at end of input")?;
            let terms = if self.rest.starts_with('@') {
                Some(self.lex(block, start, "malformed `@` modifier block")?)
            } else {
                None
            };
            (name, escaped, terms)
        };

        let has_block = terms.is_some();
        let mut event = EventRef::new(name);
        for term in terms.into_iter().flatten() {
            self.add_modifier(&mut event, term, start)?;
        }
        if has_block && let Ok(Some(())) = opt(retire_suffix).parse_next(&mut self.rest) {
            event.qualifier = Some(Qualifier::RetireLatency);
        }
        let has_list = self.rest.starts_with(':');
        if has_list {
            self.colon_list(&mut event, start)?;
        }

        if has_block || has_list || escaped {
            return Ok(Token::Event(event));
        }
        Ok(match event.name.as_str() {
            "if" => Token::If,
            "else" => Token::Else,
            _ => Token::Word(event.name),
        })
    }

    /// Trailing `:c1:e:u:R` list
    fn colon_list(&mut self, event: &mut EventRef, start: usize) -> Result<(), SyntaxError> {
        while self.rest.starts_with(':') {
            let at = self.offset();
            let (key, value) = self.lex(colon_item, at, "expected modifier after `:`")?;
            if key == "R" && value.is_none() {
                event.qualifier = Some(Qualifier::RetireLatency);
                continue;
            }
            self.add_modifier(event, expand_short_modifier(key, value), start)?;
        }
        Ok(())
    }

    fn add_modifier(
        &self,
        event: &mut EventRef,
        modifier: Modifier,
        start: usize,
    ) -> Result<(), SyntaxError> {
        if event.modifier(&modifier.key).is_some() {
            return Err(self.error(
                SyntaxErrorKind::DuplicateModifier,
                format!("duplicate modifier `{}` on `{}`", modifier.key, event.name),
                start..self.offset(),
            ));
        }
        event.modifiers.push(modifier);
        Ok(())
    }
}

/// Spreadsheet shorthands: `c1` counter mask, `e1` edge detect, `i1` invert
fn expand_short_modifier(key: &str, value: Option<&str>) -> Modifier {
    if value.is_none() {
        let (head, digits) = key.split_at(1.min(key.len()));
        let numeric = digits.chars().all(|c| c.is_ascii_digit());
        let long = match head {
            "c" if numeric && !digits.is_empty() => Some("cmask"),
            "e" if numeric => Some("edge"),
            "i" if numeric => Some("inv"),
            _ => None,
        };
        if let Some(long) = long {
            let value = if digits.is_empty() { "1" } else { digits };
            return Modifier {
                key: long.to_string(),
                value: Some(value.to_string()),
            };
        }
    }
    Modifier {
        key: key.to_string(),
        value: value.map(str::to_string),
    }
}

// ============ winnow token parsers ============

fn number_text<'a>(input: &mut &'a str) -> PResult<&'a str> {
    let exponent = (one_of(['e', 'E']), opt(one_of(['+', '-'])), digit1);
    alt((
        (digit1, opt(('.', digit1)), opt(exponent)).take(),
        ('.', digit1, opt((one_of(['e', 'E']), opt(one_of(['+', '-'])), digit1))).take(),
    ))
    .parse_next(input)
}

/// One name character, and whether it was written escaped
fn name_char<'a>(plain: fn(char) -> bool) -> impl FnMut(&mut &'a str) -> PResult<(char, bool)> {
    move |input: &mut &'a str| {
        alt((
            preceded('\\', any).map(|c| (c, true)),
            one_of(plain).map(|c| (c, false)),
        ))
        .parse_next(input)
    }
}

/// Event or function name; `\` makes the next character part of the name
fn word(input: &mut &str) -> PResult<(String, bool)> {
    let (first, first_escaped) = name_char(is_word_start).parse_next(input)?;
    repeat(0.., name_char(is_word_char))
        .fold(
            move || (first.to_string(), first_escaped),
            |(mut name, escaped), (c, e)| {
                name.push(c);
                (name, escaped || e)
            },
        )
        .parse_next(input)
}

/// Text of one block term; `\` escapes anything but the `,` and `=` separators
fn term_text(input: &mut &str) -> PResult<String> {
    repeat(
        1..,
        alt((
            preceded('\\', none_of([',', '='])),
            one_of(|c: char| !matches!(c, '@' | ',' | '=' | '\\') && !c.is_whitespace()),
        )),
    )
    .fold(String::new, |mut text, c| {
        text.push(c);
        text
    })
    .parse_next(input)
}

/// `key\=value` or a bare term; the unescaped `=` is accepted too
fn term(input: &mut &str) -> PResult<Modifier> {
    (term_text, opt(preceded((opt('\\'), '='), term_text)))
        .map(|(key, value)| Modifier { key, value })
        .parse_next(input)
}

/// `@term\,key\=value@`
fn block(input: &mut &str) -> PResult<Vec<Modifier>> {
    delimited('@', separated(1.., term, (opt('\\'), ',')), '@').parse_next(input)
}

/// `R` straight after a block marks the retire-latency sample
fn retire_suffix(input: &mut &str) -> PResult<()> {
    terminated('R', not(one_of(is_word_char)))
        .void()
        .parse_next(input)
}

fn colon_item<'a>(input: &mut &'a str) -> PResult<(&'a str, Option<&'a str>)> {
    (
        ':',
        take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
        opt(('=', take_while(1.., is_word_char)).map(|(_, v)| v)),
    )
        .map(|(_, key, value)| (key, value))
        .parse_next(input)
}

fn punct(input: &mut &str) -> PResult<Token> {
    alt((
        "<=".value(Token::Le),
        ">=".value(Token::Ge),
        '<'.value(Token::Lt),
        '>'.value(Token::Gt),
        '+'.value(Token::Plus),
        '-'.value(Token::Minus),
        '*'.value(Token::Star),
        '/'.value(Token::Slash),
        '&'.value(Token::Amp),
        '|'.value(Token::Pipe),
        '('.value(Token::LParen),
        ')'.value(Token::RParen),
        ','.value(Token::Comma),
    ))
    .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(text: &str) -> Vec<Token> {
        tokenize(text).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn lex_numbers() {
        assert_eq!(tokens("42"), vec![Token::Number(42.0)]);
        assert_eq!(tokens("0.5"), vec![Token::Number(0.5)]);
        assert_eq!(tokens(".25"), vec![Token::Number(0.25)]);
        assert_eq!(tokens("1e3"), vec![Token::Number(1000.0)]);
        assert_eq!(tokens("2.5E-1"), vec![Token::Number(0.25)]);
    }

    #[test]
    fn lex_out_of_range_number() {
        let err = tokenize("1e999").unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::InvalidToken);
        assert_eq!(err.span, 0..5);
    }

    #[test]
    fn lex_words_and_keywords() {
        assert_eq!(
            tokens("INST_RETIRED.ANY if x else #smt_on"),
            vec![
                Token::Word("INST_RETIRED.ANY".into()),
                Token::If,
                Token::Word("x".into()),
                Token::Else,
                Token::Word("#smt_on".into()),
            ]
        );
    }

    #[test]
    fn lex_escaped_hyphen_is_part_of_name() {
        assert_eq!(
            tokens(r"cpu\-cycles-x"),
            vec![
                Token::Event(EventRef::new("cpu-cycles")),
                Token::Minus,
                Token::Word("x".into()),
            ]
        );
    }

    #[test]
    fn lex_dangling_escape() {
        let err = tokenize("a + \\").unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::InvalidToken);
        assert_eq!(err.offset(), 4);
    }

    #[test]
    fn lex_operators_with_spans() {
        let spanned = tokenize("a<=b").unwrap();
        assert_eq!(spanned[1].token, Token::Le);
        assert_eq!(spanned[1].span, 1..3);

        let spaced = tokenize("  a <=\n\tb  ").unwrap();
        let spans: Vec<_> = spaced.iter().map(|s| s.span.clone()).collect();
        assert_eq!(spans, vec![2..3, 4..6, 8..9]);
    }

    #[test]
    fn lex_modifier_block_after_name() {
        let toks = tokens(r"UNC_C_TOR_OCCUPANCY.MISS_OPCODE@filter_opc\=0x182\,thresh\=1@");
        let expected = EventRef::new("UNC_C_TOR_OCCUPANCY.MISS_OPCODE")
            .with_modifier("filter_opc", "0x182")
            .with_modifier("thresh", "1");
        assert_eq!(toks, vec![Token::Event(expected)]);
    }

    #[test]
    fn lex_pmu_term_block() {
        let spanned = tokenize(r"cstate_core@c3\-residency@ / TSC").unwrap();
        let expected = EventRef::new("cstate_core").with_flag("c3-residency");
        assert_eq!(spanned[0].token, Token::Event(expected));
        assert_eq!(spanned[0].span, 0..26);
        assert_eq!(spanned[1].token, Token::Slash);
        assert_eq!(spanned[2].token, Token::Word("TSC".into()));

        let toks = tokens(r"cpu_core@IDQ.MITE_UOPS\,cmask\=0x8\,inv\=0x1@");
        let expected = EventRef::new("cpu_core")
            .with_flag("IDQ.MITE_UOPS")
            .with_modifier("cmask", "0x8")
            .with_modifier("inv", "0x1");
        assert_eq!(toks, vec![Token::Event(expected)]);
    }

    #[test]
    fn lex_block_retire_latency_suffix() {
        let toks = tokens(r"MEM_LOAD_RETIRED.L3_MISS@ldlat\=3@R * 2");
        let expected = EventRef::new("MEM_LOAD_RETIRED.L3_MISS")
            .with_modifier("ldlat", "3")
            .with_qualifier(Qualifier::RetireLatency);
        assert_eq!(toks, vec![Token::Event(expected), Token::Star, Token::Number(2.0)]);
    }

    #[test]
    fn lex_leading_block_spelling() {
        let toks = tokens(r"@UNC_CHA_TOR_INSERTS.IA_MISS,filter_opc=0x182,thresh\=1@");
        let expected = EventRef::new("UNC_CHA_TOR_INSERTS.IA_MISS")
            .with_modifier("filter_opc", "0x182")
            .with_modifier("thresh", "1");
        assert_eq!(toks, vec![Token::Event(expected)]);
    }

    #[test]
    fn lex_colon_list() {
        let toks = tokens("CPU_CLK_UNHALTED.THREAD:c1:e:u:R");
        let expected = EventRef::new("CPU_CLK_UNHALTED.THREAD")
            .with_modifier("cmask", "1")
            .with_modifier("edge", "1")
            .with_flag("u")
            .with_qualifier(Qualifier::RetireLatency);
        assert_eq!(toks, vec![Token::Event(expected)]);
    }

    #[test]
    fn lex_rejects_duplicate_modifier() {
        let err = tokenize("E:c1:cmask=2").unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::DuplicateModifier);
        let err = tokenize(r"E@k\=1\,k\=2@").unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::DuplicateModifier);
    }

    #[test]
    fn lex_rejects_malformed_blocks() {
        for text in [r"E@k\=v + 1", "E@@", r"@k\=v@"] {
            let err = tokenize(text).unwrap_err();
            assert_eq!(err.kind, SyntaxErrorKind::InvalidToken, "{text}");
            assert_eq!(err.offset(), 0, "{text}");
        }
    }

    #[test]
    fn lex_rejects_unknown_character() {
        let err = tokenize("a % b").unwrap_err();
        assert_eq!(err.span, 2..3);
    }
}
