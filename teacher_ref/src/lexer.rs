// Lexer for Pipit .pdl source files.
//
// Tokenizes source according to the Pipit Language Specification §2 (lexical structure).
// Uses the `logos` crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Pipit token types.
///
/// Keywords and symbols are matched as fixed strings.
/// Literals carry parsed values. Identifiers carry no value — use the span
/// to retrieve the text from the source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t]+|#[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("set")]
    Set,
    #[token("const")]
    Const,
    #[token("param")]
    Param,
    #[token("define")]
    Define,
    #[token("clock")]
    Clock,
    #[token("mode")]
    Mode,
    #[token("control")]
    Control,
    #[token("switch")]
    Switch,
    #[token("default")]
    Default,
    #[token("delay")]
    Delay,
    #[token("bind")]
    Bind,

    // ── Symbols ──
    #[token("|")]
    Pipe,
    #[token("->")]
    Arrow,
    #[token("@")]
    At,
    #[token(":")]
    Colon,
    #[token("?")]
    Question,
    #[token("$")]
    Dollar,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,

    // ── Literals ──
    //
    // Frequency and size regexes must appear before Number so the longer
    // match (number + unit suffix) wins over a bare number.
    /// Frequency literal (e.g. `48kHz`). Value stored in Hz.
    #[regex(r"-?[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?(Hz|kHz|MHz|GHz)", parse_freq)]
    Freq(f64),

    /// Size literal (e.g. `64KB`). Value stored in bytes (binary: 1 KB = 1024).
    #[regex(r"[0-9]+(KB|MB|GB)", parse_size)]
    Size(u64),

    /// Numeric literal (int, float, exponent, negative).
    #[regex(r"-?[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", parse_number)]
    Number(f64),

    /// String literal with `\"` and `\\` escapes.
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    StringLit(String),

    // ── Identifier ──
    //
    // Placed after keywords — logos prioritises fixed `#[token]` matches
    // over regex for the same length, so `set` matches Set, not Ident.
    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*`
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,

    // ── Structure ──
    /// One or more newlines (significant — statement terminator per BNF §10).
    #[regex(r"\n+")]
    Newline,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Set => write!(f, "set"),
            Token::Const => write!(f, "const"),
            Token::Param => write!(f, "param"),
            Token::Define => write!(f, "define"),
            Token::Clock => write!(f, "clock"),
            Token::Mode => write!(f, "mode"),
            Token::Control => write!(f, "control"),
            Token::Switch => write!(f, "switch"),
            Token::Default => write!(f, "default"),
            Token::Delay => write!(f, "delay"),
            Token::Bind => write!(f, "bind"),
            Token::Pipe => write!(f, "|"),
            Token::Arrow => write!(f, "->"),
            Token::At => write!(f, "@"),
            Token::Colon => write!(f, ":"),
            Token::Question => write!(f, "?"),
            Token::Dollar => write!(f, "$"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Equals => write!(f, "="),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::Freq(v) => write!(f, "{v}Hz"),
            Token::Size(v) => write!(f, "{v}B"),
            Token::Number(v) => write!(f, "{v}"),
            Token::StringLit(s) => write!(f, "\"{s}\""),
            Token::Ident => write!(f, "<ident>"),
            Token::Newline => write!(f, "<newline>"),
        }
    }
}

// ── Callbacks ──

fn parse_number(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn parse_freq(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    let slice = lex.slice();
    let unit_start = slice.find(|c: char| c.is_alphabetic())?;
    let (num_str, unit) = slice.split_at(unit_start);
    let num: f64 = num_str.parse().ok()?;
    let multiplier = match unit {
        "Hz" => 1.0,
        "kHz" => 1_000.0,
        "MHz" => 1_000_000.0,
        "GHz" => 1_000_000_000.0,
        _ => return None,
    };
    Some(num * multiplier)
}

fn parse_size(lex: &mut logos::Lexer<'_, Token>) -> Option<u64> {
    let slice = lex.slice();
    let unit_start = slice.find(|c: char| c.is_alphabetic())?;
    let (num_str, unit) = slice.split_at(unit_start);
    let num: u64 = num_str.parse().ok()?;
    let multiplier: u64 = match unit {
        "KB" => 1_024,
        "MB" => 1_024 * 1_024,
        "GB" => 1_024 * 1_024 * 1_024,
        _ => return None,
    };
    num.checked_mul(multiplier)
}

fn parse_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1]; // strip quotes
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                '"' => result.push('"'),
                '\\' => result.push('\\'),
                _ => {
                    // Spec only supports \" and \\. Reject unknown escapes.
                    return None;
                }
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

// ── Public API ──

/// Lex a Pipit source string into tokens.
///
/// Returns all successfully parsed tokens together with any errors for
/// unrecognised characters. Lexing is non-fatal: errors are collected and
/// the lexer continues past bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──
