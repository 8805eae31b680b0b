//! Routine language lexer using Logos.
//!
//! Tokenizes routine source into a stream of tokens with byte spans.
//! Lexing never stops at the first bad character: the validator scans
//! the full token stream for forbidden constructs even when the
//! source is malformed.

use logos::Logos;
use std::fmt;
use std::ops::Range;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*[^*]*\*+([^/*][^*]*\*+)*/")]
pub enum Token {
    // Keywords
    #[token("function")]
    Function,
    #[token("return")]
    Return,
    #[token("let")]
    Let,
    #[token("const")]
    Const,
    #[token("var")]
    Var,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("while")]
    While,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("throw")]
    Throw,
    #[token("new")]
    New,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,
    #[token("undefined")]
    Undefined,

    // Module syntax: lexed so the validator can reject it by name.
    #[token("import")]
    Import,
    #[token("export")]
    Export,

    // Literals and names
    #[regex(r"[A-Za-z_$][A-Za-z0-9_$]*", |lex| lex.slice().to_owned())]
    Identifier(String),

    #[regex(r"[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| unescape(lex.slice()))]
    #[regex(r#"'([^'\\\n]|\\.)*'"#, |lex| unescape(lex.slice()))]
    Str(String),

    // Operators
    #[token("===")]
    StrictEq,
    #[token("!==")]
    StrictNe,
    #[token("==")]
    Eq,
    #[token("!=")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("**")]
    StarStar,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("=>")]
    FatArrow,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("=")]
    Assign,
    #[token("!")]
    Bang,
    #[token("?")]
    Question,
    #[token(":")]
    Colon,

    // Delimiters
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token("(")]
    LeftParen,
    #[token(")")]
    RightParen,
    #[token("[")]
    LeftBracket,
    #[token("]")]
    RightBracket,
    #[token("{")]
    LeftBrace,
    #[token("}")]
    RightBrace,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Identifier(name) => write!(f, "identifier '{name}'"),
            Token::Number(n) => write!(f, "number {n}"),
            Token::Str(s) => write!(f, "string \"{s}\""),
            Token::Function => write!(f, "'function'"),
            Token::Return => write!(f, "'return'"),
            Token::Import => write!(f, "'import'"),
            Token::Export => write!(f, "'export'"),
            Token::LeftParen => write!(f, "'('"),
            Token::RightParen => write!(f, "')'"),
            Token::LeftBrace => write!(f, "'{{'"),
            Token::RightBrace => write!(f, "'}}'"),
            Token::LeftBracket => write!(f, "'['"),
            Token::RightBracket => write!(f, "']'"),
            Token::Semicolon => write!(f, "';'"),
            Token::Comma => write!(f, "','"),
            other => write!(f, "{other:?}"),
        }
    }
}

fn unescape(input: &str) -> Option<String> {
    let inner = &input[1..input.len() - 1];
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        match chars.next()? {
            'n' => result.push('\n'),
            't' => result.push('\t'),
            'r' => result.push('\r'),
            '0' => result.push('\0'),
            other => result.push(other),
        }
    }
    Some(result)
}

/// Token with its byte span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Range<usize>,
}

/// A character sequence that is not a token.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Range<usize>,
    pub text: String,
}

/// Tokenize the whole source, collecting every unrecognised span.
pub fn tokenize(source: &str) -> (Vec<Spanned>, Vec<LexError>) {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    let mut lexer = Token::lexer(source);
    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(token) => tokens.push(Spanned { token, span }),
            Err(()) => errors.push(LexError {
                text: lexer.slice().to_string(),
                span,
            }),
        }
    }
    (tokens, errors)
}

/// 1-based (line, column) of a byte offset.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let col = before.rfind('\n').map_or(offset, |nl| offset - nl - 1) + 1;
    (line, col)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        let (tokens, errors) = tokenize(source);
        assert!(errors.is_empty(), "unexpected lex errors: {errors:?}");
        tokens.into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn keywords_win_over_identifiers_only_on_exact_match() {
        assert_eq!(
            kinds("function functional evaluate"),
            vec![
                Token::Function,
                Token::Identifier("functional".into()),
                Token::Identifier("evaluate".into()),
            ]
        );
    }

    #[test]
    fn longest_operator_wins() {
        assert_eq!(
            kinds("a === b !== c ** 2 => x"),
            vec![
                Token::Identifier("a".into()),
                Token::StrictEq,
                Token::Identifier("b".into()),
                Token::StrictNe,
                Token::Identifier("c".into()),
                Token::StarStar,
                Token::Number(2.0),
                Token::FatArrow,
                Token::Identifier("x".into()),
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("1 // tail\n/* block\n comment */ 2.5e1"),
            vec![Token::Number(1.0), Token::Number(25.0)]
        );
    }

    #[test]
    fn strings_unescape() {
        assert_eq!(
            kinds(r#"'it\'s' "a\"b""#),
            vec![Token::Str("it's".into()), Token::Str("a\"b".into())]
        );
    }

    #[test]
    fn unknown_characters_are_collected_not_fatal() {
        let (tokens, errors) = tokenize("a @ b # c");
        assert_eq!(tokens.len(), 3);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].text, "@");
    }

    #[test]
    fn line_col_is_one_based() {
        let src = "ab\ncd";
        assert_eq!(line_col(src, 0), (1, 1));
        assert_eq!(line_col(src, 4), (2, 2));
    }
}
