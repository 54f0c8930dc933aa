//! Lexer and parser for the DOT-like graph language.
//!
//! ```text
//! digraph feed {
//!     fetch [type=http method=GET url="https://example.com/price"];
//!     parse [type=jsonparse path="data,price"];
//!     fetch -> parse -> scale;
//!     scale [type=multiply times=100]
//! }
//! ```
//!
//! The parser only produces declarations and edges; validation of task
//! types and graph shape lives in [`super::TaskGraph`].

use crate::error::GraphError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// Bare word or number.
    Ident(String),
    /// Double-quoted string, escapes applied.
    Quoted(String),
    /// `<...>` literal block, outer brackets removed.
    Block(String),
    Arrow,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Equals,
    Semi,
    Comma,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    line: usize,
    column: usize,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            chars: src.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> GraphError {
        GraphError::Syntax {
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<Spanned>, GraphError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let (line, column) = (self.line, self.column);
            let Some(&c) = self.chars.peek() else {
                return Ok(tokens);
            };
            let token = match c {
                '[' => self.single(Token::LBracket),
                ']' => self.single(Token::RBracket),
                '{' => self.single(Token::LBrace),
                '}' => self.single(Token::RBrace),
                '=' => self.single(Token::Equals),
                ';' => self.single(Token::Semi),
                ',' => self.single(Token::Comma),
                '"' => self.quoted()?,
                '<' => self.block()?,
                '-' => {
                    self.bump();
                    if self.chars.peek() == Some(&'>') {
                        self.bump();
                        Token::Arrow
                    } else {
                        let mut word = String::from("-");
                        self.word_into(&mut word);
                        if word.len() == 1 {
                            return Err(self.error("unexpected '-'"));
                        }
                        Token::Ident(word)
                    }
                }
                c if is_word_char(c) => {
                    let mut word = String::new();
                    self.word_into(&mut word);
                    Token::Ident(word)
                }
                other => return Err(self.error(format!("unexpected character '{other}'"))),
            };
            tokens.push(Spanned {
                token,
                line,
                column,
            });
        }
    }

    fn single(&mut self, token: Token) -> Token {
        self.bump();
        token
    }

    fn skip_trivia(&mut self) -> Result<(), GraphError> {
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == '#' {
                self.skip_line();
            } else if c == '/' {
                let mut ahead = self.chars.clone();
                ahead.next();
                match ahead.peek() {
                    Some('/') => self.skip_line(),
                    Some('*') => {
                        self.bump();
                        self.bump();
                        self.skip_block_comment()?;
                    }
                    _ => return Err(self.error("unexpected '/'")),
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.bump() {
            if c == '\n' {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), GraphError> {
        let mut prev = '\0';
        while let Some(c) = self.bump() {
            if prev == '*' && c == '/' {
                return Ok(());
            }
            prev = c;
        }
        Err(self.error("unterminated block comment"))
    }

    fn word_into(&mut self, word: &mut String) {
        while let Some(&c) = self.chars.peek() {
            if c == '-' {
                let mut ahead = self.chars.clone();
                ahead.next();
                if ahead.peek() == Some(&'>') {
                    break;
                }
            } else if !is_word_char(c) {
                break;
            }
            word.push(c);
            self.bump();
        }
    }

    fn quoted(&mut self) -> Result<Token, GraphError> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some('"') => return Ok(Token::Quoted(out)),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    // line continuation
                    Some('\n') => {}
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => return Err(self.error("unterminated string")),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn block(&mut self) -> Result<Token, GraphError> {
        self.bump();
        let mut depth = 1usize;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated '<' block")),
                Some('<') => {
                    depth += 1;
                    out.push('<');
                }
                Some('>') => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(Token::Block(out));
                    }
                    out.push('>');
                }
                Some(c) => out.push(c),
            }
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

/// A node statement: `id [k=v ...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NodeDecl {
    pub id: String,
    pub attrs: Vec<(String, String)>,
    pub line: usize,
}

/// One hop of an edge chain: `from -> to [k=v ...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EdgeDecl {
    pub from: String,
    pub to: String,
    pub attrs: Vec<(String, String)>,
    pub line: usize,
}

/// Parsed graph source, before validation.
#[derive(Debug, Default)]
pub(crate) struct ParsedGraph {
    pub name: Option<String>,
    pub nodes: Vec<NodeDecl>,
    pub edges: Vec<EdgeDecl>,
    /// Node ids in order of first appearance.
    pub appearance: Vec<String>,
}

impl ParsedGraph {
    fn saw(&mut self, id: &str) {
        if !self.appearance.iter().any(|n| n == id) {
            self.appearance.push(id.to_owned());
        }
    }
}

pub(crate) fn parse(src: &str) -> Result<ParsedGraph, GraphError> {
    let tokens = Lexer::new(src).tokenize()?;
    Parser {
        tokens,
        pos: 0,
        graph: ParsedGraph::default(),
    }
    .parse()
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    graph: ParsedGraph,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn next(&mut self) -> Option<Spanned> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn error_here(&self, message: impl Into<String>) -> GraphError {
        let (line, column) = match self.tokens.get(self.pos).or_else(|| self.tokens.last()) {
            Some(s) => (s.line, s.column),
            None => (1, 1),
        };
        GraphError::Syntax {
            line,
            column,
            message: message.into(),
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), GraphError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error_here(format!("expected {what}")))
        }
    }

    fn parse(mut self) -> Result<ParsedGraph, GraphError> {
        let wrapped = matches!(self.peek(), Some(Token::Ident(w)) if w == "digraph" || w == "strict");
        if wrapped {
            if matches!(self.peek(), Some(Token::Ident(w)) if w == "strict") {
                self.pos += 1;
            }
            match self.next() {
                Some(Spanned {
                    token: Token::Ident(w),
                    ..
                }) if w == "digraph" => {}
                _ => return Err(self.error_here("expected 'digraph'")),
            }
            if !matches!(self.peek(), Some(Token::LBrace)) {
                self.graph.name = Some(self.id("graph name")?);
            }
            self.expect(&Token::LBrace, "'{'")?;
            self.statements(true)?;
            self.expect(&Token::RBrace, "'}'")?;
            if self.peek().is_some() {
                return Err(self.error_here("unexpected input after closing '}'"));
            }
        } else {
            self.statements(false)?;
        }
        Ok(self.graph)
    }

    fn statements(&mut self, braced: bool) -> Result<(), GraphError> {
        loop {
            while self.eat(&Token::Semi) {}
            match self.peek() {
                None => return Ok(()),
                Some(Token::RBrace) if braced => return Ok(()),
                _ => self.statement()?,
            }
        }
    }

    fn statement(&mut self) -> Result<(), GraphError> {
        let line = self.tokens.get(self.pos).map_or(1, |s| s.line);
        let first = self.id("node id")?;
        self.graph.saw(&first);

        if !matches!(self.peek(), Some(Token::Arrow)) {
            let attrs = self.attr_lists()?;
            self.graph.nodes.push(NodeDecl {
                id: first,
                attrs,
                line,
            });
            return Ok(());
        }

        let mut chain = vec![first];
        while self.eat(&Token::Arrow) {
            let next = self.id("node id after '->'")?;
            self.graph.saw(&next);
            chain.push(next);
        }
        let attrs = self.attr_lists()?;
        for pair in chain.windows(2) {
            self.graph.edges.push(EdgeDecl {
                from: pair[0].clone(),
                to: pair[1].clone(),
                attrs: attrs.clone(),
                line,
            });
        }
        Ok(())
    }

    fn id(&mut self, what: &str) -> Result<String, GraphError> {
        match self.peek() {
            Some(Token::Ident(_)) | Some(Token::Quoted(_)) => match self.next().map(|s| s.token) {
                Some(Token::Ident(s)) | Some(Token::Quoted(s)) => Ok(s),
                _ => Err(self.error_here(format!("expected {what}"))),
            },
            _ => Err(self.error_here(format!("expected {what}"))),
        }
    }

    fn value(&mut self) -> Result<String, GraphError> {
        if !matches!(
            self.peek(),
            Some(Token::Ident(_)) | Some(Token::Quoted(_)) | Some(Token::Block(_))
        ) {
            return Err(self.error_here("expected attribute value"));
        }
        match self.next().map(|s| s.token) {
            Some(Token::Ident(s)) | Some(Token::Quoted(s)) | Some(Token::Block(s)) => Ok(s),
            _ => Err(self.error_here("expected attribute value")),
        }
    }

    /// Zero or more `[k=v, k=v; ...]` lists.
    fn attr_lists(&mut self) -> Result<Vec<(String, String)>, GraphError> {
        let mut attrs = Vec::new();
        while self.eat(&Token::LBracket) {
            loop {
                while self.eat(&Token::Comma) || self.eat(&Token::Semi) {}
                if self.eat(&Token::RBracket) {
                    break;
                }
                let key = self.id("attribute name")?;
                self.expect(&Token::Equals, "'=' after attribute name")?;
                let value = self.value()?;
                attrs.push((key, value));
            }
        }
        Ok(attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wrapped_graph() {
        let graph = parse(
            r#"digraph feed {
                fetch [type=http url="https://example.com"];
                fetch -> parse;
                parse [type=jsonparse path="a,b"]
            }"#,
        )
        .unwrap();
        assert_eq!(graph.name.as_deref(), Some("feed"));
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.appearance, vec!["fetch", "parse"]);
        assert_eq!(
            graph.nodes[0].attrs,
            vec![
                ("type".to_owned(), "http".to_owned()),
                ("url".to_owned(), "https://example.com".to_owned())
            ]
        );
    }

    #[test]
    fn test_parse_bare_statements_and_chains() {
        let graph = parse("a [type=http]\nb [type=median]\na -> b -> c [index=1]").unwrap();
        assert!(graph.name.is_none());
        assert_eq!(graph.edges.len(), 2);
        assert_eq!(graph.edges[1].from, "b");
        assert_eq!(graph.edges[1].to, "c");
        assert_eq!(graph.edges[1].attrs, vec![("index".to_owned(), "1".to_owned())]);
    }

    #[test]
    fn test_parse_no_space_arrow() {
        let graph = parse("a->b").unwrap();
        assert_eq!(graph.edges[0].from, "a");
        assert_eq!(graph.edges[0].to, "b");
    }

    #[test]
    fn test_parse_values() {
        let graph = parse(
            r#"n [type=multiply times=-1.5 note="say \"hi\"" body=<{"id": <nested>}>]"#,
        )
        .unwrap();
        let attrs = &graph.nodes[0].attrs;
        assert_eq!(attrs[1].1, "-1.5");
        assert_eq!(attrs[2].1, "say \"hi\"");
        assert_eq!(attrs[3].1, r#"{"id": <nested>}"#);
    }

    #[test]
    fn test_parse_comments() {
        let graph = parse(
            "// leading\n# hash\na [type=http] /* inline\n block */ ; b [type=http]",
        )
        .unwrap();
        assert_eq!(graph.nodes.len(), 2);
    }

    #[test]
    fn test_syntax_errors_carry_position() {
        let err = parse("a [type=http\nb").unwrap_err();
        assert!(matches!(err, GraphError::Syntax { .. }));

        let err = parse("a [type=\"open").unwrap_err();
        assert!(matches!(err, GraphError::Syntax { line: 1, .. }));

        let err = parse("digraph { a -> }").unwrap_err();
        assert!(matches!(err, GraphError::Syntax { .. }));

        let err = parse("digraph { a } b").unwrap_err();
        assert!(matches!(err, GraphError::Syntax { .. }));
    }
}
