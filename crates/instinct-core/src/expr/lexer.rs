use super::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    In,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Dot,
    Comma,
    Colon,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    /// Byte offset of the first character of the token.
    pub position: usize,
}

pub(crate) fn tokenize(src: &str) -> Result<Vec<Spanned>, ExprError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            let (token, next) = lex_number(src, &chars, i)?;
            tokens.push(Spanned {
                token,
                position: pos,
            });
            i = next;
            continue;
        }

        if c == '"' || c == '\'' {
            let (s, next) = lex_string(&chars, i, c)?;
            tokens.push(Spanned {
                token: Token::Str(s),
                position: pos,
            });
            i = next;
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                i += 1;
            }
            let end = chars.get(i).map(|(p, _)| *p).unwrap_or(src.len());
            let word = &src[chars[start].0..end];
            let token = match word {
                "true" => Token::True,
                "false" => Token::False,
                "null" => Token::Null,
                "in" => Token::In,
                _ => Token::Ident(word.to_string()),
            };
            tokens.push(Spanned {
                token,
                position: pos,
            });
            continue;
        }

        let next = chars.get(i + 1).map(|(_, c)| *c);
        let (token, width) = match (c, next) {
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('&', Some('&')) => (Token::AndAnd, 2),
            ('|', Some('|')) => (Token::OrOr, 2),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('!', _) => (Token::Bang, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            ('{', _) => (Token::LBrace, 1),
            ('}', _) => (Token::RBrace, 1),
            ('.', _) => (Token::Dot, 1),
            (',', _) => (Token::Comma, 1),
            (':', _) => (Token::Colon, 1),
            ('?', _) => (Token::Question, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            _ => {
                return Err(ExprError::Syntax {
                    position: pos,
                    message: format!("unexpected character '{c}'"),
                })
            }
        };
        tokens.push(Spanned {
            token,
            position: pos,
        });
        i += width;
    }

    Ok(tokens)
}

fn lex_number(
    src: &str,
    chars: &[(usize, char)],
    start: usize,
) -> Result<(Token, usize), ExprError> {
    let mut i = start;
    let mut is_float = false;

    while i < chars.len() && chars[i].1.is_ascii_digit() {
        i += 1;
    }

    // A fraction needs a digit after the dot, otherwise `1.size()` style
    // member access would be swallowed.
    if i + 1 < chars.len() && chars[i].1 == '.' && chars[i + 1].1.is_ascii_digit() {
        is_float = true;
        i += 1;
        while i < chars.len() && chars[i].1.is_ascii_digit() {
            i += 1;
        }
    }

    if i < chars.len() && (chars[i].1 == 'e' || chars[i].1 == 'E') {
        let mut j = i + 1;
        if j < chars.len() && (chars[j].1 == '+' || chars[j].1 == '-') {
            j += 1;
        }
        if j < chars.len() && chars[j].1.is_ascii_digit() {
            is_float = true;
            i = j;
            while i < chars.len() && chars[i].1.is_ascii_digit() {
                i += 1;
            }
        }
    }

    let position = chars[start].0;
    let end = chars.get(i).map(|(p, _)| *p).unwrap_or(src.len());
    let text = &src[position..end];

    let token = if is_float {
        text.parse::<f64>()
            .map(Token::Float)
            .map_err(|e| ExprError::Syntax {
                position,
                message: format!("invalid number '{text}': {e}"),
            })?
    } else {
        text.parse::<i64>()
            .map(Token::Int)
            .map_err(|e| ExprError::Syntax {
                position,
                message: format!("invalid integer '{text}': {e}"),
            })?
    };

    Ok((token, i))
}

fn lex_string(
    chars: &[(usize, char)],
    start: usize,
    quote: char,
) -> Result<(String, usize), ExprError> {
    let mut out = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        let c = chars[i].1;
        if c == quote {
            return Ok((out, i + 1));
        }
        if c == '\\' {
            let Some(&(pos, escaped)) = chars.get(i + 1) else {
                break;
            };
            let resolved = match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '0' => '\0',
                '\\' | '"' | '\'' => escaped,
                other => {
                    return Err(ExprError::Syntax {
                        position: pos,
                        message: format!("unknown escape sequence '\\{other}'"),
                    })
                }
            };
            out.push(resolved);
            i += 2;
            continue;
        }
        out.push(c);
        i += 1;
    }

    Err(ExprError::Syntax {
        position: chars[start].0,
        message: "unterminated string literal".into(),
    })
}
