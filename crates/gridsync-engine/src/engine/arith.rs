//! Arithmetic over the reduced formula text.
//!
//! Once references and aggregates have been substituted, a formula is plain
//! arithmetic: numbers, `+ - * /`, parentheses and spaces. This is a small
//! recursive-descent parser with the usual precedence (`* /` over `+ -`),
//! left associativity, and unary signs.

use thiserror::Error;

/// Parenthesis/unary nesting allowed before giving up.
const MAX_NESTING: usize = 256;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArithError {
    #[error("unexpected character '{0}'")]
    Unexpected(char),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("malformed number '{0}'")]
    BadNumber(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("expression nested too deeply")]
    TooDeep,

    #[error("result is not a finite number")]
    NotFinite,
}

/// Evaluate an arithmetic expression.
pub fn evaluate_arithmetic(expr: &str) -> Result<f64, ArithError> {
    let mut parser = Parser {
        src: expr.as_bytes(),
        pos: 0,
        depth: 0,
    };
    let value = parser.expression()?;
    parser.skip_ws();
    if let Some(c) = parser.peek() {
        return Err(ArithError::Unexpected(c as char));
    }
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ArithError::NotFinite)
    }
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t')) {
            self.pos += 1;
        }
    }

    fn expression(&mut self) -> Result<f64, ArithError> {
        let mut acc = self.term()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'+') => {
                    self.pos += 1;
                    acc += self.term()?;
                }
                Some(b'-') => {
                    self.pos += 1;
                    acc -= self.term()?;
                }
                _ => return Ok(acc),
            }
        }
    }

    fn term(&mut self) -> Result<f64, ArithError> {
        let mut acc = self.factor()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'*') => {
                    self.pos += 1;
                    acc *= self.factor()?;
                }
                Some(b'/') => {
                    self.pos += 1;
                    let rhs = self.factor()?;
                    if rhs == 0.0 {
                        return Err(ArithError::DivisionByZero);
                    }
                    acc /= rhs;
                }
                _ => return Ok(acc),
            }
        }
    }

    fn factor(&mut self) -> Result<f64, ArithError> {
        self.skip_ws();
        match self.peek() {
            None => Err(ArithError::UnexpectedEnd),
            Some(b'+') => {
                self.pos += 1;
                self.nested(|p| p.factor())
            }
            Some(b'-') => {
                self.pos += 1;
                self.nested(|p| p.factor()).map(|v| -v)
            }
            Some(b'(') => {
                self.pos += 1;
                let value = self.nested(|p| p.expression())?;
                self.skip_ws();
                match self.peek() {
                    Some(b')') => {
                        self.pos += 1;
                        Ok(value)
                    }
                    Some(c) => Err(ArithError::Unexpected(c as char)),
                    None => Err(ArithError::UnexpectedEnd),
                }
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => self.number(),
            Some(c) => Err(ArithError::Unexpected(c as char)),
        }
    }

    fn nested(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<f64, ArithError>,
    ) -> Result<f64, ArithError> {
        if self.depth >= MAX_NESTING {
            return Err(ArithError::TooDeep);
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn number(&mut self) -> Result<f64, ArithError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == b'.') {
            self.pos += 1;
        }
        // Only ASCII digits and dots were consumed.
        let text = String::from_utf8_lossy(&self.src[start..self.pos]);
        if text == "." || text.matches('.').count() > 1 {
            return Err(ArithError::BadNumber(text.into_owned()));
        }
        text.parse::<f64>()
            .map_err(|_| ArithError::BadNumber(text.into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_and_associativity() {
        assert_eq!(evaluate_arithmetic("1 + 2 * 3"), Ok(7.0));
        assert_eq!(evaluate_arithmetic("(1 + 2) * 3"), Ok(9.0));
        assert_eq!(evaluate_arithmetic("10 - 4 - 3"), Ok(3.0));
        assert_eq!(evaluate_arithmetic("16 / 4 / 2"), Ok(2.0));
        assert_eq!(evaluate_arithmetic("7 / 2"), Ok(3.5));
    }

    #[test]
    fn test_unary_signs_and_decimals() {
        assert_eq!(evaluate_arithmetic("-3 * 2"), Ok(-6.0));
        assert_eq!(evaluate_arithmetic("2 - -3"), Ok(5.0));
        assert_eq!(evaluate_arithmetic("+.5 + 3."), Ok(3.5));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(
            evaluate_arithmetic("1 / (2 - 2)"),
            Err(ArithError::DivisionByZero)
        );
    }

    #[test]
    fn test_malformed_expressions() {
        assert_eq!(evaluate_arithmetic(""), Err(ArithError::UnexpectedEnd));
        assert_eq!(evaluate_arithmetic("1 +"), Err(ArithError::UnexpectedEnd));
        assert_eq!(evaluate_arithmetic("(1"), Err(ArithError::UnexpectedEnd));
        assert_eq!(evaluate_arithmetic("1 2"), Err(ArithError::Unexpected('2')));
        assert!(matches!(
            evaluate_arithmetic("1.2.3"),
            Err(ArithError::BadNumber(_))
        ));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let expr = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert_eq!(evaluate_arithmetic(&expr), Err(ArithError::TooDeep));
    }
}
