//! 计算器工具：数学表达式求值
//!
//! 手写递归下降：+ - * / % ^、括号、常量 pi/e 与一组安全函数（sqrt/sin/cos/tan/log/
//! log10/log2/exp/floor/ceil/abs/round/pow/min/max）。查询整体不是表达式时返回空结果
//! 而非报错（子任务描述多为自然语言，此时该工具无事可做）。

use async_trait::async_trait;

use crate::tools::registry::ToolId;
use crate::tools::{Tool, ToolRecord};

/// 计算器工具
#[derive(Debug, Default)]
pub struct CalculatorTool;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                // 兼容 Python 风格的 ** 幂运算
                if chars.get(i + 1) == Some(&'*') {
                    tokens.push(Token::Caret);
                    i += 2;
                } else {
                    tokens.push(Token::Star);
                    i += 1;
                }
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '^' => {
                tokens.push(Token::Caret);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value: f64 = text.parse().map_err(|_| format!("bad number: {}", text))?;
                tokens.push(Token::Num(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character: {}", other)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, token: Token) -> Result<(), String> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(format!("expected {:?}, got {:?}", token, other)),
        }
    }

    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.next();
                    value += self.term()?;
                }
                Some(Token::Minus) => {
                    self.next();
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.next();
                    value *= self.unary()?;
                }
                Some(Token::Slash) => {
                    self.next();
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    value /= rhs;
                }
                Some(Token::Percent) => {
                    self.next();
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    value %= rhs;
                }
                _ => return Ok(value),
            }
        }
    }

    fn unary(&mut self) -> Result<f64, String> {
        if let Some(Token::Minus) = self.peek() {
            self.next();
            return Ok(-self.unary()?);
        }
        self.power()
    }

    fn power(&mut self) -> Result<f64, String> {
        let base = self.primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.next();
            // 右结合
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, String> {
        match self.next() {
            Some(Token::Num(v)) => Ok(v),
            Some(Token::LParen) => {
                let value = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                let name = name.to_lowercase();
                match name.as_str() {
                    "pi" => return Ok(std::f64::consts::PI),
                    "e" => return Ok(std::f64::consts::E),
                    _ => {}
                }
                self.expect(Token::LParen)?;
                let mut args = vec![self.expr()?];
                while let Some(Token::Comma) = self.peek() {
                    self.next();
                    args.push(self.expr()?);
                }
                self.expect(Token::RParen)?;
                apply_function(&name, &args)
            }
            other => Err(format!("unexpected token: {:?}", other)),
        }
    }
}

fn apply_function(name: &str, args: &[f64]) -> Result<f64, String> {
    let one = |f: fn(f64) -> f64| -> Result<f64, String> {
        if args.len() == 1 {
            Ok(f(args[0]))
        } else {
            Err(format!("{} expects 1 argument", name))
        }
    };
    match name {
        "sqrt" => one(f64::sqrt),
        "sin" => one(f64::sin),
        "cos" => one(f64::cos),
        "tan" => one(f64::tan),
        "log" => one(f64::ln),
        "log10" => one(f64::log10),
        "log2" => one(f64::log2),
        "exp" => one(f64::exp),
        "floor" => one(f64::floor),
        "ceil" => one(f64::ceil),
        "abs" => one(f64::abs),
        "round" => one(f64::round),
        "pow" => {
            if args.len() == 2 {
                Ok(args[0].powf(args[1]))
            } else {
                Err("pow expects 2 arguments".to_string())
            }
        }
        "min" => args
            .iter()
            .copied()
            .reduce(f64::min)
            .ok_or_else(|| "min expects at least 1 argument".to_string()),
        "max" => args
            .iter()
            .copied()
            .reduce(f64::max)
            .ok_or_else(|| "max expects at least 1 argument".to_string()),
        other => Err(format!("unknown function: {}", other)),
    }
}

/// 求值入口
pub(crate) fn evaluate(expression: &str) -> Result<f64, String> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err("trailing input after expression".to_string());
    }
    if !value.is_finite() {
        return Err("result is not finite".to_string());
    }
    Ok(value)
}

/// 去掉多余小数位的展示格式
fn format_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn id(&self) -> ToolId {
        ToolId::Calculator
    }

    fn description(&self) -> &str {
        "Evaluate a mathematical expression (sqrt, sin, cos, log, pow, pi, e...). The query must be the expression itself."
    }

    async fn search(&self, query: &str) -> Result<Vec<ToolRecord>, String> {
        match evaluate(query.trim()) {
            Ok(value) => Ok(vec![ToolRecord {
                title: "Calculation".to_string(),
                url: None,
                snippet: format!("{} = {}", query.trim(), format_value(value)),
            }]),
            Err(reason) => {
                // 自然语言查询不构成表达式：无事可做，返回零条记录
                tracing::debug!(reason = %reason, "calculator skipped query");
                Ok(vec![])
            }
        }
    }
}
