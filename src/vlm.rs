use std::io::Cursor;
use std::sync::OnceLock;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, RgbImage};
use ndarray::Array2;
use regex::Regex;
use reqwest::blocking::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::{Result, SafetyError};
use crate::grid::GRID_SIZE;
use crate::sketch::lexer::{tokenize, Token};
use crate::traits::VisionLanguageClient;

/// Prompt sent with every image, after the method's preprompt.
pub const GRID_PROMPT: &str = "You will see the new image now.";

pub const DEFAULT_VLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_VLM_MODEL: &str = "gpt-4o";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_TOKENS: u32 = 4096;
const MAX_ERROR_BODY: usize = 500;

/// Chat-completions client for OpenAI-compatible vision endpoints.
pub struct OpenAiVisionClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiVisionClient {
    pub fn new(api_key: String, base_url: &str, model: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(SafetyError::configuration("vision-language API key is empty"));
        }
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    fn request_body(&self, preprompt: &str, prompt: &str, image_url: &str) -> Value {
        json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [
                {"role": "system", "content": preprompt},
                {
                    "role": "user",
                    "content": [
                        {"type": "text", "text": prompt},
                        {"type": "image_url", "image_url": {"url": image_url}}
                    ]
                }
            ]
        })
    }
}

impl VisionLanguageClient for OpenAiVisionClient {
    fn respond(&self, preprompt: &str, prompt: &str, image_url: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(%url, model = %self.model, "sending vision-language request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(preprompt, prompt, image_url))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let text: String = response
                .text()
                .unwrap_or_default()
                .chars()
                .take(MAX_ERROR_BODY)
                .collect();
            return Err(SafetyError::Service {
                service: "vision-language".to_string(),
                message: format!("HTTP {status}: {text}"),
            });
        }

        let body: Value = response.json()?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SafetyError::Service {
                service: "vision-language".to_string(),
                message: "response has no message content".to_string(),
            })
    }
}

/// Encodes `image` as a `data:` URL holding a PNG.
pub fn image_data_url(image: &RgbImage) -> Result<String> {
    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
}

fn fence_pattern() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_+-]*(.*?)```").expect("fence pattern is valid")
    })
}

/// Extracts the `GRID_SIZE x GRID_SIZE` grid from a model reply.
///
/// The first fenced code block must hold nothing but a rectangular nested
/// list or tuple literal of numbers with exactly `GRID_SIZE * GRID_SIZE`
/// entries. Python literal syntax is accepted (trailing commas, `#` comments,
/// `True`/`False`); the block is parsed as data, never run.
pub fn parse_grid_response(text: &str) -> Result<Array2<u8>> {
    let body = fence_pattern()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .ok_or_else(|| SafetyError::GridParse {
            reason: "no fenced code block".to_string(),
        })?;

    let literal = LiteralParser::parse(body)?;

    let mut flattener = Flattener::default();
    flattener.visit(&literal, 0)?;

    let cells = flattener.cells;
    if cells.len() != GRID_SIZE * GRID_SIZE {
        return Err(SafetyError::GridParse {
            reason: format!(
                "expected {} cells, found {}",
                GRID_SIZE * GRID_SIZE,
                cells.len()
            ),
        });
    }
    Ok(Array2::from_shape_vec((GRID_SIZE, GRID_SIZE), cells)?)
}

/// [`parse_grid_response`], falling back to an all-zero grid.
pub fn parse_grid_or_default(text: &str) -> (Array2<u8>, Option<SafetyError>) {
    match parse_grid_response(text) {
        Ok(grid) => (grid, None),
        Err(e) => (Array2::zeros((GRID_SIZE, GRID_SIZE)), Some(e)),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Num(f64),
    Seq(Vec<Literal>),
}

/// Parser for nested list/tuple literals of numbers.
struct LiteralParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl LiteralParser {
    fn parse(body: &str) -> Result<Literal> {
        let tokens = tokenize(body).map_err(|e| SafetyError::GridParse {
            reason: format!("code block is not an array literal: {e}"),
        })?;
        let mut parser = Self { tokens, pos: 0 };
        let literal = parser.value()?;
        if let Some(token) = parser.tokens.get(parser.pos) {
            return Err(literal_error(format!("unexpected trailing token {token:?}")));
        }
        Ok(literal)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn value(&mut self) -> Result<Literal> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Literal::Num(n)),
            Some(Token::Minus) => match self.next() {
                Some(Token::Number(n)) => Ok(Literal::Num(-n)),
                other => Err(literal_error(format!(
                    "expected a number after '-', found {other:?}"
                ))),
            },
            Some(Token::Ident(name)) if name == "True" => Ok(Literal::Num(1.0)),
            Some(Token::Ident(name)) if name == "False" => Ok(Literal::Num(0.0)),
            Some(Token::LBracket) => Ok(Literal::Seq(self.items(&Token::RBracket)?.0)),
            Some(Token::LParen) => {
                let (mut items, saw_comma) = self.items(&Token::RParen)?;
                // `(x)` is just `x`, `(x,)` is a one-element tuple
                if items.len() == 1 && !saw_comma {
                    Ok(items.remove(0))
                } else {
                    Ok(Literal::Seq(items))
                }
            }
            other => Err(literal_error(format!("unexpected token {other:?}"))),
        }
    }

    /// Comma-separated values up to `close`, trailing comma allowed.
    fn items(&mut self, close: &Token) -> Result<(Vec<Literal>, bool)> {
        let mut items = Vec::new();
        let mut saw_comma = false;
        loop {
            if self.tokens.get(self.pos) == Some(close) {
                self.pos += 1;
                return Ok((items, saw_comma));
            }
            items.push(self.value()?);
            match self.next() {
                Some(Token::Comma) => saw_comma = true,
                Some(ref token) if token == close => return Ok((items, saw_comma)),
                other => {
                    return Err(literal_error(format!(
                        "expected ',' or {close:?}, found {other:?}"
                    )))
                }
            }
        }
    }
}

fn literal_error(reason: String) -> SafetyError {
    SafetyError::GridParse {
        reason: format!("code block is not an array literal: {reason}"),
    }
}

/// Flattens a nested literal, rejecting ragged nesting.
#[derive(Default)]
struct Flattener {
    shape: Vec<usize>,
    leaf_depth: Option<usize>,
    cells: Vec<u8>,
}

impl Flattener {
    fn visit(&mut self, literal: &Literal, depth: usize) -> Result<()> {
        match literal {
            Literal::Seq(items) => {
                if self.leaf_depth.is_some_and(|d| d <= depth) {
                    return Err(ragged());
                }
                match self.shape.get(depth) {
                    Some(&len) if len != items.len() => return Err(ragged()),
                    Some(_) => {}
                    None => self.shape.push(items.len()),
                }
                for item in items {
                    self.visit(item, depth + 1)?;
                }
                Ok(())
            }
            Literal::Num(value) => {
                if self.shape.len() > depth {
                    return Err(ragged());
                }
                match self.leaf_depth {
                    Some(d) if d != depth => return Err(ragged()),
                    Some(_) => {}
                    None => self.leaf_depth = Some(depth),
                }
                self.cells.push(cell_value(*value)?);
                Ok(())
            }
        }
    }
}

fn ragged() -> SafetyError {
    SafetyError::GridParse {
        reason: "array literal is not rectangular".to_string(),
    }
}

fn cell_value(value: f64) -> Result<u8> {
    if !(0.0..256.0).contains(&value) {
        return Err(SafetyError::GridParse {
            reason: format!("cell value {value} does not fit in a byte"),
        });
    }
    Ok(value as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_literal(fill: impl Fn(usize, usize) -> u8) -> String {
        let rows: Vec<String> = (0..GRID_SIZE)
            .map(|i| {
                let cells: Vec<String> = (0..GRID_SIZE).map(|j| fill(i, j).to_string()).collect();
                format!("[{}]", cells.join(", "))
            })
            .collect();
        format!("[{}]", rows.join(",\n "))
    }

    #[test]
    fn test_well_formed_response() -> Result<()> {
        let reply = format!(
            "Here is the grid:\n```python\n{}\n```\nCells marked 1 are safe.",
            grid_literal(|i, j| u8::from(i >= 10 && j < 5))
        );
        let grid = parse_grid_response(&reply)?;
        assert_eq!(grid.dim(), (GRID_SIZE, GRID_SIZE));
        assert_eq!(grid[[10, 0]], 1);
        assert_eq!(grid[[9, 0]], 0);
        assert_eq!(grid[[19, 5]], 0);
        assert_eq!(grid.iter().filter(|&&v| v == 1).count(), 50);
        Ok(())
    }

    #[test]
    fn test_untagged_and_flat_blocks() -> Result<()> {
        let flat: Vec<String> = (0..GRID_SIZE * GRID_SIZE).map(|k| (k % 2).to_string()).collect();
        let reply = format!("```\n[{}]\n```", flat.join(","));
        let grid = parse_grid_response(&reply)?;
        assert_eq!(grid[[0, 1]], 1);
        assert_eq!(grid[[1, 0]], 0);
        Ok(())
    }

    #[test]
    fn test_trailing_commas_are_accepted() -> Result<()> {
        let rows: Vec<String> = (0..GRID_SIZE)
            .map(|i| {
                let cells: Vec<String> = (0..GRID_SIZE).map(|j| u8::from(i == j).to_string()).collect();
                format!("[{},]", cells.join(", "))
            })
            .collect();
        let reply = format!("```python\n[\n {},\n]\n```", rows.join(",\n "));
        let grid = parse_grid_response(&reply)?;
        assert_eq!(grid[[3, 3]], 1);
        assert_eq!(grid[[3, 4]], 0);
        assert_eq!(grid.iter().filter(|&&v| v == 1).count(), GRID_SIZE);
        Ok(())
    }

    #[test]
    fn test_tuple_rows_comments_and_booleans() -> Result<()> {
        let rows: Vec<String> = (0..GRID_SIZE)
            .map(|i| {
                let cells: Vec<&str> = (0..GRID_SIZE)
                    .map(|j| if i == 0 && j == 0 { "True" } else if j == 1 { "1" } else { "False" })
                    .collect();
                format!("({})  # row {i}", cells.join(", "))
            })
            .collect();
        let reply = format!("```python\n[\n {}\n]\n```", rows.join(",\n "));
        let grid = parse_grid_response(&reply)?;
        assert_eq!(grid[[0, 0]], 1);
        assert_eq!(grid[[5, 1]], 1);
        assert_eq!(grid[[5, 0]], 0);
        assert_eq!(grid.iter().filter(|&&v| v == 1).count(), GRID_SIZE + 1);
        Ok(())
    }

    #[test]
    fn test_literal_parser_grouping() -> Result<()> {
        assert_eq!(LiteralParser::parse("(3)")?, Literal::Num(3.0));
        assert_eq!(LiteralParser::parse("(3,)")?, Literal::Seq(vec![Literal::Num(3.0)]));
        assert_eq!(LiteralParser::parse("[]")?, Literal::Seq(Vec::new()));
        assert!(LiteralParser::parse("[1 2]").is_err());
        assert!(LiteralParser::parse("[1,,]").is_err());
        assert!(LiteralParser::parse("[1] [2]").is_err());
        Ok(())
    }

    #[test]
    fn test_malformed_responses_fall_back_to_zeros() {
        let short = format!("```python\n[{}]\n```", vec!["1"; 399].join(","));
        let ragged = format!(
            "```python\n[[1, 1], {}]\n```",
            vec!["1"; 398].join(",")
        );
        for reply in [
            "I cannot help with that.".to_string(),
            "```python\nimport os; os.system('rm -rf /')\n```".to_string(),
            "```python\narr = [[1]]\n```".to_string(),
            short,
            ragged,
            format!("```python\n{}\n```", grid_literal(|_, _| 1).replacen('1', "300", 1)),
            format!("```python\n{}\n```", grid_literal(|_, _| 0).replacen('0', "-1", 1)),
        ] {
            let (grid, error) = parse_grid_or_default(&reply);
            assert!(error.is_some(), "{reply:?} should not parse");
            assert_eq!(grid.dim(), (GRID_SIZE, GRID_SIZE));
            assert!(grid.iter().all(|&v| v == 0));
        }
    }

    #[test]
    fn test_image_data_url() -> Result<()> {
        let url = image_data_url(&RgbImage::new(2, 2))?;
        assert!(url.starts_with("data:image/png;base64,iVBOR"));
        Ok(())
    }

    #[test]
    fn test_request_body_layout() -> Result<()> {
        let client = OpenAiVisionClient::new("key".to_string(), "http://localhost:1/v1/", "m")?;
        let body = client.request_body("system", GRID_PROMPT, "data:x");
        assert_eq!(body["messages"][0]["content"], "system");
        assert_eq!(body["messages"][1]["content"][0]["text"], GRID_PROMPT);
        assert_eq!(body["messages"][1]["content"][1]["image_url"]["url"], "data:x");
        assert_eq!(client.base_url, "http://localhost:1/v1");
        Ok(())
    }

    #[test]
    fn test_empty_api_key_is_rejected() {
        assert!(OpenAiVisionClient::new(" ".to_string(), DEFAULT_VLM_BASE_URL, DEFAULT_VLM_MODEL).is_err());
    }
}
