//! 结果行格式（文本交换）与 JSON 行输出
//!
//! ```text
//! OK,<target>,<puid>,<formatname>,<version>,<signaturename>,<mimetype>
//! KO,<target>
//! ERR,<target>,<kind>,<message>
//! ```
//! 缺失字段写为 `None`（仅存在于此边界，内部一律为 `Option::None`）。
//! 含逗号、引号、换行的字段，以及恰好等于 `None` 的真实值，会加双引号。
use std::io::{self, Write};

use thiserror::Error;

use crate::error::ErrorKind;
use crate::types::{IdentificationResult, Outcome, OutputItem};

/// 缺失字段占位符
pub const ABSENT: &str = "None";

/// 输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
}

/// 解析后的结果行
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultLine {
    Ok {
        filename: String,
        puid: String,
        format_name: Option<String>,
        version: Option<String>,
        signature_name: Option<String>,
        mime_type: Option<String>,
    },
    Ko {
        filename: String,
    },
    Err {
        filename: String,
        kind: Option<ErrorKind>,
        message: String,
    },
}

impl ResultLine {
    pub fn filename(&self) -> &str {
        match self {
            ResultLine::Ok { filename, .. } | ResultLine::Ko { filename } | ResultLine::Err { filename, .. } => filename,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseLineError {
    #[error("empty line")]
    Empty,
    #[error("unknown result tag {0:?}")]
    UnknownTag(String),
    #[error("{tag} line needs {expected} fields, found {found}")]
    FieldCount { tag: &'static str, expected: usize, found: usize },
    #[error("unterminated quoted field")]
    Unterminated,
}

/// 渲染一条结果行（不含换行）
pub fn render_line(r: &IdentificationResult) -> String {
    match &r.outcome {
        Outcome::Matched { format, .. } => join(&[
            "OK",
            &quote(&r.target),
            &quote(&format.puid),
            &quote(&format.format_name),
            &opt(format.version.as_deref()),
            &opt(format.signature_name.as_deref()),
            &opt(format.mime_type.as_deref()),
        ]),
        Outcome::Unmatched => join(&["KO", &quote(&r.target)]),
        Outcome::Error(e) => join(&["ERR", &quote(&r.target), e.kind.as_str(), &quote(&e.message)]),
    }
}

fn join(fields: &[&str]) -> String {
    fields.join(",")
}

fn opt(v: Option<&str>) -> String {
    v.map_or_else(|| ABSENT.to_string(), quote)
}

fn quote(v: &str) -> String {
    if v == ABSENT || v.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", v.replace('"', "\"\""))
    } else {
        v.to_string()
    }
}

struct Field {
    text: String,
    quoted: bool,
}

impl Field {
    fn value(self) -> Option<String> {
        if !self.quoted && self.text == ABSENT {
            None
        } else {
            Some(self.text)
        }
    }
}

fn split_fields(line: &str) -> Result<Vec<Field>, ParseLineError> {
    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        let mut text = String::new();
        let quoted = chars.peek() == Some(&'"');
        if quoted {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') if chars.peek() == Some(&'"') => {
                        chars.next();
                        text.push('"');
                    }
                    Some('"') => break,
                    Some(c) => text.push(c),
                    None => return Err(ParseLineError::Unterminated),
                }
            }
            // 引号后到下一个逗号之间的内容忽略
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                chars.next();
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                text.push(c);
                chars.next();
            }
        }
        fields.push(Field { text, quoted });
        if chars.next().is_none() {
            break;
        }
    }
    Ok(fields)
}

/// 解析一条结果行
pub fn parse_line(line: &str) -> Result<ResultLine, ParseLineError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(ParseLineError::Empty);
    }
    let mut fields = split_fields(line)?.into_iter();
    let tag = fields.next().map(|f| f.text).unwrap_or_default();
    let rest: Vec<Field> = fields.collect();
    let need = |tag: &'static str, expected: usize| {
        if rest.len() + 1 < expected {
            Err(ParseLineError::FieldCount { tag, expected, found: rest.len() + 1 })
        } else {
            Ok(())
        }
    };

    match tag.as_str() {
        "OK" => {
            need("OK", 7)?;
            let mut it = rest.into_iter();
            let mut next = || it.next().map(Field::value).unwrap_or(None);
            Ok(ResultLine::Ok {
                filename: next().unwrap_or_default(),
                puid: next().unwrap_or_default(),
                format_name: next(),
                version: next(),
                signature_name: next(),
                mime_type: next(),
            })
        }
        "KO" => {
            need("KO", 2)?;
            Ok(ResultLine::Ko { filename: rest.into_iter().next().map(|f| f.text).unwrap_or_default() })
        }
        "ERR" => {
            need("ERR", 4)?;
            let mut it = rest.into_iter().map(|f| f.text);
            let filename = it.next().unwrap_or_default();
            let kind = it.next().and_then(|k| ErrorKind::parse(&k));
            let message = it.next().unwrap_or_default();
            Ok(ResultLine::Err { filename, kind, message })
        }
        other => Err(ParseLineError::UnknownTag(other.to_string())),
    }
}

/// 解析多行输出；空行跳过，每个 OK 行都保留
pub fn parse_lines(text: &str) -> Result<Vec<ResultLine>, ParseLineError> {
    split_records(text)?
        .into_iter()
        .filter(|l| !l.trim().is_empty())
        .map(parse_line)
        .collect()
}

/// 按记录切分：引号内的换行属于字段内容
fn split_records(text: &str) -> Result<Vec<&str>, ParseLineError> {
    let mut records = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, b) in text.bytes().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b'\n' if !in_quotes => {
                records.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if in_quotes {
        return Err(ParseLineError::Unterminated);
    }
    if start < text.len() {
        records.push(&text[start..]);
    }
    Ok(records)
}

/// 按格式写出一条结果（带换行）
pub fn write_result(out: &mut dyn Write, r: &IdentificationResult, format: OutputFormat) -> io::Result<()> {
    match format {
        OutputFormat::Csv => writeln!(out, "{}", render_line(r)),
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, &OutputItem::from(r))?;
            writeln!(out)
        }
    }
}
