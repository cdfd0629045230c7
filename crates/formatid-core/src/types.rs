//! 公共类型（对外暴露）
use serde::Serialize;

use crate::error::TargetError;

/// 命中方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Signature,
    Container,
    Extension,
}

/// 一个命中的格式
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatMatch {
    pub puid: String,
    pub format_name: String,
    pub version: Option<String>,
    pub signature_name: Option<String>,
    pub mime_type: Option<String>,
    pub match_type: MatchType,
}

/// 单个目标的识别结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// `format` 为权威结果；`alternatives` 为其余命中格式（按优先级）
    Matched { format: FormatMatch, alternatives: Vec<FormatMatch> },
    Unmatched,
    Error(TargetError),
}

/// 识别结果：创建后不再修改，所有权交给调用方
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentificationResult {
    /// 路径，或容器条目限定名（`a.zip::dir/b.txt`）
    pub target: String,
    pub outcome: Outcome,
}

impl IdentificationResult {
    pub fn matched(target: impl Into<String>, format: FormatMatch, alternatives: Vec<FormatMatch>) -> Self {
        Self { target: target.into(), outcome: Outcome::Matched { format, alternatives } }
    }

    pub fn unmatched(target: impl Into<String>) -> Self {
        Self { target: target.into(), outcome: Outcome::Unmatched }
    }

    pub fn error(target: impl Into<String>, error: TargetError) -> Self {
        Self { target: target.into(), outcome: Outcome::Error(error) }
    }

    pub fn format(&self) -> Option<&FormatMatch> {
        match &self.outcome {
            Outcome::Matched { format, .. } => Some(format),
            _ => None,
        }
    }

    pub fn puid(&self) -> Option<&str> {
        self.format().map(|f| f.puid.as_str())
    }

    pub fn is_matched(&self) -> bool {
        matches!(self.outcome, Outcome::Matched { .. })
    }

    pub fn is_unmatched(&self) -> bool {
        matches!(self.outcome, Outcome::Unmatched)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }
}

/// JSON 输出项（每行一个对象）
#[derive(Debug, Clone, Serialize)]
pub struct OutputItem<'a> {
    pub result: &'static str,
    pub filename: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub puid: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatname: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signaturename: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matchtype: Option<MatchType>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a TargetError>,
}

impl<'a> From<&'a IdentificationResult> for OutputItem<'a> {
    fn from(r: &'a IdentificationResult) -> Self {
        let mut item = OutputItem {
            result: "KO",
            filename: &r.target,
            puid: None,
            formatname: None,
            version: None,
            signaturename: None,
            mimetype: None,
            matchtype: None,
            alternatives: Vec::new(),
            error: None,
        };
        match &r.outcome {
            Outcome::Matched { format, alternatives } => {
                item.result = "OK";
                item.puid = Some(&format.puid);
                item.formatname = Some(&format.format_name);
                item.version = format.version.as_deref();
                item.signaturename = format.signature_name.as_deref();
                item.mimetype = format.mime_type.as_deref();
                item.matchtype = Some(format.match_type);
                item.alternatives = alternatives.iter().map(|a| a.puid.as_str()).collect();
            }
            Outcome::Unmatched => {}
            Outcome::Error(e) => {
                item.result = "ERR";
                item.error = Some(e);
            }
        }
        item
    }
}
