//! 字节序列模式：解析与匹配
//!
//! 模式语法（十六进制，空白忽略）：
//! - `255044462D`：字面量字节
//! - `??`：任意单字节
//! - `[30:39]` / `[!0A]` / `[!30:39]`：字节范围 / 取反
//! - `(0D0A|0A)`：备选字面量（按声明顺序尝试）
//! - `{4}` / `{0-16}` / `{2-*}`：定长 / 有界 / 无界间隔
//! - `'%PDF'`：ASCII 文本字面量
//!
//! 所有位置均为绝对字节偏移（从 0 开始）。
use aho_corasick::{AhoCorasick, Input};
use serde::Deserialize;
use thiserror::Error;

use crate::cancel::Deadline;
use crate::error::{IdentifyError, Result as IdResult};
use crate::window::Windows;

/// 每回溯这么多步检查一次截止时间
const STEPS_PER_CHECK: u32 = 4096;

/// 模式解析错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("empty pattern")]
    Empty,
    #[error("unexpected character {found:?} at {pos}")]
    Unexpected { found: char, pos: usize },
    #[error("unterminated {what} starting at {pos}")]
    Unterminated { what: &'static str, pos: usize },
    #[error("invalid hex byte at {pos}")]
    BadHex { pos: usize },
    #[error("invalid gap {text:?}")]
    BadGap { text: String },
    #[error("max_offset {max} is smaller than offset {min}")]
    OffsetRange { min: usize, max: usize },
}

/// 模式中的一个匹配单元
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubPattern {
    Literal(Vec<u8>),
    Any,
    Range { lo: u8, hi: u8, negated: bool },
    Alternation(Vec<Vec<u8>>),
    Gap { min: usize, max: Option<usize> },
}

impl SubPattern {
    fn min_len(&self) -> usize {
        match self {
            SubPattern::Literal(b) => b.len(),
            SubPattern::Any | SubPattern::Range { .. } => 1,
            SubPattern::Alternation(alts) => alts.iter().map(Vec::len).min().unwrap_or(0),
            SubPattern::Gap { min, .. } => *min,
        }
    }

    fn max_len(&self) -> Option<usize> {
        match self {
            SubPattern::Literal(b) => Some(b.len()),
            SubPattern::Any | SubPattern::Range { .. } => Some(1),
            SubPattern::Alternation(alts) => alts.iter().map(Vec::len).max(),
            SubPattern::Gap { max, .. } => *max,
        }
    }
}

/// 序列锚点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    /// 从文件开头计算
    #[serde(alias = "BOFoffset")]
    Bof,
    /// 从文件结尾计算（偏移为序列末尾到文件末尾的距离）
    #[serde(alias = "EOFoffset")]
    Eof,
    /// 浮动：在前一序列结束之后任意位置
    #[serde(alias = "var", alias = "Variable")]
    Variable,
}

/// 一条带锚点的字节序列
#[derive(Debug, Clone)]
pub struct ByteSequence {
    pub anchor: Anchor,
    pub offset: usize,
    pub max_offset: Option<usize>,
    units: Vec<SubPattern>,
    min_len: usize,
    max_len: Option<usize>,
    /// 浮动序列的首字面量查找器（跳跃式扫描）
    leading: Option<AhoCorasick>,
}

/// 序列命中的绝对区间 [start, end)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceMatch {
    pub start: u64,
    pub end: u64,
}

impl ByteSequence {
    pub fn new(anchor: Anchor, offset: usize, max_offset: Option<usize>, pattern: &str) -> Result<Self, PatternError> {
        if let Some(max) = max_offset {
            if max < offset {
                return Err(PatternError::OffsetRange { min: offset, max });
            }
        }
        let units = parse_pattern(pattern)?;
        let min_len = units.iter().map(SubPattern::min_len).sum();
        let max_len = units.iter().try_fold(0usize, |acc, u| u.max_len().map(|m| acc + m));
        let leading = match (anchor, units.first()) {
            (Anchor::Variable, Some(SubPattern::Literal(lit))) => AhoCorasick::new([lit.as_slice()]).ok(),
            _ => None,
        };
        Ok(Self { anchor, offset, max_offset, units, min_len, max_len, leading })
    }

    pub fn units(&self) -> &[SubPattern] {
        &self.units
    }

    /// 序列中最长的字面量（≥2 字节），供预筛使用
    pub(crate) fn anchor_literal(&self) -> Option<&[u8]> {
        self.units
            .iter()
            .filter_map(|u| match u {
                SubPattern::Literal(b) if b.len() >= 2 => Some(b.as_slice()),
                _ => None,
            })
            .max_by_key(|b| b.len())
    }

    /// 在窗口中查找本序列；`from` 为前一序列的结束位置（首个序列为 0）
    pub fn find(&self, w: &Windows, from: u64) -> Option<SequenceMatch> {
        self.find_in(w, from, &mut Budget::unbounded())
    }

    /// 同 `find`，回溯过程中按截止时间中止
    pub(crate) fn find_checked(&self, w: &Windows, from: u64, deadline: &Deadline) -> IdResult<Option<SequenceMatch>> {
        let mut budget = Budget::new(deadline);
        let found = self.find_in(w, from, &mut budget);
        budget.into_result().map(|()| found)
    }

    fn find_in(&self, w: &Windows, from: u64, budget: &mut Budget) -> Option<SequenceMatch> {
        match self.anchor {
            Anchor::Bof => self.find_bof(w, from, budget),
            Anchor::Eof => self.find_eof(w, from, budget),
            Anchor::Variable => self.find_variable(w, from, budget),
        }
    }

    fn find_bof(&self, w: &Windows, from: u64, budget: &mut Budget) -> Option<SequenceMatch> {
        let hay = w.prefix();
        let lo = (self.offset as u64).max(from);
        let hi = self.max_offset.unwrap_or(self.offset) as u64;
        let mut start = lo;
        while start <= hi {
            let s = start as usize;
            // 所需偏移超出窗口：不匹配（不是错误）
            if s + self.min_len > hay.len() {
                return None;
            }
            if let Some(end) = match_units(&self.units, hay, s, &mut |_| true, budget) {
                return Some(SequenceMatch { start, end: end as u64 });
            }
            if budget.tripped() {
                return None;
            }
            start += 1;
        }
        None
    }

    fn find_eof(&self, w: &Windows, from: u64, budget: &mut Budget) -> Option<SequenceMatch> {
        if !w.is_complete() {
            return None;
        }
        let len = w.len();
        let hay = w.suffix();
        let origin = w.suffix_origin();
        let max_offset = self.max_offset.unwrap_or(self.offset);
        for o in self.offset..=max_offset {
            let Some(end_abs) = len.checked_sub(o as u64) else { break };
            if end_abs < origin {
                break;
            }
            let end = (end_abs - origin) as usize;
            let Some(s_hi) = end.checked_sub(self.min_len) else { break };
            let s_lo = match self.max_len {
                Some(m) => end.saturating_sub(m),
                None => 0,
            };
            // 从最短匹配开始尝试
            for s in (s_lo..=s_hi).rev() {
                if origin + (s as u64) < from || budget.tripped() {
                    break;
                }
                if match_units(&self.units, hay, s, &mut |e| e == end, budget).is_some() {
                    return Some(SequenceMatch { start: origin + s as u64, end: end_abs });
                }
            }
        }
        None
    }

    fn find_variable(&self, w: &Windows, from: u64, budget: &mut Budget) -> Option<SequenceMatch> {
        let prefix_end = w.prefix().len() as u64;
        if from < prefix_end || w.whole_in_prefix() {
            if let Some(m) = self.scan_window(w.prefix(), 0, from, budget) {
                return Some(m);
            }
            if w.whole_in_prefix() || budget.tripped() {
                return None;
            }
        }
        if !w.is_complete() {
            return None;
        }
        // 后缀与前缀可能重叠；重叠区重复扫描一次无妨
        self.scan_window(w.suffix(), w.suffix_origin(), from, budget)
    }

    fn scan_window(&self, hay: &[u8], origin: u64, from: u64, budget: &mut Budget) -> Option<SequenceMatch> {
        let lo_abs = from + self.offset as u64;
        if lo_abs < origin {
            // 浮动序列只能在前一序列之后；窗口起点之前的部分不在缓冲内
            return self.scan_range(hay, origin, 0, self.hi_rel(hay, origin, from)?, budget);
        }
        let lo = (lo_abs - origin) as usize;
        if lo > hay.len() {
            return None;
        }
        let hi = self.hi_rel(hay, origin, from)?;
        self.scan_range(hay, origin, lo, hi, budget)
    }

    /// 允许的最大起点（相对窗口）
    fn hi_rel(&self, hay: &[u8], origin: u64, from: u64) -> Option<usize> {
        let last = hay.len().checked_sub(self.min_len)?;
        match self.max_offset {
            Some(m) => {
                let hi_abs = from + m as u64;
                if hi_abs < origin {
                    return None;
                }
                Some(((hi_abs - origin) as usize).min(last))
            }
            None => Some(last),
        }
    }

    fn scan_range(&self, hay: &[u8], origin: u64, lo: usize, hi: usize, budget: &mut Budget) -> Option<SequenceMatch> {
        if lo > hi {
            return None;
        }
        match &self.leading {
            Some(finder) => {
                let mut at = lo;
                while at <= hi {
                    let m = finder.find(Input::new(hay).span(at..hay.len()))?;
                    if m.start() > hi {
                        return None;
                    }
                    if let Some(end) = match_units(&self.units, hay, m.start(), &mut |_| true, budget) {
                        return Some(SequenceMatch { start: origin + m.start() as u64, end: origin + end as u64 });
                    }
                    if budget.tripped() {
                        return None;
                    }
                    at = m.start() + 1;
                }
                None
            }
            None => {
                for s in lo..=hi {
                    if let Some(end) = match_units(&self.units, hay, s, &mut |_| true, budget) {
                        return Some(SequenceMatch { start: origin + s as u64, end: origin + end as u64 });
                    }
                    if budget.tripped() {
                        return None;
                    }
                }
                None
            }
        }
    }
}

/// 命名签名：有序序列全部命中才算匹配
#[derive(Debug, Clone)]
pub struct ByteSignature {
    pub name: Option<String>,
    pub sequences: Vec<ByteSequence>,
}

impl ByteSignature {
    /// 依序匹配所有序列，后一序列必须从前一序列结束处之后开始；
    /// 返回命中字节跨度之和。零序列的签名永不匹配。
    pub fn find(&self, w: &Windows) -> Option<u64> {
        self.find_in(w, &mut Budget::unbounded())
    }

    /// 同 `find`；截止时间到期（超时或取消）时返回错误
    pub(crate) fn find_checked(&self, w: &Windows, deadline: &Deadline) -> IdResult<Option<u64>> {
        let mut budget = Budget::new(deadline);
        let found = self.find_in(w, &mut budget);
        budget.into_result().map(|()| found)
    }

    fn find_in(&self, w: &Windows, budget: &mut Budget) -> Option<u64> {
        if self.sequences.is_empty() {
            return None;
        }
        let mut from = 0u64;
        let mut span = 0u64;
        for seq in &self.sequences {
            let m = seq.find_in(w, from, budget)?;
            span += m.end - m.start;
            from = m.end;
        }
        Some(span)
    }
}

/// 回溯步数计数器，定期检查截止时间；到期后所有匹配立即失败
struct Budget<'a> {
    deadline: Option<&'a Deadline>,
    steps: u32,
    expired: Option<IdentifyError>,
}

impl<'a> Budget<'a> {
    fn new(deadline: &'a Deadline) -> Self {
        Self { deadline: Some(deadline), steps: 0, expired: None }
    }

    fn unbounded() -> Self {
        Self { deadline: None, steps: 0, expired: None }
    }

    fn tripped(&self) -> bool {
        self.expired.is_some()
    }

    /// 记一步；返回 false 表示应中止
    fn tick(&mut self) -> bool {
        if self.expired.is_some() {
            return false;
        }
        self.steps = self.steps.wrapping_add(1);
        if self.steps % STEPS_PER_CHECK == 0 {
            if let Some(Err(e)) = self.deadline.map(Deadline::check) {
                self.expired = Some(e);
                return false;
            }
        }
        true
    }

    fn into_result(self) -> IdResult<()> {
        match self.expired {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// 回溯匹配：从 `pos` 开始依次匹配各单元，`accept` 决定结束位置是否可接受
fn match_units(
    units: &[SubPattern],
    hay: &[u8],
    pos: usize,
    accept: &mut dyn FnMut(usize) -> bool,
    budget: &mut Budget,
) -> Option<usize> {
    if !budget.tick() {
        return None;
    }
    let Some((unit, rest)) = units.split_first() else {
        return if accept(pos) { Some(pos) } else { None };
    };
    match unit {
        SubPattern::Literal(lit) => {
            if hay.get(pos..)?.starts_with(lit) {
                match_units(rest, hay, pos + lit.len(), accept, budget)
            } else {
                None
            }
        }
        SubPattern::Any => {
            if pos < hay.len() {
                match_units(rest, hay, pos + 1, accept, budget)
            } else {
                None
            }
        }
        SubPattern::Range { lo, hi, negated } => {
            let b = *hay.get(pos)?;
            if ((*lo..=*hi).contains(&b)) != *negated {
                match_units(rest, hay, pos + 1, accept, budget)
            } else {
                None
            }
        }
        SubPattern::Alternation(alts) => {
            let tail = hay.get(pos..)?;
            alts.iter()
                .filter(|alt| tail.starts_with(alt))
                .find_map(|alt| match_units(rest, hay, pos + alt.len(), accept, budget))
        }
        SubPattern::Gap { min, max } => {
            let room = hay.len().checked_sub(pos)?;
            if *min > room {
                return None;
            }
            let upper = max.map_or(room, |m| m.min(room));
            for skip in *min..=upper {
                if let Some(end) = match_units(rest, hay, pos + skip, accept, budget) {
                    return Some(end);
                }
                if budget.tripped() {
                    return None;
                }
            }
            None
        }
    }
}

/// 解析模式文本为匹配单元（相邻字面量合并）
pub fn parse_pattern(text: &str) -> Result<Vec<SubPattern>, PatternError> {
    let chars: Vec<char> = text.chars().collect();
    let mut units: Vec<SubPattern> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '?' => {
                if chars.get(i + 1) != Some(&'?') {
                    return Err(PatternError::Unexpected { found: c, pos: i });
                }
                units.push(SubPattern::Any);
                i += 2;
            }
            '\'' => {
                let (text, next) = text_literal(&chars, i)?;
                push_literal(&mut units, &text);
                i = next;
            }
            '[' => {
                let close = find_from(&chars, i + 1, ']').ok_or(PatternError::Unterminated { what: "range", pos: i })?;
                units.push(parse_range(&chars[i + 1..close], i + 1)?);
                i = close + 1;
            }
            '(' => {
                let (alts, next) = alternation(&chars, i)?;
                units.push(SubPattern::Alternation(alts));
                i = next;
            }
            '{' => {
                let close = find_from(&chars, i + 1, '}').ok_or(PatternError::Unterminated { what: "gap", pos: i })?;
                let body: String = chars[i + 1..close].iter().filter(|ch| !ch.is_whitespace()).collect();
                units.push(parse_gap(&body)?);
                i = close + 1;
            }
            _ if c.is_ascii_hexdigit() => {
                let hi = c;
                let lo = *chars.get(i + 1).ok_or(PatternError::BadHex { pos: i })?;
                let byte = hex_pair(hi, lo).ok_or(PatternError::BadHex { pos: i })?;
                push_literal(&mut units, &[byte]);
                i += 2;
            }
            _ => return Err(PatternError::Unexpected { found: c, pos: i }),
        }
    }

    if units.is_empty() {
        return Err(PatternError::Empty);
    }
    Ok(units)
}

/// `'text'`：返回文本字节与闭合引号之后的位置；空文本视为空模式
fn text_literal(chars: &[char], open: usize) -> Result<(Vec<u8>, usize), PatternError> {
    let close = find_from(chars, open + 1, '\'').ok_or(PatternError::Unterminated { what: "text literal", pos: open })?;
    if close == open + 1 {
        return Err(PatternError::Empty);
    }
    let text: String = chars[open + 1..close].iter().collect();
    Ok((text.into_bytes(), close + 1))
}

/// `(a|b|...)`：每个分支由十六进制字节与 `'text'` 组成，不得为空
fn alternation(chars: &[char], open: usize) -> Result<(Vec<Vec<u8>>, usize), PatternError> {
    let mut alts = Vec::new();
    let mut branch = Vec::new();
    let mut i = open + 1;
    loop {
        let Some(&c) = chars.get(i) else {
            return Err(PatternError::Unterminated { what: "alternation", pos: open });
        };
        match c {
            _ if c.is_whitespace() => i += 1,
            '\'' => {
                let (text, next) = text_literal(chars, i)?;
                branch.extend_from_slice(&text);
                i = next;
            }
            '|' | ')' => {
                if branch.is_empty() {
                    return Err(PatternError::Unexpected { found: c, pos: i });
                }
                alts.push(std::mem::take(&mut branch));
                i += 1;
                if c == ')' {
                    return Ok((alts, i));
                }
            }
            _ if c.is_ascii_hexdigit() => {
                let lo = *chars.get(i + 1).ok_or(PatternError::BadHex { pos: i })?;
                branch.push(hex_pair(c, lo).ok_or(PatternError::BadHex { pos: i })?);
                i += 2;
            }
            _ => return Err(PatternError::Unexpected { found: c, pos: i }),
        }
    }
}

fn push_literal(units: &mut Vec<SubPattern>, bytes: &[u8]) {
    if let Some(SubPattern::Literal(prev)) = units.last_mut() {
        prev.extend_from_slice(bytes);
    } else {
        units.push(SubPattern::Literal(bytes.to_vec()));
    }
}

fn find_from(chars: &[char], from: usize, target: char) -> Option<usize> {
    chars[from..].iter().position(|&c| c == target).map(|p| p + from)
}

fn hex_pair(hi: char, lo: char) -> Option<u8> {
    let h = hi.to_digit(16)?;
    let l = lo.to_digit(16)?;
    Some((h * 16 + l) as u8)
}

fn parse_hex_run(chars: &[char], pos: usize) -> Result<Vec<u8>, PatternError> {
    let digits: Vec<char> = chars.iter().copied().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(PatternError::BadHex { pos });
    }
    digits
        .chunks(2)
        .map(|pair| hex_pair(pair[0], pair[1]).ok_or(PatternError::BadHex { pos }))
        .collect()
}

fn parse_range(body: &[char], pos: usize) -> Result<SubPattern, PatternError> {
    let (negated, body) = match body.first() {
        Some('!') => (true, &body[1..]),
        _ => (false, body),
    };
    let mut parts = body.split(|&c| c == ':');
    let lo = parse_hex_run(parts.next().unwrap_or(&[]), pos)?;
    let hi = match parts.next() {
        Some(p) => parse_hex_run(p, pos)?,
        None => lo.clone(),
    };
    if parts.next().is_some() || lo.len() != 1 || hi.len() != 1 {
        return Err(PatternError::BadHex { pos });
    }
    let (lo, hi) = if lo[0] <= hi[0] { (lo[0], hi[0]) } else { (hi[0], lo[0]) };
    Ok(SubPattern::Range { lo, hi, negated })
}

fn parse_gap(body: &str) -> Result<SubPattern, PatternError> {
    let bad = || PatternError::BadGap { text: body.to_string() };
    match body.split_once('-') {
        None => {
            let n: usize = body.parse().map_err(|_| bad())?;
            Ok(SubPattern::Gap { min: n, max: Some(n) })
        }
        Some((min, max)) => {
            let min: usize = min.parse().map_err(|_| bad())?;
            let max = if max == "*" { None } else { Some(max.parse::<usize>().map_err(|_| bad())?) };
            if matches!(max, Some(m) if m < min) {
                return Err(bad());
            }
            Ok(SubPattern::Gap { min, max })
        }
    }
}
