//! 签名命中与优先级裁决（内部使用）
use std::cmp::Ordering;

use crate::catalog::Catalog;

/// 单次签名命中的内部表示
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SignatureHit {
    /// 格式在目录中的下标（即声明顺序）
    pub(crate) format_idx: usize,
    pub(crate) signature_idx: usize,
    /// 所有序列命中字节跨度之和
    pub(crate) span: u64,
}

/// 稳定全序：跨度降序 → 目录顺序升序 → 签名顺序升序
fn by_specificity(a: &SignatureHit, b: &SignatureHit) -> Ordering {
    match b.span.cmp(&a.span) {
        Ordering::Equal => match a.format_idx.cmp(&b.format_idx) {
            Ordering::Equal => a.signature_idx.cmp(&b.signature_idx),
            o => o,
        },
        o => o,
    }
}

/// 每个格式只保留最具体的一条签名命中
fn best_per_format(mut hits: Vec<SignatureHit>) -> Vec<SignatureHit> {
    hits.sort_by(|a, b| a.format_idx.cmp(&b.format_idx).then_with(|| by_specificity(a, b)));
    hits.dedup_by_key(|h| h.format_idx);
    hits
}

/// 裁决多个命中，返回按优先级排序的结果（首项为权威结果）：
/// 1. 被其他命中格式声明取代（supersedes）的格式排到后面；若全部互相取代则忽略此规则
/// 2. 命中跨度更长者优先
/// 3. 目录声明顺序靠前者优先
pub(crate) fn resolve_priority(hits: Vec<SignatureHit>, catalog: &Catalog) -> Vec<SignatureHit> {
    let hits = best_per_format(hits);
    let formats = catalog.formats();
    let superseded = |h: &SignatureHit| {
        let puid = &formats[h.format_idx].puid;
        hits.iter()
            .any(|g| g.format_idx != h.format_idx && formats[g.format_idx].supersedes(puid))
    };

    let (mut winners, mut losers): (Vec<SignatureHit>, Vec<SignatureHit>) =
        hits.iter().cloned().partition(|h| !superseded(h));
    if winners.is_empty() {
        winners = losers;
        losers = Vec::new();
    }
    winners.sort_by(by_specificity);
    losers.sort_by(by_specificity);
    winners.extend(losers);
    winners
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(b_supersedes_a: bool) -> Catalog {
        let sup = if b_supersedes_a { r#"supersedes = ["fmt/1"]"# } else { "" };
        Catalog::from_toml_str(&format!(
            r#"
            [[format]]
            puid = "fmt/1"
            name = "A"
            [[format]]
            puid = "fmt/2"
            name = "B"
            {sup}
            [[format]]
            puid = "fmt/3"
            name = "C"
            "#
        ))
        .unwrap()
    }

    fn hit(format_idx: usize, signature_idx: usize, span: u64) -> SignatureHit {
        SignatureHit { format_idx, signature_idx, span }
    }

    #[test]
    fn longer_span_wins_then_catalog_order() {
        let c = catalog(false);
        let out = resolve_priority(vec![hit(2, 0, 4), hit(0, 0, 4), hit(1, 0, 9)], &c);
        let order: Vec<usize> = out.iter().map(|h| h.format_idx).collect();
        assert_eq!(order, [1, 0, 2]);
    }

    #[test]
    fn supersession_beats_span() {
        let c = catalog(true);
        let out = resolve_priority(vec![hit(0, 0, 100), hit(1, 0, 2)], &c);
        assert_eq!(out[0].format_idx, 1);
        assert_eq!(out[1].format_idx, 0);
    }

    #[test]
    fn keeps_best_signature_per_format() {
        let c = catalog(false);
        let out = resolve_priority(vec![hit(0, 0, 3), hit(0, 1, 8), hit(0, 2, 8)], &c);
        assert_eq!(out, vec![hit(0, 1, 8)]);
    }
}
