//! 预筛与锚点计划（Aho-Corasick）
//!
//! 设计目标：
//! - 从每条字节序列中抽取最长字面量作为“锚点”，全部锚点构建一个全局 AC 自动机。
//! - 识别时先用 AC 扫一遍前缀/后缀窗口，记录出现过的锚点；
//!   只有所有序列锚点都出现过的签名才进入精确匹配。
//! - 没有锚点的序列（纯通配/范围）不参与过滤，其签名总是进入精确匹配。

use std::collections::HashMap;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use tracing::warn;

use crate::pattern::ByteSignature;
use crate::window::Windows;

/// 预筛计划（只读，可跨线程共享）
pub(crate) struct PrefilterPlan {
    /// 全局锚点自动机；None 表示无可用锚点（全部放行）
    ac: Option<AhoCorasick>,
    /// 候选槽位 -> 所需锚点 id 列表
    required: Vec<Vec<usize>>,
    anchor_count: usize,
}

/// 从候选签名列表构建预筛计划（槽位与输入下标一一对应）
pub(crate) fn build_prefilter_plan(signatures: &[&ByteSignature]) -> PrefilterPlan {
    let mut anchors: Vec<Vec<u8>> = Vec::new();
    let mut anchor_index: HashMap<Vec<u8>, usize> = HashMap::new();
    let mut required: Vec<Vec<usize>> = Vec::with_capacity(signatures.len());

    for sig in signatures {
        let mut ids = Vec::new();
        for seq in &sig.sequences {
            let Some(lit) = seq.anchor_literal() else { continue };
            let id = *anchor_index.entry(lit.to_vec()).or_insert_with(|| {
                anchors.push(lit.to_vec());
                anchors.len() - 1
            });
            ids.push(id);
        }
        required.push(ids);
    }

    let ac = if anchors.is_empty() {
        None
    } else {
        match AhoCorasickBuilder::new().match_kind(MatchKind::Standard).build(&anchors) {
            Ok(ac) => Some(ac),
            Err(e) => {
                warn!(error = %e, "prefilter automaton unavailable, evaluating every signature");
                None
            }
        }
    };

    PrefilterPlan { ac, required, anchor_count: anchors.len() }
}

impl PrefilterPlan {
    /// 在窗口中扫描所有锚点，返回每个锚点是否出现
    pub(crate) fn seen_anchors(&self, w: &Windows) -> Vec<bool> {
        let mut seen = vec![false; self.anchor_count];
        let Some(ac) = &self.ac else { return seen };
        let mut mark = |hay: &[u8]| {
            for m in ac.find_overlapping_iter(hay) {
                seen[m.pattern().as_usize()] = true;
            }
        };
        mark(w.prefix());
        if !w.whole_in_prefix() {
            mark(w.suffix());
        }
        seen
    }

    /// 该槽位的签名是否可能命中
    pub(crate) fn admits(&self, slot: usize, seen: &[bool]) -> bool {
        if self.ac.is_none() {
            return true;
        }
        self.required
            .get(slot)
            .map_or(true, |ids| ids.iter().all(|&id| seen[id]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{Anchor, ByteSequence};

    fn sig(patterns: &[&str]) -> ByteSignature {
        ByteSignature {
            name: None,
            sequences: patterns
                .iter()
                .map(|p| ByteSequence::new(Anchor::Variable, 0, None, p).unwrap())
                .collect(),
        }
    }

    #[test]
    fn drops_signatures_with_missing_anchor() {
        let a = sig(&["'%PDF-'"]);
        let b = sig(&["'GIF8'", "'NETSCAPE'"]);
        let c = sig(&["?? [00:10]"]);
        let plan = build_prefilter_plan(&[&a, &b, &c]);
        let w = Windows::from_bytes(b"GIF89a......%PDF-", 1024, 1024);
        let seen = plan.seen_anchors(&w);
        assert!(plan.admits(0, &seen));
        assert!(!plan.admits(1, &seen));
        assert!(plan.admits(2, &seen));
    }

    #[test]
    fn overlapping_anchors_are_all_seen() {
        let a = sig(&["'ABCD'"]);
        let b = sig(&["'BC'"]);
        let plan = build_prefilter_plan(&[&a, &b]);
        let seen = plan.seen_anchors(&Windows::from_bytes(b"xABCDx", 64, 64));
        assert!(plan.admits(0, &seen));
        assert!(plan.admits(1, &seen));
    }

    #[test]
    fn suffix_window_contributes_anchors() {
        let a = sig(&["'TRAILER'"]);
        let plan = build_prefilter_plan(&[&a]);
        let mut data = vec![0u8; 10_000];
        data.extend_from_slice(b"TRAILER");
        let seen = plan.seen_anchors(&Windows::from_bytes(&data, 512, 512));
        assert!(plan.admits(0, &seen));
    }
}
