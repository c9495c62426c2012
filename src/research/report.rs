//! 报告装配：把综合阶段的原始 payload 规整成对外保证的报告形状
//!
//! 对外不变式：sections 长度在 [5, 8]，references 按 URL 去重（保留首次出现）。
//! 超长时反复合并「内容最短的相邻一对」；不足时不做拆分，而是用本轮运行自身的数据
//! 确定性补齐（引言、各 Finding 小节、来源概览、失败说明、结论）。
//! 综合阶段整体失败时，同一套构造直接生成回退 payload，报告降级而非缺席。

use chrono::Utc;

use crate::research::state::{Finding, Report, ReportSection, Source};
use crate::research::synthesizer::ReportPayload;

pub const MIN_SECTIONS: usize = 5;
pub const MAX_SECTIONS: usize = 8;

/// 装配最终报告
pub fn assemble(query: &str, payload: ReportPayload, findings: &[Finding]) -> Report {
    let mut sections: Vec<ReportSection> = payload
        .sections
        .into_iter()
        .filter(|s| !s.content.trim().is_empty())
        .collect();

    if sections.len() < MIN_SECTIONS {
        pad_sections(&mut sections, query, findings);
    }
    while sections.len() > MAX_SECTIONS {
        merge_smallest_adjacent(&mut sections);
    }

    let title = if payload.title.trim().is_empty() {
        format!("Research Report: {}", query)
    } else {
        payload.title
    };
    let executive_summary = if payload.executive_summary.trim().is_empty() {
        format!("This report examines {} in detail.", query)
    } else {
        payload.executive_summary
    };

    Report {
        title,
        executive_summary,
        sections,
        references: dedup_references(findings),
        generated_at: Utc::now(),
    }
}

/// 综合阶段失败时的回退 payload：全部内容来自 findings，不虚构
pub fn fallback_payload(query: &str, findings: &[Finding]) -> ReportPayload {
    let mut sections = Vec::new();
    pad_sections(&mut sections, query, findings);
    let source_count: usize = findings.iter().map(|f| f.sources.len()).sum();
    ReportPayload {
        title: format!("Research Report: {}", query),
        executive_summary: format!(
            "This report examines {}. It was assembled directly from {} research findings \
             and {} sources.",
            query,
            findings.len(),
            source_count
        ),
        sections,
    }
}

/// references：跨 Finding 按 URL 去重，保留首次出现的条目
pub fn dedup_references(findings: &[Finding]) -> Vec<Source> {
    let mut seen = std::collections::HashSet::new();
    let mut references = Vec::new();
    for finding in findings {
        for source in &finding.sources {
            if seen.insert(source.url.clone()) {
                references.push(source.clone());
            }
        }
    }
    references
}

/// 合并内容长度之和最小的相邻一对（确定性收缩）
fn merge_smallest_adjacent(sections: &mut Vec<ReportSection>) {
    if sections.len() < 2 {
        return;
    }
    let mut best = 0;
    let mut best_len = usize::MAX;
    for i in 0..sections.len() - 1 {
        let combined = sections[i].content.len() + sections[i + 1].content.len();
        if combined < best_len {
            best_len = combined;
            best = i;
        }
    }
    let second = sections.remove(best + 1);
    let first = &mut sections[best];
    first.heading = format!("{} / {}", first.heading, second.heading);
    first.content = format!("{}\n\n{}", first.content, second.content);
}

/// 用运行自身的数据补齐到 MIN_SECTIONS；候选顺序固定，跳过与已有标题重名的候选
fn pad_sections(sections: &mut Vec<ReportSection>, query: &str, findings: &[Finding]) {
    let mut candidates: Vec<ReportSection> = Vec::new();

    let source_count: usize = findings.iter().map(|f| f.sources.len()).sum();
    candidates.push(ReportSection {
        heading: "Introduction".to_string(),
        content: format!(
            "This report provides an analysis of {}. The research was carried out across {} \
             subtasks and draws on {} sources from web search, academic papers and \
             encyclopedic references.",
            query,
            findings.len(),
            source_count
        ),
    });

    for finding in findings {
        let first_words: String = finding
            .summary
            .split_whitespace()
            .take(8)
            .collect::<Vec<_>>()
            .join(" ");
        candidates.push(ReportSection {
            heading: format!("Findings: {}", first_words),
            content: finding.summary.clone(),
        });
    }

    candidates.push(ReportSection {
        heading: "Sources and Evidence".to_string(),
        content: {
            let mut text = String::new();
            for finding in findings {
                text.push_str(&format!(
                    "Subtask {} drew on {} sources",
                    finding.subtask_id,
                    finding.sources.len()
                ));
                let titles: Vec<&str> = finding
                    .sources
                    .iter()
                    .take(3)
                    .map(|s| s.title.as_str())
                    .collect();
                if !titles.is_empty() {
                    text.push_str(&format!(" (including {})", titles.join(", ")));
                }
                text.push_str(".\n");
            }
            if text.is_empty() {
                text = "No external sources were available for this run.".to_string();
            }
            text
        },
    });

    let failures: Vec<String> = findings
        .iter()
        .flat_map(|f| f.tool_errors.iter().map(|e| e.to_string()))
        .collect();
    if !failures.is_empty() {
        candidates.push(ReportSection {
            heading: "Limitations".to_string(),
            content: format!(
                "Some knowledge sources failed during this run, so parts of the report rest \
                 on a reduced evidence base:\n{}",
                failures
                    .iter()
                    .map(|f| format!("- {}", f))
                    .collect::<Vec<_>>()
                    .join("\n")
            ),
        });
    }

    candidates.push(ReportSection {
        heading: "Conclusion".to_string(),
        content: format!(
            "This research covered {} through {} findings. The material above presents the \
             core concepts and the supporting evidence collected for each subtask.",
            query,
            findings.len()
        ),
    });

    for candidate in candidates {
        if sections.len() >= MIN_SECTIONS {
            break;
        }
        let duplicate = sections
            .iter()
            .any(|s| s.heading.eq_ignore_ascii_case(&candidate.heading));
        if !duplicate {
            sections.push(candidate);
        }
    }
}

/// 渲染为自包含纯文本文档：标题、摘要、编号章节、引用列表
pub fn render_text(report: &Report) -> String {
    let mut out = String::new();
    out.push_str(&report.title);
    out.push('\n');
    out.push_str(&"=".repeat(report.title.chars().count().min(80)));
    out.push_str(&format!(
        "\nGenerated: {}\n",
        report.generated_at.format("%Y-%m-%d %H:%M UTC")
    ));

    out.push_str("\nEXECUTIVE SUMMARY\n\n");
    out.push_str(&report.executive_summary);
    out.push('\n');

    for (i, section) in report.sections.iter().enumerate() {
        out.push_str(&format!("\n{}. {}\n\n", i + 1, section.heading));
        out.push_str(&section.content);
        out.push('\n');
    }

    out.push_str("\nREFERENCES\n\n");
    if report.references.is_empty() {
        out.push_str("(no external sources)\n");
    } else {
        for (i, source) in report.references.iter().enumerate() {
            out.push_str(&format!("[{}] {}\n    {}\n", i + 1, source.title, source.url));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolError, ToolId};

    fn make_finding(id: u32, urls: &[&str]) -> Finding {
        Finding {
            subtask_id: id,
            summary: format!("Summary text for subtask {} with enough words to quote", id),
            sources: urls
                .iter()
                .map(|u| Source {
                    title: format!("Source at {}", u),
                    url: u.to_string(),
                    snippet: "snippet".into(),
                })
                .collect(),
            tool_errors: vec![],
        }
    }

    fn payload_with_sections(n: usize) -> ReportPayload {
        ReportPayload {
            title: "T".into(),
            executive_summary: "S".into(),
            sections: (0..n)
                .map(|i| ReportSection {
                    heading: format!("H{}", i),
                    content: format!("content {}", i),
                })
                .collect(),
        }
    }

    #[test]
    fn test_oversized_report_merged_to_max() {
        let findings = [make_finding(1, &["https://a.org/1"])];
        let report = assemble("q", payload_with_sections(12), &findings);
        assert_eq!(report.sections.len(), MAX_SECTIONS);
    }

    #[test]
    fn test_undersized_report_padded_to_min() {
        let findings = [
            make_finding(1, &["https://a.org/1"]),
            make_finding(2, &["https://a.org/2"]),
        ];
        let report = assemble("q", payload_with_sections(2), &findings);
        assert!(report.sections.len() >= MIN_SECTIONS);
        assert!(report.sections.len() <= MAX_SECTIONS);
    }

    #[test]
    fn test_in_range_report_untouched() {
        let findings = [make_finding(1, &["https://a.org/1"])];
        let report = assemble("q", payload_with_sections(6), &findings);
        assert_eq!(report.sections.len(), 6);
        assert_eq!(report.sections[0].heading, "H0");
    }

    #[test]
    fn test_merge_picks_smallest_pair() {
        let mut sections = vec![
            ReportSection { heading: "A".into(), content: "x".repeat(500) },
            ReportSection { heading: "B".into(), content: "y".repeat(10) },
            ReportSection { heading: "C".into(), content: "z".repeat(10) },
        ];
        merge_smallest_adjacent(&mut sections);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].heading, "B / C");
    }

    #[test]
    fn test_references_deduped_first_wins() {
        let findings = [
            Finding {
                subtask_id: 1,
                summary: "s".into(),
                sources: vec![
                    Source {
                        title: "First".into(),
                        url: "https://a.org/x".into(),
                        snippet: "first snippet".into(),
                    },
                    Source {
                        title: "Other".into(),
                        url: "https://a.org/y".into(),
                        snippet: "other".into(),
                    },
                ],
                tool_errors: vec![],
            },
            Finding {
                subtask_id: 2,
                summary: "s".into(),
                sources: vec![Source {
                    title: "Duplicate".into(),
                    url: "https://a.org/x".into(),
                    snippet: "later snippet".into(),
                }],
                tool_errors: vec![],
            },
        ];
        let refs = dedup_references(&findings);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].snippet, "first snippet");
    }

    #[test]
    fn test_fallback_payload_reaches_min_sections() {
        let mut finding = make_finding(1, &[]);
        finding.tool_errors.push(ToolError {
            tool: ToolId::WebSearch,
            cause: "timed out".into(),
        });
        let payload = fallback_payload("llm agents", &[finding]);
        assert!(payload.sections.len() >= MIN_SECTIONS);
        assert!(payload
            .sections
            .iter()
            .any(|s| s.heading == "Limitations"));
    }

    #[test]
    fn test_render_text_is_self_contained() {
        let findings = [make_finding(1, &["https://a.org/1"])];
        let report = assemble("how do RAG systems work", payload_with_sections(5), &findings);
        let text = render_text(&report);
        assert!(text.contains("EXECUTIVE SUMMARY"));
        assert!(text.contains("1. H0"));
        assert!(text.contains("REFERENCES"));
        assert!(text.contains("https://a.org/1"));
    }
}
